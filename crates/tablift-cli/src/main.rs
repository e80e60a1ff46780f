mod commands;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "tablift", version, about = "Scheduled relational-to-Parquet ingestion service")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler until interrupted
    Serve {
        /// Path to the service configuration YAML
        #[arg(long, default_value = "service.yaml")]
        config: PathBuf,
    },
    /// Execute one dataset once and exit
    Run {
        /// Path to the service configuration YAML
        #[arg(long, default_value = "service.yaml")]
        config: PathBuf,
        /// Dataset id to execute
        #[arg(long)]
        dataset: String,
    },
    /// Validate the service configuration and every dataset spec
    Check {
        /// Path to the service configuration YAML
        #[arg(long, default_value = "service.yaml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    match cli.command {
        Commands::Serve { config } => commands::serve::execute(&config).await,
        Commands::Run { config, dataset } => commands::run::execute(&config, &dataset).await,
        Commands::Check { config } => commands::check::execute(&config).await,
    }
}
