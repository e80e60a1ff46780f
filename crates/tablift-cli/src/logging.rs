use tracing_subscriber::EnvFilter;

/// Initialize structured logging for the service.
///
/// `RUST_LOG` wins when set; otherwise the `--log-level` flag supplies the
/// default directive. Module targets are only shown at debug and below,
/// where per-component paths start to matter.
pub fn init(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let verbose = matches!(log_level, "debug" | "trace");

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(verbose)
        .init();
}
