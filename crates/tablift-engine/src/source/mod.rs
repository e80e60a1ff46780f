//! Data-source drivers.
//!
//! Every driver implements the same contract: open a connection, execute a
//! named extraction, and return the result as [`TabularData`]. The two
//! shipped families differ in command shape: the stored-procedure family
//! executes `EXEC proc @p = …`, the output-cursor family appends a trailing
//! `p_cursor` ref-cursor and reads rows from it after the call returns.

pub mod mssql;
pub mod oracle;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tablift_types::scalar::ParameterList;
use tablift_types::{SourceKind, TabularData};
use tokio_util::sync::CancellationToken;

pub use mssql::MssqlSource;
pub use oracle::OracleSource;

/// Failure modes of an extraction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractError {
    #[error("extraction failed: {0}")]
    Failed(String),
    #[error("extraction timed out after {0:?}")]
    Timeout(Duration),
    #[error("extraction cancelled")]
    Cancelled,
}

impl ExtractError {
    /// Wrap a driver error, preserving its message.
    pub fn wrap(err: impl std::fmt::Display) -> Self {
        Self::Failed(err.to_string())
    }
}

/// One extraction to run.
#[derive(Debug, Clone)]
pub struct ExtractRequest {
    pub connection_string: String,
    /// Stored-procedure name, package-qualified name, or raw SQL text.
    pub query: String,
    /// Ordered parameters; the output-cursor driver binds them in exactly
    /// this order.
    pub parameters: ParameterList,
    pub command_timeout: Duration,
}

/// A driver for one database family.
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn extract(
        &self,
        request: &ExtractRequest,
        cancel: &CancellationToken,
    ) -> Result<TabularData, ExtractError>;

    fn kind(&self) -> SourceKind;
}

/// Hands out a driver per source kind.
pub trait DataSourceFactory: Send + Sync {
    fn create(&self, kind: SourceKind) -> Arc<dyn DataSource>;
}

/// The production factory over the real drivers.
#[derive(Default)]
pub struct DriverFactory {
    mssql: Arc<MssqlSource>,
    oracle: Arc<OracleSource>,
}

impl DataSourceFactory for DriverFactory {
    fn create(&self, kind: SourceKind) -> Arc<dyn DataSource> {
        match kind {
            SourceKind::Mssql => Arc::clone(&self.mssql) as Arc<dyn DataSource>,
            SourceKind::Oracle => Arc::clone(&self.oracle) as Arc<dyn DataSource>,
        }
    }
}

const RAW_TEXT_KEYWORDS: [&str; 7] = [
    "SELECT", "WITH", "EXEC", "EXECUTE", "INSERT", "UPDATE", "DELETE",
];

/// Whether `query` is raw SQL text rather than a procedure name.
///
/// Detection: the trimmed query begins (case-insensitively) with one of the
/// SQL verbs, followed by a non-identifier character or end of input.
pub(crate) fn is_raw_sql_text(query: &str) -> bool {
    let trimmed = query.trim_start();
    RAW_TEXT_KEYWORDS.iter().any(|keyword| {
        trimmed.len() >= keyword.len()
            && trimmed[..keyword.len()].eq_ignore_ascii_case(keyword)
            && trimmed[keyword.len()..]
                .chars()
                .next()
                .map_or(true, |c| !c.is_alphanumeric() && c != '_')
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sql_verbs_are_raw_text() {
        assert!(is_raw_sql_text("SELECT 1"));
        assert!(is_raw_sql_text("  select * from t"));
        assert!(is_raw_sql_text("WITH cte AS (SELECT 1) SELECT * FROM cte"));
        assert!(is_raw_sql_text("exec dbo.sp_x @a = 1"));
        assert!(is_raw_sql_text("EXECUTE dbo.sp_x"));
        assert!(is_raw_sql_text("insert into t values (1)"));
        assert!(is_raw_sql_text("UPDATE t SET a = 1"));
        assert!(is_raw_sql_text("delete from t"));
    }

    #[test]
    fn procedure_names_are_not_raw_text() {
        assert!(!is_raw_sql_text("dbo.sp_GetDailyTrades"));
        assert!(!is_raw_sql_text("HR_PKG.GET_EMPLOYEES"));
        assert!(!is_raw_sql_text("refresh_positions"));
        // Identifier that merely starts with a verb.
        assert!(!is_raw_sql_text("selection_proc"));
        assert!(!is_raw_sql_text("updater"));
    }

    #[test]
    fn bare_verb_counts_as_raw_text() {
        assert!(is_raw_sql_text("SELECT"));
    }

    #[test]
    fn factory_returns_the_matching_family() {
        let factory = DriverFactory::default();
        assert_eq!(factory.create(SourceKind::Mssql).kind(), SourceKind::Mssql);
        assert_eq!(
            factory.create(SourceKind::Oracle).kind(),
            SourceKind::Oracle
        );
    }
}
