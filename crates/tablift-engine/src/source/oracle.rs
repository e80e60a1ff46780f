//! Driver for the output-cursor family (Oracle).
//!
//! Procedures return their result set through a trailing OUT parameter
//! named exactly `p_cursor`: the driver shapes an anonymous block
//! `BEGIN proc(:a, :b, :p_cursor); END;`, binds inputs in the parameter
//! map's iteration order (leading colons stripped), declares the ref-cursor
//! placeholder, and reads rows from the cursor after the call returns. Raw
//! `SELECT …` text executes directly with no cursor attached.
//!
//! The underlying client is blocking, so every extraction runs on the
//! blocking pool and is raced against cancellation and the command timeout.

use super::{is_raw_sql_text, DataSource, ExtractError, ExtractRequest};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDateTime, Utc};
use oracle::sql_type::{OracleType, RefCursor, ToSql};
use oracle::{Connection, ResultSet, Row};
use tablift_types::scalar::ParameterList;
use tablift_types::{ColumnDef, LogicalType, ScalarValue, SourceKind, TabularData, Value};
use tokio_util::sync::CancellationToken;

/// Name of the trailing output-cursor parameter every procedure exposes.
const CURSOR_PARAM: &str = "p_cursor";

/// Extraction driver for the output-cursor database family.
#[derive(Debug, Default)]
pub struct OracleSource;

#[async_trait]
impl DataSource for OracleSource {
    async fn extract(
        &self,
        request: &ExtractRequest,
        cancel: &CancellationToken,
    ) -> Result<TabularData, ExtractError> {
        let owned = request.clone();
        let handle = tokio::task::spawn_blocking(move || extract_blocking(&owned));

        tokio::select! {
            _ = cancel.cancelled() => Err(ExtractError::Cancelled),
            outcome = tokio::time::timeout(request.command_timeout, handle) => match outcome {
                Ok(Ok(result)) => result,
                Ok(Err(join_err)) => Err(ExtractError::Failed(format!(
                    "extraction task panicked: {join_err}"
                ))),
                Err(_) => Err(ExtractError::Timeout(request.command_timeout)),
            },
        }
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Oracle
    }
}

fn extract_blocking(request: &ExtractRequest) -> Result<TabularData, ExtractError> {
    let (user, password, connect_descriptor) = split_connect_string(&request.connection_string)?;
    let conn = Connection::connect(&user, &password, &connect_descriptor)
        .map_err(ExtractError::wrap)?;

    let result = if is_raw_sql_text(&request.query) {
        extract_text(&conn, &request.query, &request.parameters)
    } else {
        extract_procedure(&conn, &request.query, &request.parameters)
    };
    // Close eagerly; dropping would also close but swallows errors.
    let _ = conn.close();
    result
}

/// Raw SQL text: execute directly and stream rows, no cursor attached.
///
/// Only parameters actually referenced as `:name` in the text are bound;
/// the server rejects binds that do not appear in the statement.
fn extract_text(
    conn: &Connection,
    sql: &str,
    parameters: &ParameterList,
) -> Result<TabularData, ExtractError> {
    let lowered = sql.to_ascii_lowercase();
    let binds: Vec<(String, Box<dyn ToSql>)> = input_binds(parameters)
        .into_iter()
        .filter(|(name, _)| lowered.contains(&format!(":{}", name.to_ascii_lowercase())))
        .collect();
    let bind_refs = bind_refs(&binds);
    let mut stmt = conn.statement(sql).build().map_err(ExtractError::wrap)?;
    let rows = stmt
        .query_named(&bind_refs)
        .map_err(ExtractError::wrap)?;
    rows_to_table(rows)
}

/// Procedure call: anonymous block with the trailing `p_cursor` OUT bind.
///
/// A dot in the name means a package-qualified procedure; the block shape
/// is identical either way.
fn extract_procedure(
    conn: &Connection,
    procedure: &str,
    parameters: &ParameterList,
) -> Result<TabularData, ExtractError> {
    if procedure.contains('.') {
        tracing::debug!(procedure, "Executing package-qualified procedure");
    } else {
        tracing::debug!(procedure, "Executing stored procedure");
    }

    let binds = input_binds(parameters);
    let placeholders: Vec<String> = binds
        .iter()
        .map(|(name, _)| format!(":{name}"))
        .chain(std::iter::once(format!(":{CURSOR_PARAM}")))
        .collect();
    let block = format!("BEGIN {procedure}({}); END;", placeholders.join(", "));

    let mut stmt = conn.statement(&block).build().map_err(ExtractError::wrap)?;
    let mut bind_refs = bind_refs(&binds);
    bind_refs.push((CURSOR_PARAM, &OracleType::RefCursor));
    stmt.execute_named(&bind_refs).map_err(ExtractError::wrap)?;

    let mut cursor: RefCursor = stmt
        .bind_value(CURSOR_PARAM)
        .map_err(ExtractError::wrap)?;
    let rows = cursor.query().map_err(ExtractError::wrap)?;
    rows_to_table(rows)
}

/// Materialize owned bind values, stripping any leading colon from names.
fn input_binds(parameters: &ParameterList) -> Vec<(String, Box<dyn ToSql>)> {
    parameters
        .iter()
        .map(|(name, value)| {
            let bare = name.trim_start_matches(':').to_string();
            (bare, scalar_to_sql(value))
        })
        .collect()
}

fn bind_refs<'a>(binds: &'a [(String, Box<dyn ToSql>)]) -> Vec<(&'a str, &'a dyn ToSql)> {
    binds
        .iter()
        .map(|(name, value)| (name.as_str(), value.as_ref()))
        .collect()
}

fn scalar_to_sql(value: &ScalarValue) -> Box<dyn ToSql> {
    match value {
        // Typed SQL null sentinel.
        ScalarValue::Null => Box::new(None::<String>),
        // No SQL boolean in this family; procedures take 0/1 flags.
        ScalarValue::Bool(b) => Box::new(i32::from(*b)),
        ScalarValue::Int32(i) => Box::new(*i),
        ScalarValue::Int64(i) => Box::new(*i),
        // Bound as text; the server coerces to NUMBER without losing digits.
        ScalarValue::Decimal(d) => Box::new(d.to_string()),
        ScalarValue::Float64(f) => Box::new(*f),
        ScalarValue::Text(s) => Box::new(s.clone()),
    }
}

fn logical_type(oracle_type: &OracleType) -> LogicalType {
    match oracle_type {
        OracleType::Number(precision, scale) => {
            if *scale == 0 && *precision > 0 && *precision <= 18 {
                LogicalType::Int64
            } else {
                LogicalType::Decimal
            }
        }
        OracleType::Int64 => LogicalType::Int64,
        OracleType::Float(_) | OracleType::BinaryFloat | OracleType::BinaryDouble => {
            LogicalType::Float64
        }
        OracleType::Boolean => LogicalType::Bool,
        OracleType::Date | OracleType::Timestamp(_) | OracleType::TimestampLTZ(_) => {
            LogicalType::Timestamp
        }
        OracleType::TimestampTZ(_) => LogicalType::Timestamp,
        OracleType::Raw(_) | OracleType::LongRaw | OracleType::BLOB => LogicalType::Binary,
        _ => LogicalType::String,
    }
}

fn rows_to_table(rows: ResultSet<'_, Row>) -> Result<TabularData, ExtractError> {
    let schema: Vec<(ColumnDef, OracleType)> = rows
        .column_info()
        .iter()
        .map(|info| {
            (
                ColumnDef::new(info.name(), logical_type(info.oracle_type()), true),
                info.oracle_type().clone(),
            )
        })
        .collect();
    let mut table = TabularData::new(schema.iter().map(|(def, _)| def.clone()).collect());

    for row_result in rows {
        let row = row_result.map_err(ExtractError::wrap)?;
        let mut cells = Vec::with_capacity(schema.len());
        for (idx, (def, oracle_type)) in schema.iter().enumerate() {
            cells.push(read_cell(&row, idx, def.logical_type, oracle_type)?);
        }
        table.push_row(cells).map_err(ExtractError::wrap)?;
    }
    Ok(table)
}

fn read_cell(
    row: &Row,
    idx: usize,
    logical: LogicalType,
    oracle_type: &OracleType,
) -> Result<Value, ExtractError> {
    let value = match logical {
        LogicalType::Int64 | LogicalType::Int32 => row
            .get::<usize, Option<i64>>(idx)
            .map_err(ExtractError::wrap)?
            .map(Value::Int64),
        // NUMBER read as text to keep every digit, then parsed exactly.
        LogicalType::Decimal => row
            .get::<usize, Option<String>>(idx)
            .map_err(ExtractError::wrap)?
            .map(|text| {
                text.parse::<BigDecimal>()
                    .map(Value::Decimal)
                    .unwrap_or(Value::Text(text))
            }),
        LogicalType::Float64 => row
            .get::<usize, Option<f64>>(idx)
            .map_err(ExtractError::wrap)?
            .map(Value::Float64),
        LogicalType::Bool => row
            .get::<usize, Option<bool>>(idx)
            .map_err(ExtractError::wrap)?
            .map(Value::Bool),
        LogicalType::Timestamp => {
            if matches!(oracle_type, OracleType::TimestampTZ(_)) {
                row.get::<usize, Option<DateTime<Utc>>>(idx)
                    .map_err(ExtractError::wrap)?
                    .map(|v| Value::Timestamp(v.naive_utc()))
            } else {
                row.get::<usize, Option<NaiveDateTime>>(idx)
                    .map_err(ExtractError::wrap)?
                    .map(Value::Timestamp)
            }
        }
        LogicalType::Binary => row
            .get::<usize, Option<Vec<u8>>>(idx)
            .map_err(ExtractError::wrap)?
            .map(Value::Binary),
        LogicalType::String => row
            .get::<usize, Option<String>>(idx)
            .map_err(ExtractError::wrap)?
            .map(Value::Text),
    };
    Ok(value.unwrap_or(Value::Null))
}

/// Split a `User Id=…;Password=…;Data Source=…` connection string.
fn split_connect_string(raw: &str) -> Result<(String, String, String), ExtractError> {
    let mut user = None;
    let mut password = None;
    let mut data_source = None;

    for pair in raw.split(';') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        match key.trim().to_ascii_lowercase().as_str() {
            "user id" | "user" => user = Some(value.trim().to_string()),
            "password" => password = Some(value.trim().to_string()),
            "data source" | "server" => data_source = Some(value.trim().to_string()),
            _ => {}
        }
    }

    match (user, password, data_source) {
        (Some(u), Some(p), Some(d)) => Ok((u, p, d)),
        _ => Err(ExtractError::Failed(
            "connection string must carry 'User Id', 'Password', and 'Data Source'".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, ScalarValue)]) -> ParameterList {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn connect_string_splits_into_parts() {
        let (user, password, descriptor) = split_connect_string(
            "User Id=ingest;Password=p@ss;Data Source=db.example.com:1521/ORCLPDB1",
        )
        .unwrap();
        assert_eq!(user, "ingest");
        assert_eq!(password, "p@ss");
        assert_eq!(descriptor, "db.example.com:1521/ORCLPDB1");
    }

    #[test]
    fn connect_string_keys_are_case_insensitive() {
        let (user, _, _) =
            split_connect_string("USER ID=u;PASSWORD=p;DATA SOURCE=host/svc").unwrap();
        assert_eq!(user, "u");
    }

    #[test]
    fn incomplete_connect_string_is_rejected() {
        assert!(split_connect_string("User Id=u;Password=p").is_err());
    }

    #[test]
    fn input_binds_strip_leading_colons() {
        let binds = input_binds(&params(&[
            (":p_start", ScalarValue::Text("2024-01-01".into())),
            ("p_end", ScalarValue::Text("2024-02-01".into())),
        ]));
        assert_eq!(binds[0].0, "p_start");
        assert_eq!(binds[1].0, "p_end");
    }

    #[test]
    fn number_types_split_between_int_and_decimal() {
        assert_eq!(logical_type(&OracleType::Number(10, 0)), LogicalType::Int64);
        assert_eq!(
            logical_type(&OracleType::Number(38, 2)),
            LogicalType::Decimal
        );
        // Unconstrained NUMBER keeps exactness.
        assert_eq!(logical_type(&OracleType::Number(0, 0)), LogicalType::Decimal);
    }

    #[test]
    fn temporal_and_binary_types_map_over() {
        assert_eq!(logical_type(&OracleType::Date), LogicalType::Timestamp);
        assert_eq!(
            logical_type(&OracleType::TimestampTZ(6)),
            LogicalType::Timestamp
        );
        assert_eq!(logical_type(&OracleType::BLOB), LogicalType::Binary);
        assert_eq!(
            logical_type(&OracleType::Varchar2(100)),
            LogicalType::String
        );
        assert_eq!(logical_type(&OracleType::Rowid), LogicalType::String);
    }
}
