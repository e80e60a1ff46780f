//! Driver for the stored-procedure family (SQL Server, tiberius).
//!
//! The query string is treated as a stored-procedure name unless it begins
//! with a SQL verb, in which case it runs as raw text. Procedure calls are
//! shaped as `EXEC proc @Name = @P1, …`; raw text has its named `@param`
//! placeholders rewritten to tiberius' positional `@PN` form. Parameters
//! bind by name with JSON scalars coerced along int32 → int64 → decimal →
//! float64 → string.

use super::{is_raw_sql_text, DataSource, ExtractError, ExtractRequest};
use async_trait::async_trait;
use bigdecimal::num_bigint::BigInt;
use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use std::sync::LazyLock;
use tablift_types::scalar::ParameterList;
use tablift_types::{ColumnDef, LogicalType, ScalarValue, SourceKind, TabularData, Value};
use tiberius::numeric::Numeric;
use tiberius::{Client, Column, ColumnType, Config, Query, Row};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tokio_util::sync::CancellationToken;

static NAMED_PARAM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@([A-Za-z_][A-Za-z0-9_]*)").expect("valid param regex"));

/// Extraction driver for the stored-procedure database family.
#[derive(Debug, Default)]
pub struct MssqlSource;

#[async_trait]
impl DataSource for MssqlSource {
    async fn extract(
        &self,
        request: &ExtractRequest,
        cancel: &CancellationToken,
    ) -> Result<TabularData, ExtractError> {
        let work = run_extraction(request);
        tokio::select! {
            _ = cancel.cancelled() => Err(ExtractError::Cancelled),
            outcome = tokio::time::timeout(request.command_timeout, work) => match outcome {
                Ok(result) => result,
                Err(_) => Err(ExtractError::Timeout(request.command_timeout)),
            },
        }
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Mssql
    }
}

async fn run_extraction(request: &ExtractRequest) -> Result<TabularData, ExtractError> {
    let mut client = connect(&request.connection_string).await?;

    let (sql, bind_values) = build_command(&request.query, &request.parameters);
    tracing::debug!(sql = %sql, params = bind_values.len(), "Executing extraction");

    let mut query = Query::new(sql);
    for value in &bind_values {
        bind_scalar(&mut query, value);
    }

    let mut stream = query
        .query(&mut client)
        .await
        .map_err(ExtractError::wrap)?;
    let columns: Vec<Column> = stream
        .columns()
        .await
        .map_err(ExtractError::wrap)?
        .map(<[Column]>::to_vec)
        .unwrap_or_default();
    let result_sets = stream.into_results().await.map_err(ExtractError::wrap)?;
    let rows = result_sets.into_iter().next().unwrap_or_default();

    rows_to_table(&columns, rows)
}

async fn connect(connection_string: &str) -> Result<Client<Compat<TcpStream>>, ExtractError> {
    let config = Config::from_ado_string(connection_string).map_err(ExtractError::wrap)?;
    let tcp = TcpStream::connect(config.get_addr())
        .await
        .map_err(ExtractError::wrap)?;
    tcp.set_nodelay(true).map_err(ExtractError::wrap)?;
    Client::connect(config, tcp.compat_write())
        .await
        .map_err(ExtractError::wrap)
}

/// Shape the command and the ordered bind list.
///
/// Raw text keeps its own placeholder order; procedure calls bind every
/// parameter in declaration order under its own name.
fn build_command(query: &str, parameters: &ParameterList) -> (String, Vec<ScalarValue>) {
    if is_raw_sql_text(query) {
        rewrite_named_placeholders(query, parameters)
    } else {
        let mut assignments = Vec::with_capacity(parameters.len());
        let mut binds = Vec::with_capacity(parameters.len());
        for (position, (name, value)) in parameters.iter().enumerate() {
            let bare = name.trim_start_matches('@');
            assignments.push(format!("@{bare} = @P{}", position + 1));
            binds.push(value.clone());
        }
        let sql = if assignments.is_empty() {
            format!("EXEC {query}")
        } else {
            format!("EXEC {query} {}", assignments.join(", "))
        };
        (sql, binds)
    }
}

/// Rewrite `@Name` placeholders in raw text to positional `@PN` binds.
///
/// Every occurrence gets its own positional slot; placeholders with no
/// matching parameter (case-insensitive) are left untouched.
fn rewrite_named_placeholders(
    sql: &str,
    parameters: &ParameterList,
) -> (String, Vec<ScalarValue>) {
    let mut binds = Vec::new();
    let rewritten = NAMED_PARAM_RE.replace_all(sql, |caps: &regex::Captures<'_>| {
        let name = &caps[1];
        match parameters
            .iter()
            .find(|(key, _)| key.trim_start_matches('@').eq_ignore_ascii_case(name))
        {
            Some((_, value)) => {
                binds.push(value.clone());
                format!("@P{}", binds.len())
            }
            None => caps[0].to_string(),
        }
    });
    (rewritten.into_owned(), binds)
}

fn bind_scalar(query: &mut Query<'_>, value: &ScalarValue) {
    match value {
        ScalarValue::Null => query.bind(Option::<String>::None),
        ScalarValue::Bool(b) => query.bind(*b),
        ScalarValue::Int32(i) => query.bind(*i),
        ScalarValue::Int64(i) => query.bind(*i),
        ScalarValue::Decimal(d) => query.bind(decimal_to_numeric(d)),
        ScalarValue::Float64(f) => query.bind(*f),
        ScalarValue::Text(s) => query.bind(s.clone()),
    }
}

const MAX_NUMERIC_SCALE: i64 = 28;
const FALLBACK_NUMERIC_SCALE: i64 = 10;

fn decimal_to_numeric(value: &BigDecimal) -> Numeric {
    let (mantissa, exponent) = value.as_bigint_and_exponent();
    if (0..=MAX_NUMERIC_SCALE).contains(&exponent) {
        if let Some(m) = mantissa.to_i128() {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            return Numeric::new_with_scale(m, exponent as u8);
        }
    }
    let rescaled = value.with_scale(FALLBACK_NUMERIC_SCALE);
    let (mantissa, exponent) = rescaled.as_bigint_and_exponent();
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Numeric::new_with_scale(mantissa.to_i128().unwrap_or_default(), exponent as u8)
}

fn logical_type(column_type: ColumnType) -> LogicalType {
    use ColumnType as C;
    match column_type {
        C::Int1 | C::Int2 | C::Int4 => LogicalType::Int32,
        C::Int8 | C::Intn => LogicalType::Int64,
        C::Float4 | C::Float8 | C::Floatn => LogicalType::Float64,
        C::Bit | C::Bitn => LogicalType::Bool,
        C::Decimaln | C::Numericn | C::Money | C::Money4 => LogicalType::Decimal,
        C::Datetime | C::Datetime4 | C::Datetimen | C::Datetime2 | C::DatetimeOffsetn => {
            LogicalType::Timestamp
        }
        C::BigVarBin | C::BigBinary | C::Image => LogicalType::Binary,
        // Guid, strings, XML, and anything newer all travel as text.
        _ => LogicalType::String,
    }
}

fn rows_to_table(columns: &[Column], rows: Vec<Row>) -> Result<TabularData, ExtractError> {
    let schema: Vec<ColumnDef> = columns
        .iter()
        .map(|c| ColumnDef::new(c.name(), logical_type(c.column_type()), true))
        .collect();
    let mut table = TabularData::new(schema);

    for row in rows {
        let mut cells = Vec::with_capacity(columns.len());
        for (idx, column) in columns.iter().enumerate() {
            cells.push(read_cell(&row, idx, column.column_type())?);
        }
        table.push_row(cells).map_err(ExtractError::wrap)?;
    }
    Ok(table)
}

fn read_cell(row: &Row, idx: usize, column_type: ColumnType) -> Result<Value, ExtractError> {
    use ColumnType as C;
    let value = match column_type {
        C::Int1 => row
            .try_get::<u8, _>(idx)
            .map_err(ExtractError::wrap)?
            .map(|v| Value::Int32(i32::from(v))),
        C::Int2 => row
            .try_get::<i16, _>(idx)
            .map_err(ExtractError::wrap)?
            .map(|v| Value::Int32(i32::from(v))),
        C::Int4 => row
            .try_get::<i32, _>(idx)
            .map_err(ExtractError::wrap)?
            .map(Value::Int32),
        C::Int8 => row
            .try_get::<i64, _>(idx)
            .map_err(ExtractError::wrap)?
            .map(Value::Int64),
        C::Intn => read_flexible_int(row, idx)?,
        C::Float4 => row
            .try_get::<f32, _>(idx)
            .map_err(ExtractError::wrap)?
            .map(|v| Value::Float64(f64::from(v))),
        C::Float8 | C::Floatn => read_flexible_float(row, idx)?,
        C::Bit | C::Bitn => row
            .try_get::<bool, _>(idx)
            .map_err(ExtractError::wrap)?
            .map(Value::Bool),
        C::Decimaln | C::Numericn | C::Money | C::Money4 => read_decimal(row, idx)?,
        C::DatetimeOffsetn => row
            .try_get::<DateTime<Utc>, _>(idx)
            .map_err(ExtractError::wrap)?
            .map(|v| Value::Timestamp(v.naive_utc())),
        C::Datetime | C::Datetime4 | C::Datetimen | C::Datetime2 => row
            .try_get::<NaiveDateTime, _>(idx)
            .map_err(ExtractError::wrap)?
            .map(Value::Timestamp),
        C::Guid => row
            .try_get::<uuid::Uuid, _>(idx)
            .map_err(ExtractError::wrap)?
            .map(|v| Value::Text(v.to_string())),
        C::BigVarBin | C::BigBinary | C::Image => row
            .try_get::<&[u8], _>(idx)
            .map_err(ExtractError::wrap)?
            .map(|v| Value::Binary(v.to_vec())),
        _ => row
            .try_get::<&str, _>(idx)
            .map_err(ExtractError::wrap)?
            .map(|v| Value::Text(v.to_string())),
    };
    Ok(value.unwrap_or(Value::Null))
}

/// `Intn` carries whichever width the server stored; try widest first.
fn read_flexible_int(row: &Row, idx: usize) -> Result<Option<Value>, ExtractError> {
    if let Ok(v) = row.try_get::<i64, _>(idx) {
        return Ok(v.map(Value::Int64));
    }
    if let Ok(v) = row.try_get::<i32, _>(idx) {
        return Ok(v.map(|v| Value::Int64(i64::from(v))));
    }
    if let Ok(v) = row.try_get::<i16, _>(idx) {
        return Ok(v.map(|v| Value::Int64(i64::from(v))));
    }
    row.try_get::<u8, _>(idx)
        .map(|v| v.map(|v| Value::Int64(i64::from(v))))
        .map_err(ExtractError::wrap)
}

fn read_flexible_float(row: &Row, idx: usize) -> Result<Option<Value>, ExtractError> {
    if let Ok(v) = row.try_get::<f64, _>(idx) {
        return Ok(v.map(Value::Float64));
    }
    row.try_get::<f32, _>(idx)
        .map(|v| v.map(|v| Value::Float64(f64::from(v))))
        .map_err(ExtractError::wrap)
}

fn read_decimal(row: &Row, idx: usize) -> Result<Option<Value>, ExtractError> {
    if let Ok(v) = row.try_get::<Numeric, _>(idx) {
        return Ok(v.map(|n| {
            Value::Decimal(BigDecimal::new(BigInt::from(n.value()), i64::from(n.scale())))
        }));
    }
    row.try_get::<f64, _>(idx)
        .map(|v| {
            v.map(|f| {
                BigDecimal::try_from(f)
                    .map(Value::Decimal)
                    .unwrap_or(Value::Float64(f))
            })
        })
        .map_err(ExtractError::wrap)
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
    fn procedure_call_binds_every_parameter_by_name() {
        let (sql, binds) = build_command(
            "dbo.sp_GetDailyTrades",
            &params(&[
                ("StartDate", ScalarValue::Text("2024-01-01".into())),
                ("EndDate", ScalarValue::Text("2025-12-31".into())),
            ]),
        );
        assert_eq!(
            sql,
            "EXEC dbo.sp_GetDailyTrades @StartDate = @P1, @EndDate = @P2"
        );
        assert_eq!(binds.len(), 2);
    }

    #[test]
    fn procedure_call_without_parameters_is_bare_exec() {
        let (sql, binds) = build_command("dbo.sp_Refresh", &params(&[]));
        assert_eq!(sql, "EXEC dbo.sp_Refresh");
        assert!(binds.is_empty());
    }

    #[test]
    fn leading_at_signs_in_names_are_tolerated() {
        let (sql, _) = build_command(
            "dbo.sp_X",
            &params(&[("@Limit", ScalarValue::Int32(10))]),
        );
        assert_eq!(sql, "EXEC dbo.sp_X @Limit = @P1");
    }

    #[test]
    fn raw_text_rewrites_named_placeholders_positionally() {
        let (sql, binds) = build_command(
            "SELECT * FROM trades WHERE ts >= @StartDate AND ts < @EndDate",
            &params(&[
                ("StartDate", ScalarValue::Text("2024-01-01".into())),
                ("EndDate", ScalarValue::Text("2025-12-31".into())),
            ]),
        );
        assert_eq!(
            sql,
            "SELECT * FROM trades WHERE ts >= @P1 AND ts < @P2"
        );
        assert_eq!(binds.len(), 2);
    }

    #[test]
    fn repeated_placeholder_gets_its_own_slot_per_occurrence() {
        let (sql, binds) = build_command(
            "SELECT @Day AS d1, @Day AS d2",
            &params(&[("Day", ScalarValue::Int32(5))]),
        );
        assert_eq!(sql, "SELECT @P1 AS d1, @P2 AS d2");
        assert_eq!(binds, vec![ScalarValue::Int32(5), ScalarValue::Int32(5)]);
    }

    #[test]
    fn placeholder_lookup_is_case_insensitive() {
        let (sql, binds) = build_command(
            "SELECT * FROM t WHERE a = @startdate",
            &params(&[("StartDate", ScalarValue::Int32(1))]),
        );
        assert_eq!(sql, "SELECT * FROM t WHERE a = @P1");
        assert_eq!(binds.len(), 1);
    }

    #[test]
    fn unknown_placeholders_are_left_alone() {
        let (sql, binds) = build_command(
            "SELECT @@ROWCOUNT, @Known FROM t",
            &params(&[("Known", ScalarValue::Int32(1))]),
        );
        assert_eq!(sql, "SELECT @@ROWCOUNT, @P1 FROM t");
        assert_eq!(binds.len(), 1);
    }

    #[test]
    fn column_types_map_onto_logical_types() {
        assert_eq!(logical_type(ColumnType::Int4), LogicalType::Int32);
        assert_eq!(logical_type(ColumnType::Int8), LogicalType::Int64);
        assert_eq!(logical_type(ColumnType::Floatn), LogicalType::Float64);
        assert_eq!(logical_type(ColumnType::Bitn), LogicalType::Bool);
        assert_eq!(logical_type(ColumnType::Numericn), LogicalType::Decimal);
        assert_eq!(logical_type(ColumnType::Datetime2), LogicalType::Timestamp);
        assert_eq!(
            logical_type(ColumnType::DatetimeOffsetn),
            LogicalType::Timestamp
        );
        assert_eq!(logical_type(ColumnType::Guid), LogicalType::String);
        assert_eq!(logical_type(ColumnType::BigVarBin), LogicalType::Binary);
        assert_eq!(logical_type(ColumnType::Xml), LogicalType::String);
    }

    #[test]
    fn decimals_convert_to_numeric_with_scale() {
        let d: BigDecimal = "123.45".parse().unwrap();
        let n = decimal_to_numeric(&d);
        assert_eq!(n.value(), 12_345);
        assert_eq!(n.scale(), 2);
    }

    #[test]
    fn oversized_scale_falls_back_to_default() {
        let d: BigDecimal = "1e-40".parse().unwrap();
        let n = decimal_to_numeric(&d);
        assert_eq!(i64::from(n.scale()), FALLBACK_NUMERIC_SCALE);
    }
}
