//! Artifact file-name rendering.
//!
//! Patterns substitute `{date:FORMAT}` / `{time:FORMAT}` tokens plus the
//! bare `{date}` / `{time}` forms, all evaluated at the current UTC time.
//! Formats use the `yyyyMMdd`-style token alphabet dataset authors already
//! know; unknown characters pass through verbatim.

use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::LazyLock;

static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{(date|time)(?::([^}]+))?\}").expect("valid token regex"));

const DEFAULT_DATE_FORMAT: &str = "yyyyMMdd";
const DEFAULT_TIME_FORMAT: &str = "HHmmss";

/// Render `pattern` with date/time substitutions at `now`.
pub fn render_file_name(pattern: &str, now: DateTime<Utc>) -> String {
    TOKEN_RE
        .replace_all(pattern, |caps: &regex::Captures<'_>| {
            let format = caps.get(2).map_or_else(
                || {
                    if &caps[1] == "date" {
                        DEFAULT_DATE_FORMAT
                    } else {
                        DEFAULT_TIME_FORMAT
                    }
                },
                |m| m.as_str(),
            );
            now.format(&to_chrono_format(format)).to_string()
        })
        .into_owned()
}

/// Translate a `yyyyMMdd`-style format into chrono's strftime alphabet.
fn to_chrono_format(format: &str) -> String {
    let mut out = String::with_capacity(format.len() * 2);
    let mut chars = format.chars().peekable();

    while let Some(c) = chars.next() {
        let mut run = 1;
        while chars.peek() == Some(&c) {
            chars.next();
            run += 1;
        }
        match (c, run) {
            ('y', 4) => out.push_str("%Y"),
            ('y', 2) => out.push_str("%y"),
            ('M', 2) => out.push_str("%m"),
            ('d', 2) => out.push_str("%d"),
            ('H', 2) => out.push_str("%H"),
            ('m', 2) => out.push_str("%M"),
            ('s', 2) => out.push_str("%S"),
            _ => {
                for _ in 0..run {
                    out.push(c);
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn clock() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 9, 30, 5).unwrap()
    }

    #[test]
    fn date_and_time_tokens_render() {
        assert_eq!(
            render_file_name("tr_{date:yyyyMMdd}.parquet", clock()),
            "tr_20240115.parquet"
        );
        assert_eq!(
            render_file_name("tr_{date:yyyyMMdd}_{time:HHmmss}.parquet", clock()),
            "tr_20240115_093005.parquet"
        );
    }

    #[test]
    fn bare_tokens_use_the_default_formats() {
        assert_eq!(
            render_file_name("{date}-{time}.parquet", clock()),
            "20240115-093005.parquet"
        );
    }

    #[test]
    fn patterns_without_tokens_pass_through() {
        assert_eq!(
            render_file_name("static-name.parquet", clock()),
            "static-name.parquet"
        );
    }

    #[test]
    fn custom_separators_inside_formats_survive() {
        assert_eq!(
            render_file_name("{date:yyyy-MM-dd}.parquet", clock()),
            "2024-01-15.parquet"
        );
    }

    #[test]
    fn two_digit_year_renders() {
        assert_eq!(render_file_name("{date:yyMMdd}", clock()), "240115");
    }
}
