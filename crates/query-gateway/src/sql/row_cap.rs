//! Row-cap enforcement for generated statements.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static! {
    static ref LIMIT_TOKEN: Regex = Regex::new(r"(?i)\bLIMIT\s+\d+").unwrap();
}

/// Row-limiting clause flavour of the target database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SqlDialect {
    /// `SELECT TOP n ...`
    TSql,
    /// `SELECT ... LIMIT n`
    Sqlite,
}

impl SqlDialect {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "tsql" | "t-sql" | "mssql" | "sqlserver" => Some(SqlDialect::TSql),
            "sqlite" => Some(SqlDialect::Sqlite),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SqlDialect::TSql => "T-SQL for SQL Server",
            SqlDialect::Sqlite => "SQLite SQL",
        }
    }

    /// Instruction fragment telling the model how to bound a large result.
    pub fn limit_hint(&self, max_rows: usize) -> String {
        match self {
            SqlDialect::TSql => format!("Use TOP if the result could be large (default TOP {}).", max_rows),
            SqlDialect::Sqlite => {
                format!("Use LIMIT if the result could be large (default LIMIT {}).", max_rows)
            }
        }
    }

    /// Add this dialect's row limit when the statement has none. Existing
    /// limits are kept as written, whatever their value.
    pub fn cap(&self, sql: &str, max_rows: usize) -> String {
        match self {
            SqlDialect::TSql => capped(sql, max_rows),
            SqlDialect::Sqlite => capped_with_limit(sql, max_rows),
        }
    }
}

/// Splice `TOP n` after the leading `SELECT` unless the statement already
/// starts with `SELECT TOP`.
pub fn capped(sql: &str, max_rows: usize) -> String {
    let trimmed = sql.trim();
    if starts_with_keyword(trimmed, "SELECT") && !starts_with_keyword(trimmed, "SELECT TOP") {
        format!("SELECT TOP {}{}", max_rows, &trimmed["SELECT".len()..])
    } else {
        trimmed.to_string()
    }
}

/// Append `LIMIT n` (ahead of a trailing `;`) unless a `LIMIT` clause exists.
pub fn capped_with_limit(sql: &str, max_rows: usize) -> String {
    let trimmed = sql.trim();
    if !starts_with_keyword(trimmed, "SELECT") || LIMIT_TOKEN.is_match(trimmed) {
        return trimmed.to_string();
    }
    let body = trimmed.trim_end_matches(';').trim_end();
    let terminator = if trimmed.ends_with(';') { ";" } else { "" };
    format!("{} LIMIT {}{}", body, max_rows, terminator)
}

fn starts_with_keyword(sql: &str, keyword: &str) -> bool {
    sql.get(..keyword.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(keyword))
}
