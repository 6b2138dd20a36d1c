//! Natural-language-to-SQL pipeline: translation, validation, row capping,
//! bounded execution and rendering.

pub mod executor;
pub mod render;
pub mod row_cap;
pub mod safety;
pub mod schema;
pub mod translator;

pub use executor::{QueryDeadlines, QueryExecutor, SqliteExecutor, TabularResult};
pub use render::{render, RenderOptions};
pub use row_cap::{capped, SqlDialect};
pub use safety::is_safe;
pub use schema::{ColumnInfo, SchemaIntrospector, SchemaSnapshot, TableSchema};
pub use translator::{SqlTranslator, TranslatorConfig};

use crate::error::{GatewayError, GatewayResult};
use tracing::warn;

/// How the SQL text was recovered from the model output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlExtraction {
    /// Found between `<sql>` and `</sql>`.
    Extracted,
    /// Delimiters absent or malformed; the raw model text is used as is.
    RawFallback,
}

/// A statement produced by the translator. It cannot reach an executor until
/// [`CandidateQuery::validate`] turns it into a [`ValidatedQuery`].
#[derive(Debug, Clone)]
pub struct CandidateQuery {
    pub sql_text: String,
    pub row_cap: usize,
    pub extraction: SqlExtraction,
    is_validated: bool,
}

impl CandidateQuery {
    pub fn new(sql_text: impl Into<String>, row_cap: usize, extraction: SqlExtraction) -> Self {
        Self {
            sql_text: sql_text.into(),
            row_cap,
            extraction,
            is_validated: false,
        }
    }

    pub fn is_validated(&self) -> bool {
        self.is_validated
    }

    /// Run the safe-SELECT check, then apply the dialect's row cap.
    pub fn validate(mut self, dialect: SqlDialect) -> GatewayResult<ValidatedQuery> {
        if !is_safe(&self.sql_text) {
            warn!(
                "Refusing generated SQL (violation: {:?}, extraction: {:?})",
                safety::first_violation(&self.sql_text),
                self.extraction
            );
            return Err(GatewayError::SafetyViolation { sql: self.sql_text });
        }
        self.sql_text = dialect.cap(&self.sql_text, self.row_cap);
        self.is_validated = true;
        Ok(ValidatedQuery { inner: self })
    }
}

/// A candidate that passed validation and carries its row cap.
#[derive(Debug, Clone)]
pub struct ValidatedQuery {
    inner: CandidateQuery,
}

impl ValidatedQuery {
    pub fn sql(&self) -> &str {
        &self.inner.sql_text
    }

    pub fn row_cap(&self) -> usize {
        self.inner.row_cap
    }

    pub fn candidate(&self) -> &CandidateQuery {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_caps_and_marks() {
        let candidate = CandidateQuery::new("SELECT name FROM t", 200, SqlExtraction::Extracted);
        assert!(!candidate.is_validated());
        let validated = candidate.validate(SqlDialect::TSql).unwrap();
        assert_eq!(validated.sql(), "SELECT TOP 200 name FROM t");
        assert!(validated.candidate().is_validated());
    }

    #[test]
    fn test_validate_refuses_stacked_statement() {
        let candidate = CandidateQuery::new(
            "SELECT * FROM Users; DROP TABLE Users;",
            200,
            SqlExtraction::RawFallback,
        );
        match candidate.validate(SqlDialect::Sqlite) {
            Err(GatewayError::SafetyViolation { sql }) => assert!(sql.contains("DROP")),
            other => panic!("expected safety violation, got {other:?}"),
        }
    }
}
