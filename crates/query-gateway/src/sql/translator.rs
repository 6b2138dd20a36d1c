//! Natural language to SQL translation through a single deterministic
//! completion call.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::GatewayResult;
use crate::llm::{ChatMessage, CompletionService};
use crate::sql::row_cap::SqlDialect;
use crate::sql::{CandidateQuery, SqlExtraction};

const OPEN_TAG: &str = "<sql>";
const CLOSE_TAG: &str = "</sql>";

#[derive(Debug, Clone, Copy)]
pub struct TranslatorConfig {
    pub dialect: SqlDialect,
    /// Row cap suggested to the model and carried on each candidate.
    pub max_rows: usize,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            dialect: SqlDialect::TSql,
            max_rows: 200,
        }
    }
}

pub struct SqlTranslator {
    completion: Arc<dyn CompletionService>,
    config: TranslatorConfig,
}

impl SqlTranslator {
    pub fn new(completion: Arc<dyn CompletionService>, config: TranslatorConfig) -> Self {
        Self { completion, config }
    }

    pub fn config(&self) -> TranslatorConfig {
        self.config
    }

    pub fn instructions(&self) -> String {
        format!(
            "You generate strictly SAFE, SELECT-ONLY {dialect}.\n\
             Rules:\n \
             - SELECT statements only. No INSERT/UPDATE/DELETE/MERGE/EXEC/DDL.\n \
             - Limit to the 6 most informative columns.\n \
             - Use explicit JOINs when needed.\n \
             - {limit}\n \
             - Avoid fuzzy LIKE patterns unless asked; prefer exact filters.\n \
             - Never use administrative procedures or dangerous functions.\n \
             - Always end with a semicolon.\n\
             Return ONLY the SQL between {open} and {close} tags.",
            dialect = self.config.dialect.name(),
            limit = self.config.dialect.limit_hint(self.config.max_rows),
            open = OPEN_TAG,
            close = CLOSE_TAG,
        )
    }

    pub async fn translate(&self, question: &str, schema: &str) -> GatewayResult<CandidateQuery> {
        let messages = vec![
            ChatMessage::system(self.instructions()),
            ChatMessage::system(format!("Database schema:\n{}", schema)),
            ChatMessage::user(format!("Question: {}", question)),
        ];
        let response = self.completion.complete(messages, 0.0).await?;
        let (sql, extraction) = extract_sql(&response);
        match extraction {
            SqlExtraction::Extracted => debug!("Translated question into SQL: {}", sql),
            SqlExtraction::RawFallback => warn!("Model output had no <sql> tags, using raw text"),
        }
        Ok(CandidateQuery::new(sql, self.config.max_rows, extraction))
    }
}

/// Text between `<sql>` and `</sql>` (tags matched case-insensitively).
/// Missing or out-of-order tags fall back to the trimmed raw text.
pub fn extract_sql(text: &str) -> (String, SqlExtraction) {
    // ASCII lowercasing keeps byte offsets aligned with `text`
    let lowered = text.to_ascii_lowercase();
    if let Some(open) = lowered.find(OPEN_TAG) {
        let start = open + OPEN_TAG.len();
        if let Some(len) = lowered[start..].find(CLOSE_TAG) {
            return (text[start..start + len].trim().to_string(), SqlExtraction::Extracted);
        }
    }
    (text.trim().to_string(), SqlExtraction::RawFallback)
}
