//! Private data capability: question → SQL → safety check → bounded run →
//! Markdown table.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{GatewayError, GatewayResult};
use crate::metrics;
use crate::sql::{
    render, QueryDeadlines, QueryExecutor, RenderOptions, SchemaIntrospector, SqlTranslator,
};
use crate::tools::{string_argument, Capability, ToolContext};

pub const INTERNAL_SEARCH: &str = "internal_search";

pub struct InternalQueryTool {
    translator: SqlTranslator,
    introspector: SchemaIntrospector,
    executor: Arc<dyn QueryExecutor>,
    deadlines: QueryDeadlines,
    render_options: RenderOptions,
}

impl InternalQueryTool {
    pub fn new(
        translator: SqlTranslator,
        introspector: SchemaIntrospector,
        executor: Arc<dyn QueryExecutor>,
        deadlines: QueryDeadlines,
        render_options: RenderOptions,
    ) -> Self {
        Self {
            translator,
            introspector,
            executor,
            deadlines,
            render_options,
        }
    }

    /// Full pipeline. Each stage's failure keeps its own error kind.
    pub async fn answer(&self, question: &str, context: &ToolContext) -> GatewayResult<String> {
        let schema = self
            .introspector
            .describe(self.deadlines.within(context.deadline))
            .await?;
        let candidate = self.translator.translate(question, &schema).await?;
        let validated = candidate.validate(self.translator.config().dialect)?;
        info!("Executing validated SQL: {}", validated.sql());

        // phases are re-derived here so translation time counts against them
        let result = self
            .executor
            .execute(&validated, self.deadlines.within(context.deadline))
            .await?;
        Ok(render(validated.sql(), &result, self.render_options))
    }
}

/// Short user-facing line for a failed pipeline run.
pub fn describe_failure(err: &GatewayError) -> String {
    match err {
        GatewayError::SafetyViolation { .. } => {
            "Refused: generated SQL was not safe SELECT-only.".to_string()
        }
        GatewayError::Timeout { .. } => format!("_DB timeout: {}. Try a narrower question._", err),
        GatewayError::Database { code, message } => format!("_DB error {}: {}_", code, message),
        GatewayError::Configuration(msg) => format!("_Internal search is not configured: {}_", msg),
        other => format!("_Internal search failed: {}_", other),
    }
}

const DESCRIPTION: &str = "Convert a natural-language question into a SAFE, SELECT-ONLY SQL query using the known schema, execute it, and return a compact table.";

fn question_parameters() -> Value {
    json!({
        "type": "object",
        "properties": {
            "question": {
                "type": "string",
                "description": "Natural-language question about internal data (NOT the SQL)."
            }
        },
        "required": ["question"]
    })
}

#[async_trait]
impl Capability for InternalQueryTool {
    fn name(&self) -> &str {
        INTERNAL_SEARCH
    }

    fn description(&self) -> &str {
        DESCRIPTION
    }

    fn parameters(&self) -> Value {
        question_parameters()
    }

    async fn invoke(&self, arguments: &str, context: &ToolContext) -> String {
        let Some(question) = string_argument(arguments, "question") else {
            metrics::inc_tool_invocation(INTERNAL_SEARCH, "InvalidArguments");
            return "_Internal search failed: no question given_".to_string();
        };
        match self.answer(&question, context).await {
            Ok(table) => {
                metrics::inc_tool_invocation(INTERNAL_SEARCH, "ok");
                table
            }
            Err(e) => {
                warn!("Internal search failed: {}", e);
                metrics::inc_tool_invocation(INTERNAL_SEARCH, e.kind());
                describe_failure(&e)
            }
        }
    }
}

/// Stand-in offered when no private database is configured. The model still
/// sees the tool, and every call answers with the configuration notice.
pub struct UnconfiguredInternalQuery {
    reason: GatewayError,
}

impl UnconfiguredInternalQuery {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: GatewayError::Configuration(reason.into()),
        }
    }
}

#[async_trait]
impl Capability for UnconfiguredInternalQuery {
    fn name(&self) -> &str {
        INTERNAL_SEARCH
    }

    fn description(&self) -> &str {
        DESCRIPTION
    }

    fn parameters(&self) -> Value {
        question_parameters()
    }

    async fn invoke(&self, _arguments: &str, _context: &ToolContext) -> String {
        metrics::inc_tool_invocation(INTERNAL_SEARCH, self.reason.kind());
        describe_failure(&self.reason)
    }
}
