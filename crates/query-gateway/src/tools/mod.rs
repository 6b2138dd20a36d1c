//! Capabilities the orchestrator can hand to the model.
//!
//! Each capability takes the model's raw argument text and always answers with
//! text: failures are turned into a short message at the capability boundary
//! so one bad tool never aborts the conversational turn.

pub mod internal_query;
pub mod registry;
pub mod web_search;

pub use internal_query::InternalQueryTool;
pub use registry::CapabilityRegistry;
pub use web_search::{WebSearchConfig, WebSearchTool};

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::Instant;

use crate::llm::ToolSpec;

/// Per-invocation context.
#[derive(Debug, Clone, Copy, Default)]
pub struct ToolContext {
    /// Outer deadline the invocation must finish within.
    pub deadline: Option<Instant>,
}

impl ToolContext {
    pub fn with_deadline(deadline: Instant) -> Self {
        Self { deadline: Some(deadline) }
    }
}

#[async_trait]
pub trait Capability: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON schema of the arguments object.
    fn parameters(&self) -> Value;
    async fn invoke(&self, arguments: &str, context: &ToolContext) -> String;

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

/// Read a string argument. Models sometimes send bare text instead of a JSON
/// object, in which case the whole text is the value.
pub(crate) fn string_argument(arguments: &str, key: &str) -> Option<String> {
    match serde_json::from_str::<Value>(arguments) {
        Ok(Value::Object(map)) => map.get(key).and_then(|v| v.as_str()).map(str::to_string),
        Ok(Value::String(s)) => Some(s),
        _ => {
            let raw = arguments.trim();
            (!raw.is_empty()).then(|| raw.to_string())
        }
    }
}

pub(crate) fn integer_argument(arguments: &str, key: &str) -> Option<u64> {
    serde_json::from_str::<Value>(arguments)
        .ok()
        .and_then(|v| v.get(key).and_then(Value::as_u64))
}
