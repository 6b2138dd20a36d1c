//! Public web search through the Google Programmable Search JSON API.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{GatewayError, GatewayResult, TimeoutPhase};
use crate::metrics;
use crate::tools::{integer_argument, string_argument, Capability, ToolContext};

pub const WEB_SEARCH: &str = "web_search";

#[derive(Debug, Clone)]
pub struct WebSearchConfig {
    pub api_key: Option<String>,
    /// Programmable Search Engine id.
    pub cx: Option<String>,
    pub endpoint: String,
    pub timeout: Duration,
    pub max_results: usize,
}

impl Default for WebSearchConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            cx: None,
            endpoint: "https://www.googleapis.com/customsearch/v1".to_string(),
            timeout: Duration::from_secs(15),
            max_results: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SearchItem {
    pub title: String,
    pub link: String,
    #[serde(default)]
    pub snippet: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    items: Option<Vec<SearchItem>>,
}

pub struct WebSearchTool {
    config: WebSearchConfig,
    http_client: reqwest::Client,
}

impl WebSearchTool {
    pub fn new(config: WebSearchConfig) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();
        Self { config, http_client }
    }

    fn credentials(&self) -> GatewayResult<(&str, &str)> {
        let key = self.config.api_key.as_deref().map(str::trim).unwrap_or_default();
        let cx = self.config.cx.as_deref().map(str::trim).unwrap_or_default();
        if key.is_empty() || cx.is_empty() {
            return Err(GatewayError::Configuration(
                "Google search is not configured. Set GOOGLE_API_KEY and GOOGLE_CX".to_string(),
            ));
        }
        Ok((key, cx))
    }

    pub async fn search(
        &self,
        query: &str,
        max_results: usize,
        deadline: Option<Instant>,
    ) -> GatewayResult<Vec<SearchItem>> {
        let (key, cx) = self.credentials()?;
        let budget = match deadline {
            Some(d) => self.config.timeout.min(d.saturating_duration_since(Instant::now())),
            None => self.config.timeout,
        };

        let request = self
            .http_client
            .get(&self.config.endpoint)
            .query(&[("q", query), ("key", key), ("cx", cx)])
            .send();
        let response = match tokio::time::timeout(budget, request).await {
            Err(_) => return Err(GatewayError::timeout(TimeoutPhase::Search, budget)),
            Ok(Err(e)) if e.is_timeout() => {
                return Err(GatewayError::timeout(TimeoutPhase::Search, self.config.timeout))
            }
            Ok(Err(e)) => return Err(GatewayError::ExternalService(e.to_string())),
            Ok(Ok(response)) => response,
        };

        let status = response.status();
        let raw = response
            .text()
            .await
            .map_err(|e| GatewayError::ExternalService(e.to_string()))?;
        if !status.is_success() {
            return Err(GatewayError::ExternalService(format!(
                "Google error {}: {}",
                status.as_u16(),
                raw
            )));
        }

        let parsed: SearchResponse = serde_json::from_str(&raw)
            .map_err(|e| GatewayError::ExternalService(format!("malformed search response: {}", e)))?;
        let mut items = parsed.items.unwrap_or_default();
        items.truncate(max_results);
        debug!("Web search returned {} items", items.len());
        Ok(items)
    }
}

pub fn render_items(items: &[SearchItem]) -> String {
    if items.is_empty() {
        return "No results.".to_string();
    }
    items
        .iter()
        .map(|item| format!("- {}\n  {}\n  {}\n", item.title, item.link, item.snippet))
        .collect()
}

#[async_trait]
impl Capability for WebSearchTool {
    fn name(&self) -> &str {
        WEB_SEARCH
    }

    fn description(&self) -> &str {
        "Search the public internet via Google Programmable Search. Use for news, general knowledge, docs, how-tos."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "User query to search for"},
                "max_results": {"type": "integer", "description": "Max items to return (default 5)"}
            },
            "required": ["query"]
        })
    }

    async fn invoke(&self, arguments: &str, context: &ToolContext) -> String {
        let Some(query) = string_argument(arguments, "query") else {
            metrics::inc_tool_invocation(WEB_SEARCH, "InvalidArguments");
            return "_Google search failed: no query given_".to_string();
        };
        let max_results = integer_argument(arguments, "max_results")
            .map(|n| n as usize)
            .unwrap_or(self.config.max_results);

        let result = self.search(&query, max_results, context.deadline).await;
        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        };
        metrics::inc_tool_invocation(WEB_SEARCH, outcome);
        match result {
            Ok(items) => render_items(&items),
            Err(GatewayError::Configuration(msg)) => format!("_{}_", msg),
            Err(GatewayError::Timeout { after, .. }) => format!(
                "_Google search timed out ({}s). Try again or refine the query._",
                after.as_secs()
            ),
            Err(GatewayError::ExternalService(msg)) if msg.starts_with("Google error") => {
                warn!("{}", msg);
                format!("_{}_", msg)
            }
            Err(e) => {
                warn!("Web search failed: {}", e);
                format!("_Google search failed: {}_", e)
            }
        }
    }
}
