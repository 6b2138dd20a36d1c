use anyhow::{Context, Result};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

use crate::sql::SqlDialect;

#[derive(Debug, Clone)]
pub struct Config {
    pub api_host: String,
    pub api_port: u16,

    pub llm_base_url: String,
    pub llm_api_key: Option<String>,
    pub llm_model: String,
    pub llm_request_timeout_seconds: u64,

    pub orchestrator_temperature: f32,
    pub orchestration_timeout_seconds: u64,
    pub max_tool_rounds: usize,
    pub memory_max_turns: usize,

    pub database_url: Option<String>,
    pub db_dialect: SqlDialect,
    pub db_connect_timeout_seconds: u64,
    pub db_command_timeout_seconds: u64,
    pub internal_max_rows: usize,
    pub render_max_rows: usize,
    pub schema_path: Option<PathBuf>,
    pub schema_cache_ttl_seconds: u64,

    pub google_api_key: Option<String>,
    pub google_cx: Option<String>,
    pub search_endpoint: String,
    pub search_timeout_seconds: u64,
    pub search_max_results: usize,

    pub history_db_path: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            warn!("Failed to load .env file: {}. Using system environment variables.", e);
        } else {
            info!("Loaded environment variables from .env file");
        }
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let dialect_name = or("DB_DIALECT", "sqlite");
        let db_dialect = SqlDialect::parse(&dialect_name)
            .with_context(|| format!("DB_DIALECT '{}' is not one of: sqlite, tsql", dialect_name))?;

        Ok(Self {
            api_host: or("API_HOST", "127.0.0.1"),
            api_port: or("API_PORT", "8000").parse().context("API_PORT")?,

            llm_base_url: or("LLM_BASE_URL", "https://api.openai.com"),
            llm_api_key: get("LLM_API_KEY"),
            llm_model: or("LLM_MODEL", "gpt-4o-mini"),
            llm_request_timeout_seconds: or("LLM_REQUEST_TIMEOUT_SECONDS", "120")
                .parse()
                .context("LLM_REQUEST_TIMEOUT_SECONDS")?,

            orchestrator_temperature: or("ORCHESTRATOR_TEMPERATURE", "0.2")
                .parse()
                .context("ORCHESTRATOR_TEMPERATURE")?,
            orchestration_timeout_seconds: or("ORCHESTRATION_TIMEOUT_SECONDS", "60")
                .parse()
                .context("ORCHESTRATION_TIMEOUT_SECONDS")?,
            max_tool_rounds: or("MAX_TOOL_ROUNDS", "5").parse().context("MAX_TOOL_ROUNDS")?,
            memory_max_turns: or("MEMORY_MAX_TURNS", "16").parse().context("MEMORY_MAX_TURNS")?,

            database_url: get("DATABASE_URL"),
            db_dialect,
            db_connect_timeout_seconds: or("DB_CONNECT_TIMEOUT_SECONDS", "20")
                .parse()
                .context("DB_CONNECT_TIMEOUT_SECONDS")?,
            db_command_timeout_seconds: or("DB_COMMAND_TIMEOUT_SECONDS", "60")
                .parse()
                .context("DB_COMMAND_TIMEOUT_SECONDS")?,
            internal_max_rows: or("INTERNAL_MAX_ROWS", "200").parse().context("INTERNAL_MAX_ROWS")?,
            render_max_rows: or("RENDER_MAX_ROWS", "50").parse().context("RENDER_MAX_ROWS")?,
            schema_path: get("SCHEMA_PATH").map(PathBuf::from),
            schema_cache_ttl_seconds: or("SCHEMA_CACHE_TTL_SECONDS", "0")
                .parse()
                .context("SCHEMA_CACHE_TTL_SECONDS")?,

            google_api_key: get("GOOGLE_API_KEY"),
            google_cx: get("GOOGLE_CX"),
            search_endpoint: or("SEARCH_ENDPOINT", "https://www.googleapis.com/customsearch/v1"),
            search_timeout_seconds: or("SEARCH_TIMEOUT_SECONDS", "15")
                .parse()
                .context("SEARCH_TIMEOUT_SECONDS")?,
            search_max_results: or("SEARCH_MAX_RESULTS", "5").parse().context("SEARCH_MAX_RESULTS")?,

            history_db_path: PathBuf::from(or("HISTORY_DB_PATH", "./data/conversations.db")),
        })
    }

    pub fn print_config(&self) {
        info!("Current Configuration:");
        info!("- API: {}:{}", self.api_host, self.api_port);
        info!("- LLM: {} (model {})", self.llm_base_url, self.llm_model);
        info!("- LLM API key: {}", if self.llm_api_key.is_some() { "set" } else { "not set" });
        info!(
            "- Orchestration: {}s budget, {} tool rounds, {} turns of memory",
            self.orchestration_timeout_seconds, self.max_tool_rounds, self.memory_max_turns
        );
        match &self.database_url {
            Some(url) => info!("- Database: {} ({:?})", url, self.db_dialect),
            None => warn!("- Database: DATABASE_URL not set, internal_search will report it"),
        }
        info!(
            "- DB timeouts: connect {}s, command {}s",
            self.db_connect_timeout_seconds, self.db_command_timeout_seconds
        );
        info!("- Row caps: execute {}, display {}", self.internal_max_rows, self.render_max_rows);
        info!("- Web search: {}", if self.search_configured() { "configured" } else { "not configured" });
        info!("- History DB: {}", self.history_db_path.display());
    }

    pub fn search_configured(&self) -> bool {
        self.google_api_key.is_some() && self.google_cx.is_some()
    }

    pub fn api_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.api_host, self.api_port)
            .parse()
            .with_context(|| format!("Invalid listen address {}:{}", self.api_host, self.api_port))
    }

    pub fn orchestration_budget(&self) -> Duration {
        Duration::from_secs(self.orchestration_timeout_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.api_port, 8000);
        assert_eq!(config.llm_model, "gpt-4o-mini");
        assert_eq!(config.orchestration_timeout_seconds, 60);
        assert_eq!(config.memory_max_turns, 16);
        assert_eq!(config.db_dialect, SqlDialect::Sqlite);
        assert_eq!(config.db_connect_timeout_seconds, 20);
        assert_eq!(config.db_command_timeout_seconds, 60);
        assert_eq!(config.internal_max_rows, 200);
        assert_eq!(config.render_max_rows, 50);
        assert_eq!(config.search_timeout_seconds, 15);
        assert_eq!(config.search_max_results, 5);
        assert!(config.database_url.is_none());
        assert!(!config.search_configured());
    }

    #[test]
    fn test_overrides_and_blank_values() {
        let config = config_from(&[
            ("API_PORT", "9100"),
            ("DB_DIALECT", "tsql"),
            ("DATABASE_URL", "sqlite://./shop.db"),
            ("LLM_API_KEY", "   "),
            ("GOOGLE_API_KEY", "k"),
            ("GOOGLE_CX", "cx"),
            ("SCHEMA_PATH", "schema.md"),
        ])
        .unwrap();
        assert_eq!(config.api_port, 9100);
        assert_eq!(config.db_dialect, SqlDialect::TSql);
        assert_eq!(config.database_url.as_deref(), Some("sqlite://./shop.db"));
        assert!(config.llm_api_key.is_none());
        assert!(config.search_configured());
        assert_eq!(config.schema_path, Some(PathBuf::from("schema.md")));
    }

    #[test]
    fn test_bad_numbers_name_the_key() {
        let err = config_from(&[("MEMORY_MAX_TURNS", "many")]).unwrap_err();
        assert!(err.to_string().contains("MEMORY_MAX_TURNS"));
    }

    #[test]
    fn test_unknown_dialect_rejected() {
        assert!(config_from(&[("DB_DIALECT", "oracle")]).is_err());
    }

    #[test]
    fn test_api_addr() {
        let config = config_from(&[("API_HOST", "0.0.0.0"), ("API_PORT", "8080")]).unwrap();
        let addr = config.api_addr().unwrap();
        assert_eq!(addr.port(), 8080);
        assert!(addr.ip().is_unspecified());
    }
}
