//! Composition root shared by every HTTP handler and the CLI.
//!
//! All mutable shared state (capability registry, memory windows, schema
//! cache) is created here and owned through `Arc`s; nothing is global.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::history_db::HistoryDatabase;
use crate::llm::{CompletionService, OpenAiCompletionService};
use crate::memory::InMemoryConversationMemory;
use crate::orchestrator::{CapabilityFactory, Orchestrator, OrchestratorConfig};
use crate::sql::{
    QueryDeadlines, QueryExecutor, RenderOptions, SchemaIntrospector, SqlTranslator,
    SqliteExecutor, TranslatorConfig,
};
use crate::tools::internal_query::{UnconfiguredInternalQuery, INTERNAL_SEARCH};
use crate::tools::{Capability, CapabilityRegistry, InternalQueryTool, WebSearchConfig, WebSearchTool};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub orchestrator: Arc<Orchestrator>,
    pub history: Arc<HistoryDatabase>,
    /// Private database; `None` when `DATABASE_URL` is unset.
    pub executor: Option<Arc<dyn QueryExecutor>>,
    /// Cancelled on shutdown; each request runs under a child token.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Production wiring: OpenAI-compatible backend and the on-disk history
    /// database, falling back to an in-memory one if the file cannot be opened.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let completion: Arc<dyn CompletionService> = Arc::new(OpenAiCompletionService::new(
            config.llm_base_url.clone(),
            config.llm_api_key.clone(),
            config.llm_model.clone(),
            Duration::from_secs(config.llm_request_timeout_seconds),
        ));

        let history = match HistoryDatabase::new(&config.history_db_path) {
            Ok(db) => Arc::new(db),
            Err(e) => {
                warn!("Failed to open history database: {}. Falling back to in-memory.", e);
                Arc::new(HistoryDatabase::new_in_memory()?)
            }
        };

        Self::assemble(config, completion, history)
    }

    pub fn assemble(
        config: Config,
        completion: Arc<dyn CompletionService>,
        history: Arc<HistoryDatabase>,
    ) -> anyhow::Result<Self> {
        let executor: Option<Arc<dyn QueryExecutor>> = match config.database_url.as_deref() {
            Some(url) => Some(Arc::new(SqliteExecutor::from_url(url)?)),
            None => None,
        };

        let registry = Arc::new(CapabilityRegistry::new());
        registry.register(Arc::new(WebSearchTool::new(WebSearchConfig {
            api_key: config.google_api_key.clone(),
            cx: config.google_cx.clone(),
            endpoint: config.search_endpoint.clone(),
            timeout: Duration::from_secs(config.search_timeout_seconds),
            max_results: config.search_max_results,
        })));

        let orchestrator = Orchestrator::new(
            completion.clone(),
            registry,
            Arc::new(InMemoryConversationMemory::new()),
            OrchestratorConfig {
                temperature: config.orchestrator_temperature,
                budget: config.orchestration_budget(),
                max_tool_rounds: config.max_tool_rounds,
                max_turns: config.memory_max_turns,
            },
        )
        .with_history(history.conversations.clone())
        .with_lazy_capability(
            INTERNAL_SEARCH,
            internal_search_factory(&config, completion, executor.clone()),
        );

        info!("Application state assembled");
        Ok(Self {
            config: Arc::new(config),
            orchestrator: Arc::new(orchestrator),
            history,
            executor,
            shutdown: CancellationToken::new(),
        })
    }
}

pub const MISSING_DATABASE_URL: &str = "Missing DATABASE_URL connection string";

/// Deferred constructor for the internal query capability. It shares the
/// completion service with the orchestrator, so it is built on first use.
pub fn internal_search_factory(
    config: &Config,
    completion: Arc<dyn CompletionService>,
    executor: Option<Arc<dyn QueryExecutor>>,
) -> CapabilityFactory {
    let translator_config = TranslatorConfig {
        dialect: config.db_dialect,
        max_rows: config.internal_max_rows,
    };
    let deadlines = QueryDeadlines::new(
        Duration::from_secs(config.db_connect_timeout_seconds),
        Duration::from_secs(config.db_command_timeout_seconds),
    );
    let render_options = RenderOptions {
        max_display_rows: config.render_max_rows,
    };
    let schema_path = config.schema_path.clone();
    let cache_ttl = Duration::from_secs(config.schema_cache_ttl_seconds);

    Arc::new(move || {
        let Some(executor) = executor.clone() else {
            warn!("DATABASE_URL is not set; internal_search will report the missing connection string");
            return Ok(Arc::new(UnconfiguredInternalQuery::new(MISSING_DATABASE_URL)) as Arc<dyn Capability>);
        };
        let translator = SqlTranslator::new(completion.clone(), translator_config);
        let introspector =
            SchemaIntrospector::new(executor.clone(), schema_path.clone()).with_cache_ttl(cache_ttl);
        let tool = InternalQueryTool::new(translator, introspector, executor, deadlines, render_options);
        Ok(Arc::new(tool) as Arc<dyn Capability>)
    })
}
