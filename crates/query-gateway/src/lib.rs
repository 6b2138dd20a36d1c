//! Tool-orchestration gateway: answers natural-language questions by letting a
//! chat model call web search or a private-database query capability, with
//! generated SQL validated, row-capped and run under hard deadlines.

pub mod api;
pub mod config;
pub mod error;
pub mod history_db;
pub mod llm;
pub mod memory;
pub mod metrics;
pub mod orchestrator;
pub mod server;
pub mod shared_state;
pub mod sql;
pub mod telemetry;
pub mod tools;

pub use config::Config;
pub use error::{GatewayError, GatewayResult, TimeoutPhase};
pub use memory::{ConversationMemory, ConversationTurn, InMemoryConversationMemory};
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use server::{build_router, run_server};
pub use shared_state::AppState;
