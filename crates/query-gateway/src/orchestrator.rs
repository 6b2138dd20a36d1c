//! Top-level answer loop.
//!
//! Builds the decision prompt from the memory window, streams the model's
//! output, runs every requested capability before resuming, and bounds the
//! whole exchange by the earlier of the caller's cancellation and a fixed
//! budget. Failures never escape [`Orchestrator::handle`]; they come back as
//! short diagnostic text.

use futures::StreamExt;
use dashmap::DashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::GatewayResult;
use crate::history_db::ConversationStore;
use crate::llm::{ChatMessage, CompletionEvent, CompletionService, Role};
use crate::memory::{ConversationMemory, ConversationTurn};
use crate::metrics;
use crate::tools::{Capability, CapabilityRegistry, ToolContext};

pub const NO_RESPONSE: &str = "_No response generated._";

const SYSTEM_PROMPT: &str = "ROLE: You are the Orchestrator. Decide what the user needs and call tools.
DECISIONS:
 - If the prompt requires GENERAL INTERNET info (news/docs/how-tos), call tool: web_search(query).
 - If the prompt requires INTERNAL DB info (private business data), call tool: internal_search(question).
 - Some prompts need BOTH. Split the prompt and call both tools; then merge results succinctly.
COREFERENCE:
 - Treat pronouns like \"these\", \"them\", \"that\", \"it\", and follow-ups like \"list them\", \"show details\", \"shorten to 5\" as referring to the last INTERNAL entity you discussed.
 - For such follow-ups, PREFER internal_search unless the user explicitly asks for web/internet/Google/news.
CONSTRAINTS:
 - Never fabricate internal data. Use internal_search for anything DB-backed.
 - When summarizing web results, include brief links (one per source max).
 - Be concise and actionable.";

/// Builds a capability on first use.
pub type CapabilityFactory = Arc<dyn Fn() -> GatewayResult<Arc<dyn Capability>> + Send + Sync>;

#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    pub temperature: f32,
    /// Fixed budget for one whole answer.
    pub budget: Duration,
    /// Completion rounds that may end in tool calls before tools are withdrawn.
    pub max_tool_rounds: usize,
    /// Logical turns kept per conversation (two entries each).
    pub max_turns: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            budget: Duration::from_secs(60),
            max_tool_rounds: 5,
            max_turns: 16,
        }
    }
}

pub struct Orchestrator {
    completion: Arc<dyn CompletionService>,
    registry: Arc<CapabilityRegistry>,
    memory: Arc<dyn ConversationMemory>,
    history: Option<Arc<ConversationStore>>,
    lazy_capabilities: Vec<(String, CapabilityFactory)>,
    /// Lazy capabilities whose factory failed; never retried.
    unavailable: DashSet<String>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        completion: Arc<dyn CompletionService>,
        registry: Arc<CapabilityRegistry>,
        memory: Arc<dyn ConversationMemory>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            completion,
            registry,
            memory,
            history: None,
            lazy_capabilities: Vec::new(),
            unavailable: DashSet::new(),
            config,
        }
    }

    /// Persisted history used to rebuild a cold memory window.
    pub fn with_history(mut self, store: Arc<ConversationStore>) -> Self {
        self.history = Some(store);
        self
    }

    /// Register `name` through `factory` on the first request, not at startup.
    pub fn with_lazy_capability(mut self, name: impl Into<String>, factory: CapabilityFactory) -> Self {
        self.lazy_capabilities.push((name.into(), factory));
        self
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    pub fn config(&self) -> OrchestratorConfig {
        self.config
    }

    fn timeout_message(&self) -> String {
        format!(
            "_Timed out after {}s. Try a narrower question or check API keys/network._",
            self.config.budget.as_secs()
        )
    }

    fn ensure_lazy_capabilities(&self) {
        for (name, factory) in &self.lazy_capabilities {
            if self.registry.has(name) || self.unavailable.contains(name) {
                continue;
            }
            if let Err(e) = self.registry.ensure_registered(name, || factory()) {
                warn!("Capability '{}' unavailable: {}", name, e);
                self.unavailable.insert(name.clone());
            }
        }
    }

    async fn rehydrate(&self, conversation_id: &str) {
        let Some(store) = self.history.clone() else {
            return;
        };
        if !self.memory.get(conversation_id).is_empty() {
            return;
        }
        let id = conversation_id.to_string();
        let limit = self.config.max_turns * 2;
        let loaded = tokio::task::spawn_blocking(move || store.recent_dialogue(&id, limit))
            .await
            .unwrap_or_else(|e| Err(anyhow::anyhow!("history task failed: {}", e)));
        match loaded {
            Ok(messages) if !messages.is_empty() => {
                let turns = messages
                    .into_iter()
                    .filter_map(|m| {
                        let role = Role::parse(&m.role).filter(|r| matches!(r, Role::User | Role::Assistant))?;
                        Some(ConversationTurn {
                            role,
                            content: m.content,
                            timestamp: m.created_utc,
                        })
                    })
                    .collect::<Vec<_>>();
                debug!("Rehydrated {} turns for conversation {}", turns.len(), conversation_id);
                self.memory.seed(conversation_id, turns, self.config.max_turns);
            }
            Ok(_) => {}
            Err(e) => warn!("Could not load history for {}: {}", conversation_id, e),
        }
    }

    /// Answer `input` within `conversation_id`. Always returns text.
    pub async fn handle(&self, input: &str, conversation_id: &str, cancel: CancellationToken) -> String {
        let started = Instant::now();
        let deadline = started + self.config.budget;
        let _active = metrics::track_active();

        self.ensure_lazy_capabilities();
        self.rehydrate(conversation_id).await;

        let mut messages = vec![ChatMessage::system(SYSTEM_PROMPT)];
        for turn in self.memory.get(conversation_id) {
            messages.push(match turn.role {
                Role::User => ChatMessage::user(turn.content),
                _ => ChatMessage::assistant(turn.content),
            });
        }
        messages.push(ChatMessage::user(input));
        // kept even when no answer follows, so a retry still has its referent
        self.memory.append(conversation_id, ConversationTurn::new(Role::User, input), self.config.max_turns);

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = tokio::time::timeout_at(deadline, self.converse(messages, deadline)) => result.ok(),
        };

        let output = match outcome {
            None => {
                warn!("Conversation {} hit its deadline", conversation_id);
                self.timeout_message()
            }
            Some(Err(e)) => {
                warn!("Orchestration failed for {}: {}", conversation_id, e);
                format!("_Error: {}: {}_", e.kind(), e)
            }
            Some(Ok(text)) if text.trim().is_empty() => NO_RESPONSE.to_string(),
            Some(Ok(text)) => {
                let text = text.trim().to_string();
                self.memory.append(
                    conversation_id,
                    ConversationTurn::new(Role::Assistant, text.clone()),
                    self.config.max_turns,
                );
                text
            }
        };

        let elapsed = started.elapsed();
        metrics::observe_orchestration(elapsed.as_secs_f64());
        info!("Answered conversation {} in {:?}", conversation_id, elapsed);
        output
    }

    /// Stream rounds until the model answers without calling a tool.
    async fn converse(&self, mut messages: Vec<ChatMessage>, deadline: Instant) -> GatewayResult<String> {
        let tools = self.registry.specs();
        let context = ToolContext::with_deadline(deadline);
        let mut answer = String::new();

        for round in 0..=self.config.max_tool_rounds {
            let offered = if round < self.config.max_tool_rounds { tools.clone() } else { Vec::new() };
            let mut stream = self
                .completion
                .stream(messages.clone(), offered, self.config.temperature)
                .await?;

            let mut round_text = String::new();
            let mut calls = Vec::new();
            while let Some(event) = stream.next().await {
                match event? {
                    CompletionEvent::Text(fragment) => round_text.push_str(&fragment),
                    CompletionEvent::ToolCall(call) => calls.push(call),
                }
            }
            answer.push_str(&round_text);

            if calls.is_empty() {
                return Ok(answer);
            }
            debug!("Round {} requested {} tool calls", round, calls.len());
            messages.push(ChatMessage::assistant_tool_calls(round_text, calls.clone()));
            for call in calls {
                let output = self.registry.invoke(&call.name, &call.arguments, &context).await;
                messages.push(ChatMessage::tool_result(call.id, output));
            }
        }
        Ok(answer)
    }
}
