//! Per-conversation sliding window of prior turns.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

use crate::llm::Role;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

pub trait ConversationMemory: Send + Sync {
    /// Turns oldest first. Unknown conversations have none.
    fn get(&self, conversation_id: &str) -> Vec<ConversationTurn>;
    /// Append one turn, keeping at most `2 * max_turns` of the newest.
    fn append(&self, conversation_id: &str, turn: ConversationTurn, max_turns: usize);
    /// Seed an empty window, e.g. from persisted history. No-op when turns exist.
    fn seed(&self, conversation_id: &str, turns: Vec<ConversationTurn>, max_turns: usize);
}

#[derive(Clone, Default)]
pub struct InMemoryConversationMemory {
    windows: Arc<DashMap<String, VecDeque<ConversationTurn>>>,
}

impl InMemoryConversationMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn conversation_count(&self) -> usize {
        self.windows.len()
    }
}

fn evict(window: &mut VecDeque<ConversationTurn>, max_turns: usize) {
    let cap = max_turns.saturating_mul(2);
    while window.len() > cap {
        window.pop_front();
    }
}

impl ConversationMemory for InMemoryConversationMemory {
    fn get(&self, conversation_id: &str) -> Vec<ConversationTurn> {
        match self.windows.get(conversation_id) {
            Some(window) => window.iter().cloned().collect(),
            None => Vec::new(),
        }
    }

    fn append(&self, conversation_id: &str, turn: ConversationTurn, max_turns: usize) {
        // the entry guard holds the shard lock across push and evict
        let mut window = self.windows.entry(conversation_id.to_string()).or_default();
        window.push_back(turn);
        evict(&mut window, max_turns);
    }

    fn seed(&self, conversation_id: &str, turns: Vec<ConversationTurn>, max_turns: usize) {
        let mut window = self.windows.entry(conversation_id.to_string()).or_default();
        if window.is_empty() {
            window.extend(turns);
            evict(&mut window, max_turns);
        }
    }
}
