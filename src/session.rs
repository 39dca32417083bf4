//! Per-conversation session state
//!
//! A session owns a bounded history window, the pointer to the transaction
//! it last wrote, the edit-mode flag and the single-flight busy flag.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Default number of turns kept (three user/assistant exchanges)
pub const DEFAULT_HISTORY_TURNS: usize = 6;

/// Role of a message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A single turn in the conversation history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Bounded conversation window, oldest turns dropped first
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationHistory {
    turns: VecDeque<Turn>,
    limit: usize,
}

impl ConversationHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            turns: VecDeque::with_capacity(limit + 2),
            limit,
        }
    }

    /// Append a full exchange and trim to the window.
    pub fn push_exchange(&mut self, user: Turn, assistant: Turn) {
        self.turns.push_back(user);
        self.turns.push_back(assistant);
        self.trim();
    }

    fn trim(&mut self) {
        while self.turns.len() > self.limit {
            self.turns.pop_front();
        }
    }

    pub fn turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// History followed by the pending user turn, as sent to the worker
    pub fn with_pending(&self, utterance: &str) -> Vec<Turn> {
        let mut turns: Vec<Turn> = self.turns.iter().cloned().collect();
        turns.push(Turn::user(utterance));
        turns
    }
}

impl Default for ConversationHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_TURNS)
    }
}

/// Render turns as `role: content` lines for prompts
pub fn format_history(turns: &[Turn]) -> String {
    turns
        .iter()
        .map(|turn| {
            let role = match turn.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            format!("{}: {}", role, turn.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionContext {
    pub history: ConversationHistory,
    pub last_transaction_id: Option<i64>,
    pub edit_mode: bool,
    pub busy: bool,
}

impl SessionContext {
    pub fn new(history_turns: usize) -> Self {
        Self {
            history: ConversationHistory::new(history_turns),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_keeps_last_three_exchanges() {
        let mut history = ConversationHistory::default();

        for i in 0..5 {
            history.push_exchange(
                Turn::user(format!("question {}", i)),
                Turn::assistant(format!("answer {}", i)),
            );
        }

        assert_eq!(history.len(), 6);
        let first = history.turns().next().unwrap();
        assert_eq!(first.content, "question 2");
        assert_eq!(history.turns().last().unwrap().content, "answer 4");
    }

    #[test]
    fn test_with_pending_does_not_mutate() {
        let mut history = ConversationHistory::default();
        history.push_exchange(Turn::user("hi"), Turn::assistant("hello"));

        let pending = history.with_pending("income 500 from Ram");
        assert_eq!(pending.len(), 3);
        assert_eq!(pending[2], Turn::user("income 500 from Ram"));
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_format_history() {
        let text = format_history(&[Turn::user("income 500"), Turn::assistant("{}")]);
        assert_eq!(text, "user: income 500\nassistant: {}");
    }

    #[test]
    fn test_turn_wire_shape() {
        let json = serde_json::to_value(Turn::assistant("ok")).unwrap();
        assert_eq!(json, serde_json::json!({"role": "assistant", "content": "ok"}));
    }
}
