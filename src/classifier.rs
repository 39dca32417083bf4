//! Intent Classifier
//!
//! Tags an utterance as one of:
//! - Business: transactions, ledger queries, reports, deletions
//! - General: greetings, small talk, general knowledge
//! - Personal: personal advice unrelated to the business
//!
//! A fixed keyword pattern set short-circuits obvious business utterances
//! without a remote call. Everything else is categorized by the model.

use lazy_static::lazy_static;
use regex::RegexSet;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::LedgerError;
use crate::model::{LanguageModel, Prompt};
use crate::session::{format_history, Turn};
use crate::Result;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Business,
    General,
    Personal,
}

/// Business vocabulary in English, Hinglish and technician terms
const BUSINESS_PATTERNS: &[&str] = &[
    // Transactions
    r"\b(income|earning|earn|earned|kamaya|paisa|rupee|rupees|rs\.?)\b",
    r"\b(expense|expenses|spent|spend|kharcha|kharch)\b",
    r"\b(customer|client|sahib|ji)\b",
    // Services
    r"\b(motor|motar|rewinding|repair|fix|service)\b",
    r"\b(winding|coil|bearing|pump)\b",
    // Queries
    r"\b(report|total|sum|today|yesterday|month|week)\b",
    r"\b(show|display|list|kitna|kya|how much)\b",
    r"\b(delete|remove|cancel|galat)\b",
    // Amounts
    r"₹\s*\d+",
    r"\b\d+\s*(rupee|rupees|rs|paisa)\b",
    r"\b(from|to|for|se|ko)\s+[a-z]+\b",
];

lazy_static! {
    static ref BUSINESS_SET: Option<RegexSet> = RegexSet::new(
        BUSINESS_PATTERNS.iter().map(|pattern| format!("(?i){}", pattern))
    )
    .map_err(|e| warn!("Business patterns failed to compile: {}", e))
    .ok();
}

const CATEGORIZE_PROMPT: &str = r#"You route messages for a motor repair technician's assistant in India.
Classify the latest user message into exactly one category:
- "business": income, expenses, customers, payments, ledger questions, reports, corrections to earlier entries
- "general": greetings, small talk, general knowledge questions
- "personal": personal advice unrelated to the business

Respond with ONLY this JSON: {"category": "business" | "general" | "personal"}"#;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CategoryResponse {
    category: Category,
}

/// Fast path keyword detection; no allocation beyond the regex scan
pub fn looks_like_business(utterance: &str) -> bool {
    BUSINESS_SET
        .as_ref()
        .map(|set| set.is_match(utterance))
        .unwrap_or(false)
}

pub struct IntentClassifier {
    model: Arc<dyn LanguageModel>,
}

impl IntentClassifier {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    /// Classify an utterance; an error here is the error category.
    pub async fn classify(&self, utterance: &str, history: &[Turn]) -> Result<Category> {
        if looks_like_business(utterance) {
            debug!("Classifier fast path: business keywords matched");
            return Ok(Category::Business);
        }

        let mut system = CATEGORIZE_PROMPT.to_string();
        if !history.is_empty() {
            system.push_str("\n\nConversation so far:\n");
            system.push_str(&format_history(history));
        }

        let raw = self.model.complete(&Prompt::json(system, utterance)).await?;
        let category = decode_category(&raw)?;

        debug!(?category, "Classifier slow path");
        Ok(category)
    }
}

fn decode_category(raw: &str) -> Result<Category> {
    serde_json::from_str::<CategoryResponse>(raw.trim())
        .map(|response| response.category)
        .map_err(|e| LedgerError::parse(format!("classifier response not understood: {}", e), raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ScriptedModel;

    fn classifier(model: ScriptedModel) -> (IntentClassifier, Arc<ScriptedModel>) {
        let model = Arc::new(model);
        (IntentClassifier::new(model.clone()), model)
    }

    #[test]
    fn test_business_keywords() {
        let cases = vec![
            "Income 500 from Ram for motor repair",
            "aaj kitna kamaya",
            "spent 200 on copper wire",
            "Sharma Ji paid ₹1500",
            "delete today's entries",
            "show me this month",
            "250 rs ka kharcha",
        ];

        for c in cases {
            assert!(looks_like_business(c), "'{}' should hit the fast path", c);
        }
    }

    #[test]
    fn test_non_business_utterances() {
        for c in ["hello, how are you?", "what is photosynthesis?", "tell me a joke"] {
            assert!(!looks_like_business(c), "'{}' should not hit the fast path", c);
        }
    }

    #[tokio::test]
    async fn test_fast_path_skips_remote_call() {
        let (classifier, model) = classifier(ScriptedModel::new());
        let category = classifier.classify("Income 500 from Ram", &[]).await.unwrap();

        assert_eq!(category, Category::Business);
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn test_slow_path_categories() {
        let (classifier, model) = classifier(
            ScriptedModel::new()
                .respond(r#"{"category": "general"}"#)
                .respond(r#"{"category": "personal"}"#),
        );

        let history = vec![Turn::user("hi"), Turn::assistant("Hello!")];
        assert_eq!(
            classifier.classify("what is photosynthesis?", &history).await.unwrap(),
            Category::General
        );
        assert_eq!(
            classifier.classify("should I marry her?", &[]).await.unwrap(),
            Category::Personal
        );

        let prompts = model.prompts();
        assert!(prompts[0].system.contains("assistant: Hello!"));
        assert!(prompts[0].json_output);
    }

    #[tokio::test]
    async fn test_malformed_remote_response_is_error() {
        let (classifier, _) = classifier(
            ScriptedModel::new()
                .respond("general")
                .respond(r#"{"category": "finance"}"#)
                .respond(r#"{"category": "general", "confidence": 0.9}"#),
        );

        for _ in 0..3 {
            let err = classifier.classify("tell me a joke", &[]).await.unwrap_err();
            assert!(matches!(err, LedgerError::Parse { .. }));
        }
    }

    #[tokio::test]
    async fn test_transport_failure_propagates() {
        let (classifier, _) = classifier(
            ScriptedModel::new().fail(LedgerError::Transport("request timed out".into())),
        );

        let err = classifier.classify("tell me a joke", &[]).await.unwrap_err();
        assert!(matches!(err, LedgerError::Transport(_)));
    }
}
