//! Language model boundary
//!
//! Every remote call in the pipeline goes through `LanguageModel`, a single
//! request/response exchange bounded by the implementation's timeout.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::error::LedgerError;
use crate::session::Turn;
use crate::Result;

/// One model request
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub system: String,
    pub turns: Vec<Turn>,
    pub temperature: f32,
    /// Ask the model for a single JSON document
    pub json_output: bool,
}

impl Prompt {
    pub fn text(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            turns: vec![Turn::user(user)],
            temperature: 0.3,
            json_output: false,
        }
    }

    pub fn json(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            turns: vec![Turn::user(user)],
            temperature: 0.1,
            json_output: true,
        }
    }
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, prompt: &Prompt) -> Result<String>;
}

/// Replays queued responses in order and records every prompt it saw.
///
/// Used by tests and by the offline demo mode; an exhausted script answers
/// with a transport error.
#[derive(Default)]
pub struct ScriptedModel {
    responses: Mutex<VecDeque<Result<String>>>,
    prompts: Mutex<Vec<Prompt>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, text: impl Into<String>) -> Self {
        self.push(Ok(text.into()));
        self
    }

    pub fn fail(self, err: LedgerError) -> Self {
        self.push(Err(err));
        self
    }

    pub fn push(&self, response: Result<String>) {
        if let Ok(mut queue) = self.responses.lock() {
            queue.push_back(response);
        }
    }

    pub fn prompts(&self) -> Vec<Prompt> {
        self.prompts
            .lock()
            .map(|prompts| prompts.clone())
            .unwrap_or_default()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().map(|prompts| prompts.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, prompt: &Prompt) -> Result<String> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.clone());
        }

        let next = self
            .responses
            .lock()
            .ok()
            .and_then(|mut queue| queue.pop_front());

        next.unwrap_or_else(|| {
            Err(LedgerError::Transport(
                "scripted model has no response queued".to_string(),
            ))
        })
    }
}
