//! Command worker boundary
//!
//! The orchestrator hands every remote step to a `CommandWorker` as one
//! `WorkerRequest` and gets exactly one `{intent, payload}` envelope back.
//! `LocalWorker` does the work in-process; `SubprocessWorker` runs it in a
//! child process speaking the same JSON over stdin/stdout.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command as ProcessCommand;
use tracing::{debug, info, warn};

use crate::classifier::{Category, IntentClassifier};
use crate::command::Command;
use crate::conversational::ConversationalResponder;
use crate::error::LedgerError;
use crate::formulator::ResponseFormulator;
use crate::model::LanguageModel;
use crate::parser::CommandParser;
use crate::session::{Role, Turn};
use crate::Result;

pub const NO_USER_MESSAGE: &str = "No user message found in history.";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Task {
    ParseCommand,
    FormulateAnswerFromData,
}

impl Task {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "parse_command" => Some(Task::ParseCommand),
            "formulate_answer_from_data" => Some(Task::FormulateAnswerFromData),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WorkerContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_question: Option<String>,
    /// Query result rows, serialized as a JSON array
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_results: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerRequest {
    pub task: Task,
    #[serde(default)]
    pub history: Vec<Turn>,
    #[serde(default)]
    pub context: WorkerContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl WorkerRequest {
    pub fn parse_command(history: Vec<Turn>) -> Self {
        Self {
            task: Task::ParseCommand,
            history,
            context: WorkerContext::default(),
            credential: None,
        }
    }

    pub fn formulate(history: Vec<Turn>, question: impl Into<String>, rows_json: impl Into<String>) -> Self {
        Self {
            task: Task::FormulateAnswerFromData,
            history,
            context: WorkerContext {
                user_question: Some(question.into()),
                db_results: Some(rows_json.into()),
            },
            credential: None,
        }
    }

    /// Decode a request read from the wire. A missing task means `parse_command`.
    pub fn from_json(raw: &str) -> Result<Self> {
        let mut value: serde_json::Value = serde_json::from_str(raw.trim())
            .map_err(|e| LedgerError::parse(format!("Invalid JSON input: {}", e), raw))?;

        let Some(object) = value.as_object_mut() else {
            return Err(LedgerError::parse("Invalid JSON input.", raw));
        };

        let task = match object.get("task") {
            None => "parse_command".to_string(),
            Some(serde_json::Value::String(name)) => name.clone(),
            Some(other) => other.to_string(),
        };
        if Task::from_name(&task).is_none() {
            return Err(LedgerError::parse(format!("Unknown task: {}", task), raw));
        }
        object.insert("task".to_string(), serde_json::Value::String(task));

        serde_json::from_value(value)
            .map_err(|e| LedgerError::parse(format!("Invalid request: {}", e), raw))
    }

    /// The trailing user turn, if the history ends with one
    pub fn latest_user_turn(&self) -> Option<&Turn> {
        self.history.last().filter(|turn| turn.role == Role::User)
    }
}

#[async_trait]
pub trait CommandWorker: Send + Sync {
    async fn process(&self, request: &WorkerRequest) -> Result<Command>;
}

/// In-process worker: classifier, parser, conversational replies and formulator
pub struct LocalWorker {
    classifier: IntentClassifier,
    parser: CommandParser,
    responder: ConversationalResponder,
    formulator: ResponseFormulator,
}

impl LocalWorker {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self {
            classifier: IntentClassifier::new(model.clone()),
            parser: CommandParser::new(model.clone()),
            responder: ConversationalResponder::new(model.clone()),
            formulator: ResponseFormulator::new(model),
        }
    }

    async fn parse_command(&self, request: &WorkerRequest) -> Result<Command> {
        let Some(current) = request.latest_user_turn() else {
            return Ok(Command::Error(NO_USER_MESSAGE.to_string()));
        };
        let history = request.history.as_slice();
        let earlier = &history[..history.len() - 1];

        match self.classifier.classify(&current.content, earlier).await? {
            Category::Business => self.parser.parse(history).await,
            category => {
                self.responder
                    .reply(category, &current.content, earlier)
                    .await
            }
        }
    }
}

#[async_trait]
impl CommandWorker for LocalWorker {
    async fn process(&self, request: &WorkerRequest) -> Result<Command> {
        debug!(task = ?request.task, turns = request.history.len(), "Local worker request");

        match request.task {
            Task::ParseCommand => self.parse_command(request).await,
            Task::FormulateAnswerFromData => {
                let question = request.context.user_question.as_deref().unwrap_or_default();
                let rows = request.context.db_results.as_deref().unwrap_or("[]");
                self.formulator
                    .formulate(question, rows, &request.history)
                    .await
            }
        }
    }
}

/// Runs each request in a fresh child process.
///
/// The child reads one request from stdin and prints one envelope to stdout.
/// Anything written to stderr fails the call, as does exceeding the timeout
/// (the child is killed).
pub struct SubprocessWorker {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    credential: Option<String>,
}

impl SubprocessWorker {
    pub fn new(command_line: &str, timeout: Duration) -> Result<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| LedgerError::Config("worker command is empty".to_string()))?;

        Ok(Self {
            program,
            args: parts.collect(),
            timeout,
            credential: None,
        })
    }

    /// Credential forwarded in requests that do not carry one
    pub fn with_credential(mut self, credential: Option<String>) -> Self {
        self.credential = credential;
        self
    }

    async fn run(&self, input: Vec<u8>) -> Result<std::process::Output> {
        let mut child = ProcessCommand::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                LedgerError::Transport(format!("failed to start worker '{}': {}", self.program, e))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&input)
                .await
                .map_err(|e| LedgerError::Transport(format!("failed to send request to worker: {}", e)))?;
        }

        child
            .wait_with_output()
            .await
            .map_err(|e| LedgerError::Transport(format!("worker did not complete: {}", e)))
    }
}

#[async_trait]
impl CommandWorker for SubprocessWorker {
    async fn process(&self, request: &WorkerRequest) -> Result<Command> {
        let mut request = request.clone();
        if request.credential.is_none() {
            request.credential = self.credential.clone();
        }
        let input = serde_json::to_vec(&request)?;

        info!(program = %self.program, task = ?request.task, "Dispatching to worker process");

        let output = tokio::time::timeout(self.timeout, self.run(input))
            .await
            .map_err(|_| {
                warn!(program = %self.program, "Worker process timed out");
                LedgerError::Transport(format!(
                    "worker timed out after {}s",
                    self.timeout.as_secs_f32()
                ))
            })??;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            return Err(LedgerError::Transport(format!(
                "worker reported an error: {}",
                stderr.trim()
            )));
        }

        if !output.status.success() {
            return Err(LedgerError::Transport(format!(
                "worker exited with {}",
                output.status
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Command::decode(&stdout)
    }
}
