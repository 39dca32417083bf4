//! Orchestrator - runs one utterance through the pipeline
//!
//! UTTERANCE → WORKER (classify/parse) → DISPATCH → STORE → (query) FORMULATE → REPLY
//!
//! Each session is single-flight: a submission that arrives while the
//! session is busy is rejected with `LedgerError::Busy`, never queued.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::command::{Command, DeleteScope};
use crate::config::Config;
use crate::error::LedgerError;
use crate::gemini::GeminiClient;
use crate::models::{
    format_minor_units, DailyInsight, ReportPeriod, Transaction, TransactionDraft, TransactionType,
};
use crate::report::{self, LedgerReport};
use crate::session::{SessionContext, Turn, DEFAULT_HISTORY_TURNS};
use crate::store::{LedgerStore, SqliteLedger};
use crate::worker::{CommandWorker, LocalWorker, SubprocessWorker, WorkerRequest};
use crate::Result;

/// What the caller shows the user after one step
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reply {
    pub intent: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<i64>,
}

impl Reply {
    fn new(intent: &str, text: impl Into<String>) -> Self {
        Self {
            intent: intent.to_string(),
            text: text.into(),
            transaction_id: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self::new("error", message)
    }

    fn with_transaction(mut self, id: i64) -> Self {
        self.transaction_id = Some(id);
        self
    }

    pub fn is_error(&self) -> bool {
        self.intent == "error"
    }
}

pub const DEFAULT_SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

struct SessionSlot {
    ctx: SessionContext,
    last_seen: Instant,
}

type Sessions = Mutex<HashMap<String, SessionSlot>>;

fn lock(sessions: &Sessions) -> MutexGuard<'_, HashMap<String, SessionSlot>> {
    sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Holds a session busy; clears the flag when dropped, even if the request
/// future is abandoned mid-flight.
struct BusyGuard<'a> {
    sessions: &'a Sessions,
    session_id: String,
    finished: Option<SessionContext>,
}

impl BusyGuard<'_> {
    fn finish(mut self, ctx: SessionContext) {
        self.finished = Some(ctx);
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        let mut sessions = lock(self.sessions);
        match self.finished.take() {
            Some(mut ctx) => {
                ctx.busy = false;
                sessions.insert(
                    self.session_id.clone(),
                    SessionSlot {
                        ctx,
                        last_seen: Instant::now(),
                    },
                );
            }
            None => {
                if let Some(slot) = sessions.get_mut(&self.session_id) {
                    slot.ctx.busy = false;
                    slot.last_seen = Instant::now();
                }
            }
        }
    }
}

/// Main orchestrator that owns all session state
pub struct Orchestrator {
    store: Arc<dyn LedgerStore>,
    worker: Arc<dyn CommandWorker>,
    sessions: Sessions,
    history_turns: usize,
    session_idle_timeout: Duration,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn LedgerStore>, worker: Arc<dyn CommandWorker>) -> Self {
        Self {
            store,
            worker,
            sessions: Mutex::new(HashMap::new()),
            history_turns: DEFAULT_HISTORY_TURNS,
            session_idle_timeout: DEFAULT_SESSION_IDLE_TIMEOUT,
        }
    }

    /// Wire the SQLite store and the configured worker.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let store = SqliteLedger::connect(
            &config.database_url,
            config.busy_timeout,
            config.retry_policy(),
        )
        .await?;

        let worker: Arc<dyn CommandWorker> = match &config.worker_command {
            Some(command_line) => {
                info!(command = %command_line, "Using worker subprocess");
                Arc::new(
                    SubprocessWorker::new(command_line, config.model_timeout)?
                        .with_credential(config.gemini_api_key.clone()),
                )
            }
            None => Arc::new(LocalWorker::new(Arc::new(GeminiClient::from_config(config)?))),
        };

        Ok(Self::new(Arc::new(store), worker)
            .with_history_turns(config.history_turns)
            .with_session_idle_timeout(config.session_idle_timeout))
    }

    pub fn with_history_turns(mut self, turns: usize) -> Self {
        self.history_turns = turns;
        self
    }

    /// Idle sessions older than this are dropped on the next submission.
    pub fn with_session_idle_timeout(mut self, timeout: Duration) -> Self {
        self.session_idle_timeout = timeout;
        self
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// Snapshot of a session's context
    pub fn session(&self, session_id: &str) -> Option<SessionContext> {
        lock(&self.sessions)
            .get(session_id)
            .map(|slot| slot.ctx.clone())
    }

    fn acquire(&self, session_id: &str) -> Result<(BusyGuard<'_>, SessionContext)> {
        let mut sessions = lock(&self.sessions);

        let before = sessions.len();
        sessions.retain(|id, slot| {
            id.as_str() == session_id || slot.ctx.busy || slot.last_seen.elapsed() < self.session_idle_timeout
        });
        if sessions.len() < before {
            debug!(evicted = before - sessions.len(), "Dropped idle sessions");
        }

        let slot = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionSlot {
                ctx: SessionContext::new(self.history_turns),
                last_seen: Instant::now(),
            });
        let ctx = &mut slot.ctx;

        if ctx.busy {
            warn!(session = %session_id, "Rejecting submission, session busy");
            return Err(LedgerError::Busy);
        }
        ctx.busy = true;

        let snapshot = ctx.clone();
        Ok((
            BusyGuard {
                sessions: &self.sessions,
                session_id: session_id.to_string(),
                finished: None,
            },
            snapshot,
        ))
    }

    /// Run one utterance for a session. Fails only with `Busy`; every other
    /// failure is rendered as an error reply.
    pub async fn submit(&self, session_id: &str, utterance: &str) -> Result<Reply> {
        let (guard, ctx) = self.acquire(session_id)?;
        info!(session = %session_id, "Processing utterance");

        let (ctx, reply) = self.step(ctx, utterance).await;
        guard.finish(ctx);

        debug!(session = %session_id, intent = %reply.intent, "Step complete");
        Ok(reply)
    }

    /// One pipeline pass over an explicit session context.
    ///
    /// A failure to obtain a command leaves the context untouched; anything
    /// past that point appends the exchange to the history window.
    pub async fn step(&self, mut ctx: SessionContext, utterance: &str) -> (SessionContext, Reply) {
        let pending = ctx.history.with_pending(utterance);

        let command = self
            .worker
            .process(&WorkerRequest::parse_command(pending.clone()))
            .await
            .unwrap_or_else(|e| Command::from_failure(&e));

        if let Command::Error(message) = command {
            warn!("Command processing failed: {}", message);
            return (ctx, Reply::error(message));
        }

        let (record, reply) = match self.dispatch(&mut ctx, command, utterance, pending).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Dispatch failed: {}", e);
                let failure = Command::from_failure(&e);
                (failure, Reply::error(e.to_string()))
            }
        };

        ctx.history
            .push_exchange(Turn::user(utterance), Turn::assistant(record.to_json()));

        (ctx, reply)
    }

    async fn dispatch(
        &self,
        ctx: &mut SessionContext,
        command: Command,
        utterance: &str,
        pending: Vec<Turn>,
    ) -> Result<(Command, Reply)> {
        match command {
            Command::Transaction(draft) => {
                // Edit mode is spent by this transaction whether or not the
                // rewrite succeeds.
                let reply = if std::mem::take(&mut ctx.edit_mode) {
                    match ctx.last_transaction_id {
                        Some(id) => self.apply_update(id, &draft).await?,
                        None => self.record(ctx, &draft).await?,
                    }
                } else {
                    self.record(ctx, &draft).await?
                };
                Ok((Command::Transaction(draft), reply))
            }

            Command::UpdateTransaction(draft) => {
                let reply = match ctx.last_transaction_id {
                    Some(id) => self.apply_update(id, &draft).await?,
                    None => Reply::new(
                        "update_transaction",
                        "There is no recent transaction to update.",
                    ),
                };
                Ok((Command::UpdateTransaction(draft), reply))
            }

            Command::DatabaseQuery(filter) => {
                if filter.is_unconstrained() {
                    let answer = Command::Answer("I need more specific details to search for.".into());
                    let reply = reply_for(&answer);
                    return Ok((answer, reply));
                }

                let rows = self.store.query(&filter).await?;
                info!(rows = rows.len(), "Ledger query");

                if rows.is_empty() {
                    let answer = Command::Answer("No matching records found.".into());
                    let reply = reply_for(&answer);
                    return Ok((answer, reply));
                }

                let rows_json = serde_json::to_string(&rows)?;
                let request = WorkerRequest::formulate(pending, utterance, rows_json);
                let answer = self.worker.process(&request).await?;
                if let Command::Error(message) = answer {
                    return Err(LedgerError::Transport(message));
                }

                let reply = reply_for(&answer);
                Ok((answer, reply))
            }

            Command::DeleteTransactions(scope) => {
                let reply = self.delete_today(ctx, &scope).await?;
                Ok((Command::DeleteTransactions(scope), reply))
            }

            Command::GenerateReport(request) => {
                let report = self.report(request.period).await?;
                let reply = Reply::new("generate_report", report.render());
                Ok((Command::GenerateReport(request), reply))
            }

            Command::Error(message) => Err(LedgerError::Transport(message)),

            text_command => {
                let reply = reply_for(&text_command);
                Ok((text_command, reply))
            }
        }
    }

    async fn record(&self, ctx: &mut SessionContext, draft: &TransactionDraft) -> Result<Reply> {
        let id = self.store.insert(draft).await?;
        ctx.last_transaction_id = Some(id);

        info!(transaction_id = id, "Transaction recorded");
        Ok(Reply::new("transaction", format!("Recorded {}.", describe_draft(draft))).with_transaction(id))
    }

    async fn apply_update(&self, id: i64, draft: &TransactionDraft) -> Result<Reply> {
        if !self.store.update(id, draft).await? {
            return Ok(Reply::new(
                "update_transaction",
                format!("No changes applied to transaction #{}.", id),
            )
            .with_transaction(id));
        }

        info!(transaction_id = id, "Transaction updated");
        Ok(Reply::new("update_transaction", format!("Updated transaction #{}.", id)).with_transaction(id))
    }

    async fn delete_today(&self, ctx: &mut SessionContext, scope: &DeleteScope) -> Result<Reply> {
        match scope.delete_scope.as_deref().map(str::trim) {
            None | Some("today") => {}
            Some(other) => {
                return Ok(Reply::new(
                    "delete_transactions",
                    format!("I can only delete today's transactions, not '{}'.", other),
                ))
            }
        }

        let today = self.store.today();
        let removed = self.store.delete_scope(today).await?;
        if removed > 0 {
            ctx.last_transaction_id = None;
            ctx.edit_mode = false;
        }

        info!(%today, removed, "Deleted today's transactions");
        Ok(Reply::new(
            "delete_transactions",
            format!("Deleted {} transaction(s) from today.", removed),
        ))
    }

    /// Load the latest transaction for editing and arm edit mode.
    ///
    /// Returns the row rendered as an utterance the user can correct, or
    /// `None` when the ledger is empty.
    pub async fn begin_edit(&self, session_id: &str) -> Result<Option<String>> {
        let (guard, mut ctx) = self.acquire(session_id)?;

        let last = self.store.get_last().await?;
        let editable = last.map(|row| {
            ctx.last_transaction_id = Some(row.id);
            ctx.edit_mode = true;
            editable_utterance(&row)
        });

        guard.finish(ctx);
        Ok(editable)
    }

    pub async fn report(&self, period: ReportPeriod) -> Result<LedgerReport> {
        report::generate(self.store.as_ref(), period).await
    }

    pub async fn today_stats(&self) -> Result<DailyInsight> {
        report::today_stats(self.store.as_ref()).await
    }

    /// Insert the fixed demo transactions, returning their ids.
    pub async fn seed_demo_data(&self) -> Result<Vec<i64>> {
        let drafts = [
            TransactionDraft::new(TransactionType::Income, 150000)
                .with_customer("Sharma Ji")
                .with_details("Motor rewinding"),
            TransactionDraft::new(TransactionType::Expense, 25000).with_details("Copper wire"),
            TransactionDraft::new(TransactionType::Income, 80000)
                .with_customer("Gupta Store")
                .with_details("Fan repair"),
        ];

        let mut ids = Vec::with_capacity(drafts.len());
        for draft in &drafts {
            ids.push(self.store.insert(draft).await?);
        }

        info!(count = ids.len(), "Seeded demo transactions");
        Ok(ids)
    }
}

fn reply_for(command: &Command) -> Reply {
    let text = match command {
        Command::Answer(text)
        | Command::Greeting(text)
        | Command::Question(text)
        | Command::PersonalResponse(text)
        | Command::GeneralResponse(text)
        | Command::Error(text) => text.clone(),
        other => other.to_json(),
    };
    Reply::new(command.intent(), text)
}

fn describe_draft(draft: &TransactionDraft) -> String {
    let kind = draft.kind.as_deref().unwrap_or("transaction").to_lowercase();
    let amount = draft
        .amount_minor_units
        .as_ref()
        .and_then(|value| value.as_i64())
        .map(format_minor_units)
        .unwrap_or_default();

    let mut text = format!("{} of Rs {}", kind, amount);
    if let Some(customer) = &draft.customer {
        text.push_str(&format!(" from {}", customer));
    }
    if let Some(details) = &draft.details {
        text.push_str(&format!(" for {}", details));
    }
    text
}

/// "income 500.00 from Ram for motor repair"
pub fn editable_utterance(row: &Transaction) -> String {
    let mut text = format!(
        "{} {}",
        row.kind.as_str(),
        format_minor_units(row.amount_minor_units)
    );
    if let Some(customer) = &row.customer {
        text.push_str(&format!(" from {}", customer));
    }
    if let Some(details) = &row.details {
        text.push_str(&format!(" for {}", details));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ScriptedModel;
    use crate::session::Role;
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    async fn pipeline(model: ScriptedModel) -> (Orchestrator, Arc<SqliteLedger>) {
        let store = Arc::new(SqliteLedger::in_memory().await.unwrap());
        let worker = Arc::new(LocalWorker::new(Arc::new(model)));
        (Orchestrator::new(store.clone(), worker), store)
    }

    #[tokio::test]
    async fn test_record_then_update_last_transaction() {
        let (orchestrator, store) = pipeline(
            ScriptedModel::new()
                .respond(r#"{"intent": "transaction", "payload": {"type": "income", "amount_minor_units": 50000, "customer": "Ram", "details": "motor repair"}}"#)
                .respond(r#"{"category": "business"}"#)
                .respond(r#"{"intent": "update_transaction", "payload": {"amount_minor_units": 60000}}"#),
        )
        .await;

        let reply = orchestrator
            .submit("s1", "Income 500 from Ram for motor repair")
            .await
            .unwrap();
        assert_eq!(reply.intent, "transaction");
        let id = reply.transaction_id.unwrap();

        let last = store.get_last().await.unwrap().unwrap();
        assert_eq!(last.id, id);
        assert_eq!(last.amount_minor_units, 50000);
        assert_eq!(last.customer.as_deref(), Some("Ram"));
        assert_eq!(last.details.as_deref(), Some("motor repair"));
        assert_eq!(orchestrator.session("s1").unwrap().last_transaction_id, Some(id));

        let reply = orchestrator.submit("s1", "update it to 600").await.unwrap();
        assert_eq!(reply.intent, "update_transaction");
        assert_eq!(reply.transaction_id, Some(id));

        let last = store.get_last().await.unwrap().unwrap();
        assert_eq!(last.id, id);
        assert_eq!(last.amount_minor_units, 60000);
        assert_eq!(last.customer.as_deref(), Some("Ram"));

        let session = orchestrator.session("s1").unwrap();
        assert_eq!(session.history.len(), 4);
        assert!(!session.busy);
    }

    #[tokio::test]
    async fn test_parser_failure_leaves_session_untouched() {
        let (orchestrator, store) = pipeline(
            ScriptedModel::new().respond("Sure, I noted 500 rupees from Ram!"),
        )
        .await;

        let reply = orchestrator.submit("s1", "Income 500 from Ram").await.unwrap();
        assert!(reply.is_error());
        assert!(reply.text.contains("Sure, I noted"));

        let session = orchestrator.session("s1").unwrap();
        assert!(session.history.is_empty());
        assert!(session.last_transaction_id.is_none());
        assert!(!session.busy);
        assert!(store.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_validation_failure_is_reported_without_writing() {
        let (orchestrator, store) = pipeline(ScriptedModel::new().respond(
            r#"{"intent": "transaction", "payload": {"type": "income", "amount_minor_units": 0}}"#,
        ))
        .await;

        let reply = orchestrator.submit("s1", "Income 0 from Ram").await.unwrap();
        assert!(reply.is_error());
        assert!(reply.text.contains("Invalid transaction"));
        assert!(store.get_all().await.unwrap().is_empty());

        let session = orchestrator.session("s1").unwrap();
        assert_eq!(session.history.len(), 2);
        assert!(session.last_transaction_id.is_none());
    }

    #[tokio::test]
    async fn test_update_without_pointer_is_a_no_op() {
        let (orchestrator, _) = pipeline(ScriptedModel::new().respond(
            r#"{"intent": "update_transaction", "payload": {"amount_minor_units": 60000}}"#,
        ))
        .await;

        let reply = orchestrator.submit("s1", "no, it was 600 rupees").await.unwrap();
        assert_eq!(reply.text, "There is no recent transaction to update.");
    }

    #[tokio::test]
    async fn test_query_is_formulated_without_duplicate_turns() {
        let (orchestrator, store) = pipeline(
            ScriptedModel::new()
                .respond(r#"{"intent": "database_query", "payload": {"customer_name": "ram"}}"#)
                .respond("Ram Traders paid 500 rupees.")
                .respond("Ram Traders paid 500 rupees. They are a regular."),
        )
        .await;

        store
            .insert(
                &TransactionDraft::new(TransactionType::Income, 50000).with_customer("Ram Traders"),
            )
            .await
            .unwrap();

        let reply = orchestrator
            .submit("s1", "how much did Ram pay?")
            .await
            .unwrap();
        assert_eq!(reply.intent, "answer");
        assert_eq!(reply.text, "Ram Traders paid 500 rupees. They are a regular.");

        let session = orchestrator.session("s1").unwrap();
        let turns: Vec<_> = session.history.turns().cloned().collect();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, Role::User);
        let envelope: serde_json::Value = serde_json::from_str(&turns[1].content).unwrap();
        assert_eq!(envelope["intent"], "answer");
    }

    #[tokio::test]
    async fn test_empty_and_unconstrained_queries() {
        let (orchestrator, _) = pipeline(
            ScriptedModel::new()
                .respond(r#"{"intent": "database_query", "payload": {"customer_name": "shyam"}}"#)
                .respond(r#"{"intent": "database_query", "payload": {}}"#),
        )
        .await;

        let reply = orchestrator.submit("s1", "show Shyam's payments").await.unwrap();
        assert_eq!(reply.text, "No matching records found.");

        let reply = orchestrator.submit("s1", "show me everything").await.unwrap();
        assert_eq!(reply.text, "I need more specific details to search for.");
    }

    #[tokio::test]
    async fn test_delete_today() {
        let (orchestrator, store) = pipeline(ScriptedModel::new().respond(
            r#"{"intent": "delete_transactions", "payload": {"delete_scope": "today"}}"#,
        ))
        .await;

        orchestrator.seed_demo_data().await.unwrap();

        let reply = orchestrator.submit("s1", "delete today's entries").await.unwrap();
        assert_eq!(reply.text, "Deleted 3 transaction(s) from today.");
        assert!(store.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_edit_mode_rewrites_last_transaction() {
        let (orchestrator, store) = pipeline(ScriptedModel::new().respond(
            r#"{"intent": "transaction", "payload": {"type": "income", "amount": 700, "customer": "Ram", "details": "motor repair"}}"#,
        ))
        .await;

        let id = store
            .insert(
                &TransactionDraft::new(TransactionType::Income, 50000)
                    .with_customer("Ram")
                    .with_details("motor repair"),
            )
            .await
            .unwrap();

        let editable = orchestrator.begin_edit("s1").await.unwrap();
        assert_eq!(editable.as_deref(), Some("income 500.00 from Ram for motor repair"));
        assert!(orchestrator.session("s1").unwrap().edit_mode);

        let reply = orchestrator
            .submit("s1", "income 700 from Ram for motor repair")
            .await
            .unwrap();
        assert_eq!(reply.intent, "update_transaction");
        assert_eq!(reply.transaction_id, Some(id));

        let rows = store.get_all().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].amount_minor_units, 70000);
        assert!(!orchestrator.session("s1").unwrap().edit_mode);
    }

    #[tokio::test]
    async fn test_failed_edit_disarms_edit_mode() {
        let (orchestrator, store) = pipeline(
            ScriptedModel::new()
                .respond(r#"{"intent": "transaction", "payload": {"type": "income", "amount_minor_units": 0, "customer": "Ram"}}"#)
                .respond(r#"{"intent": "transaction", "payload": {"type": "income", "amount_minor_units": 30000, "customer": "Shyam", "details": "fan repair"}}"#),
        )
        .await;

        let ram = store
            .insert(&TransactionDraft::new(TransactionType::Income, 50000).with_customer("Ram"))
            .await
            .unwrap();
        orchestrator.begin_edit("s1").await.unwrap();

        let reply = orchestrator.submit("s1", "income 0 from Ram").await.unwrap();
        assert!(reply.is_error());
        assert!(!orchestrator.session("s1").unwrap().edit_mode);

        let reply = orchestrator
            .submit("s1", "income 300 from Shyam for fan repair")
            .await
            .unwrap();
        assert_eq!(reply.intent, "transaction");
        assert_ne!(reply.transaction_id, Some(ram));

        let rows = store.get_all().await.unwrap();
        assert_eq!(rows.len(), 2);
        let original = rows.iter().find(|row| row.id == ram).unwrap();
        assert_eq!(original.amount_minor_units, 50000);
        assert_eq!(original.customer.as_deref(), Some("Ram"));
    }

    #[tokio::test]
    async fn test_idle_sessions_are_evicted() {
        let (orchestrator, _) = pipeline(ScriptedModel::new()).await;
        let orchestrator = orchestrator.with_session_idle_timeout(Duration::ZERO);

        orchestrator.begin_edit("s1").await.unwrap();
        assert!(orchestrator.session("s1").is_some());

        orchestrator.begin_edit("s2").await.unwrap();
        assert!(orchestrator.session("s1").is_none());
        assert!(orchestrator.session("s2").is_some());
    }

    #[tokio::test]
    async fn test_report_and_stats() {
        let (orchestrator, _) = pipeline(ScriptedModel::new().respond(
            r#"{"intent": "generate_report", "payload": {"period": "today"}}"#,
        ))
        .await;
        orchestrator.seed_demo_data().await.unwrap();

        let reply = orchestrator.submit("s1", "today's report").await.unwrap();
        assert_eq!(reply.intent, "generate_report");
        assert!(reply.text.contains("Net Profit:     Rs 2050.00"));

        let stats = orchestrator.today_stats().await.unwrap();
        assert_eq!(stats.total_income, 230000);
        assert_eq!(stats.total_expense, 25000);
        assert_eq!(stats.transaction_count, 3);
        assert_eq!(stats.top_customer.as_deref(), Some("Sharma Ji"));
    }

    /// Holds every request until the test hands out a permit.
    struct GatedWorker {
        gate: Arc<Semaphore>,
    }

    #[async_trait]
    impl CommandWorker for GatedWorker {
        async fn process(&self, _request: &WorkerRequest) -> Result<Command> {
            let _permit = self
                .gate
                .acquire()
                .await
                .map_err(|e| LedgerError::Transport(e.to_string()))?;
            Ok(Command::Greeting("Hello!".into()))
        }
    }

    async fn gated() -> (Arc<Orchestrator>, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let store = Arc::new(SqliteLedger::in_memory().await.unwrap());
        let worker = Arc::new(GatedWorker { gate: gate.clone() });
        (Arc::new(Orchestrator::new(store, worker)), gate)
    }

    #[tokio::test]
    async fn test_busy_session_rejects_second_submission() {
        let (orchestrator, gate) = gated().await;

        let first = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move { orchestrator.submit("s1", "hi").await })
        };

        while !orchestrator.session("s1").map(|s| s.busy).unwrap_or(false) {
            tokio::task::yield_now().await;
        }

        let second = orchestrator.submit("s1", "hello again").await;
        assert!(matches!(second, Err(LedgerError::Busy)));

        gate.add_permits(1);
        let reply = first.await.unwrap().unwrap();
        assert_eq!(reply.intent, "greeting");

        // other sessions are independent
        gate.add_permits(1);
        let other = orchestrator.submit("s2", "hi").await.unwrap();
        assert_eq!(other.text, "Hello!");
        assert!(!orchestrator.session("s1").unwrap().busy);
    }

    #[tokio::test]
    async fn test_abandoned_request_releases_session() {
        let (orchestrator, gate) = gated().await;

        let timed_out =
            tokio::time::timeout(Duration::from_millis(50), orchestrator.submit("s1", "hi")).await;
        assert!(timed_out.is_err());
        assert!(!orchestrator.session("s1").unwrap().busy);

        gate.add_permits(1);
        assert!(orchestrator.submit("s1", "hi").await.is_ok());
    }

    #[test]
    fn test_describe_draft() {
        let draft = TransactionDraft {
            kind: Some("Income".into()),
            amount_minor_units: Some(json!(50000)),
            customer: Some("Ram".into()),
            ..Default::default()
        };
        assert_eq!(describe_draft(&draft), "income of Rs 500.00 from Ram");
    }
}
