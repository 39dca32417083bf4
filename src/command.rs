//! Structured commands exchanged between the pipeline stages
//!
//! On the wire a command is always a single `{intent, payload}` object.
//! Each intent decodes its payload against its own shape; an unknown intent
//! or a payload that does not fit is a parse error, never a guess.

use serde::{Deserialize, Serialize};

use crate::error::LedgerError;
use crate::models::{QueryFilter, ReportPeriod, TransactionDraft};
use crate::Result;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DeleteScope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_scope: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReportRequest {
    #[serde(default)]
    pub period: ReportPeriod,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "intent", content = "payload", rename_all = "snake_case")]
pub enum Command {
    Transaction(TransactionDraft),
    UpdateTransaction(TransactionDraft),
    DatabaseQuery(QueryFilter),
    DeleteTransactions(DeleteScope),
    GenerateReport(ReportRequest),
    Answer(String),
    Greeting(String),
    Question(String),
    PersonalResponse(String),
    GeneralResponse(String),
    Error(String),
}

impl Command {
    pub fn intent(&self) -> &'static str {
        match self {
            Command::Transaction(_) => "transaction",
            Command::UpdateTransaction(_) => "update_transaction",
            Command::DatabaseQuery(_) => "database_query",
            Command::DeleteTransactions(_) => "delete_transactions",
            Command::GenerateReport(_) => "generate_report",
            Command::Answer(_) => "answer",
            Command::Greeting(_) => "greeting",
            Command::Question(_) => "question",
            Command::PersonalResponse(_) => "personal_response",
            Command::GeneralResponse(_) => "general_response",
            Command::Error(_) => "error",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Command::Error(_))
    }

    /// Collapse any pipeline failure into the uniform error command.
    pub fn from_failure(err: &LedgerError) -> Self {
        Command::Error(err.to_string())
    }

    /// Decode a raw JSON document that must be exactly one `{intent, payload}` object.
    pub fn decode(raw: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(raw.trim())
            .map_err(|e| LedgerError::parse(format!("response is not JSON: {}", e), raw))?;
        Self::from_value(value, raw)
    }

    /// Decode an already parsed JSON value; `raw` is attached to any error.
    pub fn from_value(value: serde_json::Value, raw: &str) -> Result<Self> {
        let Some(object) = value.as_object() else {
            return Err(LedgerError::parse("response is not a JSON object", raw));
        };

        if !object.contains_key("intent") {
            return Err(LedgerError::parse("response has no 'intent' field", raw));
        }

        if !object.contains_key("payload") {
            return Err(LedgerError::parse("response has no 'payload' field", raw));
        }

        if object.len() != 2 {
            return Err(LedgerError::parse(
                "response carries fields besides 'intent' and 'payload'",
                raw,
            ));
        }

        serde_json::from_value(value)
            .map_err(|e| LedgerError::parse(format!("payload does not match intent: {}", e), raw))
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(r#"{{"intent":"{}","payload":null}}"#, self.intent())
        })
    }
}
