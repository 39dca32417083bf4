//! Command Parser
//!
//! Turns a business utterance, read against the bounded history window, into
//! a `Command` through one structured-output model call. The parser owns two
//! normalizations the model is asked for but cannot be trusted with: amounts
//! end up as integer minor units, and trade jargon in `details` is rewritten
//! to standard wording.

use chrono::Local;
use lazy_static::lazy_static;
use regex::Regex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

use crate::command::Command;
use crate::error::LedgerError;
use crate::model::{LanguageModel, Prompt};
use crate::models::TransactionDraft;
use crate::session::{Role, Turn};
use crate::Result;

const PARSER_PROMPT: &str = r#"You are an assistant for an Indian motor repair technician. Convert business requests into structured JSON commands.
You understand Indian English, mixed Hindi-English (Hinglish) and common technician terms.

Rules:
1. Output exactly one JSON object with the keys "intent" and "payload" and nothing else.
2. intent is one of: transaction, update_transaction, database_query, delete_transactions, generate_report.
3. Amounts are stored in paise: multiply rupees by 100 and report "amount_minor_units" as an integer.
4. Standardize details (for example "motar winding" becomes "Motor rewinding").
5. Use the conversation for context. A short correction such as "no, it was 500" or "update it to 600" refers to the previous transaction and is an update_transaction carrying only the changed fields.

Payload shapes:
- transaction / update_transaction: {"type": "income" | "expense", "amount_minor_units": int, "customer": string | null, "details": string}
- database_query: {"customer_name": string, "details_keyword": string, "type": "income" | "expense", "min_amount": int, "max_amount": int, "date_from": "YYYY-MM-DD", "date_to": "YYYY-MM-DD", "limit": int} (every field optional)
- delete_transactions: {"delete_scope": "today"}
- generate_report: {"period": "today" | "monthly" | "all_time"}"#;

/// Trade jargon and its standard wording, matched case-insensitively.
const JARGON: &[(&str, &str)] = &[
    (r"\b(motar|motor)\s+(re)?winding\b", "Motor rewinding"),
    (r"\b(tamba|tambe)(\s+ka)?\s+(taar|tar)\b", "Copper wire"),
    (r"\bcopper\s+(taar|tar)\b", "Copper wire"),
    (r"\b(pankha|pankhe)(\s+ki)?\s+(repair|marammat|mrammat)\b", "Fan repair"),
    (r"\bbearing\s+(badla|badli|change)\b", "Bearing replacement"),
    (r"\b(pump|pamp)\s+(repair|marammat|thik)\b", "Pump repair"),
    (r"\bcoil\s+(badla|badli|change)\b", "Coil replacement"),
];

lazy_static! {
    static ref JARGON_TABLE: Vec<(Regex, &'static str)> = JARGON
        .iter()
        .filter_map(|(pattern, canonical)| {
            Regex::new(&format!("(?i){}", pattern))
                .ok()
                .map(|regex| (regex, *canonical))
        })
        .collect();
}

/// Rewrite known jargon in a details string to its standard wording.
pub fn canonicalize_details(details: &str) -> String {
    let mut text = details.trim().to_string();
    for (regex, canonical) in JARGON_TABLE.iter() {
        if regex.is_match(&text) {
            text = regex.replace_all(&text, *canonical).into_owned();
        }
    }
    text
}

/// Convert a major-unit amount (number or numeric string) into minor units.
///
/// The conversion is exact: values with sub-paise precision, zero, negative
/// and non-numeric amounts are rejected.
pub fn to_minor_units(amount: &Value) -> Result<i64> {
    let text = match amount {
        Value::Number(number) => number.to_string(),
        Value::String(text) => text
            .trim()
            .trim_start_matches('₹')
            .trim_start_matches("Rs.")
            .trim_start_matches("Rs")
            .replace(',', "")
            .trim()
            .to_string(),
        other => {
            return Err(LedgerError::Validation(format!(
                "Amount '{}' is not a number",
                other
            )))
        }
    };

    let major = Decimal::from_str(&text)
        .map_err(|_| LedgerError::Validation(format!("Amount '{}' is not a number", text)))?;

    let minor = major
        .checked_mul(Decimal::from(100))
        .filter(|minor| minor.fract().is_zero())
        .and_then(|minor| minor.to_i64())
        .ok_or_else(|| {
            LedgerError::Validation(format!("Amount '{}' cannot be expressed in paise", text))
        })?;

    if minor <= 0 {
        return Err(LedgerError::Validation(
            "Amount must be greater than zero".to_string(),
        ));
    }

    Ok(minor)
}

/// Apply amount conversion and jargon canonicalization to a write payload.
pub fn normalize_draft(mut draft: TransactionDraft) -> Result<TransactionDraft> {
    if let Some(major) = draft.amount.take() {
        if draft.amount_minor_units.is_none() {
            draft.amount_minor_units = Some(Value::from(to_minor_units(&major)?));
        }
    }

    if let Some(details) = draft.details.take() {
        draft.details = Some(canonicalize_details(&details));
    }

    if let Some(customer) = draft.customer.take() {
        let customer = customer.trim().to_string();
        draft.customer = (!customer.is_empty()).then_some(customer);
    }

    Ok(draft)
}

pub struct CommandParser {
    model: Arc<dyn LanguageModel>,
}

impl CommandParser {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    /// Parse the conversation, which must end with the user's turn.
    pub async fn parse(&self, history: &[Turn]) -> Result<Command> {
        match history.last() {
            Some(turn) if turn.role == Role::User => {}
            _ => {
                return Err(LedgerError::Validation(
                    "No user message found in history.".to_string(),
                ))
            }
        }

        let prompt = Prompt {
            system: format!(
                "{}\n\nCurrent date: {}",
                PARSER_PROMPT,
                Local::now().format("%Y-%m-%d")
            ),
            turns: history.to_vec(),
            temperature: 0.1,
            json_output: true,
        };

        let raw = self.model.complete(&prompt).await?;
        debug!(raw = %raw, "Parser raw response");

        let command = match Command::decode(&raw)? {
            Command::Transaction(draft) => Command::Transaction(normalize_draft(draft)?),
            Command::UpdateTransaction(draft) => {
                Command::UpdateTransaction(normalize_draft(draft)?)
            }
            other => other,
        };

        info!(intent = command.intent(), "Parsed business command");
        Ok(command)
    }
}
