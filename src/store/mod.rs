//! Ledger persistence layer
//!
//! The store is the only shared mutable resource. Every mutating call is its
//! own atomic unit, validated first, retried on contention, and recomputes
//! the affected day's aggregate before it returns.

use crate::error::LedgerError;
use crate::models::{
    DailyInsight, NewTransaction, QueryFilter, Transaction, TransactionChanges,
    TransactionDraft, TransactionType,
};
use crate::Result;
use chrono::{NaiveDate, NaiveDateTime};

pub mod retry;
pub mod sqlite;

pub use retry::RetryPolicy;
pub use sqlite::SqliteLedger;

pub const MAX_CUSTOMER_CHARS: usize = 100;
pub const MAX_DETAILS_CHARS: usize = 500;

/// Trait for ledger persistence
#[async_trait::async_trait]
pub trait LedgerStore: Send + Sync {
    async fn insert(&self, draft: &TransactionDraft) -> Result<i64>;
    async fn update(&self, id: i64, draft: &TransactionDraft) -> Result<bool>;
    async fn delete_scope(&self, day: NaiveDate) -> Result<u64>;
    async fn get_last(&self) -> Result<Option<Transaction>>;
    async fn get_by_day(&self, day: NaiveDate) -> Result<Vec<Transaction>>;
    async fn get_all(&self) -> Result<Vec<Transaction>>;
    async fn query(&self, filter: &QueryFilter) -> Result<Vec<Transaction>>;
    async fn daily_insight(&self, day: NaiveDate) -> Result<Option<DailyInsight>>;

    /// Current local time as seen by the store's clock
    fn now(&self) -> NaiveDateTime;

    fn today(&self) -> NaiveDate {
        self.now().date()
    }
}

/// Validate a payload for insertion: type and amount required.
pub fn validate(draft: &TransactionDraft) -> Result<NewTransaction> {
    let kind = match draft.kind.as_deref() {
        Some(kind) => parse_kind(kind)?,
        None => return Err(type_error()),
    };

    let amount_minor_units = match &draft.amount_minor_units {
        Some(amount) => parse_amount(amount)?,
        None => return Err(amount_error()),
    };

    check_text_lengths(draft)?;

    Ok(NewTransaction {
        kind,
        amount_minor_units,
        customer: draft.customer.clone(),
        details: draft.details.clone(),
    })
}

/// Validate only the fields a payload supplies, for an update.
pub fn validate_changes(draft: &TransactionDraft) -> Result<TransactionChanges> {
    let kind = draft.kind.as_deref().map(parse_kind).transpose()?;
    let amount_minor_units = draft
        .amount_minor_units
        .as_ref()
        .map(parse_amount)
        .transpose()?;

    check_text_lengths(draft)?;

    Ok(TransactionChanges {
        kind,
        amount_minor_units,
        customer: draft.customer.clone(),
        details: draft.details.clone(),
    })
}

fn parse_kind(kind: &str) -> Result<TransactionType> {
    kind.parse::<TransactionType>().map_err(|_| type_error())
}

fn parse_amount(amount: &serde_json::Value) -> Result<i64> {
    match amount.as_i64() {
        Some(value) if value > 0 => Ok(value),
        _ => Err(amount_error()),
    }
}

fn check_text_lengths(draft: &TransactionDraft) -> Result<()> {
    if let Some(customer) = &draft.customer {
        if customer.chars().count() > MAX_CUSTOMER_CHARS {
            return Err(LedgerError::Validation(format!(
                "Customer name must be at most {} characters",
                MAX_CUSTOMER_CHARS
            )));
        }
    }

    if let Some(details) = &draft.details {
        if details.chars().count() > MAX_DETAILS_CHARS {
            return Err(LedgerError::Validation(format!(
                "Details must be at most {} characters",
                MAX_DETAILS_CHARS
            )));
        }
    }

    Ok(())
}

fn type_error() -> LedgerError {
    LedgerError::Validation("Transaction type must be 'income' or 'expense'".to_string())
}

fn amount_error() -> LedgerError {
    LedgerError::Validation("Amount must be a positive integer number of paise".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn draft(kind: &str, amount: serde_json::Value) -> TransactionDraft {
        TransactionDraft {
            kind: Some(kind.to_string()),
            amount_minor_units: Some(amount),
            ..Default::default()
        }
    }

    #[test]
    fn test_accepts_valid_payload() {
        let valid = validate(&draft("Income", json!(50000)).with_customer("Ram")).unwrap();
        assert_eq!(valid.kind, TransactionType::Income);
        assert_eq!(valid.amount_minor_units, 50000);
        assert_eq!(valid.customer.as_deref(), Some("Ram"));
    }

    #[test]
    fn test_rejects_non_positive_amounts() {
        for amount in [json!(0), json!(-500), json!(12.5), json!("500"), json!(null)] {
            let result = validate(&draft("expense", amount.clone()));
            assert!(
                matches!(result, Err(LedgerError::Validation(_))),
                "amount {} should be rejected",
                amount
            );
        }
    }

    #[test]
    fn test_rejects_unknown_type() {
        let err = validate(&draft("refund", json!(100))).unwrap_err();
        assert!(err.to_string().contains("income"));

        let missing = TransactionDraft {
            amount_minor_units: Some(json!(100)),
            ..Default::default()
        };
        assert!(validate(&missing).is_err());
    }

    #[test]
    fn test_length_limits() {
        let at_limit = draft("income", json!(100)).with_customer("a".repeat(100));
        assert!(validate(&at_limit).is_ok());

        let long_customer = draft("income", json!(100)).with_customer("a".repeat(101));
        assert!(validate(&long_customer).is_err());

        let long_details = draft("income", json!(100)).with_details("d".repeat(501));
        assert!(validate(&long_details).is_err());
    }

    #[test]
    fn test_changes_validate_only_supplied_fields() {
        let patch = TransactionDraft {
            amount_minor_units: Some(json!(60000)),
            ..Default::default()
        };
        let changes = validate_changes(&patch).unwrap();
        assert_eq!(changes.amount_minor_units, Some(60000));
        assert!(changes.kind.is_none());

        let bad = TransactionDraft {
            amount_minor_units: Some(json!(0)),
            ..Default::default()
        };
        assert!(validate_changes(&bad).is_err());
    }
}
