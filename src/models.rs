//! Core data models for the ledger

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

//
// ================= Enums =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Income,
    Expense,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Income => "income",
            TransactionType::Expense => "expense",
        }
    }
}

impl FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "income" => Ok(TransactionType::Income),
            "expense" => Ok(TransactionType::Expense),
            other => Err(format!("unknown transaction type '{}'", other)),
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionType::Income => "Income",
            TransactionType::Expense => "Expense",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReportPeriod {
    Today,
    Monthly,
    #[default]
    AllTime,
}

impl FromStr for ReportPeriod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "today" => Ok(ReportPeriod::Today),
            "monthly" | "month" => Ok(ReportPeriod::Monthly),
            "all_time" | "all-time" | "all" | "" => Ok(ReportPeriod::AllTime),
            other => Err(format!("unknown report period '{}'", other)),
        }
    }
}

//
// ================= Transaction =================
//

/// A persisted ledger row. Amounts are in minor units (paise).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transaction {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub amount_minor_units: i64,
    pub customer: Option<String>,
    pub details: Option<String>,
    pub timestamp: NaiveDateTime,
}

/// Wire payload for transaction writes, as produced by the command parser.
///
/// Every field is optional on the wire so that validation, not
/// deserialization, decides what is acceptable and reports why.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TransactionDraft {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(alias = "amount_paise", default, skip_serializing_if = "Option::is_none")]
    pub amount_minor_units: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Major-unit amount; converted by the parser, never stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<serde_json::Value>,
}

impl TransactionDraft {
    pub fn new(kind: TransactionType, amount_minor_units: i64) -> Self {
        Self {
            kind: Some(kind.as_str().to_string()),
            amount_minor_units: Some(serde_json::Value::from(amount_minor_units)),
            ..Default::default()
        }
    }

    pub fn with_customer(mut self, customer: impl Into<String>) -> Self {
        self.customer = Some(customer.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

}

/// A validated insert
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    pub kind: TransactionType,
    pub amount_minor_units: i64,
    pub customer: Option<String>,
    pub details: Option<String>,
}

/// A validated set of column replacements for an update
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionChanges {
    pub kind: Option<TransactionType>,
    pub amount_minor_units: Option<i64>,
    pub customer: Option<String>,
    pub details: Option<String>,
}

impl TransactionChanges {
    pub fn is_empty(&self) -> bool {
        self.kind.is_none()
            && self.amount_minor_units.is_none()
            && self.customer.is_none()
            && self.details.is_none()
    }
}

//
// ================= Query =================
//

/// Conjunctive query filter; every field is optional.
///
/// Blank strings on the wire mean "no constraint", and `type` is matched
/// case-insensitively.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueryFilter {
    #[serde(default, deserialize_with = "blank_as_none", skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none", skip_serializing_if = "Option::is_none")]
    pub details_keyword: Option<String>,
    #[serde(
        rename = "type",
        default,
        deserialize_with = "parse_blank_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub kind: Option<TransactionType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_amount: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_amount: Option<i64>,
    #[serde(default, deserialize_with = "parse_blank_as_none", skip_serializing_if = "Option::is_none")]
    pub date_from: Option<NaiveDate>,
    #[serde(default, deserialize_with = "parse_blank_as_none", skip_serializing_if = "Option::is_none")]
    pub date_to: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

fn blank_as_none<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty()))
}

fn parse_blank_as_none<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: fmt::Display,
{
    blank_as_none(deserializer)?
        .map(|s| s.parse::<T>().map_err(serde::de::Error::custom))
        .transpose()
}

impl QueryFilter {
    pub fn is_unconstrained(&self) -> bool {
        self == &QueryFilter::default()
    }
}

//
// ================= Aggregates =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DailyInsight {
    pub date: NaiveDate,
    pub total_income: i64,
    pub total_expense: i64,
    pub transaction_count: i64,
    pub top_customer: Option<String>,
}

impl DailyInsight {
    pub fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            total_income: 0,
            total_expense: 0,
            transaction_count: 0,
            top_customer: None,
        }
    }

    pub fn net(&self) -> i64 {
        self.total_income - self.total_expense
    }
}

/// Render minor units as a major-unit string ("500.00", "-12.50").
pub fn format_minor_units(amount: i64) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_type_parsing() {
        assert_eq!("Income".parse::<TransactionType>(), Ok(TransactionType::Income));
        assert_eq!(" expense ".parse::<TransactionType>(), Ok(TransactionType::Expense));
        assert!("refund".parse::<TransactionType>().is_err());
    }

    #[test]
    fn test_draft_accepts_paise_alias() {
        let draft: TransactionDraft = serde_json::from_value(serde_json::json!({
            "type": "income",
            "amount_paise": 50000,
            "customer": "Ram"
        }))
        .unwrap();

        assert_eq!(draft.amount_minor_units, Some(serde_json::json!(50000)));
        assert_eq!(draft.customer.as_deref(), Some("Ram"));
        assert!(draft.details.is_none());
    }

    #[test]
    fn test_filter_reads_iso_dates() {
        let filter: QueryFilter = serde_json::from_value(serde_json::json!({
            "customer_name": "ram",
            "type": "income",
            "date_from": "2024-03-01"
        }))
        .unwrap();

        assert_eq!(filter.kind, Some(TransactionType::Income));
        assert_eq!(filter.date_from, NaiveDate::from_ymd_opt(2024, 3, 1));
        assert!(!filter.is_unconstrained());
        assert!(QueryFilter::default().is_unconstrained());
    }

    #[test]
    fn test_filter_type_is_case_insensitive() {
        let filter: QueryFilter = serde_json::from_value(serde_json::json!({
            "type": "Income",
            "customer_name": "ram"
        }))
        .unwrap();
        assert_eq!(filter.kind, Some(TransactionType::Income));

        let result: std::result::Result<QueryFilter, _> =
            serde_json::from_value(serde_json::json!({ "type": "refund" }));
        assert!(result.is_err());
    }

    #[test]
    fn test_filter_blank_fields_are_absent() {
        let filter: QueryFilter = serde_json::from_value(serde_json::json!({
            "type": "",
            "customer_name": "  ",
            "details_keyword": "",
            "date_from": "",
            "date_to": null
        }))
        .unwrap();

        assert!(filter.is_unconstrained());
    }

    #[test]
    fn test_format_minor_units() {
        assert_eq!(format_minor_units(50000), "500.00");
        assert_eq!(format_minor_units(5), "0.05");
        assert_eq!(format_minor_units(-1250), "-12.50");
    }
}
