//! Ledger reports and daily stats

use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Write;

use crate::models::{format_minor_units, DailyInsight, ReportPeriod, Transaction, TransactionType};
use crate::store::LedgerStore;
use crate::Result;

pub const TOP_CUSTOMERS: usize = 5;
pub const RECENT_ROWS: usize = 20;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CustomerTotal {
    pub customer: String,
    pub income: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LedgerReport {
    pub period: ReportPeriod,
    pub total_income: i64,
    pub total_expense: i64,
    pub net_profit: i64,
    pub top_customers: Vec<CustomerTotal>,
    pub recent: Vec<Transaction>,
}

impl LedgerReport {
    /// Build from rows ordered most-recent-first.
    pub fn build(period: ReportPeriod, today: NaiveDate, rows: &[Transaction]) -> Self {
        let in_period: Vec<&Transaction> = rows
            .iter()
            .filter(|row| in_period(period, today, row.timestamp.date()))
            .collect();

        let mut total_income = 0;
        let mut total_expense = 0;
        let mut by_customer: HashMap<&str, i64> = HashMap::new();

        for row in &in_period {
            match row.kind {
                TransactionType::Income => {
                    total_income += row.amount_minor_units;
                    if let Some(customer) = row.customer.as_deref() {
                        *by_customer.entry(customer).or_default() += row.amount_minor_units;
                    }
                }
                TransactionType::Expense => total_expense += row.amount_minor_units,
            }
        }

        let mut top_customers: Vec<CustomerTotal> = by_customer
            .into_iter()
            .map(|(customer, income)| CustomerTotal {
                customer: customer.to_string(),
                income,
            })
            .collect();
        top_customers.sort_by(|a, b| b.income.cmp(&a.income).then_with(|| a.customer.cmp(&b.customer)));
        top_customers.truncate(TOP_CUSTOMERS);

        Self {
            period,
            total_income,
            total_expense,
            net_profit: total_income - total_expense,
            top_customers,
            recent: in_period.into_iter().take(RECENT_ROWS).cloned().collect(),
        }
    }

    pub fn render(&self) -> String {
        let title = match self.period {
            ReportPeriod::Today => "Today's Report",
            ReportPeriod::Monthly => "Monthly Report",
            ReportPeriod::AllTime => "All-Time Report",
        };

        let mut out = String::new();
        let _ = writeln!(out, "{}", title);
        let _ = writeln!(out, "Total Income:   Rs {}", format_minor_units(self.total_income));
        let _ = writeln!(out, "Total Expenses: Rs {}", format_minor_units(self.total_expense));
        let _ = writeln!(out, "Net Profit:     Rs {}", format_minor_units(self.net_profit));

        if !self.top_customers.is_empty() {
            let _ = writeln!(out, "\nTop Customers");
            for (rank, entry) in self.top_customers.iter().enumerate() {
                let _ = writeln!(
                    out,
                    "{}. {}: Rs {}",
                    rank + 1,
                    entry.customer,
                    format_minor_units(entry.income)
                );
            }
        }

        let _ = writeln!(out, "\nRecent Transactions");
        if self.recent.is_empty() {
            let _ = writeln!(out, "No transactions recorded.");
        }
        for row in &self.recent {
            let _ = writeln!(
                out,
                "{} | {} | Rs {} | {} | {}",
                row.timestamp.format("%Y-%m-%d %H:%M"),
                row.kind,
                format_minor_units(row.amount_minor_units),
                row.customer.as_deref().unwrap_or("-"),
                row.details.as_deref().unwrap_or("-"),
            );
        }

        out.trim_end().to_string()
    }
}

fn in_period(period: ReportPeriod, today: NaiveDate, day: NaiveDate) -> bool {
    match period {
        ReportPeriod::Today => day == today,
        ReportPeriod::Monthly => day.year() == today.year() && day.month() == today.month(),
        ReportPeriod::AllTime => true,
    }
}

pub async fn generate(store: &dyn LedgerStore, period: ReportPeriod) -> Result<LedgerReport> {
    let rows = store.get_all().await?;
    Ok(LedgerReport::build(period, store.today(), &rows))
}

/// Today's aggregate, zeroed when nothing was recorded
pub async fn today_stats(store: &dyn LedgerStore) -> Result<DailyInsight> {
    let today = store.today();
    Ok(store
        .daily_insight(today)
        .await?
        .unwrap_or_else(|| DailyInsight::empty(today)))
}

pub fn render_stats(stats: &DailyInsight) -> String {
    format!(
        "Stats for {}\nIncome: Rs {}\nExpenses: Rs {}\nNet: Rs {}\nTransactions: {}\nTop customer: {}",
        stats.date,
        format_minor_units(stats.total_income),
        format_minor_units(stats.total_expense),
        format_minor_units(stats.net()),
        stats.transaction_count,
        stats.top_customer.as_deref().unwrap_or("-"),
    )
}
