//! SQLite ledger backed by sqlx
//!
//! SQLite serializes writers at the file level; a writer that cannot take
//! the lock within the busy timeout surfaces as `TransientStore` and is
//! retried by the store's `RetryPolicy`.

use chrono::{Local, NaiveDate, NaiveDateTime};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteRow,
};
use sqlx::{QueryBuilder, Row, Sqlite};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::{validate, validate_changes, LedgerStore, RetryPolicy};
use crate::error::LedgerError;
use crate::models::{
    DailyInsight, NewTransaction, QueryFilter, Transaction, TransactionChanges, TransactionDraft,
    TransactionType,
};
use crate::Result;

const COLUMNS: &str = "id, type, amount, customer, details, timestamp";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Source of "now" for timestamps and the meaning of "today"
pub type Clock = Arc<dyn Fn() -> NaiveDateTime + Send + Sync>;

pub struct SqliteLedger {
    pool: SqlitePool,
    retry: RetryPolicy,
    clock: Clock,
}

impl SqliteLedger {
    /// Open (creating if missing) a file-backed ledger and ensure the schema.
    pub async fn connect(url: &str, busy_timeout: Duration, retry: RetryPolicy) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| LedgerError::Config(format!("invalid database url '{}': {}", url, e)))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| LedgerError::Store(format!("failed to open ledger at {}: {}", url, e)))?;

        let ledger = Self::from_pool(pool, retry);
        ledger.init_schema().await?;

        info!(url, "Ledger store ready");
        Ok(ledger)
    }

    /// Private in-memory ledger; a single pinned connection keeps it alive.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| LedgerError::Config(e.to_string()))?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let ledger = Self::from_pool(pool, RetryPolicy::default());
        ledger.init_schema().await?;
        Ok(ledger)
    }

    fn from_pool(pool: SqlitePool, retry: RetryPolicy) -> Self {
        Self {
            pool,
            retry,
            clock: Arc::new(|| Local::now().naive_local()),
        }
    }

    pub fn with_clock(mut self, clock: impl Fn() -> NaiveDateTime + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    async fn init_schema(&self) -> Result<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS transactions (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              type TEXT NOT NULL CHECK (type IN ('income', 'expense')),
              amount INTEGER NOT NULL CHECK (amount > 0),
              customer TEXT,
              details TEXT,
              timestamp TEXT NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_transactions_timestamp ON transactions (timestamp)",
            r#"
            CREATE TABLE IF NOT EXISTS daily_insight (
              date TEXT NOT NULL UNIQUE,
              total_income INTEGER NOT NULL DEFAULT 0,
              total_expense INTEGER NOT NULL DEFAULT 0,
              transaction_count INTEGER NOT NULL DEFAULT 0,
              top_customer TEXT
            )
            "#,
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    LedgerError::Store(format!("Failed to initialize ledger schema: {}", e))
                })?;
        }

        Ok(())
    }

    async fn try_insert(&self, record: &NewTransaction, timestamp: NaiveDateTime) -> Result<i64> {
        let mut tx = self.pool.begin().await?;

        let id = sqlx::query(
            "INSERT INTO transactions (type, amount, customer, details, timestamp) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(record.kind.as_str())
        .bind(record.amount_minor_units)
        .bind(record.customer.clone())
        .bind(record.details.clone())
        .bind(timestamp.format(TIMESTAMP_FORMAT).to_string())
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        recompute_insight(&mut *tx, timestamp.date()).await?;
        tx.commit().await?;

        Ok(id)
    }

    async fn try_update(&self, id: i64, changes: &TransactionChanges) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE transactions SET ");
        {
            let mut set = builder.separated(", ");
            if let Some(kind) = changes.kind {
                set.push("type = ");
                set.push_bind_unseparated(kind.as_str());
            }
            if let Some(amount) = changes.amount_minor_units {
                set.push("amount = ");
                set.push_bind_unseparated(amount);
            }
            if let Some(customer) = &changes.customer {
                set.push("customer = ");
                set.push_bind_unseparated(customer.clone());
            }
            if let Some(details) = &changes.details {
                set.push("details = ");
                set.push_bind_unseparated(details.clone());
            }
        }
        builder.push(" WHERE id = ");
        builder.push_bind(id);

        let affected = builder.build().execute(&mut *tx).await?.rows_affected();
        if affected == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        let timestamp: String = sqlx::query_scalar("SELECT timestamp FROM transactions WHERE id = ?")
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;

        recompute_insight(&mut *tx, parse_timestamp(&timestamp)?.date()).await?;
        tx.commit().await?;

        Ok(true)
    }

    async fn try_delete_scope(&self, day: NaiveDate) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query("DELETE FROM transactions WHERE DATE(timestamp) = ?")
            .bind(day.format(DATE_FORMAT).to_string())
            .execute(&mut *tx)
            .await?
            .rows_affected();

        recompute_insight(&mut *tx, day).await?;
        tx.commit().await?;

        Ok(removed)
    }
}

#[async_trait::async_trait]
impl LedgerStore for SqliteLedger {
    async fn insert(&self, draft: &TransactionDraft) -> Result<i64> {
        let record = validate(draft)?;
        let timestamp = self.now();

        let id = self
            .retry
            .run("insert", || self.try_insert(&record, timestamp))
            .await?;

        debug!(transaction_id = id, kind = %record.kind, amount = record.amount_minor_units, "Transaction inserted");
        Ok(id)
    }

    async fn update(&self, id: i64, draft: &TransactionDraft) -> Result<bool> {
        let changes = validate_changes(draft)?;
        if changes.is_empty() {
            return Ok(false);
        }

        let updated = self
            .retry
            .run("update", || self.try_update(id, &changes))
            .await?;

        debug!(transaction_id = id, updated, "Transaction update applied");
        Ok(updated)
    }

    async fn delete_scope(&self, day: NaiveDate) -> Result<u64> {
        let removed = self
            .retry
            .run("delete", || self.try_delete_scope(day))
            .await?;

        info!(%day, removed, "Deleted transactions for day");
        Ok(removed)
    }

    async fn get_last(&self) -> Result<Option<Transaction>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM transactions ORDER BY id DESC LIMIT 1",
            COLUMNS
        ))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_transaction).transpose()
    }

    async fn get_by_day(&self, day: NaiveDate) -> Result<Vec<Transaction>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM transactions WHERE DATE(timestamp) = ? ORDER BY timestamp DESC, id DESC",
            COLUMNS
        ))
        .bind(day.format(DATE_FORMAT).to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_transaction).collect()
    }

    async fn get_all(&self) -> Result<Vec<Transaction>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM transactions ORDER BY timestamp DESC, id DESC",
            COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_transaction).collect()
    }

    async fn query(&self, filter: &QueryFilter) -> Result<Vec<Transaction>> {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {} FROM transactions WHERE 1=1", COLUMNS));

        if let Some(customer) = &filter.customer_name {
            builder.push(" AND LOWER(customer) LIKE ");
            builder.push_bind(like_pattern(customer));
            builder.push(" ESCAPE '\\'");
        }

        if let Some(keyword) = &filter.details_keyword {
            builder.push(" AND LOWER(details) LIKE ");
            builder.push_bind(like_pattern(keyword));
            builder.push(" ESCAPE '\\'");
        }

        if let Some(kind) = filter.kind {
            builder.push(" AND type = ");
            builder.push_bind(kind.as_str());
        }

        if let Some(min) = filter.min_amount {
            builder.push(" AND amount >= ");
            builder.push_bind(min);
        }

        if let Some(max) = filter.max_amount {
            builder.push(" AND amount <= ");
            builder.push_bind(max);
        }

        if let Some(from) = filter.date_from {
            builder.push(" AND DATE(timestamp) >= ");
            builder.push_bind(from.format(DATE_FORMAT).to_string());
        }

        if let Some(to) = filter.date_to {
            builder.push(" AND DATE(timestamp) <= ");
            builder.push_bind(to.format(DATE_FORMAT).to_string());
        }

        builder.push(" ORDER BY timestamp DESC, id DESC");

        if let Some(limit) = filter.limit {
            builder.push(" LIMIT ");
            builder.push_bind(i64::from(limit));
        }

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_transaction).collect()
    }

    async fn daily_insight(&self, day: NaiveDate) -> Result<Option<DailyInsight>> {
        let row = sqlx::query(
            "SELECT total_income, total_expense, transaction_count, top_customer FROM daily_insight WHERE date = ?",
        )
        .bind(day.format(DATE_FORMAT).to_string())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(DailyInsight {
            date: day,
            total_income: row.try_get("total_income")?,
            total_expense: row.try_get("total_expense")?,
            transaction_count: row.try_get("transaction_count")?,
            top_customer: row.try_get("top_customer")?,
        }))
    }

    fn now(&self) -> NaiveDateTime {
        (self.clock)()
    }
}

/// Rebuild one day's aggregate inside the caller's transaction.
async fn recompute_insight(conn: &mut SqliteConnection, day: NaiveDate) -> Result<()> {
    let day_key = day.format(DATE_FORMAT).to_string();

    let totals = sqlx::query(
        r#"
        SELECT
          COALESCE(SUM(CASE WHEN type = 'income' THEN amount ELSE 0 END), 0) AS total_income,
          COALESCE(SUM(CASE WHEN type = 'expense' THEN amount ELSE 0 END), 0) AS total_expense,
          COUNT(*) AS transaction_count
        FROM transactions
        WHERE DATE(timestamp) = ?
        "#,
    )
    .bind(&day_key)
    .fetch_one(&mut *conn)
    .await?;

    let total_income: i64 = totals.try_get("total_income")?;
    let total_expense: i64 = totals.try_get("total_expense")?;
    let transaction_count: i64 = totals.try_get("transaction_count")?;

    let top_customer: Option<String> = sqlx::query_scalar(
        r#"
        SELECT customer
        FROM transactions
        WHERE DATE(timestamp) = ? AND type = 'income' AND customer IS NOT NULL AND customer <> ''
        GROUP BY customer
        ORDER BY SUM(amount) DESC, MIN(id) ASC
        LIMIT 1
        "#,
    )
    .bind(&day_key)
    .fetch_optional(&mut *conn)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO daily_insight (date, total_income, total_expense, transaction_count, top_customer)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT (date) DO UPDATE SET
          total_income = excluded.total_income,
          total_expense = excluded.total_expense,
          transaction_count = excluded.transaction_count,
          top_customer = excluded.top_customer
        "#,
    )
    .bind(&day_key)
    .bind(total_income)
    .bind(total_expense)
    .bind(transaction_count)
    .bind(top_customer)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

fn row_to_transaction(row: &SqliteRow) -> Result<Transaction> {
    let kind: String = row.try_get("type")?;
    let timestamp: String = row.try_get("timestamp")?;

    Ok(Transaction {
        id: row.try_get("id")?,
        kind: kind.parse::<TransactionType>().map_err(LedgerError::Store)?,
        amount_minor_units: row.try_get("amount")?,
        customer: row.try_get("customer")?,
        details: row.try_get("details")?,
        timestamp: parse_timestamp(&timestamp)?,
    })
}

fn parse_timestamp(raw: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .map_err(|e| LedgerError::Store(format!("corrupt timestamp '{}': {}", raw, e)))
}

/// Case-insensitive substring pattern with LIKE wildcards escaped
fn like_pattern(needle: &str) -> String {
    let escaped = needle
        .to_lowercase()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}
