//! Error types for the technician ledger

use thiserror::Error;

/// Result type alias for ledger operations
pub type Result<T> = std::result::Result<T, LedgerError>;

#[derive(Error, Debug)]
pub enum LedgerError {

    // =============================
    // Core Pipeline Errors
    // =============================

    #[error("Invalid transaction: {0}")]
    Validation(String),

    #[error("Store is busy: {0}")]
    TransientStore(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Parse error: {message} | raw={raw}")]
    Parse { message: String, raw: String },

    #[error("A request is already in progress for this session")]
    Busy,

    #[error("Configuration error: {0}")]
    Config(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LedgerError {
    pub fn parse(message: impl Into<String>, raw: impl Into<String>) -> Self {
        LedgerError::Parse {
            message: message.into(),
            raw: raw.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::TransientStore(_))
    }
}

/// SQLite primary result codes for lock contention
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut => LedgerError::TransientStore(err.to_string()),
            sqlx::Error::Database(db) => {
                // Extended codes carry the primary code in the low byte.
                let primary = db
                    .code()
                    .and_then(|code| code.parse::<i32>().ok())
                    .map(|code| code & 0xff);

                match primary {
                    Some(SQLITE_BUSY) | Some(SQLITE_LOCKED) => {
                        LedgerError::TransientStore(db.message().to_string())
                    }
                    _ => LedgerError::Store(err.to_string()),
                }
            }
            _ => LedgerError::Store(err.to_string()),
        }
    }
}

impl From<reqwest::Error> for LedgerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LedgerError::Transport(format!("request timed out: {}", err))
        } else {
            LedgerError::Transport(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_timeout_is_transient() {
        let err: LedgerError = sqlx::Error::PoolTimedOut.into();
        assert!(err.is_transient());
    }

    #[test]
    fn test_row_not_found_is_fatal() {
        let err: LedgerError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, LedgerError::Store(_)));
    }

    #[test]
    fn test_parse_error_keeps_raw_content() {
        let err = LedgerError::parse("missing intent", "{\"foo\": 1}");
        let rendered = err.to_string();
        assert!(rendered.contains("missing intent"));
        assert!(rendered.contains("{\"foo\": 1}"));
    }
}
