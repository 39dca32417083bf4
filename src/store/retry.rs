//! Bounded retry for store contention

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::LedgerError;
use crate::Result;

/// Retries an operation while it reports `TransientStore`.
///
/// `max_retries = 3` means at most four attempts. Any other error, or success,
/// returns immediately. Exhausting the retries escalates to `Store`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    pub async fn run<T, F, Fut>(&self, operation: &str, mut attempt_fn: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;

        loop {
            match attempt_fn().await {
                Err(err) if err.is_transient() => {
                    if attempt >= self.max_attempts() {
                        return Err(LedgerError::Store(format!(
                            "{} failed after {} attempts: {}",
                            operation, attempt, err
                        )));
                    }

                    warn!(
                        operation,
                        attempt,
                        max_attempts = self.max_attempts(),
                        "Retrying: {}",
                        err
                    );
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}
