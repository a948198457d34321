//! Race-free daily ticket numbering.
//!
//! Sequences are keyed by (category, queue date) and allocated by the store
//! in a single atomic statement. This service adds the deadline and the
//! bounded retry loop around that allocation.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate, Utc};
use tracing::{debug, warn};

use crate::config::{DispatchConfig, NumberingConfig};
use crate::dispatch::DispatchError;
use crate::metrics::SEQUENCE_RETRIES;
use crate::queue::{Outcome, Ticket};
use crate::store::{with_deadline, IssueTicket, QueueStore, StoreError};

/// Format a ticket number: prefix plus the sequence padded to 3 digits.
///
/// Sequences past 999 simply grow (`A1000`).
pub fn format_ticket_number(prefix: &str, sequence: u32) -> String {
    format!("{}{:03}", prefix, sequence)
}

/// The local calendar day an instant belongs to.
pub fn queue_date_for(now: DateTime<Utc>) -> NaiveDate {
    now.with_timezone(&Local).date_naive()
}

/// Bounded retry for transient allocation failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Attempt `n` sleeps `n * backoff` before the next try.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&NumberingConfig::default())
    }
}

impl From<&NumberingConfig> for RetryPolicy {
    fn from(config: &NumberingConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }
}

/// Allocates daily sequences and issues numbered tickets.
pub struct NumberingService {
    store: Arc<dyn QueueStore>,
    retry: RetryPolicy,
    store_timeout: Duration,
}

impl NumberingService {
    pub fn new(store: Arc<dyn QueueStore>, retry: RetryPolicy, store_timeout: Duration) -> Self {
        Self {
            store,
            retry,
            store_timeout,
        }
    }

    pub fn from_config(
        store: Arc<dyn QueueStore>,
        numbering: &NumberingConfig,
        dispatch: &DispatchConfig,
    ) -> Self {
        Self::new(store, RetryPolicy::from(numbering), dispatch.store_timeout())
    }

    /// Allocate the next sequence for a category on a queue date.
    ///
    /// Concurrent callers for the same key always observe distinct values.
    pub async fn next_sequence(
        &self,
        category_id: i64,
        queue_date: NaiveDate,
    ) -> Result<u32, DispatchError> {
        self.with_retry("next_sequence", || {
            self.store.next_sequence(category_id, queue_date)
        })
        .await
    }

    /// Allocate a sequence and insert the ticket atomically.
    pub async fn issue(&self, request: IssueTicket) -> Result<Outcome<Ticket>, DispatchError> {
        let outcome = self
            .with_retry("issue", || self.store.issue_ticket(request.clone()))
            .await?;

        if let Outcome::Applied(ticket) = &outcome {
            debug!(
                ticket_id = ticket.id,
                ticket_number = %ticket.ticket_number,
                queue_date = %ticket.queue_date,
                "Allocated ticket number"
            );
        }
        Ok(outcome)
    }

    async fn with_retry<T, F, Fut>(
        &self,
        operation: &'static str,
        mut call: F,
    ) -> Result<T, DispatchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match with_deadline(self.store_timeout, call()).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() => {
                    if attempt >= self.retry.max_attempts {
                        warn!(
                            operation,
                            attempts = attempt,
                            error = %err,
                            "Sequence allocation gave up"
                        );
                        return Err(DispatchError::SequenceExhausted {
                            attempts: attempt,
                            source: err,
                        });
                    }
                    SEQUENCE_RETRIES.inc();
                    debug!(operation, attempt, error = %err, "Sequence allocation contended, retrying");
                    tokio::time::sleep(self.retry.backoff * attempt).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}
