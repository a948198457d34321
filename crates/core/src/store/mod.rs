//! Storage contract for categories, counters and tickets.

mod sqlite;

pub use sqlite::SqliteQueueStore;

use std::future::Future;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

use crate::queue::{
    Assignment, Category, Counter, CounterCommand, Outcome, QueueStats, Rejection, Resolution,
    Ticket, Transfer,
};

/// Error type for store operations.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Another writer holds the lock; safe to retry.
    #[error("Store contention: {0}")]
    Contention(String),

    /// The caller's deadline expired before the store answered.
    #[error("Store call timed out")]
    Timeout,

    /// A uniqueness constraint rejected the write.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        StoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Returns true if the failure is transient and the call may be repeated.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Contention(_) | StoreError::Timeout)
    }
}

tokio::task_local! {
    static CALL_DEADLINE: Instant;
}

/// Run a store call under a deadline.
///
/// Expiry drops the call and surfaces [`StoreError::Timeout`]. Store calls
/// only suspend while waiting for the connection, so an abandoned call has
/// not applied anything. Once a call holds the connection, stores read the
/// deadline through [`call_deadline`] to bound any blocking wait of their own.
pub async fn with_deadline<T, F>(deadline: Duration, call: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    let expires = Instant::now() + deadline;
    match tokio::time::timeout(deadline, CALL_DEADLINE.scope(expires, call)).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout),
    }
}

/// Deadline of the enclosing [`with_deadline`] call, if any.
pub(crate) fn call_deadline() -> Option<Instant> {
    CALL_DEADLINE.try_with(|deadline| *deadline).ok()
}

/// Request to create a category.
#[derive(Debug, Clone)]
pub struct NewCategory {
    pub name: String,
    pub prefix: String,
    pub priority: i32,
    pub is_active: bool,
}

/// Partial category update; `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct CategoryUpdate {
    pub name: Option<String>,
    pub priority: Option<i32>,
    pub is_active: Option<bool>,
}

/// Request to create a counter. New counters start offline.
#[derive(Debug, Clone)]
pub struct NewCounter {
    pub number: String,
    pub name: Option<String>,
    pub category_ids: Vec<i64>,
}

/// Request to issue a ticket.
#[derive(Debug, Clone)]
pub struct IssueTicket {
    pub category_id: i64,
    pub queue_date: NaiveDate,
    /// Overrides the category priority when set.
    pub priority: Option<i32>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Result of an atomic next-ticket claim.
#[derive(Debug, Clone, PartialEq)]
pub enum Claim {
    /// A waiting ticket was handed to the counter.
    Claimed(Assignment),
    /// Nothing waiting in the counter's categories; the counter is idle.
    Empty(Counter),
    /// The counter cannot take a ticket right now.
    Busy(Rejection),
}

/// Counter after a staff command, and whether anything changed.
#[derive(Debug, Clone, PartialEq)]
pub struct CounterChange {
    pub counter: Counter,
    pub changed: bool,
}

/// Trait for queue storage backends.
///
/// Every mutation is applied atomically: either the whole transition is
/// persisted or nothing is. Implementations may only be abandoned (dropped
/// mid-call) before a transaction starts.
#[async_trait]
pub trait QueueStore: Send + Sync {
    // Categories

    async fn create_category(
        &self,
        new: NewCategory,
        now: DateTime<Utc>,
    ) -> Result<Category, StoreError>;

    async fn update_category(
        &self,
        id: i64,
        update: CategoryUpdate,
        now: DateTime<Utc>,
    ) -> Result<Category, StoreError>;

    async fn get_category(&self, id: i64) -> Result<Option<Category>, StoreError>;

    /// Categories ordered by priority (highest first), then id.
    async fn list_categories(&self, active_only: bool) -> Result<Vec<Category>, StoreError>;

    // Counters

    async fn create_counter(
        &self,
        new: NewCounter,
        now: DateTime<Utc>,
    ) -> Result<Counter, StoreError>;

    /// Replace the set of categories a counter serves.
    async fn set_counter_categories(
        &self,
        id: i64,
        category_ids: Vec<i64>,
        now: DateTime<Utc>,
    ) -> Result<Counter, StoreError>;

    async fn get_counter(&self, id: i64) -> Result<Option<Counter>, StoreError>;

    async fn list_counters(&self) -> Result<Vec<Counter>, StoreError>;

    /// Apply a staff command to a counter.
    async fn apply_counter_command(
        &self,
        id: i64,
        command: CounterCommand,
        now: DateTime<Utc>,
    ) -> Result<Outcome<CounterChange>, StoreError>;

    // Ticket reads

    async fn get_ticket(&self, id: i64) -> Result<Option<Ticket>, StoreError>;

    async fn find_ticket_by_number(
        &self,
        ticket_number: &str,
        queue_date: NaiveDate,
    ) -> Result<Option<Ticket>, StoreError>;

    /// The ticket currently serving at a counter, if any.
    async fn current_for_counter(&self, counter_id: i64) -> Result<Option<Ticket>, StoreError>;

    /// Waiting tickets in the given categories, in dispatch order.
    async fn waiting_by_categories(
        &self,
        category_ids: &[i64],
        limit: Option<u32>,
    ) -> Result<Vec<Ticket>, StoreError>;

    /// All tickets currently being served, most recently called first.
    async fn serving_tickets(&self) -> Result<Vec<Ticket>, StoreError>;

    // Ticket writes

    /// Allocate the next daily sequence for a category.
    async fn next_sequence(&self, category_id: i64, queue_date: NaiveDate)
        -> Result<u32, StoreError>;

    /// Allocate a sequence and insert the ticket in one transaction.
    async fn issue_ticket(&self, request: IssueTicket) -> Result<Outcome<Ticket>, StoreError>;

    /// Select the best waiting ticket for a counter and assign it.
    async fn claim_next(&self, counter_id: i64, now: DateTime<Utc>) -> Result<Claim, StoreError>;

    /// End the ticket serving at a counter and return the counter to idle.
    async fn finish_ticket(
        &self,
        counter_id: i64,
        resolution: Resolution,
        now: DateTime<Utc>,
    ) -> Result<Outcome<Assignment>, StoreError>;

    /// Move a serving ticket to another counter, releasing the source.
    async fn transfer_ticket(
        &self,
        ticket_id: i64,
        target_counter_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Outcome<Transfer>, StoreError>;

    async fn cancel_ticket(&self, ticket_id: i64) -> Result<Outcome<Ticket>, StoreError>;

    /// Cancel every ticket still waiting from a queue date before `queue_date`.
    async fn cancel_waiting_before(&self, queue_date: NaiveDate)
        -> Result<Vec<Ticket>, StoreError>;

    // Aggregates

    /// Mean service time in seconds of tickets completed since `since`.
    async fn average_service_secs(
        &self,
        category_id: Option<i64>,
        since: DateTime<Utc>,
    ) -> Result<Option<f64>, StoreError>;

    async fn queue_stats(&self, queue_date: NaiveDate) -> Result<QueueStats, StoreError>;
}
