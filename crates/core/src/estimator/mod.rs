//! Queue position and wait estimation.
//!
//! Everything here is read-only over a store snapshot and safe to call as
//! often as viewers poll.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{DispatchConfig, EstimatorConfig};
use crate::dispatch::DispatchError;
use crate::numbering::queue_date_for;
use crate::queue::{Ticket, TicketStatus};
use crate::store::{with_deadline, QueueStore, StoreError};

/// Number of waiting tickets ahead of `target` in its category.
///
/// Counts same-category waiting tickets created before it (ties broken by
/// id, as dispatch does). Priority is ignored. `None` when `target` is not
/// waiting.
pub fn position_in(snapshot: &[Ticket], target: &Ticket) -> Option<u32> {
    if !target.is_waiting() {
        return None;
    }
    let ahead = snapshot
        .iter()
        .filter(|t| {
            t.category_id == target.category_id
                && t.is_waiting()
                && (t.created_at, t.id) < (target.created_at, target.id)
        })
        .count();
    Some(u32::try_from(ahead).unwrap_or(u32::MAX))
}

/// Wait in whole minutes (rounded up) for a ticket at `position`.
pub fn estimated_wait_minutes(position: u32, average_service_secs: f64) -> u32 {
    let secs = f64::from(position) * average_service_secs.max(0.0);
    (secs / 60.0).ceil() as u32
}

/// Position and wait estimate for a waiting ticket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Estimate {
    pub position: u32,
    pub estimated_wait_minutes: u32,
}

/// Public view of a ticket for the tracking page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingInfo {
    pub ticket_number: String,
    pub status: TicketStatus,
    pub category_name: String,
    pub counter_number: Option<String>,
    /// Only set while the ticket is waiting.
    pub position: Option<u32>,
    pub estimated_wait_minutes: Option<u32>,
    pub created_at: DateTime<Utc>,
}

pub struct QueueEstimator {
    store: Arc<dyn QueueStore>,
    fallback_service_secs: f64,
    history: ChronoDuration,
    store_timeout: Duration,
}

impl QueueEstimator {
    pub fn new(
        store: Arc<dyn QueueStore>,
        config: &EstimatorConfig,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            fallback_service_secs: f64::from(config.fallback_service_minutes) * 60.0,
            history: ChronoDuration::days(i64::from(config.history_days)),
            store_timeout,
        }
    }

    pub fn from_config(
        store: Arc<dyn QueueStore>,
        estimator: &EstimatorConfig,
        dispatch: &DispatchConfig,
    ) -> Self {
        Self::new(store, estimator, dispatch.store_timeout())
    }

    async fn call<T>(
        &self,
        call: impl std::future::Future<Output = Result<T, StoreError>>,
    ) -> Result<T, DispatchError> {
        Ok(with_deadline(self.store_timeout, call).await?)
    }

    /// Current position of a ticket, `None` once it has left the queue.
    pub async fn queue_position(&self, ticket_id: i64) -> Result<Option<u32>, DispatchError> {
        let ticket = self
            .call(self.store.get_ticket(ticket_id))
            .await?
            .ok_or_else(|| StoreError::not_found("ticket", ticket_id))?;
        self.position_of(&ticket).await
    }

    async fn position_of(&self, ticket: &Ticket) -> Result<Option<u32>, DispatchError> {
        if !ticket.is_waiting() {
            return Ok(None);
        }
        let snapshot = self
            .call(self.store.waiting_by_categories(&[ticket.category_id], None))
            .await?;
        Ok(position_in(&snapshot, ticket))
    }

    /// Mean service time per ticket over the history window, or the
    /// configured fallback when nothing was completed in it.
    pub async fn average_service_secs(&self, category_id: Option<i64>) -> Result<f64, DispatchError> {
        let since = Utc::now() - self.history;
        let average = self
            .call(self.store.average_service_secs(category_id, since))
            .await?;
        Ok(average.unwrap_or(self.fallback_service_secs))
    }

    /// Position and wait for a ticket, `None` if it is not waiting.
    pub async fn estimate(&self, ticket: &Ticket) -> Result<Option<Estimate>, DispatchError> {
        let Some(position) = self.position_of(ticket).await? else {
            return Ok(None);
        };
        let average = self.average_service_secs(Some(ticket.category_id)).await?;
        Ok(Some(Estimate {
            position,
            estimated_wait_minutes: estimated_wait_minutes(position, average),
        }))
    }

    /// Look up today's ticket by its printed number.
    pub async fn tracking_info(&self, ticket_number: &str) -> Result<TrackingInfo, DispatchError> {
        let today = queue_date_for(Utc::now());
        let ticket = self
            .call(self.store.find_ticket_by_number(ticket_number, today))
            .await?
            .ok_or_else(|| StoreError::not_found("ticket", ticket_number))?;

        let category_name = self
            .call(self.store.get_category(ticket.category_id))
            .await?
            .map(|c| c.name)
            .unwrap_or_default();

        let counter_number = match ticket.counter_id {
            Some(id) => self.call(self.store.get_counter(id)).await?.map(|c| c.number),
            None => None,
        };

        let estimate = self.estimate(&ticket).await?;

        Ok(TrackingInfo {
            ticket_number: ticket.ticket_number,
            status: ticket.status,
            category_name,
            counter_number,
            position: estimate.map(|e| e.position),
            estimated_wait_minutes: estimate.map(|e| e.estimated_wait_minutes),
            created_at: ticket.created_at,
        })
    }
}
