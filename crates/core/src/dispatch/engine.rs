//! Ticket lifecycle operations.
//!
//! Every mutation goes through one store transaction and, once committed,
//! is published to the event hub. Rule rejections come back as values and
//! publish nothing.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use tracing::{debug, info, warn};

use super::{CallOutcome, DispatchError, IssueRequest};
use crate::config::Config;
use crate::hub::{EventHub, QueueEvent};
use crate::metrics::{
    CALL_NEXT_OUTCOMES, TICKETS_FINISHED, TICKETS_ISSUED, TICKETS_TRANSFERRED,
};
use crate::numbering::{queue_date_for, NumberingService};
use crate::queue::{
    Assignment, Counter, CounterCommand, Outcome, QueueStats, Resolution, Ticket, Transfer,
};
use crate::store::{with_deadline, Claim, CounterChange, IssueTicket, QueueStore, StoreError};

/// Coordinates the ticket/counter state machine with the store and the hub.
pub struct DispatchEngine {
    store: Arc<dyn QueueStore>,
    numbering: NumberingService,
    hub: EventHub,
    store_timeout: Duration,
}

impl DispatchEngine {
    pub fn new(
        store: Arc<dyn QueueStore>,
        numbering: NumberingService,
        hub: EventHub,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            numbering,
            hub,
            store_timeout,
        }
    }

    pub fn from_config(store: Arc<dyn QueueStore>, hub: EventHub, config: &Config) -> Self {
        let numbering =
            NumberingService::from_config(Arc::clone(&store), &config.numbering, &config.dispatch);
        Self::new(store, numbering, hub, config.dispatch.store_timeout())
    }

    async fn call<T>(
        &self,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, DispatchError> {
        Ok(with_deadline(self.store_timeout, call).await?)
    }

    async fn require_counter(&self, counter_id: i64) -> Result<Counter, DispatchError> {
        self.call(self.store.get_counter(counter_id))
            .await?
            .ok_or_else(|| StoreError::not_found("counter", counter_id).into())
    }

    fn publish(&self, event: QueueEvent) {
        self.hub.publish(event);
    }

    /// Publish fresh statistics; a failed read only skips the event.
    async fn publish_stats(&self, queue_date: NaiveDate) {
        match self.call(self.store.queue_stats(queue_date)).await {
            Ok(stats) => self.publish(QueueEvent::StatsUpdate(stats)),
            Err(e) => warn!(error = %e, "Failed to load queue stats, skipping stats_update"),
        }
    }

    // =========================================================================
    // Tickets
    // =========================================================================

    /// Issue a numbered ticket for a category.
    pub async fn issue_ticket(&self, request: IssueRequest) -> Result<Outcome<Ticket>, DispatchError> {
        let now = Utc::now();
        let queue_date = queue_date_for(now);

        let outcome = self
            .numbering
            .issue(IssueTicket {
                category_id: request.category_id,
                queue_date,
                priority: request.priority,
                notes: request.notes,
                created_at: now,
            })
            .await?;

        match &outcome {
            Outcome::Applied(ticket) => {
                info!(
                    ticket_id = ticket.id,
                    ticket_number = %ticket.ticket_number,
                    category_id = ticket.category_id,
                    priority = ticket.priority,
                    "Ticket issued"
                );
                TICKETS_ISSUED
                    .with_label_values(&[&ticket.category_id.to_string()])
                    .inc();
                self.publish(QueueEvent::TicketUpdate(ticket.clone()));
                self.publish_stats(queue_date).await;
            }
            Outcome::Rejected(rejection) => {
                debug!(category_id = request.category_id, %rejection, "Ticket not issued");
            }
        }
        Ok(outcome)
    }

    /// Hand the best waiting ticket to a counter.
    ///
    /// Offline, paused or busy counters get `Busy` and nothing changes.
    /// An empty queue leaves the counter idle.
    pub async fn call_next(&self, counter_id: i64) -> Result<CallOutcome, DispatchError> {
        let now = Utc::now();
        let claim = self.call(self.store.claim_next(counter_id, now)).await?;

        let outcome = match claim {
            Claim::Claimed(Assignment { ticket, counter }) => {
                info!(
                    counter_id,
                    ticket_id = ticket.id,
                    ticket_number = %ticket.ticket_number,
                    "Called next ticket"
                );
                self.publish(QueueEvent::TicketUpdate(ticket.clone()));
                self.publish(QueueEvent::CounterUpdate(counter.clone()));
                self.publish_stats(queue_date_for(now)).await;
                CallOutcome::Called { ticket, counter }
            }
            Claim::Empty(counter) => {
                debug!(counter_id, "Call next found an empty queue");
                CallOutcome::QueueEmpty { counter }
            }
            Claim::Busy(rejection) => {
                debug!(counter_id, %rejection, "Call next refused");
                CallOutcome::Busy(rejection)
            }
        };

        CALL_NEXT_OUTCOMES
            .with_label_values(&[outcome.result()])
            .inc();
        Ok(outcome)
    }

    /// Finish the counter's active ticket as served.
    pub async fn complete_ticket(&self, counter_id: i64) -> Result<Outcome<Assignment>, DispatchError> {
        self.finish(counter_id, Resolution::Completed).await
    }

    /// Finish the counter's active ticket as a no-show.
    pub async fn mark_no_show(&self, counter_id: i64) -> Result<Outcome<Assignment>, DispatchError> {
        self.finish(counter_id, Resolution::NoShow).await
    }

    async fn finish(
        &self,
        counter_id: i64,
        resolution: Resolution,
    ) -> Result<Outcome<Assignment>, DispatchError> {
        let now = Utc::now();
        let outcome = self
            .call(self.store.finish_ticket(counter_id, resolution, now))
            .await?;

        match &outcome {
            Outcome::Applied(Assignment { ticket, counter }) => {
                info!(
                    counter_id,
                    ticket_id = ticket.id,
                    ticket_number = %ticket.ticket_number,
                    status = %ticket.status,
                    wait_secs = ticket.wait_time,
                    service_secs = ticket.service_time,
                    "Ticket finished"
                );
                TICKETS_FINISHED
                    .with_label_values(&[ticket.status.as_str()])
                    .inc();
                self.publish(QueueEvent::TicketUpdate(ticket.clone()));
                self.publish(QueueEvent::CounterUpdate(counter.clone()));
                self.publish_stats(queue_date_for(now)).await;
            }
            Outcome::Rejected(rejection) => {
                debug!(counter_id, %rejection, "Finish refused");
            }
        }
        Ok(outcome)
    }

    /// Move a serving ticket to another counter.
    pub async fn transfer_ticket(
        &self,
        ticket_id: i64,
        target_counter_id: i64,
    ) -> Result<Outcome<Transfer>, DispatchError> {
        let outcome = self
            .call(self.store.transfer_ticket(ticket_id, target_counter_id, Utc::now()))
            .await?;

        match &outcome {
            Outcome::Applied(transfer) => {
                info!(
                    ticket_id,
                    ticket_number = %transfer.ticket.ticket_number,
                    from_counter = transfer.source.id,
                    to_counter = transfer.target.id,
                    "Ticket transferred"
                );
                TICKETS_TRANSFERRED.inc();
                self.publish(QueueEvent::TicketUpdate(transfer.ticket.clone()));
                self.publish(QueueEvent::CounterUpdate(transfer.source.clone()));
                self.publish(QueueEvent::CounterUpdate(transfer.target.clone()));
            }
            Outcome::Rejected(rejection) => {
                debug!(ticket_id, target_counter_id, %rejection, "Transfer refused");
            }
        }
        Ok(outcome)
    }

    /// Withdraw a waiting ticket.
    pub async fn cancel_ticket(&self, ticket_id: i64) -> Result<Outcome<Ticket>, DispatchError> {
        let outcome = self.call(self.store.cancel_ticket(ticket_id)).await?;

        match &outcome {
            Outcome::Applied(ticket) => {
                info!(ticket_id, ticket_number = %ticket.ticket_number, "Ticket cancelled");
                TICKETS_FINISHED
                    .with_label_values(&[ticket.status.as_str()])
                    .inc();
                self.publish(QueueEvent::TicketUpdate(ticket.clone()));
                self.publish_stats(queue_date_for(Utc::now())).await;
            }
            Outcome::Rejected(rejection) => {
                debug!(ticket_id, %rejection, "Cancel refused");
            }
        }
        Ok(outcome)
    }

    /// Cancel tickets still waiting from earlier queue dates.
    pub async fn expire_stale_tickets(&self) -> Result<Vec<Ticket>, DispatchError> {
        let today = queue_date_for(Utc::now());
        let expired = self.call(self.store.cancel_waiting_before(today)).await?;

        if expired.is_empty() {
            debug!("No stale tickets to expire");
            return Ok(expired);
        }

        info!(count = expired.len(), before = %today, "Expired stale tickets");
        TICKETS_FINISHED
            .with_label_values(&["cancelled"])
            .inc_by(expired.len() as u64);
        for ticket in &expired {
            self.publish(QueueEvent::TicketUpdate(ticket.clone()));
        }
        self.publish_stats(today).await;
        Ok(expired)
    }

    // =========================================================================
    // Counters
    // =========================================================================

    /// Staff signs in at a counter.
    pub async fn open_counter(
        &self,
        counter_id: i64,
        staff_id: Option<String>,
    ) -> Result<Outcome<Counter>, DispatchError> {
        self.command(counter_id, CounterCommand::Open { staff_id })
            .await
    }

    /// Staff signs out; rejected while serving.
    pub async fn close_counter(&self, counter_id: i64) -> Result<Outcome<Counter>, DispatchError> {
        self.command(counter_id, CounterCommand::Close).await
    }

    /// Take a break; rejected while serving.
    pub async fn pause_counter(&self, counter_id: i64) -> Result<Outcome<Counter>, DispatchError> {
        self.command(counter_id, CounterCommand::Pause).await
    }

    pub async fn resume_counter(&self, counter_id: i64) -> Result<Outcome<Counter>, DispatchError> {
        self.command(counter_id, CounterCommand::Resume).await
    }

    async fn command(
        &self,
        counter_id: i64,
        command: CounterCommand,
    ) -> Result<Outcome<Counter>, DispatchError> {
        let name = command.name();
        let outcome = self
            .call(self.store.apply_counter_command(counter_id, command, Utc::now()))
            .await?;

        match &outcome {
            Outcome::Applied(CounterChange { counter, changed }) => {
                if *changed {
                    info!(counter_id, command = name, status = %counter.status, "Counter updated");
                    self.publish(QueueEvent::CounterUpdate(counter.clone()));
                } else {
                    debug!(counter_id, command = name, "Counter already in requested state");
                }
            }
            Outcome::Rejected(rejection) => {
                debug!(counter_id, command = name, %rejection, "Counter command refused");
            }
        }
        Ok(outcome.map(|change| change.counter))
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// The ticket currently serving at a counter.
    pub async fn current_ticket(&self, counter_id: i64) -> Result<Option<Ticket>, DispatchError> {
        self.require_counter(counter_id).await?;
        self.call(self.store.current_for_counter(counter_id)).await
    }

    /// Upcoming tickets for a counter, in the order they would be called.
    pub async fn waiting_preview(
        &self,
        counter_id: i64,
        limit: u32,
    ) -> Result<Vec<Ticket>, DispatchError> {
        let counter = self.require_counter(counter_id).await?;
        self.call(
            self.store
                .waiting_by_categories(&counter.category_ids, Some(limit)),
        )
        .await
    }

    /// Every serving ticket with the counter serving it.
    pub async fn now_serving(&self) -> Result<Vec<Assignment>, DispatchError> {
        let tickets = self.call(self.store.serving_tickets()).await?;
        let counters: HashMap<i64, Counter> = self
            .call(self.store.list_counters())
            .await?
            .into_iter()
            .map(|counter| (counter.id, counter))
            .collect();

        Ok(tickets
            .into_iter()
            .filter_map(|ticket| {
                let counter = counters.get(&ticket.counter_id?)?.clone();
                Some(Assignment { ticket, counter })
            })
            .collect())
    }

    /// Statistics for today's queue.
    pub async fn stats(&self) -> Result<QueueStats, DispatchError> {
        self.call(self.store.queue_stats(queue_date_for(Utc::now())))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::Subscription;
    use crate::numbering::RetryPolicy;
    use crate::queue::{CounterStatus, Rejection, TicketStatus};
    use crate::store::{NewCategory, NewCounter, SqliteQueueStore};

    struct Fixture {
        sqlite: Arc<SqliteQueueStore>,
        engine: DispatchEngine,
        events: Subscription,
    }

    fn fixture_with_timeout(store_timeout: Duration) -> Fixture {
        let sqlite = Arc::new(SqliteQueueStore::in_memory().unwrap());
        let store: Arc<dyn QueueStore> = sqlite.clone();
        let hub = EventHub::new(64);
        let events = hub.register();
        let numbering = NumberingService::new(store.clone(), RetryPolicy::default(), store_timeout);
        let engine = DispatchEngine::new(store, numbering, hub, store_timeout);
        Fixture {
            sqlite,
            engine,
            events,
        }
    }

    fn fixture() -> Fixture {
        fixture_with_timeout(Duration::from_secs(5))
    }

    impl Fixture {
        async fn category(&self, prefix: &str, priority: i32) -> i64 {
            self.sqlite
                .create_category(
                    NewCategory {
                        name: format!("Category {}", prefix),
                        prefix: prefix.to_string(),
                        priority,
                        is_active: true,
                    },
                    Utc::now(),
                )
                .await
                .unwrap()
                .id
        }

        async fn counter(&self, number: &str, categories: Vec<i64>) -> i64 {
            let id = self
                .sqlite
                .create_counter(
                    NewCounter {
                        number: number.to_string(),
                        name: None,
                        category_ids: categories,
                    },
                    Utc::now(),
                )
                .await
                .unwrap()
                .id;
            self.engine.open_counter(id, None).await.unwrap();
            id
        }

        async fn issue(&self, category_id: i64) -> Ticket {
            self.engine
                .issue_ticket(IssueRequest {
                    category_id,
                    ..Default::default()
                })
                .await
                .unwrap()
                .applied()
                .unwrap()
        }

        fn drain(&mut self) -> Vec<&'static str> {
            let mut types = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                types.push(event.event_type());
            }
            types
        }
    }

    #[tokio::test]
    async fn test_issue_publishes_ticket_and_stats() {
        let mut fx = fixture();
        let category = fx.category("A", 1).await;

        let ticket = fx.issue(category).await;

        assert_eq!(ticket.ticket_number, "A001");
        assert_eq!(fx.drain(), vec!["ticket_update", "stats_update"]);
    }

    #[tokio::test]
    async fn test_call_next_publishes_after_commit() {
        let mut fx = fixture();
        let category = fx.category("A", 1).await;
        let counter = fx.counter("1", vec![category]).await;
        let ticket = fx.issue(category).await;
        fx.drain();

        let outcome = fx.engine.call_next(counter).await.unwrap();
        match &outcome {
            CallOutcome::Called { ticket: called, counter: at } => {
                assert_eq!(called.id, ticket.id);
                assert_eq!(called.status, TicketStatus::Serving);
                assert_eq!(at.status, CounterStatus::Serving);
            }
            other => panic!("expected called, got {:?}", other),
        }
        assert_eq!(
            fx.drain(),
            vec!["ticket_update", "counter_update", "stats_update"]
        );

        let busy = fx.engine.call_next(counter).await.unwrap();
        assert_eq!(
            busy,
            CallOutcome::Busy(Rejection::CounterBusy {
                ticket_id: ticket.id
            })
        );
        assert!(fx.drain().is_empty());
    }

    #[tokio::test]
    async fn test_empty_queue_publishes_nothing() {
        let mut fx = fixture();
        let category = fx.category("A", 1).await;
        let counter = fx.counter("1", vec![category]).await;
        fx.drain();

        let outcome = fx.engine.call_next(counter).await.unwrap();
        assert_eq!(outcome.result(), "queue_empty");
        assert!(fx.drain().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_counter_is_not_found() {
        let fx = fixture();
        let err = fx.engine.call_next(404).await.unwrap_err();
        assert!(matches!(err, DispatchError::NotFound { entity: "counter", .. }));

        let err = fx.engine.waiting_preview(404, 5).await.unwrap_err();
        assert!(matches!(err, DispatchError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_complete_and_no_show() {
        let mut fx = fixture();
        let category = fx.category("A", 1).await;
        let counter = fx.counter("1", vec![category]).await;
        fx.issue(category).await;
        fx.issue(category).await;

        fx.engine.call_next(counter).await.unwrap();
        let done = fx.engine.complete_ticket(counter).await.unwrap().applied().unwrap();
        assert_eq!(done.ticket.status, TicketStatus::Completed);
        assert_eq!(done.counter.status, CounterStatus::Idle);
        assert!(done.ticket.service_time.is_some());

        fx.engine.call_next(counter).await.unwrap();
        fx.drain();
        let gone = fx.engine.mark_no_show(counter).await.unwrap().applied().unwrap();
        assert_eq!(gone.ticket.status, TicketStatus::NoShow);
        assert!(gone.ticket.wait_time.is_some());
        assert_eq!(
            fx.drain(),
            vec!["ticket_update", "counter_update", "stats_update"]
        );

        let nothing = fx.engine.complete_ticket(counter).await.unwrap();
        assert_eq!(nothing.rejection(), Some(Rejection::NoActiveTicket));
    }

    #[tokio::test]
    async fn test_transfer_publishes_both_counters() {
        let mut fx = fixture();
        let category = fx.category("A", 1).await;
        let source = fx.counter("1", vec![category]).await;
        let target = fx.counter("2", vec![category]).await;
        let ticket = fx.issue(category).await;
        fx.engine.call_next(source).await.unwrap();
        fx.drain();

        let transfer = fx
            .engine
            .transfer_ticket(ticket.id, target)
            .await
            .unwrap()
            .applied()
            .unwrap();
        assert_eq!(transfer.ticket.counter_id, Some(target));
        assert_eq!(
            fx.drain(),
            vec!["ticket_update", "counter_update", "counter_update"]
        );

        // The source is free again and can call the next visitor.
        let next = fx.issue(category).await;
        let outcome = fx.engine.call_next(source).await.unwrap();
        assert_eq!(outcome.ticket().map(|t| t.id), Some(next.id));
    }

    #[tokio::test]
    async fn test_pause_resume_and_idempotent_commands() {
        let mut fx = fixture();
        let category = fx.category("A", 1).await;
        let counter = fx.counter("1", vec![category]).await;
        fx.issue(category).await;
        fx.drain();

        let paused = fx.engine.pause_counter(counter).await.unwrap().applied().unwrap();
        assert_eq!(paused.status, CounterStatus::Paused);
        assert_eq!(fx.drain(), vec!["counter_update"]);

        fx.engine.pause_counter(counter).await.unwrap();
        assert!(fx.drain().is_empty());

        let refused = fx.engine.call_next(counter).await.unwrap();
        assert_eq!(refused, CallOutcome::Busy(Rejection::CounterPaused));

        fx.engine.resume_counter(counter).await.unwrap();
        fx.engine.call_next(counter).await.unwrap();
        let mid_service = fx.engine.pause_counter(counter).await.unwrap();
        assert_eq!(mid_service.rejection(), Some(Rejection::CounterServing));
        let close = fx.engine.close_counter(counter).await.unwrap();
        assert_eq!(close.rejection(), Some(Rejection::CounterServing));
    }

    #[tokio::test]
    async fn test_cancel_ticket() {
        let mut fx = fixture();
        let category = fx.category("A", 1).await;
        let ticket = fx.issue(category).await;
        fx.drain();

        let cancelled = fx.engine.cancel_ticket(ticket.id).await.unwrap().applied().unwrap();
        assert_eq!(cancelled.status, TicketStatus::Cancelled);
        assert_eq!(fx.drain(), vec!["ticket_update", "stats_update"]);

        let err = fx.engine.cancel_ticket(9999).await.unwrap_err();
        assert!(matches!(err, DispatchError::NotFound { entity: "ticket", .. }));
    }

    #[tokio::test]
    async fn test_now_serving_and_preview() {
        let fx = fixture();
        let general = fx.category("A", 1).await;
        let vip = fx.category("V", 9).await;
        let first = fx.counter("1", vec![general, vip]).await;
        fx.counter("2", vec![general]).await;

        let a1 = fx.issue(general).await;
        let v1 = fx.issue(vip).await;
        let a2 = fx.issue(general).await;

        let preview = fx.engine.waiting_preview(first, 10).await.unwrap();
        let ids: Vec<i64> = preview.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![v1.id, a1.id, a2.id]);

        fx.engine.call_next(first).await.unwrap();
        let serving = fx.engine.now_serving().await.unwrap();
        assert_eq!(serving.len(), 1);
        assert_eq!(serving[0].ticket.id, v1.id);
        assert_eq!(serving[0].counter.id, first);

        let current = fx.engine.current_ticket(first).await.unwrap();
        assert_eq!(current.map(|t| t.id), Some(v1.id));
    }

    #[tokio::test]
    async fn test_store_deadline_surfaces_timeout() {
        let fx = fixture_with_timeout(Duration::from_millis(20));
        let category = fx.category("A", 1).await;
        let counter = fx.counter("1", vec![category]).await;

        let guard = fx.sqlite.hold_connection().await;
        let err = fx.engine.call_next(counter).await.unwrap_err();
        assert!(matches!(err, DispatchError::Store(StoreError::Timeout)));
        assert!(err.is_transient());
        drop(guard);

        let outcome = fx.engine.call_next(counter).await.unwrap();
        assert_eq!(outcome.result(), "queue_empty");
    }
}
