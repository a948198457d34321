use serde::{Deserialize, Serialize};

use crate::queue::{Category, Counter, QueueStats, Ticket};

/// A state change fanned out to live viewers.
///
/// Serialized as `{"type": "...", "payload": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum QueueEvent {
    /// A ticket was issued or changed status/counter.
    TicketUpdate(Ticket),
    /// A counter changed status through the lifecycle.
    CounterUpdate(Counter),
    /// Fresh queue statistics for the current day.
    StatsUpdate(QueueStats),
    CategoryCreated(Category),
    CategoryUpdated(Category),
    CounterCreated(Counter),
    /// A counter's configuration (served categories) changed.
    CounterUpdated(Counter),
}

impl QueueEvent {
    /// Returns the wire name of the event.
    pub fn event_type(&self) -> &'static str {
        match self {
            QueueEvent::TicketUpdate(_) => "ticket_update",
            QueueEvent::CounterUpdate(_) => "counter_update",
            QueueEvent::StatsUpdate(_) => "stats_update",
            QueueEvent::CategoryCreated(_) => "category_created",
            QueueEvent::CategoryUpdated(_) => "category_updated",
            QueueEvent::CounterCreated(_) => "counter_created",
            QueueEvent::CounterUpdated(_) => "counter_updated",
        }
    }
}
