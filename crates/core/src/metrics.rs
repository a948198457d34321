//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Ticket issuance and sequence allocation
//! - Dispatch outcomes (call-next, completion, no-show)
//! - Event hub fan-out

use once_cell::sync::Lazy;
use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts};

// =============================================================================
// Numbering
// =============================================================================

/// Tickets issued total by category.
pub static TICKETS_ISSUED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("queuedesk_tickets_issued_total", "Total tickets issued"),
        &["category_id"],
    )
    .unwrap()
});

/// Sequence allocations retried after contention or timeout.
pub static SEQUENCE_RETRIES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "queuedesk_sequence_retries_total",
        "Total sequence allocation retries",
    )
    .unwrap()
});

// =============================================================================
// Dispatch
// =============================================================================

/// Call-next outcomes by result.
pub static CALL_NEXT_OUTCOMES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("queuedesk_call_next_total", "Total call-next requests"),
        &["result"], // "called", "queue_empty", "busy"
    )
    .unwrap()
});

/// Tickets that reached a terminal status, by status.
pub static TICKETS_FINISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "queuedesk_tickets_finished_total",
            "Total tickets that reached a terminal status",
        ),
        &["status"], // "completed", "no_show", "cancelled"
    )
    .unwrap()
});

/// Tickets moved between counters.
pub static TICKETS_TRANSFERRED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "queuedesk_tickets_transferred_total",
        "Total tickets transferred between counters",
    )
    .unwrap()
});

// =============================================================================
// Event hub
// =============================================================================

/// Events published by type.
pub static HUB_EVENTS_PUBLISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("queuedesk_hub_events_published_total", "Total hub events published"),
        &["type"],
    )
    .unwrap()
});

/// Subscribers dropped because their buffer was full or their receiver gone.
pub static HUB_SUBSCRIBERS_DROPPED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "queuedesk_hub_subscribers_dropped_total",
        "Total hub subscribers dropped during publish",
    )
    .unwrap()
});

/// Currently registered subscribers.
pub static HUB_SUBSCRIBERS: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "queuedesk_hub_subscribers",
        "Number of registered hub subscribers",
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Numbering
        Box::new(TICKETS_ISSUED.clone()),
        Box::new(SEQUENCE_RETRIES.clone()),
        // Dispatch
        Box::new(CALL_NEXT_OUTCOMES.clone()),
        Box::new(TICKETS_FINISHED.clone()),
        Box::new(TICKETS_TRANSFERRED.clone()),
        // Event hub
        Box::new(HUB_EVENTS_PUBLISHED.clone()),
        Box::new(HUB_SUBSCRIBERS_DROPPED.clone()),
        Box::new(HUB_SUBSCRIBERS.clone()),
    ]
}
