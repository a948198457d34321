//! Core queue data types.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Category
// ============================================================================

/// A service category visitors pick at the kiosk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Category {
    pub id: i64,
    /// Display name (e.g. "General").
    pub name: String,
    /// Alphabetic ticket-number prefix (e.g. "A").
    pub prefix: String,
    /// Higher is served first.
    pub priority: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Counter
// ============================================================================

/// Lifecycle status of a service counter.
///
/// ```text
/// Offline -> Idle <-> Serving -> Idle
/// Idle <-> Paused
/// Idle/Paused -> Offline
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CounterStatus {
    Offline,
    Idle,
    Serving,
    Paused,
}

impl CounterStatus {
    /// Returns the status as stored and serialized.
    pub fn as_str(&self) -> &'static str {
        match self {
            CounterStatus::Offline => "offline",
            CounterStatus::Idle => "idle",
            CounterStatus::Serving => "serving",
            CounterStatus::Paused => "paused",
        }
    }
}

impl std::fmt::Display for CounterStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CounterStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "offline" => Ok(CounterStatus::Offline),
            "idle" => Ok(CounterStatus::Idle),
            "serving" => Ok(CounterStatus::Serving),
            "paused" => Ok(CounterStatus::Paused),
            other => Err(format!("unknown counter status: {}", other)),
        }
    }
}

/// A service counter staffed by one person at a time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Counter {
    pub id: i64,
    /// Human-readable number shown on displays (e.g. "3").
    pub number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub status: CounterStatus,
    /// Categories this counter serves.
    #[serde(default)]
    pub category_ids: Vec<i64>,
    /// Opaque identity of the staff member signed in at the counter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staff_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Ticket
// ============================================================================

/// Status of a ticket.
///
/// `Waiting -> Serving -> Completed | NoShow`, `Waiting -> Cancelled`.
/// A serving ticket may move between counters without leaving `Serving`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Waiting,
    Serving,
    Completed,
    NoShow,
    Cancelled,
}

impl TicketStatus {
    /// Returns the status as stored and serialized.
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Waiting => "waiting",
            TicketStatus::Serving => "serving",
            TicketStatus::Completed => "completed",
            TicketStatus::NoShow => "no_show",
            TicketStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TicketStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(TicketStatus::Waiting),
            "serving" => Ok(TicketStatus::Serving),
            "completed" => Ok(TicketStatus::Completed),
            "no_show" => Ok(TicketStatus::NoShow),
            "cancelled" => Ok(TicketStatus::Cancelled),
            other => Err(format!("unknown ticket status: {}", other)),
        }
    }
}

/// How a served ticket ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Completed,
    NoShow,
}

impl Resolution {
    pub fn status(&self) -> TicketStatus {
        match self {
            Resolution::Completed => TicketStatus::Completed,
            Resolution::NoShow => TicketStatus::NoShow,
        }
    }
}

/// A visitor's place in the queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ticket {
    pub id: i64,
    /// Prefix plus zero-padded daily sequence (e.g. "A007").
    pub ticket_number: String,
    pub category_id: i64,
    /// Set while serving and kept afterwards for reporting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counter_id: Option<i64>,
    pub status: TicketStatus,
    /// Dispatch priority captured at issuance.
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    /// Calendar day the ticket belongs to.
    pub queue_date: NaiveDate,
    /// Unique per category per queue date.
    pub daily_sequence: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub called_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Seconds between issuance and the call (set on a terminal transition).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_time: Option<u32>,
    /// Seconds spent at the counter (set on a terminal transition).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_time: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Ticket {
    pub fn is_waiting(&self) -> bool {
        self.status == TicketStatus::Waiting
    }
}

/// A ticket together with the counter now serving it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Assignment {
    pub ticket: Ticket,
    pub counter: Counter,
}

/// Result of moving a serving ticket to another counter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transfer {
    pub ticket: Ticket,
    /// The counter the ticket left; back to idle.
    pub source: Counter,
    /// The counter now serving the ticket.
    pub target: Counter,
}

// ============================================================================
// Statistics
// ============================================================================

/// Waiting-queue length for one category.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryQueueLength {
    pub category_id: i64,
    pub category_name: String,
    pub prefix: String,
    pub waiting: u32,
}

/// Snapshot of a queue day, published as `stats_update`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueStats {
    pub queue_date: NaiveDate,
    pub total_tickets: u32,
    pub waiting: u32,
    pub serving: u32,
    pub completed: u32,
    pub no_show: u32,
    pub cancelled: u32,
    /// Counters that are open (idle or serving).
    pub active_counters: u32,
    pub paused_counters: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_wait_secs: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_service_secs: Option<u32>,
    pub queue_by_category: Vec<CategoryQueueLength>,
}
