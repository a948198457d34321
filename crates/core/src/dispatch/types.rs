use serde::{Deserialize, Serialize};

use crate::queue::{Counter, Rejection, Ticket};

/// Request to issue a ticket at a kiosk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IssueRequest {
    pub category_id: i64,
    /// Overrides the category priority (e.g. priority visitors).
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Result of a call-next request.
///
/// Only `Called` changes anything visible to other viewers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CallOutcome {
    /// A ticket was assigned to the counter.
    Called { ticket: Ticket, counter: Counter },
    /// Nothing is waiting in the counter's categories.
    QueueEmpty { counter: Counter },
    /// The counter cannot take a ticket right now.
    Busy(Rejection),
}

impl CallOutcome {
    pub fn result(&self) -> &'static str {
        match self {
            CallOutcome::Called { .. } => "called",
            CallOutcome::QueueEmpty { .. } => "queue_empty",
            CallOutcome::Busy(_) => "busy",
        }
    }

    pub fn ticket(&self) -> Option<&Ticket> {
        match self {
            CallOutcome::Called { ticket, .. } => Some(ticket),
            _ => None,
        }
    }
}
