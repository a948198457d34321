//! Ticket/counter state machine.
//!
//! Every transition that touches both a counter and a ticket is a single
//! function over mutable snapshots of both rows. Stores load the rows inside
//! one transaction, apply the function, and write both rows back before
//! committing, so a counter can never be left serving without a ticket (or
//! the other way around).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::{Category, Counter, CounterStatus, Resolution, Ticket, TicketStatus};

/// Why a lifecycle operation did nothing.
///
/// These are expected outcomes the caller branches on, not failures.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Rejection {
    /// The counter has no staff signed in.
    CounterOffline,
    /// Staff is on a break.
    CounterPaused,
    /// The counter already has an active ticket.
    CounterBusy { ticket_id: i64 },
    /// The counter serves no category.
    NoCategories,
    /// Completion or no-show requested with nothing being served.
    NoActiveTicket,
    /// Pause or close requested while a ticket is being served.
    CounterServing,
    /// Resume requested on a counter that is not paused.
    CounterNotPaused,
    /// Transfer target is the counter already serving the ticket.
    SameCounter,
    TicketNotWaiting { status: TicketStatus },
    TicketNotServing { status: TicketStatus },
    /// Tickets cannot be issued for a disabled category.
    CategoryInactive,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::CounterOffline => write!(f, "counter is offline"),
            Rejection::CounterPaused => write!(f, "counter is paused"),
            Rejection::CounterBusy { ticket_id } => {
                write!(f, "counter is already serving ticket {}", ticket_id)
            }
            Rejection::NoCategories => write!(f, "counter has no categories assigned"),
            Rejection::NoActiveTicket => write!(f, "counter has no active ticket"),
            Rejection::CounterServing => write!(f, "counter is serving a ticket"),
            Rejection::CounterNotPaused => write!(f, "counter is not paused"),
            Rejection::SameCounter => write!(f, "ticket is already at that counter"),
            Rejection::TicketNotWaiting { status } => {
                write!(f, "ticket is {}, not waiting", status)
            }
            Rejection::TicketNotServing { status } => {
                write!(f, "ticket is {}, not serving", status)
            }
            Rejection::CategoryInactive => write!(f, "category is inactive"),
        }
    }
}

/// Result of a guarded lifecycle operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Applied(T),
    Rejected(Rejection),
}

impl<T> Outcome<T> {
    pub fn applied(self) -> Option<T> {
        match self {
            Outcome::Applied(value) => Some(value),
            Outcome::Rejected(_) => None,
        }
    }

    pub fn rejection(&self) -> Option<Rejection> {
        match self {
            Outcome::Applied(_) => None,
            Outcome::Rejected(rejection) => Some(*rejection),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Applied(value) => Outcome::Applied(f(value)),
            Outcome::Rejected(rejection) => Outcome::Rejected(rejection),
        }
    }
}

/// Staff-driven counter status changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CounterCommand {
    /// Staff signs in: offline -> idle.
    Open { staff_id: Option<String> },
    /// Staff signs out: idle/paused -> offline.
    Close,
    /// Break: idle -> paused.
    Pause,
    /// Back from break: paused -> idle.
    Resume,
}

impl CounterCommand {
    pub fn name(&self) -> &'static str {
        match self {
            CounterCommand::Open { .. } => "open",
            CounterCommand::Close => "close",
            CounterCommand::Pause => "pause",
            CounterCommand::Resume => "resume",
        }
    }
}

/// Check whether a counter may take the next ticket.
///
/// `active` is the ticket currently serving at the counter, if any.
pub fn check_call(counter: &Counter, active: Option<&Ticket>) -> Result<(), Rejection> {
    if counter.status == CounterStatus::Offline {
        return Err(Rejection::CounterOffline);
    }
    if let Some(ticket) = active {
        return Err(Rejection::CounterBusy {
            ticket_id: ticket.id,
        });
    }
    if counter.status == CounterStatus::Paused {
        return Err(Rejection::CounterPaused);
    }
    if counter.category_ids.is_empty() {
        return Err(Rejection::NoCategories);
    }
    Ok(())
}

/// Hand a waiting ticket to a counter that passed [`check_call`].
pub fn assign(
    counter: &mut Counter,
    ticket: &mut Ticket,
    now: DateTime<Utc>,
) -> Result<(), Rejection> {
    if ticket.status != TicketStatus::Waiting {
        return Err(Rejection::TicketNotWaiting {
            status: ticket.status,
        });
    }
    ticket.status = TicketStatus::Serving;
    ticket.counter_id = Some(counter.id);
    ticket.called_at = Some(now);
    counter.status = CounterStatus::Serving;
    counter.updated_at = now;
    Ok(())
}

/// Return a counter to idle after finding nothing to call.
pub fn release_empty(counter: &mut Counter, now: DateTime<Utc>) -> bool {
    if counter.status == CounterStatus::Idle {
        return false;
    }
    counter.status = CounterStatus::Idle;
    counter.updated_at = now;
    true
}

/// End the active ticket at a counter.
///
/// `active` is the ticket currently serving at the counter, if any.
pub fn finish(
    counter: &mut Counter,
    active: Option<&mut Ticket>,
    resolution: Resolution,
    now: DateTime<Utc>,
) -> Result<(), Rejection> {
    let ticket = active.ok_or(Rejection::NoActiveTicket)?;
    if ticket.status != TicketStatus::Serving {
        return Err(Rejection::TicketNotServing {
            status: ticket.status,
        });
    }
    let called_at = ticket.called_at.unwrap_or(now);

    ticket.status = resolution.status();
    ticket.completed_at = Some(now);
    ticket.service_time = Some(seconds_between(called_at, now));
    ticket.wait_time = Some(seconds_between(ticket.created_at, called_at));

    counter.status = CounterStatus::Idle;
    counter.updated_at = now;
    Ok(())
}

/// Move a serving ticket straight to another counter.
///
/// The source counter goes back to idle in the same step. The target must
/// serve at least one category, though not necessarily the ticket's.
/// `target_active` is the ticket currently serving at the target, if any.
pub fn transfer(
    ticket: &mut Ticket,
    source: &mut Counter,
    target: &mut Counter,
    target_active: Option<&Ticket>,
    now: DateTime<Utc>,
) -> Result<(), Rejection> {
    if ticket.status != TicketStatus::Serving {
        return Err(Rejection::TicketNotServing {
            status: ticket.status,
        });
    }
    if source.id == target.id {
        return Err(Rejection::SameCounter);
    }
    match target.status {
        CounterStatus::Offline => return Err(Rejection::CounterOffline),
        CounterStatus::Paused => return Err(Rejection::CounterPaused),
        _ => {}
    }
    if target.category_ids.is_empty() {
        return Err(Rejection::NoCategories);
    }
    if let Some(active) = target_active {
        return Err(Rejection::CounterBusy {
            ticket_id: active.id,
        });
    }

    ticket.counter_id = Some(target.id);
    ticket.called_at = Some(now);

    source.status = CounterStatus::Idle;
    source.updated_at = now;
    target.status = CounterStatus::Serving;
    target.updated_at = now;
    Ok(())
}

/// Withdraw a waiting ticket.
pub fn cancel(ticket: &mut Ticket) -> Result<(), Rejection> {
    if ticket.status != TicketStatus::Waiting {
        return Err(Rejection::TicketNotWaiting {
            status: ticket.status,
        });
    }
    ticket.status = TicketStatus::Cancelled;
    Ok(())
}

/// Check that a category accepts new tickets.
pub fn check_issue(category: &Category) -> Result<(), Rejection> {
    if !category.is_active {
        return Err(Rejection::CategoryInactive);
    }
    Ok(())
}

/// Apply a staff command to a counter.
///
/// Returns whether the counter changed. Pausing mid-service is rejected
/// rather than deferred.
pub fn apply_command(
    counter: &mut Counter,
    command: &CounterCommand,
    now: DateTime<Utc>,
) -> Result<bool, Rejection> {
    let before = (counter.status, counter.staff_id.clone());

    match command {
        CounterCommand::Open { staff_id } => {
            if counter.status == CounterStatus::Offline {
                counter.status = CounterStatus::Idle;
            }
            if staff_id.is_some() {
                counter.staff_id = staff_id.clone();
            }
        }
        CounterCommand::Close => match counter.status {
            CounterStatus::Serving => return Err(Rejection::CounterServing),
            _ => {
                counter.status = CounterStatus::Offline;
                counter.staff_id = None;
            }
        },
        CounterCommand::Pause => match counter.status {
            CounterStatus::Offline => return Err(Rejection::CounterOffline),
            CounterStatus::Serving => return Err(Rejection::CounterServing),
            CounterStatus::Idle | CounterStatus::Paused => {
                counter.status = CounterStatus::Paused;
            }
        },
        CounterCommand::Resume => match counter.status {
            CounterStatus::Offline => return Err(Rejection::CounterOffline),
            CounterStatus::Serving => return Err(Rejection::CounterNotPaused),
            CounterStatus::Idle | CounterStatus::Paused => {
                counter.status = CounterStatus::Idle;
            }
        },
    }

    let changed = (counter.status, counter.staff_id.clone()) != before;
    if changed {
        counter.updated_at = now;
    }
    Ok(changed)
}

fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> u32 {
    let secs = (to - from).num_seconds().max(0);
    u32::try_from(secs).unwrap_or(u32::MAX)
}
