//! Queue entities and the ticket/counter state machine.

pub mod machine;
mod types;

pub use machine::{CounterCommand, Outcome, Rejection};
pub use types::{
    Assignment, Category, CategoryQueueLength, Counter, CounterStatus, QueueStats, Resolution,
    Ticket, TicketStatus, Transfer,
};
