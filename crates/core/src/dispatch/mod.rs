//! Dispatch engine: ticket lifecycle operations and event publication.

mod engine;
mod error;
mod types;

pub use engine::DispatchEngine;
pub use error::DispatchError;
pub use types::{CallOutcome, IssueRequest};
