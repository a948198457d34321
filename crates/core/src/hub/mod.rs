//! Real-time event distribution to live viewers.

mod broadcaster;
mod events;

pub use broadcaster::{EventHub, PublishReport, Subscription};
pub use events::QueueEvent;
