pub mod admin;
pub mod config;
pub mod dispatch;
pub mod estimator;
pub mod hub;
pub mod metrics;
pub mod numbering;
pub mod queue;
pub mod store;

pub use admin::{AdminService, CreateCategoryRequest, CreateCounterRequest, UpdateCategoryRequest};
pub use config::{load_config, load_config_from_str, validate_config, Config, ConfigError};
pub use dispatch::{CallOutcome, DispatchEngine, DispatchError, IssueRequest};
pub use estimator::{Estimate, QueueEstimator, TrackingInfo};
pub use hub::{EventHub, PublishReport, QueueEvent, Subscription};
pub use numbering::{format_ticket_number, NumberingService, RetryPolicy};
pub use queue::{
    Assignment, Category, Counter, CounterStatus, Outcome, QueueStats, Rejection, Ticket,
    TicketStatus, Transfer,
};
pub use store::{QueueStore, SqliteQueueStore, StoreError};
