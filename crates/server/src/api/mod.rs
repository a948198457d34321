pub mod admin;
pub mod counters;
pub mod display;
pub mod error;
pub mod handlers;
pub mod kiosk;
pub mod middleware;
pub mod routes;
pub mod tickets;
pub mod ws;

pub use error::{ApiError, ApiResult};
pub use routes::create_router;
