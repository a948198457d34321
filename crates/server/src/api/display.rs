//! Public display and tracking handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};

use queuedesk_core::{Assignment, QueueStats, TrackingInfo};

use super::error::ApiResult;
use crate::state::AppState;

/// Tickets being served right now, with their counters.
pub async fn now_serving(State(state): State<Arc<AppState>>) -> ApiResult<Vec<Assignment>> {
    Ok(Json(state.engine().now_serving().await?))
}

pub async fn stats(State(state): State<Arc<AppState>>) -> ApiResult<QueueStats> {
    Ok(Json(state.engine().stats().await?))
}

/// Where a visitor's ticket stands today.
pub async fn track_ticket(
    State(state): State<Arc<AppState>>,
    Path(ticket_number): Path<String>,
) -> ApiResult<TrackingInfo> {
    Ok(Json(state.estimator().tracking_info(&ticket_number).await?))
}
