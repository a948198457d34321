//! Staff API handlers for a single counter.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use queuedesk_core::{Assignment, CallOutcome, Counter, Ticket};

use super::error::{applied, ApiError, ApiResult};
use crate::state::AppState;

/// Maximum number of tickets in a waiting preview
const MAX_PREVIEW: u32 = 100;

/// Default number of tickets in a waiting preview
const DEFAULT_PREVIEW: u32 = 10;

#[derive(Debug, Deserialize)]
pub struct OpenCounterBody {
    /// Staff member signing in.
    pub staff_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PreviewParams {
    pub limit: Option<u32>,
}

/// Response for the active ticket lookup
#[derive(Debug, Serialize)]
pub struct CurrentTicketResponse {
    pub ticket: Option<Ticket>,
}

/// Call the next visitor.
///
/// An empty queue is a normal 200 answer; a counter that cannot call is 409.
pub async fn call_next(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<CallOutcome> {
    match state.engine().call_next(id).await? {
        CallOutcome::Busy(rejection) => Err(ApiError::Rejected(rejection)),
        outcome => Ok(Json(outcome)),
    }
}

pub async fn complete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Assignment> {
    Ok(Json(applied(state.engine().complete_ticket(id).await?)?))
}

pub async fn no_show(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Assignment> {
    Ok(Json(applied(state.engine().mark_no_show(id).await?)?))
}

pub async fn pause(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Counter> {
    Ok(Json(applied(state.engine().pause_counter(id).await?)?))
}

pub async fn resume(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Counter> {
    Ok(Json(applied(state.engine().resume_counter(id).await?)?))
}

/// Staff signs in; the body is optional.
pub async fn open(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    body: Option<Json<OpenCounterBody>>,
) -> ApiResult<Counter> {
    let staff_id = body.and_then(|Json(body)| body.staff_id);
    Ok(Json(applied(state.engine().open_counter(id, staff_id).await?)?))
}

pub async fn close(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Counter> {
    Ok(Json(applied(state.engine().close_counter(id).await?)?))
}

pub async fn current(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<CurrentTicketResponse> {
    let ticket = state.engine().current_ticket(id).await?;
    Ok(Json(CurrentTicketResponse { ticket }))
}

/// Tickets this counter would call next, in order.
pub async fn waiting(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(params): Query<PreviewParams>,
) -> ApiResult<Vec<Ticket>> {
    let limit = params.limit.unwrap_or(DEFAULT_PREVIEW).clamp(1, MAX_PREVIEW);
    Ok(Json(state.engine().waiting_preview(id, limit).await?))
}
