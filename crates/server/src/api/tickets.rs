//! Ticket API handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};

use queuedesk_core::{Ticket, Transfer};

use super::error::{applied, ApiResult};
use crate::state::AppState;

/// Request body for transferring a ticket
#[derive(Debug, Deserialize)]
pub struct TransferBody {
    /// Counter that takes over the visitor
    pub counter_id: i64,
}

/// Response for the stale ticket sweep
#[derive(Debug, Serialize)]
pub struct ExpireResponse {
    pub expired: usize,
    pub tickets: Vec<Ticket>,
}

pub async fn transfer_ticket(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(body): Json<TransferBody>,
) -> ApiResult<Transfer> {
    Ok(Json(applied(
        state.engine().transfer_ticket(id, body.counter_id).await?,
    )?))
}

/// Withdraw a waiting ticket
pub async fn cancel_ticket(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Ticket> {
    Ok(Json(applied(state.engine().cancel_ticket(id).await?)?))
}

/// Cancel tickets left waiting from previous days
pub async fn expire_stale(State(state): State<Arc<AppState>>) -> ApiResult<ExpireResponse> {
    let tickets = state.engine().expire_stale_tickets().await?;
    Ok(Json(ExpireResponse {
        expired: tickets.len(),
        tickets,
    }))
}
