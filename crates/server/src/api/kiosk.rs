//! Kiosk API handlers: pick a category, take a ticket.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use queuedesk_core::{Category, IssueRequest, Ticket};

use super::error::{applied, ApiError, ApiResult};
use crate::state::AppState;

/// A freshly printed ticket with its place in line.
#[derive(Debug, Serialize)]
pub struct IssuedTicketResponse {
    pub ticket: Ticket,
    pub position: Option<u32>,
    pub estimated_wait_minutes: Option<u32>,
}

/// Categories a visitor can choose from.
pub async fn list_categories(State(state): State<Arc<AppState>>) -> ApiResult<Vec<Category>> {
    Ok(Json(state.admin().list_categories(true).await?))
}

/// Issue a ticket
pub async fn issue_ticket(
    State(state): State<Arc<AppState>>,
    Json(body): Json<IssueRequest>,
) -> Result<(StatusCode, Json<IssuedTicketResponse>), ApiError> {
    let ticket = applied(state.engine().issue_ticket(body).await?)?;
    let estimate = state.estimator().estimate(&ticket).await?;

    Ok((
        StatusCode::CREATED,
        Json(IssuedTicketResponse {
            position: estimate.map(|e| e.position),
            estimated_wait_minutes: estimate.map(|e| e.estimated_wait_minutes),
            ticket,
        }),
    ))
}
