//! Category and counter administration handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use queuedesk_core::{
    Category, Counter, CreateCategoryRequest, CreateCounterRequest, UpdateCategoryRequest,
};

use super::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AssignCategoriesBody {
    pub category_ids: Vec<i64>,
}

pub async fn list_categories(State(state): State<Arc<AppState>>) -> ApiResult<Vec<Category>> {
    Ok(Json(state.admin().list_categories(false).await?))
}

pub async fn create_category(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateCategoryRequest>,
) -> Result<(StatusCode, Json<Category>), ApiError> {
    let category = state.admin().create_category(body).await?;
    Ok((StatusCode::CREATED, Json(category)))
}

pub async fn update_category(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateCategoryRequest>,
) -> ApiResult<Category> {
    Ok(Json(state.admin().update_category(id, body).await?))
}

pub async fn list_counters(State(state): State<Arc<AppState>>) -> ApiResult<Vec<Counter>> {
    Ok(Json(state.admin().list_counters().await?))
}

pub async fn create_counter(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateCounterRequest>,
) -> Result<(StatusCode, Json<Counter>), ApiError> {
    let counter = state.admin().create_counter(body).await?;
    Ok((StatusCode::CREATED, Json(counter)))
}

/// Replace the categories a counter serves.
pub async fn assign_categories(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(body): Json<AssignCategoriesBody>,
) -> ApiResult<Counter> {
    Ok(Json(
        state
            .admin()
            .assign_counter_categories(id, body.category_ids)
            .await?,
    ))
}
