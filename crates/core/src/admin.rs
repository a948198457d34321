//! Category and counter administration.
//!
//! A thin write surface over the store: validates input, persists, and
//! announces the change on the hub.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use tracing::info;

use crate::dispatch::DispatchError;
use crate::hub::{EventHub, QueueEvent};
use crate::queue::{Category, Counter};
use crate::store::{with_deadline, CategoryUpdate, NewCategory, NewCounter, QueueStore, StoreError};

/// Request to create a category.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateCategoryRequest {
    pub name: String,
    /// Letters printed before the sequence, e.g. `A` for `A001`.
    pub prefix: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

/// Partial category update.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateCategoryRequest {
    pub name: Option<String>,
    pub priority: Option<i32>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateCounterRequest {
    pub number: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub category_ids: Vec<i64>,
}

pub struct AdminService {
    store: Arc<dyn QueueStore>,
    hub: EventHub,
    store_timeout: Duration,
}

impl AdminService {
    pub fn new(store: Arc<dyn QueueStore>, hub: EventHub, store_timeout: Duration) -> Self {
        Self {
            store,
            hub,
            store_timeout,
        }
    }

    async fn call<T>(
        &self,
        call: impl std::future::Future<Output = Result<T, StoreError>>,
    ) -> Result<T, DispatchError> {
        Ok(with_deadline(self.store_timeout, call).await?)
    }

    pub async fn create_category(
        &self,
        request: CreateCategoryRequest,
    ) -> Result<Category, DispatchError> {
        let name = required_name(&request.name, "category name")?;
        let prefix = request.prefix.trim();
        if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(DispatchError::invalid(format!(
                "prefix must be one or more letters, got {:?}",
                request.prefix
            )));
        }

        let category = self
            .call(self.store.create_category(
                NewCategory {
                    name,
                    prefix: prefix.to_ascii_uppercase(),
                    priority: request.priority,
                    is_active: request.is_active,
                },
                Utc::now(),
            ))
            .await?;

        info!(category_id = category.id, prefix = %category.prefix, "Category created");
        self.hub.publish(QueueEvent::CategoryCreated(category.clone()));
        Ok(category)
    }

    pub async fn update_category(
        &self,
        id: i64,
        request: UpdateCategoryRequest,
    ) -> Result<Category, DispatchError> {
        let name = request
            .name
            .as_deref()
            .map(|n| required_name(n, "category name"))
            .transpose()?;

        let category = self
            .call(self.store.update_category(
                id,
                CategoryUpdate {
                    name,
                    priority: request.priority,
                    is_active: request.is_active,
                },
                Utc::now(),
            ))
            .await?;

        info!(
            category_id = id,
            priority = category.priority,
            is_active = category.is_active,
            "Category updated"
        );
        self.hub.publish(QueueEvent::CategoryUpdated(category.clone()));
        Ok(category)
    }

    pub async fn create_counter(
        &self,
        request: CreateCounterRequest,
    ) -> Result<Counter, DispatchError> {
        let number = required_name(&request.number, "counter number")?;
        self.require_categories(&request.category_ids).await?;

        let counter = self
            .call(self.store.create_counter(
                NewCounter {
                    number,
                    name: request.name,
                    category_ids: request.category_ids,
                },
                Utc::now(),
            ))
            .await?;

        info!(counter_id = counter.id, number = %counter.number, "Counter created");
        self.hub.publish(QueueEvent::CounterCreated(counter.clone()));
        Ok(counter)
    }

    /// Replace the categories a counter serves.
    pub async fn assign_counter_categories(
        &self,
        counter_id: i64,
        category_ids: Vec<i64>,
    ) -> Result<Counter, DispatchError> {
        self.require_categories(&category_ids).await?;
        let counter = self
            .call(
                self.store
                    .set_counter_categories(counter_id, category_ids, Utc::now()),
            )
            .await?;

        info!(counter_id, categories = ?counter.category_ids, "Counter categories assigned");
        self.hub.publish(QueueEvent::CounterUpdated(counter.clone()));
        Ok(counter)
    }

    pub async fn list_categories(&self, active_only: bool) -> Result<Vec<Category>, DispatchError> {
        self.call(self.store.list_categories(active_only)).await
    }

    pub async fn list_counters(&self) -> Result<Vec<Counter>, DispatchError> {
        self.call(self.store.list_counters()).await
    }

    async fn require_categories(&self, ids: &[i64]) -> Result<(), DispatchError> {
        for &id in ids {
            if self.call(self.store.get_category(id)).await?.is_none() {
                return Err(StoreError::not_found("category", id).into());
            }
        }
        Ok(())
    }
}

fn required_name(value: &str, what: &str) -> Result<String, DispatchError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DispatchError::invalid(format!("{} must not be empty", what)));
    }
    Ok(trimmed.to_string())
}
