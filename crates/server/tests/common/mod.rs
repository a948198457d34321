//! Common test utilities for driving the API in-process.
//!
//! The fixture builds the real router over a scratch SQLite file and sends
//! requests through `tower::ServiceExt::oneshot`.

#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use queuedesk_core::{Config, EventHub, QueueStore, SqliteQueueStore};
use queuedesk_server::{api::create_router, state::AppState};

/// In-process server over a temporary database.
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    /// Shared state, for reaching the hub directly
    pub state: Arc<AppState>,
    /// Temporary directory holding the test database
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestFixture {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");

        let mut config = Config::default();
        config.database.path = db_path.clone();

        let store: Arc<dyn QueueStore> = Arc::new(
            SqliteQueueStore::open(&db_path, config.database.busy_timeout())
                .expect("Failed to open queue store"),
        );
        let hub = EventHub::new(config.hub.subscriber_buffer);
        let state = Arc::new(AppState::new(&config, store, hub));
        let router = create_router(Arc::clone(&state));

        Self {
            router,
            state,
            temp_dir,
        }
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    /// Send a POST request with JSON body.
    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    /// Send a POST request without a body.
    pub async fn post_empty(&self, path: &str) -> TestResponse {
        self.request("POST", path, None).await
    }

    /// Send a PUT request with JSON body.
    pub async fn put(&self, path: &str, body: Value) -> TestResponse {
        self.request("PUT", path, Some(body)).await
    }

    /// Send a PATCH request with JSON body.
    pub async fn patch(&self, path: &str, body: Value) -> TestResponse {
        self.request("PATCH", path, Some(body)).await
    }

    /// Send a request to the test server.
    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        let request = request_builder.body(body).unwrap();

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body }
    }

    // =========================================================================
    // Setup helpers
    // =========================================================================

    /// Create a category and return its id.
    pub async fn create_category(&self, name: &str, prefix: &str, priority: i32) -> i64 {
        let response = self
            .post(
                "/api/v1/categories",
                json!({ "name": name, "prefix": prefix, "priority": priority }),
            )
            .await;
        assert_eq!(response.status, StatusCode::CREATED, "{:?}", response.body);
        response.body["id"].as_i64().unwrap()
    }

    /// Create a counter serving the given categories and sign staff in.
    pub async fn open_counter(&self, number: &str, category_ids: &[i64]) -> i64 {
        let response = self
            .post(
                "/api/v1/counters",
                json!({ "number": number, "category_ids": category_ids }),
            )
            .await;
        assert_eq!(response.status, StatusCode::CREATED, "{:?}", response.body);
        let id = response.body["id"].as_i64().unwrap();

        let opened = self
            .post(
                &format!("/api/v1/counters/{}/open", id),
                json!({ "staff_id": "staff-1" }),
            )
            .await;
        assert_eq!(opened.status, StatusCode::OK, "{:?}", opened.body);
        id
    }

    /// Issue a ticket from the kiosk and return the response body.
    pub async fn issue(&self, category_id: i64) -> Value {
        let response = self
            .post("/api/v1/kiosk/tickets", json!({ "category_id": category_id }))
            .await;
        assert_eq!(response.status, StatusCode::CREATED, "{:?}", response.body);
        response.body
    }
}
