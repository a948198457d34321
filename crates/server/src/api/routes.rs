use axum::{
    middleware,
    routing::{get, patch, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::{admin, counters, display, handlers, kiosk, middleware::metrics_middleware, tickets, ws};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // API routes
    let api_routes = Router::new()
        // Health
        .route("/health", get(handlers::health))
        // Kiosk
        .route("/kiosk/categories", get(kiosk::list_categories))
        .route("/kiosk/tickets", post(kiosk::issue_ticket))
        // Staff counters
        .route("/counters/{id}/call-next", post(counters::call_next))
        .route("/counters/{id}/complete", post(counters::complete))
        .route("/counters/{id}/no-show", post(counters::no_show))
        .route("/counters/{id}/pause", post(counters::pause))
        .route("/counters/{id}/resume", post(counters::resume))
        .route("/counters/{id}/open", post(counters::open))
        .route("/counters/{id}/close", post(counters::close))
        .route("/counters/{id}/current", get(counters::current))
        .route("/counters/{id}/waiting", get(counters::waiting))
        // Tickets
        .route("/tickets/{id}/transfer", post(tickets::transfer_ticket))
        .route("/tickets/{id}/cancel", post(tickets::cancel_ticket))
        .route("/tickets/expire-stale", post(tickets::expire_stale))
        // Tracking and display
        .route("/tracking/{ticket_number}", get(display::track_ticket))
        .route("/display/now-serving", get(display::now_serving))
        .route("/stats", get(display::stats))
        // Admin
        .route(
            "/categories",
            get(admin::list_categories).post(admin::create_category),
        )
        .route("/categories/{id}", patch(admin::update_category))
        .route(
            "/counters",
            get(admin::list_counters).post(admin::create_counter),
        )
        .route("/counters/{id}/categories", put(admin::assign_categories))
        // Live events
        .route("/ws", get(ws::ws_handler))
        .with_state(state);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .nest("/api/v1", api_routes)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
