pub mod auth;
pub mod error;
mod extract;
mod queries;
mod system;
pub mod validation;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::AppState;

pub use error::{ApiError, ErrorCode};

pub fn create_router(state: Arc<AppState>) -> Router {
    // Auth routes (register/login are public, the rest resolve a session)
    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/logout", post(auth::logout))
        .route("/me", get(auth::me));

    // Role checks happen per handler through the AuthContext extractor
    let api_routes = Router::new()
        .route("/system/health", get(system::system_health))
        .route("/headings", get(queries::list_headings))
        .route(
            "/queries",
            get(queries::list_queries).post(queries::create_query),
        )
        .route("/queries/summary", get(queries::query_summary))
        .route("/queries/:id", get(queries::get_query))
        .route("/queries/:id/close", post(queries::close_query));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/auth", auth_routes)
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}
