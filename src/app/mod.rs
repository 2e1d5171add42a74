pub mod middleware;
pub mod session;
pub mod slices;

use std::path::Path;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::Request;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use axum_extra::extract::cookie::Key;
use hyper::StatusCode;
use serde_json::json;
use tower_http::services::ServeDir;

use crate::app::middleware::enrich_current_span::enrich_current_span_middleware;
use crate::app::middleware::strip_trailing_slash::strip_trailing_slash;
use crate::gateway::OAuthGateway;
use crate::usecase::Usecase;

#[derive(Clone)]
pub struct AppState {
    pub usecase: Arc<Usecase>,
    pub oauth: Arc<dyn OAuthGateway>,
    pub cookie_key: Key,
    pub behind_proxy: bool,
}

async fn not_found(req: Request<Body>) -> impl IntoResponse {
    tracing::warn!("unhandled path: {}", req.uri());
    (StatusCode::NOT_FOUND, "Not Found")
}

/// Builds the router. `static_dir` must contain the `js/` bundle directory.
pub fn create_app(state: AppState, static_dir: &Path) -> Router {
    let health_routes = Router::new().route(
        "/",
        get(|| async {
            Json(json!({
                "status": "ok",
            }))
        }),
    );

    Router::new()
        .nest("/health", health_routes)
        .nest("/auth", slices::auth::routes::routes())
        .nest("/api", slices::checklist::routes::routes())
        .merge(slices::pages::routes::routes())
        .nest_service("/js", ServeDir::new(static_dir.join("js")))
        .fallback(not_found)
        .with_state(state)
        .layer(axum::middleware::from_fn(strip_trailing_slash))
        .layer(axum::middleware::from_fn(enrich_current_span_middleware))
}
