use axum::Router;
use axum::routing::get;

use super::handlers::{auth_callback, auth_clear, auth_start};
use crate::app::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(auth_start))
        .route("/callback", get(auth_callback))
        .route("/clear", get(auth_clear))
}
