use axum::Router;
use axum::routing::get;

use super::handlers::{checklist_page, index};
use crate::app::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(index))
        .route("/{owner}/{repo}/pull/{number}", get(checklist_page))
        .route("/{owner}/{repo}/pull/{number}/{stage}", get(checklist_page))
}
