use axum::Router;
use axum::routing::{get, put};

use super::handlers::{add_check, get_checklist, me, remove_check};
use crate::app::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/me", get(me))
        .route("/checklist", get(get_checklist))
        .route("/check", put(add_check).delete(remove_check))
}
