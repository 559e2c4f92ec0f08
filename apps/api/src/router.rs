use std::sync::Arc;

use axum::{routing::get, Router};

use reservation_cell::{reservation_routes, AppState};

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(|| async { "Ayurveda reservation API is running!" }))
        .merge(reservation_routes(state))
}
