// libs/reservation-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, put},
    Router,
};

use shared_utils::extractor::auth_middleware;

use crate::handlers::{self, AppState};

pub fn reservation_routes(state: Arc<AppState>) -> Router {
    // Every route needs an authenticated caller
    let protected_routes = Router::new()
        .route("/slots", get(handlers::list_slots))
        .route("/slots/{slot_id}", get(handlers::get_slot))
        .route("/slots/{slot_id}/booking", get(handlers::get_slot_booking))
        .route("/bookings", get(handlers::list_bookings).post(handlers::create_booking))
        .route("/bookings/{booking_id}/cancel", put(handlers::cancel_booking))
        .route("/wallet", get(handlers::get_wallet).post(handlers::open_wallet))
        .route("/wallet/history", get(handlers::wallet_history))
        .route("/consistency", get(handlers::check_consistency))
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware));

    Router::new()
        .merge(protected_routes)
        .with_state(state)
}
