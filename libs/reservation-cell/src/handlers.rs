// libs/reservation-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, State},
    Json,
};
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;
use shared_utils::extractor::require_user_id;

use crate::error::ReservationError;
use crate::models::{CreateBookingRequest, OpenAccountRequest};
use crate::services::ReservationService;

/// Router state: configuration for the auth layer plus the wired services.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub service: ReservationService,
}

// ==============================================================================
// SLOT HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn list_slots(State(state): State<Arc<AppState>>) -> Result<Json<Value>, AppError> {
    let slots = state.service.slots.list_available().await?;

    Ok(Json(json!({
        "slots": slots,
        "total": slots.len()
    })))
}

#[axum::debug_handler]
pub async fn get_slot(
    State(state): State<Arc<AppState>>,
    Path(slot_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let slot = state.service.slots.get_slot(slot_id).await?;
    Ok(Json(json!(slot)))
}

#[axum::debug_handler]
pub async fn get_slot_booking(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(slot_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let booking = state.service.directory.list_by_slot(slot_id).await?;

    // Only the holder or an admin sees who holds the slot.
    let visible = booking
        .as_ref()
        .filter(|b| user.is_admin() || user.user_id() == Some(b.user_id));

    Ok(Json(json!({
        "slot_id": slot_id,
        "booked": booking.is_some(),
        "booking": visible
    })))
}

// ==============================================================================
// BOOKING HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn create_booking(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateBookingRequest>,
) -> Result<Json<Value>, AppError> {
    let user_id = require_user_id(&user)?;
    debug!("User {} booking slot {}", user_id, request.slot_id);

    let reservation = state.service.engine.reserve(user_id, request.slot_id).await?;

    Ok(Json(json!({
        "success": true,
        "booking": reservation.booking,
        "remaining_balance": reservation.remaining_balance,
        "message": "Slot booked successfully"
    })))
}

#[axum::debug_handler]
pub async fn list_bookings(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let user_id = require_user_id(&user)?;
    let bookings = state.service.directory.list_by_user_with_slots(user_id).await?;

    Ok(Json(json!({
        "bookings": bookings,
        "total": bookings.len()
    })))
}

#[axum::debug_handler]
pub async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let user_id = require_user_id(&user)?;
    let cancellation = state.service.engine.cancel(user_id, booking_id).await?;

    Ok(Json(json!({
        "success": true,
        "booking": cancellation.booking,
        "refunded_amount": cancellation.refunded_amount,
        "balance": cancellation.balance,
        "message": "Booking cancelled and refunded"
    })))
}

// ==============================================================================
// WALLET HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn get_wallet(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let user_id = require_user_id(&user)?;
    let account = state.service.ledger.get_account(user_id).await?;
    Ok(Json(json!(account)))
}

#[axum::debug_handler]
pub async fn open_wallet(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Json(request): Json<OpenAccountRequest>,
) -> Result<Json<Value>, AppError> {
    let user_id = require_user_id(&user)?;
    let account = state
        .service
        .ledger
        .open_account(user_id, request.dosha.unwrap_or_default())
        .await?;

    Ok(Json(json!({
        "success": true,
        "account": account,
        "message": "Wallet opened"
    })))
}

#[axum::debug_handler]
pub async fn wallet_history(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let user_id = require_user_id(&user)?;
    let entries = state.service.ledger.history(user_id).await?;

    Ok(Json(json!({
        "entries": entries,
        "total": entries.len()
    })))
}

// ==============================================================================
// DIAGNOSTICS
// ==============================================================================

/// Slot-wide check plus the caller's own account, when one exists.
#[axum::debug_handler]
pub async fn check_consistency(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let user_id = require_user_id(&user)?;
    let consistency = &state.service.consistency;

    let mut report = consistency.check_slots().await?;
    match consistency.check_account(user_id).await {
        Ok(account_report) => report.merge(account_report),
        Err(ReservationError::UserNotFound) => {}
        Err(err) => return Err(err.into()),
    }

    Ok(Json(json!({
        "consistent": report.is_consistent(),
        "report": report
    })))
}
