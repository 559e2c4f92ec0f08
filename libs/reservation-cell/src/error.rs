// libs/reservation-cell/src/error.rs
use thiserror::Error;

use shared_models::error::AppError;
use shared_models::Money;

use crate::store::StoreError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReservationError {
    #[error("Slot not found")]
    SlotNotFound,

    #[error("User account not found")]
    UserNotFound,

    #[error("Booking not found")]
    BookingNotFound,

    #[error("Slot is no longer available")]
    SlotUnavailable,

    #[error("Insufficient funds: balance {balance}, required {required}")]
    InsufficientFunds { balance: Money, required: Money },

    #[error("Booking is already cancelled")]
    AlreadyCancelled,

    #[error("Account already exists")]
    AccountExists,

    #[error("Invalid slot: {0}")]
    InvalidSlot(String),

    #[error("Store busy after {attempts} attempts")]
    Busy { attempts: u32 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ReservationError {
    /// Whether the engine may rerun the whole transaction.
    pub fn is_transient(&self) -> bool {
        match self {
            ReservationError::Store(err) => err.is_transient(),
            _ => false,
        }
    }
}

impl From<ReservationError> for AppError {
    fn from(err: ReservationError) -> Self {
        match err {
            ReservationError::SlotNotFound
            | ReservationError::UserNotFound
            | ReservationError::BookingNotFound => AppError::NotFound(err.to_string()),
            ReservationError::SlotUnavailable
            | ReservationError::AlreadyCancelled
            | ReservationError::AccountExists => AppError::Conflict(err.to_string()),
            ReservationError::InsufficientFunds { .. } => AppError::PaymentRequired(err.to_string()),
            ReservationError::InvalidSlot(_) => AppError::BadRequest(err.to_string()),
            ReservationError::Busy { .. } => {
                AppError::ServiceUnavailable(format!("{}, please retry", err))
            }
            ReservationError::Store(store) if store.is_transient() => {
                AppError::ServiceUnavailable(format!("Store busy ({}), please retry", store))
            }
            ReservationError::Store(store) => AppError::Database(store.to_string()),
        }
    }
}
