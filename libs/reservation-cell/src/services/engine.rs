// libs/reservation-cell/src/services/engine.rs
//
// Reserve and cancel as single store transactions. Row locks are always
// taken booking -> slot -> account, and every value the outcome depends on
// (availability, price, balance) is re-read under lock before commit.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use shared_config::ReservationSettings;

use crate::error::ReservationError;
use crate::models::{Booking, BookingStatus, Cancellation, LedgerEntryKind, Reservation};
use crate::services::{ledger, slots};
use crate::store::{ReservationStore, StoreError};

#[derive(Clone)]
pub struct ReservationEngine {
    store: Arc<dyn ReservationStore>,
    settings: ReservationSettings,
}

impl ReservationEngine {
    pub fn new(store: Arc<dyn ReservationStore>, settings: ReservationSettings) -> Self {
        Self { store, settings }
    }

    /// Claim a slot for a user and charge its price.
    #[instrument(skip(self))]
    pub async fn reserve(&self, user_id: Uuid, slot_id: Uuid) -> Result<Reservation, ReservationError> {
        let reservation = self
            .with_retry("reserve", || self.try_reserve(user_id, slot_id))
            .await?;

        info!(
            "Reserved slot {} for user {} as booking {}, remaining balance {}",
            slot_id, user_id, reservation.booking.id, reservation.remaining_balance
        );
        Ok(reservation)
    }

    /// Cancel a confirmed booking and refund the charged price.
    #[instrument(skip(self))]
    pub async fn cancel(&self, user_id: Uuid, booking_id: Uuid) -> Result<Cancellation, ReservationError> {
        let cancellation = self
            .with_retry("cancel", || self.try_cancel(user_id, booking_id))
            .await?;

        info!(
            "Cancelled booking {} for user {}, refunded {}",
            booking_id, user_id, cancellation.refunded_amount
        );
        Ok(cancellation)
    }

    async fn with_retry<T, F, Fut>(&self, operation: &str, mut attempt_fn: F) -> Result<T, ReservationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ReservationError>>,
    {
        let max_attempts = self.settings.max_retries.saturating_add(1);

        for attempt in 1..=max_attempts {
            debug!("{} attempt {}/{}", operation, attempt, max_attempts);

            match attempt_fn().await {
                Err(err) if err.is_transient() => {
                    warn!("{} hit a transient conflict on attempt {}/{}: {}", operation, attempt, max_attempts, err);
                    if attempt < max_attempts {
                        tokio::time::sleep(self.settings.retry_backoff * attempt).await;
                    }
                }
                outcome => return outcome,
            }
        }

        warn!("{} gave up after {} attempts", operation, max_attempts);
        Err(ReservationError::Busy { attempts: max_attempts })
    }

    async fn try_reserve(&self, user_id: Uuid, slot_id: Uuid) -> Result<Reservation, ReservationError> {
        let mut tx = self.store.begin().await?;

        let slot = slots::lock(tx.as_mut(), slot_id).await?;
        if !slot.available {
            return Err(ReservationError::SlotUnavailable);
        }

        let account = tx
            .lock_account(user_id)
            .await?
            .ok_or(ReservationError::UserNotFound)?;
        if account.balance < slot.price {
            return Err(ReservationError::InsufficientFunds {
                balance: account.balance,
                required: slot.price,
            });
        }

        let booking = Booking::confirmed(user_id, &slot);
        tx.insert_booking(&booking).await.map_err(|err| match err {
            StoreError::Duplicate { .. } => ReservationError::SlotUnavailable,
            other => ReservationError::Store(other),
        })?;

        let remaining_balance = ledger::debit(
            tx.as_mut(),
            user_id,
            booking.charged_price,
            LedgerEntryKind::Charge,
            Some(booking.id),
        )
        .await?;

        if !slots::mark_unavailable(tx.as_mut(), slot_id).await? {
            // Someone flipped the flag between our read and write.
            return Err(ReservationError::SlotUnavailable);
        }

        tx.commit().await?;
        Ok(Reservation { booking, remaining_balance })
    }

    async fn try_cancel(&self, user_id: Uuid, booking_id: Uuid) -> Result<Cancellation, ReservationError> {
        let mut tx = self.store.begin().await?;

        let mut booking = tx
            .lock_booking(booking_id)
            .await?
            .filter(|booking| booking.user_id == user_id)
            .ok_or(ReservationError::BookingNotFound)?;

        if !booking.status.can_transition_to(&BookingStatus::Cancelled) {
            return Err(ReservationError::AlreadyCancelled);
        }

        slots::lock(tx.as_mut(), booking.slot_id).await?;

        let cancelled_at = Utc::now();
        tx.update_booking_status(booking.id, BookingStatus::Cancelled, Some(cancelled_at))
            .await?;
        booking.status = BookingStatus::Cancelled;
        booking.cancelled_at = Some(cancelled_at);

        let balance = ledger::credit(
            tx.as_mut(),
            user_id,
            booking.charged_price,
            LedgerEntryKind::Refund,
            Some(booking.id),
        )
        .await?;

        if !slots::mark_available(tx.as_mut(), booking.slot_id).await? {
            warn!("Slot {} was already available while booking {} was confirmed", booking.slot_id, booking.id);
        }

        tx.commit().await?;
        Ok(Cancellation {
            refunded_amount: booking.charged_price,
            booking,
            balance,
        })
    }
}
