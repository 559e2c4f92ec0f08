// libs/reservation-cell/src/services/consistency.rs
//
// Cross-checks slot flags against confirmed bookings and balances against
// ledger history. Reads are not taken under one snapshot, so results are
// only meaningful while no reservations are in flight.

use std::sync::Arc;

use tracing::{instrument, warn};
use uuid::Uuid;

use shared_models::Money;

use crate::error::ReservationError;
use crate::models::{ConsistencyReport, ConsistencyViolation};
use crate::store::{ReservationStore, StoreError};

#[derive(Clone)]
pub struct ConsistencyService {
    store: Arc<dyn ReservationStore>,
}

impl ConsistencyService {
    pub fn new(store: Arc<dyn ReservationStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self))]
    pub async fn check_slots(&self) -> Result<ConsistencyReport, ReservationError> {
        let mut report = ConsistencyReport::default();

        for slot in self.store.list_slots(false).await? {
            report.slots_checked += 1;

            let active: Vec<Uuid> = self
                .store
                .bookings_for_slot(slot.id)
                .await?
                .into_iter()
                .filter(|booking| booking.status.is_active())
                .map(|booking| booking.id)
                .collect();

            match (slot.available, active.as_slice()) {
                (_, [_, _, ..]) => report.violations.push(ConsistencyViolation::MultipleActiveBookings {
                    slot_id: slot.id,
                    booking_ids: active.clone(),
                }),
                (true, [booking_id]) => report.violations.push(ConsistencyViolation::AvailableWithActiveBooking {
                    slot_id: slot.id,
                    booking_id: *booking_id,
                }),
                (false, []) => report
                    .violations
                    .push(ConsistencyViolation::UnavailableWithoutBooking { slot_id: slot.id }),
                _ => {}
            }
        }

        if !report.is_consistent() {
            warn!("Slot consistency check found {} violations", report.violations.len());
        }
        Ok(report)
    }

    #[instrument(skip(self))]
    pub async fn check_account(&self, user_id: Uuid) -> Result<ConsistencyReport, ReservationError> {
        let account = self
            .store
            .find_account(user_id)
            .await?
            .ok_or(ReservationError::UserNotFound)?;

        let ledger_total = self
            .store
            .ledger_entries(user_id)
            .await?
            .iter()
            .try_fold(Money::ZERO, |total, entry| total.checked_add(entry.signed_amount()))
            .ok_or_else(|| StoreError::query(format!("ledger total overflow for account {}", user_id)))?;

        let mut report = ConsistencyReport {
            accounts_checked: 1,
            ..ConsistencyReport::default()
        };

        if account.balance.is_negative() {
            report.violations.push(ConsistencyViolation::NegativeBalance {
                user_id,
                balance: account.balance,
            });
        }
        if account.balance != ledger_total {
            report.violations.push(ConsistencyViolation::BalanceMismatch {
                user_id,
                balance: account.balance,
                ledger_total,
            });
        }

        if !report.is_consistent() {
            warn!("Account {} failed consistency check", user_id);
        }
        Ok(report)
    }
}
