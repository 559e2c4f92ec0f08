// libs/reservation-cell/src/services/directory.rs
use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::error::ReservationError;
use crate::models::{Booking, BookingWithSlot, Slot};
use crate::store::ReservationStore;

/// Read-only queries over bookings.
#[derive(Clone)]
pub struct BookingDirectory {
    store: Arc<dyn ReservationStore>,
}

impl BookingDirectory {
    pub fn new(store: Arc<dyn ReservationStore>) -> Self {
        Self { store }
    }

    /// All of a user's bookings, cancelled ones included, oldest first.
    pub async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<Booking>, ReservationError> {
        Ok(self.store.bookings_for_user(user_id).await?)
    }

    /// A user's bookings with the details of each booked slot.
    pub async fn list_by_user_with_slots(&self, user_id: Uuid) -> Result<Vec<BookingWithSlot>, ReservationError> {
        let bookings = self.store.bookings_for_user(user_id).await?;

        let mut slots: HashMap<Uuid, Slot> = HashMap::new();
        let mut listed = Vec::with_capacity(bookings.len());
        for booking in bookings {
            let slot = match slots.get(&booking.slot_id) {
                Some(slot) => slot.clone(),
                None => {
                    let slot = self
                        .store
                        .find_slot(booking.slot_id)
                        .await?
                        .ok_or(ReservationError::SlotNotFound)?;
                    slots.insert(slot.id, slot.clone());
                    slot
                }
            };
            listed.push(BookingWithSlot { booking, slot });
        }

        Ok(listed)
    }

    /// The confirmed booking currently holding the slot, if any.
    pub async fn list_by_slot(&self, slot_id: Uuid) -> Result<Option<Booking>, ReservationError> {
        if self.store.find_slot(slot_id).await?.is_none() {
            return Err(ReservationError::SlotNotFound);
        }

        Ok(self
            .store
            .bookings_for_slot(slot_id)
            .await?
            .into_iter()
            .find(|booking| booking.status.is_active()))
    }

    pub async fn get_booking(&self, booking_id: Uuid) -> Result<Booking, ReservationError> {
        self.store
            .find_booking(booking_id)
            .await?
            .ok_or(ReservationError::BookingNotFound)
    }
}
