// libs/reservation-cell/src/services/slots.rs
use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use crate::error::ReservationError;
use crate::models::{NewSlot, Slot};
use crate::store::{ReservationStore, StoreTransaction};

#[derive(Clone)]
pub struct SlotRegistry {
    store: Arc<dyn ReservationStore>,
}

impl SlotRegistry {
    pub fn new(store: Arc<dyn ReservationStore>) -> Self {
        Self { store }
    }

    pub async fn get_slot(&self, slot_id: Uuid) -> Result<Slot, ReservationError> {
        self.store
            .find_slot(slot_id)
            .await?
            .ok_or(ReservationError::SlotNotFound)
    }

    /// Open slots ordered by date and time.
    pub async fn list_available(&self) -> Result<Vec<Slot>, ReservationError> {
        Ok(self.store.list_slots(true).await?)
    }

    pub async fn list_all(&self) -> Result<Vec<Slot>, ReservationError> {
        Ok(self.store.list_slots(false).await?)
    }

    pub async fn create_slot(&self, new_slot: NewSlot) -> Result<Slot, ReservationError> {
        validate(&new_slot)?;

        let slot = Slot {
            id: Uuid::new_v4(),
            hospital_name: new_slot.hospital_name.trim().to_string(),
            doctor_name: new_slot.doctor_name.trim().to_string(),
            specialty: new_slot.specialty.trim().to_string(),
            date: new_slot.date,
            time: new_slot.time,
            price: new_slot.price,
            available: true,
        };

        let mut tx = self.store.begin().await?;
        tx.insert_slot(&slot).await?;
        tx.commit().await?;

        info!("Created slot {} with {} at {} for {}", slot.id, slot.doctor_name, slot.hospital_name, slot.price);
        Ok(slot)
    }
}

fn validate(new_slot: &NewSlot) -> Result<(), ReservationError> {
    if !new_slot.price.is_positive() {
        return Err(ReservationError::InvalidSlot("price must be positive".to_string()));
    }
    for (field, value) in [
        ("hospital_name", &new_slot.hospital_name),
        ("doctor_name", &new_slot.doctor_name),
        ("specialty", &new_slot.specialty),
    ] {
        if value.trim().is_empty() {
            return Err(ReservationError::InvalidSlot(format!("{} must not be empty", field)));
        }
    }
    Ok(())
}

/// Read and lock a slot inside the caller's transaction.
pub async fn lock(tx: &mut dyn StoreTransaction, slot_id: Uuid) -> Result<Slot, ReservationError> {
    tx.lock_slot(slot_id)
        .await?
        .ok_or(ReservationError::SlotNotFound)
}

/// Returns `false` when the slot was already unavailable.
pub async fn mark_unavailable(tx: &mut dyn StoreTransaction, slot_id: Uuid) -> Result<bool, ReservationError> {
    let changed = tx.set_slot_available(slot_id, false).await?;
    debug!("Slot {} marked unavailable (changed: {})", slot_id, changed);
    Ok(changed)
}

/// Returns `false` when the slot was already available.
pub async fn mark_available(tx: &mut dyn StoreTransaction, slot_id: Uuid) -> Result<bool, ReservationError> {
    let changed = tx.set_slot_available(slot_id, true).await?;
    debug!("Slot {} marked available (changed: {})", slot_id, changed);
    Ok(changed)
}
