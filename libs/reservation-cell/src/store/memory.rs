// libs/reservation-cell/src/store/memory.rs
//
// In-process store for tests and database-less runs. A transaction takes the
// single store mutex (bounded by the lock timeout) and writes the tables in
// place, recording an undo step per write. Commit discards the log; a
// transaction dropped without commit replays it backwards, so an uncommitted
// transaction leaves no trace.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, MutexGuard, OwnedMutexGuard};
use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

use shared_models::Money;

use crate::models::{Account, Booking, BookingStatus, LedgerEntry, Slot};
use crate::store::{ReservationStore, StoreError, StoreTransaction};

#[derive(Debug, Default)]
struct Tables {
    accounts: HashMap<Uuid, Account>,
    ledger: Vec<LedgerEntry>,
    slots: HashMap<Uuid, Slot>,
    bookings: HashMap<Uuid, Booking>,
    booking_order: Vec<Uuid>,
}

impl Tables {
    fn bookings_where(&self, predicate: impl Fn(&Booking) -> bool) -> Vec<Booking> {
        self.booking_order
            .iter()
            .filter_map(|id| self.bookings.get(id))
            .filter(|booking| predicate(booking))
            .cloned()
            .collect()
    }
}

#[derive(Clone)]
pub struct InMemoryStore {
    tables: Arc<Mutex<Tables>>,
    lock_timeout: Duration,
}

impl InMemoryStore {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            tables: Arc::new(Mutex::new(Tables::default())),
            lock_timeout,
        }
    }

    async fn read(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        timeout(self.lock_timeout, self.tables.lock())
            .await
            .map_err(|_| StoreError::conflict("timed out waiting for the store lock"))
    }

    /// Rewrites a slot's stored price behind the registry's back.
    #[cfg(test)]
    pub(crate) async fn overwrite_slot_price(&self, slot_id: Uuid, price: Money) {
        let mut tables = self.tables.lock().await;
        if let Some(slot) = tables.slots.get_mut(&slot_id) {
            slot.price = price;
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

#[async_trait]
impl ReservationStore for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let guard = timeout(self.lock_timeout, Arc::clone(&self.tables).lock_owned())
            .await
            .map_err(|_| {
                warn!("In-memory store lock wait exceeded {:?}", self.lock_timeout);
                StoreError::conflict("timed out waiting for the store lock")
            })?;

        Ok(Box::new(InMemoryTransaction {
            tables: guard,
            undo: Vec::new(),
        }))
    }

    async fn find_account(&self, user_id: Uuid) -> Result<Option<Account>, StoreError> {
        Ok(self.read().await?.accounts.get(&user_id).cloned())
    }

    async fn ledger_entries(&self, user_id: Uuid) -> Result<Vec<LedgerEntry>, StoreError> {
        let tables = self.read().await?;
        Ok(tables
            .ledger
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn find_slot(&self, slot_id: Uuid) -> Result<Option<Slot>, StoreError> {
        Ok(self.read().await?.slots.get(&slot_id).cloned())
    }

    async fn list_slots(&self, available_only: bool) -> Result<Vec<Slot>, StoreError> {
        let tables = self.read().await?;
        let mut slots: Vec<Slot> = tables
            .slots
            .values()
            .filter(|slot| !available_only || slot.available)
            .cloned()
            .collect();
        slots.sort_by(|a, b| (a.date, a.time, a.id).cmp(&(b.date, b.time, b.id)));
        Ok(slots)
    }

    async fn find_booking(&self, booking_id: Uuid) -> Result<Option<Booking>, StoreError> {
        Ok(self.read().await?.bookings.get(&booking_id).cloned())
    }

    async fn bookings_for_user(&self, user_id: Uuid) -> Result<Vec<Booking>, StoreError> {
        Ok(self.read().await?.bookings_where(|b| b.user_id == user_id))
    }

    async fn bookings_for_slot(&self, slot_id: Uuid) -> Result<Vec<Booking>, StoreError> {
        Ok(self.read().await?.bookings_where(|b| b.slot_id == slot_id))
    }
}

/// Inverse of one write made inside a transaction.
#[derive(Debug)]
enum Undo {
    RemoveAccount(Uuid),
    RestoreBalance(Uuid, Money),
    PopLedgerEntry,
    RemoveSlot(Uuid),
    RestoreAvailability(Uuid, bool),
    RemoveBooking(Uuid),
    RestoreBookingStatus(Uuid, BookingStatus, Option<DateTime<Utc>>),
}

impl Undo {
    fn apply(self, tables: &mut Tables) {
        match self {
            Undo::RemoveAccount(user_id) => {
                tables.accounts.remove(&user_id);
            }
            Undo::RestoreBalance(user_id, balance) => {
                if let Some(account) = tables.accounts.get_mut(&user_id) {
                    account.balance = balance;
                }
            }
            Undo::PopLedgerEntry => {
                tables.ledger.pop();
            }
            Undo::RemoveSlot(slot_id) => {
                tables.slots.remove(&slot_id);
            }
            Undo::RestoreAvailability(slot_id, available) => {
                if let Some(slot) = tables.slots.get_mut(&slot_id) {
                    slot.available = available;
                }
            }
            Undo::RemoveBooking(booking_id) => {
                tables.bookings.remove(&booking_id);
                tables.booking_order.retain(|id| *id != booking_id);
            }
            Undo::RestoreBookingStatus(booking_id, status, cancelled_at) => {
                if let Some(booking) = tables.bookings.get_mut(&booking_id) {
                    booking.status = status;
                    booking.cancelled_at = cancelled_at;
                }
            }
        }
    }
}

struct InMemoryTransaction {
    tables: OwnedMutexGuard<Tables>,
    undo: Vec<Undo>,
}

impl Drop for InMemoryTransaction {
    fn drop(&mut self) {
        if self.undo.is_empty() {
            return;
        }
        debug!("Rolling back {} in-memory writes", self.undo.len());
        while let Some(step) = self.undo.pop() {
            step.apply(&mut self.tables);
        }
    }
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn lock_account(&mut self, user_id: Uuid) -> Result<Option<Account>, StoreError> {
        Ok(self.tables.accounts.get(&user_id).cloned())
    }

    async fn lock_slot(&mut self, slot_id: Uuid) -> Result<Option<Slot>, StoreError> {
        Ok(self.tables.slots.get(&slot_id).cloned())
    }

    async fn lock_booking(&mut self, booking_id: Uuid) -> Result<Option<Booking>, StoreError> {
        Ok(self.tables.bookings.get(&booking_id).cloned())
    }

    async fn insert_account(&mut self, account: &Account) -> Result<(), StoreError> {
        if self.tables.accounts.contains_key(&account.user_id) {
            return Err(StoreError::duplicate(format!("account {}", account.user_id)));
        }
        self.tables.accounts.insert(account.user_id, account.clone());
        self.undo.push(Undo::RemoveAccount(account.user_id));
        Ok(())
    }

    async fn update_balance(&mut self, user_id: Uuid, balance: Money) -> Result<(), StoreError> {
        if balance.is_negative() {
            return Err(StoreError::query(format!("negative balance for account {}", user_id)));
        }
        let account = self
            .tables
            .accounts
            .get_mut(&user_id)
            .ok_or_else(|| StoreError::query(format!("account {} not found", user_id)))?;
        let previous = std::mem::replace(&mut account.balance, balance);
        self.undo.push(Undo::RestoreBalance(user_id, previous));
        Ok(())
    }

    async fn append_ledger_entry(&mut self, entry: &LedgerEntry) -> Result<(), StoreError> {
        if !self.tables.accounts.contains_key(&entry.user_id) {
            return Err(StoreError::query(format!("account {} not found", entry.user_id)));
        }
        self.tables.ledger.push(entry.clone());
        self.undo.push(Undo::PopLedgerEntry);
        Ok(())
    }

    async fn insert_slot(&mut self, slot: &Slot) -> Result<(), StoreError> {
        if self.tables.slots.contains_key(&slot.id) {
            return Err(StoreError::duplicate(format!("slot {}", slot.id)));
        }
        self.tables.slots.insert(slot.id, slot.clone());
        self.undo.push(Undo::RemoveSlot(slot.id));
        Ok(())
    }

    async fn set_slot_available(&mut self, slot_id: Uuid, available: bool) -> Result<bool, StoreError> {
        let slot = self
            .tables
            .slots
            .get_mut(&slot_id)
            .ok_or_else(|| StoreError::query(format!("slot {} not found", slot_id)))?;
        if slot.available == available {
            return Ok(false);
        }
        slot.available = available;
        self.undo.push(Undo::RestoreAvailability(slot_id, !available));
        Ok(true)
    }

    async fn insert_booking(&mut self, booking: &Booking) -> Result<(), StoreError> {
        if self.tables.bookings.contains_key(&booking.id) {
            return Err(StoreError::duplicate(format!("booking {}", booking.id)));
        }
        // Mirrors the partial unique index on confirmed bookings per slot.
        if booking.status.is_active()
            && self
                .tables
                .bookings
                .values()
                .any(|b| b.slot_id == booking.slot_id && b.status.is_active())
        {
            return Err(StoreError::duplicate(format!(
                "slot {} already has a confirmed booking",
                booking.slot_id
            )));
        }
        self.tables.bookings.insert(booking.id, booking.clone());
        self.tables.booking_order.push(booking.id);
        self.undo.push(Undo::RemoveBooking(booking.id));
        Ok(())
    }

    async fn update_booking_status(
        &mut self,
        booking_id: Uuid,
        status: BookingStatus,
        cancelled_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let booking = self
            .tables
            .bookings
            .get_mut(&booking_id)
            .ok_or_else(|| StoreError::query(format!("booking {} not found", booking_id)))?;
        let previous_status = std::mem::replace(&mut booking.status, status);
        let previous_cancelled_at = std::mem::replace(&mut booking.cancelled_at, cancelled_at);
        self.undo.push(Undo::RestoreBookingStatus(booking_id, previous_status, previous_cancelled_at));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut this = self;
        this.undo.clear();
        debug!("In-memory transaction committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        debug!("In-memory transaction rolled back");
        Ok(())
    }
}
