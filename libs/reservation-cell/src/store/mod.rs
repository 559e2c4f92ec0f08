//! Persistence port for the reservation core.
//!
//! A [`ReservationStore`] hands out [`StoreTransaction`]s. Every `lock_*`
//! read inside a transaction holds that row until commit or rollback, and
//! a transaction dropped without `commit` rolls back. Adapters map their
//! native failures into [`StoreError`] so the engine can tell transient
//! conflicts from hard failures.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use shared_models::Money;

use crate::models::{Account, Booking, BookingStatus, LedgerEntry, Slot};

pub mod memory;
pub mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PostgresStore;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Lock wait timed out, serialization failure or deadlock. Safe to retry.
    #[error("store conflict: {message}")]
    Conflict { message: String },

    /// A uniqueness guard rejected the write.
    #[error("duplicate record: {message}")]
    Duplicate { message: String },

    #[error("store connection failed: {message}")]
    Connection { message: String },

    #[error("store query failed: {message}")]
    Query { message: String },
}

impl StoreError {
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict { message: message.into() }
    }

    pub fn duplicate(message: impl Into<String>) -> Self {
        Self::Duplicate { message: message.into() }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection { message: message.into() }
    }

    pub fn query(message: impl Into<String>) -> Self {
        Self::Query { message: message.into() }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Durable home of accounts, ledger entries, slots and bookings.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// Open a transaction with bounded lock waits.
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError>;

    async fn find_account(&self, user_id: Uuid) -> Result<Option<Account>, StoreError>;

    /// Ledger entries for a user, oldest first.
    async fn ledger_entries(&self, user_id: Uuid) -> Result<Vec<LedgerEntry>, StoreError>;

    async fn find_slot(&self, slot_id: Uuid) -> Result<Option<Slot>, StoreError>;

    /// Slots ordered by date and time.
    async fn list_slots(&self, available_only: bool) -> Result<Vec<Slot>, StoreError>;

    async fn find_booking(&self, booking_id: Uuid) -> Result<Option<Booking>, StoreError>;

    /// A user's bookings in insertion order.
    async fn bookings_for_user(&self, user_id: Uuid) -> Result<Vec<Booking>, StoreError>;

    /// Every booking ever made against a slot, in insertion order.
    async fn bookings_for_slot(&self, slot_id: Uuid) -> Result<Vec<Booking>, StoreError>;
}

/// One scoped unit of work. Row locks are taken in the order
/// booking -> slot -> account by every caller.
#[async_trait]
pub trait StoreTransaction: Send {
    async fn lock_account(&mut self, user_id: Uuid) -> Result<Option<Account>, StoreError>;

    async fn lock_slot(&mut self, slot_id: Uuid) -> Result<Option<Slot>, StoreError>;

    async fn lock_booking(&mut self, booking_id: Uuid) -> Result<Option<Booking>, StoreError>;

    async fn insert_account(&mut self, account: &Account) -> Result<(), StoreError>;

    async fn update_balance(&mut self, user_id: Uuid, balance: Money) -> Result<(), StoreError>;

    async fn append_ledger_entry(&mut self, entry: &LedgerEntry) -> Result<(), StoreError>;

    async fn insert_slot(&mut self, slot: &Slot) -> Result<(), StoreError>;

    /// Set the availability flag. Returns `false` when the flag already
    /// had the requested value.
    async fn set_slot_available(&mut self, slot_id: Uuid, available: bool) -> Result<bool, StoreError>;

    async fn insert_booking(&mut self, booking: &Booking) -> Result<(), StoreError>;

    async fn update_booking_status(
        &mut self,
        booking_id: Uuid,
        status: BookingStatus,
        cancelled_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
