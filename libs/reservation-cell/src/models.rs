// libs/reservation-cell/src/models.rs
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shared_models::Money;

// ==============================================================================
// LEDGER
// ==============================================================================

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Dosha {
    #[default]
    Vata,
    Pitta,
    Kapha,
}

impl Dosha {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dosha::Vata => "vata",
            Dosha::Pitta => "pitta",
            Dosha::Kapha => "kapha",
        }
    }
}

impl fmt::Display for Dosha {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dosha {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vata" => Ok(Dosha::Vata),
            "pitta" => Ok(Dosha::Pitta),
            "kapha" => Ok(Dosha::Kapha),
            other => Err(format!("unknown dosha: {}", other)),
        }
    }
}

/// A user's wallet. `balance` never goes below zero in committed state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Account {
    pub user_id: Uuid,
    pub balance: Money,
    pub dosha: Dosha,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEntryKind {
    SignupBonus,
    Charge,
    Refund,
}

impl LedgerEntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerEntryKind::SignupBonus => "signup_bonus",
            LedgerEntryKind::Charge => "charge",
            LedgerEntryKind::Refund => "refund",
        }
    }

    pub fn is_credit(&self) -> bool {
        !matches!(self, LedgerEntryKind::Charge)
    }
}

impl fmt::Display for LedgerEntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LedgerEntryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "signup_bonus" => Ok(LedgerEntryKind::SignupBonus),
            "charge" => Ok(LedgerEntryKind::Charge),
            "refund" => Ok(LedgerEntryKind::Refund),
            other => Err(format!("unknown ledger entry kind: {}", other)),
        }
    }
}

/// Append-only record of one balance change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: LedgerEntryKind,
    /// Always positive; `kind` carries the direction.
    pub amount: Money,
    pub balance_after: Money,
    pub booking_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn signed_amount(&self) -> Money {
        if self.kind.is_credit() {
            self.amount
        } else {
            -self.amount
        }
    }
}

// ==============================================================================
// SLOTS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Slot {
    pub id: Uuid,
    pub hospital_name: String,
    pub doctor_name: String,
    pub specialty: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub price: Money,
    pub available: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSlot {
    pub hospital_name: String,
    pub doctor_name: String,
    pub specialty: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub price: Money,
}

// ==============================================================================
// BOOKINGS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, BookingStatus::Confirmed)
    }

    /// Confirmed -> Cancelled is the only legal move.
    pub fn can_transition_to(&self, target: &BookingStatus) -> bool {
        matches!((self, target), (BookingStatus::Confirmed, BookingStatus::Cancelled))
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "confirmed" => Ok(BookingStatus::Confirmed),
            "cancelled" => Ok(BookingStatus::Cancelled),
            other => Err(format!("unknown booking status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Booking {
    pub id: Uuid,
    pub user_id: Uuid,
    pub slot_id: Uuid,
    pub status: BookingStatus,
    /// Slot price at reservation time; refunds pay this back.
    pub charged_price: Money,
    pub booked_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Booking {
    pub fn confirmed(user_id: Uuid, slot: &Slot) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            slot_id: slot.id,
            status: BookingStatus::Confirmed,
            charged_price: slot.price,
            booked_at: Utc::now(),
            cancelled_at: None,
        }
    }
}

/// A booking together with the slot it holds, as listed to its owner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BookingWithSlot {
    #[serde(flatten)]
    pub booking: Booking,
    pub slot: Slot,
}

/// Outcome of a successful reservation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reservation {
    pub booking: Booking,
    pub remaining_balance: Money,
}

/// Outcome of a successful cancellation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cancellation {
    pub booking: Booking,
    pub refunded_amount: Money,
    pub balance: Money,
}

// ==============================================================================
// CONSISTENCY
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConsistencyViolation {
    /// Slot flagged available while a confirmed booking holds it.
    AvailableWithActiveBooking { slot_id: Uuid, booking_id: Uuid },
    /// Slot flagged unavailable with no confirmed booking.
    UnavailableWithoutBooking { slot_id: Uuid },
    MultipleActiveBookings { slot_id: Uuid, booking_ids: Vec<Uuid> },
    NegativeBalance { user_id: Uuid, balance: Money },
    BalanceMismatch { user_id: Uuid, balance: Money, ledger_total: Money },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConsistencyReport {
    pub slots_checked: usize,
    pub accounts_checked: usize,
    pub violations: Vec<ConsistencyViolation>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn merge(&mut self, other: ConsistencyReport) {
        self.slots_checked += other.slots_checked;
        self.accounts_checked += other.accounts_checked;
        self.violations.extend(other.violations);
    }
}

// ==============================================================================
// REQUESTS
// ==============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct CreateBookingRequest {
    pub slot_id: Uuid,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpenAccountRequest {
    #[serde(default)]
    pub dosha: Option<Dosha>,
}
