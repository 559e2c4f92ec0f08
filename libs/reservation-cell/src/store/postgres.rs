// libs/reservation-cell/src/store/postgres.rs
//
// PostgreSQL adapter. Row locks are `SELECT ... FOR UPDATE` inside a sqlx
// transaction whose lock waits are capped with `SET LOCAL lock_timeout`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, warn};
use uuid::Uuid;

use shared_models::Money;

use crate::models::{Account, Booking, BookingStatus, LedgerEntry, Slot};
use crate::store::{ReservationStore, StoreError, StoreTransaction};

const SLOT_COLUMNS: &str =
    "id, hospital_name, doctor_name, specialty, slot_date, slot_time, price, is_available";
const BOOKING_COLUMNS: &str =
    "id, user_id, slot_id, status, charged_price, booked_at, cancelled_at";
const ACCOUNT_COLUMNS: &str = "user_id, balance, dosha, created_at";

/// Translate sqlx failures into the store taxonomy. Lock timeouts,
/// serialization failures, deadlocks and pool exhaustion are transient.
pub(crate) fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some("55P03") | Some("40001") | Some("40P01") => StoreError::conflict(db.message()),
            Some("23505") => StoreError::duplicate(db.message()),
            _ => StoreError::query(db.message()),
        },
        sqlx::Error::PoolTimedOut => StoreError::conflict("timed out acquiring a connection"),
        sqlx::Error::Io(_) | sqlx::Error::PoolClosed | sqlx::Error::Tls(_) => {
            StoreError::connection(err.to_string())
        }
        _ => StoreError::query(err.to_string()),
    }
}

/// Zero would disable the timeout in PostgreSQL; never go below 1ms.
fn lock_timeout_millis(lock_timeout: Duration) -> u128 {
    lock_timeout.as_millis().max(1)
}

fn decode_error(err: String) -> StoreError {
    StoreError::query(format!("invalid stored value: {}", err))
}

#[derive(sqlx::FromRow)]
struct AccountRow {
    user_id: Uuid,
    balance: i64,
    dosha: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<AccountRow> for Account {
    type Error = StoreError;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        Ok(Account {
            user_id: row.user_id,
            balance: Money::from_minor(row.balance),
            dosha: row.dosha.parse().map_err(decode_error)?,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct LedgerRow {
    id: Uuid,
    user_id: Uuid,
    kind: String,
    amount: i64,
    balance_after: i64,
    booking_id: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl TryFrom<LedgerRow> for LedgerEntry {
    type Error = StoreError;

    fn try_from(row: LedgerRow) -> Result<Self, Self::Error> {
        Ok(LedgerEntry {
            id: row.id,
            user_id: row.user_id,
            kind: row.kind.parse().map_err(decode_error)?,
            amount: Money::from_minor(row.amount),
            balance_after: Money::from_minor(row.balance_after),
            booking_id: row.booking_id,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SlotRow {
    id: Uuid,
    hospital_name: String,
    doctor_name: String,
    specialty: String,
    slot_date: NaiveDate,
    slot_time: NaiveTime,
    price: i64,
    is_available: bool,
}

impl From<SlotRow> for Slot {
    fn from(row: SlotRow) -> Self {
        Slot {
            id: row.id,
            hospital_name: row.hospital_name,
            doctor_name: row.doctor_name,
            specialty: row.specialty,
            date: row.slot_date,
            time: row.slot_time,
            price: Money::from_minor(row.price),
            available: row.is_available,
        }
    }
}

#[derive(sqlx::FromRow)]
struct BookingRow {
    id: Uuid,
    user_id: Uuid,
    slot_id: Uuid,
    status: String,
    charged_price: i64,
    booked_at: DateTime<Utc>,
    cancelled_at: Option<DateTime<Utc>>,
}

impl TryFrom<BookingRow> for Booking {
    type Error = StoreError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        Ok(Booking {
            id: row.id,
            user_id: row.user_id,
            slot_id: row.slot_id,
            status: row.status.parse().map_err(decode_error)?,
            charged_price: Money::from_minor(row.charged_price),
            booked_at: row.booked_at,
            cancelled_at: row.cancelled_at,
        })
    }
}

fn collect_bookings(rows: Vec<BookingRow>) -> Result<Vec<Booking>, StoreError> {
    rows.into_iter().map(Booking::try_from).collect()
}

#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PostgresStore {
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }
}

#[async_trait]
impl ReservationStore for PostgresStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        // SET cannot take bind parameters; the value is a plain integer.
        let statement = format!("SET LOCAL lock_timeout = '{}ms'", lock_timeout_millis(self.lock_timeout));
        sqlx::query(&statement)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        Ok(Box::new(PostgresTransaction { tx }))
    }

    async fn find_account(&self, user_id: Uuid) -> Result<Option<Account>, StoreError> {
        let sql = format!("SELECT {} FROM accounts WHERE user_id = $1", ACCOUNT_COLUMNS);
        sqlx::query_as::<_, AccountRow>(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?
            .map(Account::try_from)
            .transpose()
    }

    async fn ledger_entries(&self, user_id: Uuid) -> Result<Vec<LedgerEntry>, StoreError> {
        let rows = sqlx::query_as::<_, LedgerRow>(
            "SELECT id, user_id, kind, amount, balance_after, booking_id, created_at \
             FROM ledger_entries WHERE user_id = $1 ORDER BY seq",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(LedgerEntry::try_from).collect()
    }

    async fn find_slot(&self, slot_id: Uuid) -> Result<Option<Slot>, StoreError> {
        let sql = format!("SELECT {} FROM slots WHERE id = $1", SLOT_COLUMNS);
        let row = sqlx::query_as::<_, SlotRow>(&sql)
            .bind(slot_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.map(Slot::from))
    }

    async fn list_slots(&self, available_only: bool) -> Result<Vec<Slot>, StoreError> {
        let sql = format!(
            "SELECT {} FROM slots WHERE ($1 = FALSE OR is_available) \
             ORDER BY slot_date, slot_time, id",
            SLOT_COLUMNS
        );
        let rows = sqlx::query_as::<_, SlotRow>(&sql)
            .bind(available_only)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(Slot::from).collect())
    }

    async fn find_booking(&self, booking_id: Uuid) -> Result<Option<Booking>, StoreError> {
        let sql = format!("SELECT {} FROM bookings WHERE id = $1", BOOKING_COLUMNS);
        sqlx::query_as::<_, BookingRow>(&sql)
            .bind(booking_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?
            .map(Booking::try_from)
            .transpose()
    }

    async fn bookings_for_user(&self, user_id: Uuid) -> Result<Vec<Booking>, StoreError> {
        let sql = format!("SELECT {} FROM bookings WHERE user_id = $1 ORDER BY seq", BOOKING_COLUMNS);
        let rows = sqlx::query_as::<_, BookingRow>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        collect_bookings(rows)
    }

    async fn bookings_for_slot(&self, slot_id: Uuid) -> Result<Vec<Booking>, StoreError> {
        let sql = format!("SELECT {} FROM bookings WHERE slot_id = $1 ORDER BY seq", BOOKING_COLUMNS);
        let rows = sqlx::query_as::<_, BookingRow>(&sql)
            .bind(slot_id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        collect_bookings(rows)
    }
}

struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PostgresTransaction {
    async fn lock_account(&mut self, user_id: Uuid) -> Result<Option<Account>, StoreError> {
        let sql = format!("SELECT {} FROM accounts WHERE user_id = $1 FOR UPDATE", ACCOUNT_COLUMNS);
        sqlx::query_as::<_, AccountRow>(&sql)
            .bind(user_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?
            .map(Account::try_from)
            .transpose()
    }

    async fn lock_slot(&mut self, slot_id: Uuid) -> Result<Option<Slot>, StoreError> {
        let sql = format!("SELECT {} FROM slots WHERE id = $1 FOR UPDATE", SLOT_COLUMNS);
        let row = sqlx::query_as::<_, SlotRow>(&sql)
            .bind(slot_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.map(Slot::from))
    }

    async fn lock_booking(&mut self, booking_id: Uuid) -> Result<Option<Booking>, StoreError> {
        let sql = format!("SELECT {} FROM bookings WHERE id = $1 FOR UPDATE", BOOKING_COLUMNS);
        sqlx::query_as::<_, BookingRow>(&sql)
            .bind(booking_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?
            .map(Booking::try_from)
            .transpose()
    }

    async fn insert_account(&mut self, account: &Account) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO accounts (user_id, balance, dosha, created_at) VALUES ($1, $2, $3, $4)")
            .bind(account.user_id)
            .bind(account.balance.minor())
            .bind(account.dosha.as_str())
            .bind(account.created_at)
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn update_balance(&mut self, user_id: Uuid, balance: Money) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE accounts SET balance = $2 WHERE user_id = $1")
            .bind(user_id)
            .bind(balance.minor())
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::query(format!("account {} not found", user_id)));
        }
        Ok(())
    }

    async fn append_ledger_entry(&mut self, entry: &LedgerEntry) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO ledger_entries \
             (id, user_id, kind, amount, balance_after, booking_id, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(entry.id)
        .bind(entry.user_id)
        .bind(entry.kind.as_str())
        .bind(entry.amount.minor())
        .bind(entry.balance_after.minor())
        .bind(entry.booking_id)
        .bind(entry.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn insert_slot(&mut self, slot: &Slot) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO slots \
             (id, hospital_name, doctor_name, specialty, slot_date, slot_time, price, is_available) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(slot.id)
        .bind(&slot.hospital_name)
        .bind(&slot.doctor_name)
        .bind(&slot.specialty)
        .bind(slot.date)
        .bind(slot.time)
        .bind(slot.price.minor())
        .bind(slot.available)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn set_slot_available(&mut self, slot_id: Uuid, available: bool) -> Result<bool, StoreError> {
        // Compare-and-set: only a real flip counts as a change.
        let result = sqlx::query("UPDATE slots SET is_available = $2 WHERE id = $1 AND is_available <> $2")
            .bind(slot_id)
            .bind(available)
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_booking(&mut self, booking: &Booking) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO bookings \
             (id, user_id, slot_id, status, charged_price, booked_at, cancelled_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(booking.id)
        .bind(booking.user_id)
        .bind(booking.slot_id)
        .bind(booking.status.as_str())
        .bind(booking.charged_price.minor())
        .bind(booking.booked_at)
        .bind(booking.cancelled_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn update_booking_status(
        &mut self,
        booking_id: Uuid,
        status: BookingStatus,
        cancelled_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE bookings SET status = $2, cancelled_at = $3 WHERE id = $1")
            .bind(booking_id)
            .bind(status.as_str())
            .bind(cancelled_at)
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::query(format!("booking {} not found", booking_id)));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(|e| {
            warn!("Transaction commit failed: {}", e);
            map_sqlx_error(e)
        })?;
        debug!("PostgreSQL transaction committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await.map_err(map_sqlx_error)
    }
}
