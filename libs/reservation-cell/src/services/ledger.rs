// libs/reservation-cell/src/services/ledger.rs
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use shared_models::Money;

use crate::error::ReservationError;
use crate::models::{Account, Dosha, LedgerEntry, LedgerEntryKind};
use crate::store::{ReservationStore, StoreError, StoreTransaction};

/// Wallet balances and their append-only history.
#[derive(Clone)]
pub struct LedgerService {
    store: Arc<dyn ReservationStore>,
    signup_bonus: Money,
}

impl LedgerService {
    pub fn new(store: Arc<dyn ReservationStore>, signup_bonus: Money) -> Self {
        Self { store, signup_bonus }
    }

    pub async fn get_balance(&self, user_id: Uuid) -> Result<Money, ReservationError> {
        self.get_account(user_id).await.map(|account| account.balance)
    }

    pub async fn get_account(&self, user_id: Uuid) -> Result<Account, ReservationError> {
        self.store
            .find_account(user_id)
            .await?
            .ok_or(ReservationError::UserNotFound)
    }

    /// Ledger entries in insertion order. Unknown users are `UserNotFound`.
    pub async fn history(&self, user_id: Uuid) -> Result<Vec<LedgerEntry>, ReservationError> {
        self.get_account(user_id).await?;
        Ok(self.store.ledger_entries(user_id).await?)
    }

    /// Open a wallet credited with the signup bonus.
    #[instrument(skip(self))]
    pub async fn open_account(&self, user_id: Uuid, dosha: Dosha) -> Result<Account, ReservationError> {
        let mut tx = self.store.begin().await?;

        if tx.lock_account(user_id).await?.is_some() {
            return Err(ReservationError::AccountExists);
        }

        let mut account = Account {
            user_id,
            balance: Money::ZERO,
            dosha,
            created_at: Utc::now(),
        };
        // Two concurrent opens race on the primary key.
        tx.insert_account(&account).await.map_err(|err| match err {
            StoreError::Duplicate { .. } => ReservationError::AccountExists,
            other => ReservationError::Store(other),
        })?;

        if self.signup_bonus.is_positive() {
            account.balance =
                credit(tx.as_mut(), user_id, self.signup_bonus, LedgerEntryKind::SignupBonus, None).await?;
        }

        tx.commit().await?;
        info!("Opened account for user {} with balance {}", user_id, account.balance);
        Ok(account)
    }
}

/// Debit inside the caller's transaction. Fails `InsufficientFunds` when the
/// balance would go negative; the caller drops the transaction to roll back.
pub async fn debit(
    tx: &mut dyn StoreTransaction,
    user_id: Uuid,
    amount: Money,
    kind: LedgerEntryKind,
    booking_id: Option<Uuid>,
) -> Result<Money, ReservationError> {
    let account = tx
        .lock_account(user_id)
        .await?
        .ok_or(ReservationError::UserNotFound)?;

    let balance = account
        .balance
        .checked_sub(amount)
        .filter(|remaining| !remaining.is_negative())
        .ok_or(ReservationError::InsufficientFunds {
            balance: account.balance,
            required: amount,
        })?;

    apply(tx, user_id, amount, balance, kind, booking_id).await?;
    Ok(balance)
}

/// Credit inside the caller's transaction.
pub async fn credit(
    tx: &mut dyn StoreTransaction,
    user_id: Uuid,
    amount: Money,
    kind: LedgerEntryKind,
    booking_id: Option<Uuid>,
) -> Result<Money, ReservationError> {
    let account = tx
        .lock_account(user_id)
        .await?
        .ok_or(ReservationError::UserNotFound)?;

    let balance = account
        .balance
        .checked_add(amount)
        .ok_or_else(|| StoreError::query(format!("balance overflow for account {}", user_id)))?;

    apply(tx, user_id, amount, balance, kind, booking_id).await?;
    Ok(balance)
}

async fn apply(
    tx: &mut dyn StoreTransaction,
    user_id: Uuid,
    amount: Money,
    balance_after: Money,
    kind: LedgerEntryKind,
    booking_id: Option<Uuid>,
) -> Result<(), ReservationError> {
    tx.update_balance(user_id, balance_after).await?;
    tx.append_ledger_entry(&LedgerEntry {
        id: Uuid::new_v4(),
        user_id,
        kind,
        amount,
        balance_after,
        booking_id,
        created_at: Utc::now(),
    })
    .await?;

    debug!("Ledger {} of {} for user {}, balance now {}", kind, amount, user_id, balance_after);
    Ok(())
}
