use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use assert_matches::assert_matches;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use futures::future::join_all;
use uuid::Uuid;

use reservation_cell::models::{
    Account, Booking, BookingStatus, Dosha, LedgerEntry, LedgerEntryKind, NewSlot, Slot,
};
use reservation_cell::services::ReservationService;
use reservation_cell::store::{InMemoryStore, ReservationStore, StoreError, StoreTransaction};
use reservation_cell::ReservationError;
use shared_models::Money;
use shared_utils::test_utils::TestConfig;

struct Fixture {
    store: Arc<InMemoryStore>,
    service: ReservationService,
}

fn fixture_with_bonus(signup_bonus: i64) -> Fixture {
    let config = TestConfig {
        signup_bonus: Money::from_major(signup_bonus),
        ..TestConfig::default()
    }
    .to_app_config();

    let store = Arc::new(InMemoryStore::new(config.reservation.lock_timeout));
    let service = ReservationService::new(store.clone(), &config);
    Fixture { store, service }
}

fn fixture() -> Fixture {
    fixture_with_bonus(1000)
}

async fn create_slot(service: &ReservationService, price: i64) -> Slot {
    service
        .slots
        .create_slot(NewSlot {
            hospital_name: "Kerala Ayurveda Hospital".to_string(),
            doctor_name: "Dr. Suresh Pillai".to_string(),
            specialty: "Herbal Medicine".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 1, 17).unwrap(),
            time: NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
            price: Money::from_major(price),
        })
        .await
        .unwrap()
}

async fn open_user(service: &ReservationService) -> Uuid {
    let user_id = Uuid::new_v4();
    service.ledger.open_account(user_id, Dosha::Vata).await.unwrap();
    user_id
}

async fn assert_consistent(service: &ReservationService, users: &[Uuid]) {
    let mut report = service.consistency.check_slots().await.unwrap();
    for user_id in users {
        report.merge(service.consistency.check_account(*user_id).await.unwrap());
    }
    assert!(report.is_consistent(), "violations: {:?}", report.violations);
}

// =============================================================================
// SCENARIOS
// =============================================================================

#[tokio::test]
async fn test_reserve_then_cancel_round_trip() {
    let Fixture { service, .. } = fixture();
    let user_id = open_user(&service).await;
    let slot = create_slot(&service, 800).await;

    let reservation = service.engine.reserve(user_id, slot.id).await.unwrap();
    assert_eq!(reservation.remaining_balance, Money::from_major(200));
    assert_eq!(reservation.booking.status, BookingStatus::Confirmed);
    assert_eq!(service.ledger.get_balance(user_id).await.unwrap(), Money::from_major(200));
    assert!(!service.slots.get_slot(slot.id).await.unwrap().available);

    let cancellation = service.engine.cancel(user_id, reservation.booking.id).await.unwrap();
    assert_eq!(cancellation.refunded_amount, Money::from_major(800));
    assert_eq!(cancellation.balance, Money::from_major(1000));
    assert_eq!(cancellation.booking.status, BookingStatus::Cancelled);
    assert!(cancellation.booking.cancelled_at.is_some());
    assert_eq!(service.ledger.get_balance(user_id).await.unwrap(), Money::from_major(1000));
    assert!(service.slots.get_slot(slot.id).await.unwrap().available);

    assert_consistent(&service, &[user_id]).await;
}

#[tokio::test]
async fn test_insufficient_funds_changes_nothing() {
    let Fixture { service, .. } = fixture_with_bonus(500);
    let user_id = open_user(&service).await;
    let slot = create_slot(&service, 800).await;

    let result = service.engine.reserve(user_id, slot.id).await;

    assert_matches!(
        result,
        Err(ReservationError::InsufficientFunds { balance, required })
            if balance == Money::from_major(500) && required == Money::from_major(800)
    );
    assert_eq!(service.ledger.get_balance(user_id).await.unwrap(), Money::from_major(500));
    assert!(service.slots.get_slot(slot.id).await.unwrap().available);
    assert!(service.directory.list_by_user(user_id).await.unwrap().is_empty());
    assert_eq!(service.ledger.history(user_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_booked_slot_is_unavailable_to_others() {
    let Fixture { service, .. } = fixture();
    let holder = open_user(&service).await;
    let other = open_user(&service).await;
    let slot = create_slot(&service, 800).await;

    let held = service.engine.reserve(holder, slot.id).await.unwrap();
    let result = service.engine.reserve(other, slot.id).await;

    assert_matches!(result, Err(ReservationError::SlotUnavailable));
    assert_eq!(service.ledger.get_balance(other).await.unwrap(), Money::from_major(1000));
    assert_eq!(service.directory.list_by_slot(slot.id).await.unwrap(), Some(held.booking));
    assert!(service.directory.list_by_user(other).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_exact_balance_can_be_spent() {
    let Fixture { service, .. } = fixture_with_bonus(800);
    let user_id = open_user(&service).await;
    let slot = create_slot(&service, 800).await;

    let reservation = service.engine.reserve(user_id, slot.id).await.unwrap();
    assert_eq!(reservation.remaining_balance, Money::ZERO);
}

// =============================================================================
// ERROR CASES
// =============================================================================

#[tokio::test]
async fn test_unknown_slot_and_user() {
    let Fixture { service, .. } = fixture();
    let user_id = open_user(&service).await;
    let slot = create_slot(&service, 800).await;

    assert_matches!(
        service.engine.reserve(user_id, Uuid::new_v4()).await,
        Err(ReservationError::SlotNotFound)
    );
    assert_matches!(
        service.engine.reserve(Uuid::new_v4(), slot.id).await,
        Err(ReservationError::UserNotFound)
    );
    assert!(service.slots.get_slot(slot.id).await.unwrap().available);
}

#[tokio::test]
async fn test_cancel_someone_elses_booking_is_not_found() {
    let Fixture { service, .. } = fixture();
    let owner = open_user(&service).await;
    let intruder = open_user(&service).await;
    let slot = create_slot(&service, 800).await;
    let reservation = service.engine.reserve(owner, slot.id).await.unwrap();

    assert_matches!(
        service.engine.cancel(intruder, reservation.booking.id).await,
        Err(ReservationError::BookingNotFound)
    );
    assert_matches!(
        service.engine.cancel(owner, Uuid::new_v4()).await,
        Err(ReservationError::BookingNotFound)
    );
    assert!(!service.slots.get_slot(slot.id).await.unwrap().available);
}

#[tokio::test]
async fn test_double_cancel_refunds_once() {
    let Fixture { service, .. } = fixture();
    let user_id = open_user(&service).await;
    let slot = create_slot(&service, 800).await;
    let booking_id = service.engine.reserve(user_id, slot.id).await.unwrap().booking.id;

    service.engine.cancel(user_id, booking_id).await.unwrap();
    let second = service.engine.cancel(user_id, booking_id).await;

    assert_matches!(second, Err(ReservationError::AlreadyCancelled));
    assert_eq!(service.ledger.get_balance(user_id).await.unwrap(), Money::from_major(1000));
    let refunds = service
        .ledger
        .history(user_id)
        .await
        .unwrap()
        .into_iter()
        .filter(|entry| entry.kind == LedgerEntryKind::Refund)
        .count();
    assert_eq!(refunds, 1);
}

#[tokio::test]
async fn test_open_account_twice_is_rejected() {
    let Fixture { service, .. } = fixture();
    let user_id = open_user(&service).await;

    assert_matches!(
        service.ledger.open_account(user_id, Dosha::Kapha).await,
        Err(ReservationError::AccountExists)
    );
    let account = service.ledger.get_account(user_id).await.unwrap();
    assert_eq!(account.dosha, Dosha::Vata);
    assert_eq!(account.balance, Money::from_major(1000));
}

// =============================================================================
// LEDGER HISTORY
// =============================================================================

#[tokio::test]
async fn test_cancel_then_rebook_conserves_balance() {
    let Fixture { service, .. } = fixture();
    let user_id = open_user(&service).await;
    let slot = create_slot(&service, 800).await;

    let first = service.engine.reserve(user_id, slot.id).await.unwrap();
    service.engine.cancel(user_id, first.booking.id).await.unwrap();
    let second = service.engine.reserve(user_id, slot.id).await.unwrap();

    assert_eq!(second.remaining_balance, first.remaining_balance);

    let kinds: Vec<LedgerEntryKind> = service
        .ledger
        .history(user_id)
        .await
        .unwrap()
        .into_iter()
        .map(|entry| entry.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![
            LedgerEntryKind::SignupBonus,
            LedgerEntryKind::Charge,
            LedgerEntryKind::Refund,
            LedgerEntryKind::Charge,
        ]
    );

    let bookings = service.directory.list_by_user(user_id).await.unwrap();
    assert_eq!(bookings.len(), 2);
    assert_eq!(bookings[0].status, BookingStatus::Cancelled);
    assert_eq!(bookings[1].status, BookingStatus::Confirmed);
    assert_consistent(&service, &[user_id]).await;
}

#[tokio::test]
async fn test_ledger_entries_link_bookings() {
    let Fixture { service, .. } = fixture();
    let user_id = open_user(&service).await;
    let slot = create_slot(&service, 600).await;
    let booking_id = service.engine.reserve(user_id, slot.id).await.unwrap().booking.id;

    let history = service.ledger.history(user_id).await.unwrap();
    let charge = history.last().unwrap();

    assert_eq!(charge.kind, LedgerEntryKind::Charge);
    assert_eq!(charge.amount, Money::from_major(600));
    assert_eq!(charge.balance_after, Money::from_major(400));
    assert_eq!(charge.signed_amount(), -Money::from_major(600));
    assert_eq!(charge.booking_id, Some(booking_id));
    assert_eq!(history[0].booking_id, None);
}

// =============================================================================
// CONCURRENCY
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reserves_have_one_winner() {
    let Fixture { service, .. } = fixture();
    let user_id = open_user(&service).await;
    let slot = create_slot(&service, 800).await;

    let attempts = (0..2).map(|_| {
        let service = service.clone();
        tokio::spawn(async move { service.engine.reserve(user_id, slot.id).await })
    });
    let results: Vec<_> = join_all(attempts).await.into_iter().map(|r| r.unwrap()).collect();

    let winners = results.iter().filter(|r| r.is_ok()).count();
    let losers = results
        .iter()
        .filter(|r| matches!(r, Err(ReservationError::SlotUnavailable)))
        .count();
    assert_eq!((winners, losers), (1, 1));
    assert_eq!(service.ledger.get_balance(user_id).await.unwrap(), Money::from_major(200));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_cancels_refund_once() {
    let Fixture { service, .. } = fixture();
    let user_id = open_user(&service).await;
    let slot = create_slot(&service, 800).await;
    let booking_id = service.engine.reserve(user_id, slot.id).await.unwrap().booking.id;

    let attempts = (0..2).map(|_| {
        let service = service.clone();
        tokio::spawn(async move { service.engine.cancel(user_id, booking_id).await })
    });
    let results: Vec<_> = join_all(attempts).await.into_iter().map(|r| r.unwrap()).collect();

    let cancelled = results.iter().filter(|r| r.is_ok()).count();
    let rejected = results
        .iter()
        .filter(|r| matches!(r, Err(ReservationError::AlreadyCancelled)))
        .count();
    assert_eq!((cancelled, rejected), (1, 1));

    let refunds = service
        .ledger
        .history(user_id)
        .await
        .unwrap()
        .into_iter()
        .filter(|entry| entry.kind == LedgerEntryKind::Refund)
        .count();
    assert_eq!(refunds, 1);
    assert_eq!(service.ledger.get_balance(user_id).await.unwrap(), Money::from_major(1000));
    assert!(service.slots.get_slot(slot.id).await.unwrap().available);
    assert_consistent(&service, &[user_id]).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_users_racing_for_few_slots_stay_consistent() {
    let Fixture { store, service } = fixture();

    let mut users = Vec::new();
    for _ in 0..12 {
        users.push(open_user(&service).await);
    }
    let mut slots = Vec::new();
    for price in [300, 450, 600] {
        slots.push(create_slot(&service, price).await);
    }

    let tasks = users.iter().enumerate().map(|(i, &user_id)| {
        let service = service.clone();
        let slot_ids: Vec<Uuid> = slots.iter().map(|s| s.id).collect();
        tokio::spawn(async move {
            for round in 0..4 {
                let slot_id = slot_ids[(i + round) % slot_ids.len()];
                if let Ok(reservation) = service.engine.reserve(user_id, slot_id).await {
                    if (i + round) % 2 == 0 {
                        service
                            .engine
                            .cancel(user_id, reservation.booking.id)
                            .await
                            .unwrap();
                    }
                }
            }
        })
    });
    for task in join_all(tasks).await {
        task.unwrap();
    }

    for slot in &slots {
        let confirmed = store
            .bookings_for_slot(slot.id)
            .await
            .unwrap()
            .into_iter()
            .filter(|b| b.status.is_active())
            .count();
        assert!(confirmed <= 1);
    }
    for user_id in &users {
        assert!(!service.ledger.get_balance(*user_id).await.unwrap().is_negative());
    }
    assert_consistent(&service, &users).await;
}

// =============================================================================
// TRANSACTIONS AND RETRIES
// =============================================================================

#[tokio::test]
async fn test_dropped_transaction_rolls_back() {
    let Fixture { store, service } = fixture();
    let user_id = open_user(&service).await;
    let slot = create_slot(&service, 800).await;

    {
        let mut tx = store.begin().await.unwrap();
        tx.set_slot_available(slot.id, false).await.unwrap();
        tx.update_balance(user_id, Money::ZERO).await.unwrap();
        tx.insert_booking(&Booking::confirmed(user_id, &slot)).await.unwrap();
    }

    assert!(service.slots.get_slot(slot.id).await.unwrap().available);
    assert_eq!(service.ledger.get_balance(user_id).await.unwrap(), Money::from_major(1000));
    assert!(service.directory.list_by_user(user_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_reserve_waits_out_a_short_lock() {
    let Fixture { store, service } = fixture();
    let user_id = open_user(&service).await;
    let slot = create_slot(&service, 800).await;

    let held = store.begin().await.unwrap();
    let release = tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        drop(held);
    });

    let reservation = service.engine.reserve(user_id, slot.id).await.unwrap();
    release.await.unwrap();
    assert_eq!(reservation.remaining_balance, Money::from_major(200));
}

/// Delegating store whose first `failures` transactions hit a lock timeout.
struct FlakyStore {
    inner: InMemoryStore,
    failures: AtomicU32,
    begins: AtomicU32,
}

impl FlakyStore {
    fn new(failures: u32) -> Self {
        Self {
            inner: InMemoryStore::default(),
            failures: AtomicU32::new(failures),
            begins: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl ReservationStore for FlakyStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        self.begins.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::conflict("lock timeout"));
        }
        self.inner.begin().await
    }

    async fn find_account(&self, user_id: Uuid) -> Result<Option<Account>, StoreError> {
        self.inner.find_account(user_id).await
    }

    async fn ledger_entries(&self, user_id: Uuid) -> Result<Vec<LedgerEntry>, StoreError> {
        self.inner.ledger_entries(user_id).await
    }

    async fn find_slot(&self, slot_id: Uuid) -> Result<Option<Slot>, StoreError> {
        self.inner.find_slot(slot_id).await
    }

    async fn list_slots(&self, available_only: bool) -> Result<Vec<Slot>, StoreError> {
        self.inner.list_slots(available_only).await
    }

    async fn find_booking(&self, booking_id: Uuid) -> Result<Option<Booking>, StoreError> {
        self.inner.find_booking(booking_id).await
    }

    async fn bookings_for_user(&self, user_id: Uuid) -> Result<Vec<Booking>, StoreError> {
        self.inner.bookings_for_user(user_id).await
    }

    async fn bookings_for_slot(&self, slot_id: Uuid) -> Result<Vec<Booking>, StoreError> {
        self.inner.bookings_for_slot(slot_id).await
    }
}

#[tokio::test]
async fn test_transient_conflicts_are_retried() {
    let config = TestConfig::default().to_app_config();
    let store = Arc::new(FlakyStore::new(0));
    let service = ReservationService::new(store.clone(), &config);
    let user_id = open_user(&service).await;
    let slot = create_slot(&service, 800).await;

    store.failures.store(2, Ordering::SeqCst);
    store.begins.store(0, Ordering::SeqCst);

    let reservation = service.engine.reserve(user_id, slot.id).await.unwrap();

    assert_eq!(store.begins.load(Ordering::SeqCst), 3);
    assert_eq!(reservation.remaining_balance, Money::from_major(200));
}

#[tokio::test]
async fn test_retries_exhausted_reports_busy_without_effects() {
    let config = TestConfig::default().to_app_config();
    let store = Arc::new(FlakyStore::new(0));
    let service = ReservationService::new(store.clone(), &config);
    let user_id = open_user(&service).await;
    let slot = create_slot(&service, 800).await;

    store.failures.store(10, Ordering::SeqCst);
    store.begins.store(0, Ordering::SeqCst);

    let result = service.engine.reserve(user_id, slot.id).await;

    assert_matches!(result, Err(ReservationError::Busy { attempts: 4 }));
    assert_eq!(store.begins.load(Ordering::SeqCst), 4);
    assert!(service.slots.get_slot(slot.id).await.unwrap().available);
    assert_eq!(service.ledger.get_balance(user_id).await.unwrap(), Money::from_major(1000));
}

#[tokio::test]
async fn test_booking_lookup_by_id() {
    let Fixture { service, .. } = fixture();
    let user_id = open_user(&service).await;
    let slot = create_slot(&service, 800).await;
    let booking = service.engine.reserve(user_id, slot.id).await.unwrap().booking;

    assert_eq!(service.directory.get_booking(booking.id).await.unwrap(), booking);
    assert_matches!(
        service.directory.get_booking(Uuid::new_v4()).await,
        Err(ReservationError::BookingNotFound)
    );
    assert_matches!(
        service.directory.list_by_slot(Uuid::new_v4()).await,
        Err(ReservationError::SlotNotFound)
    );
}

#[tokio::test]
async fn test_user_bookings_carry_slot_details() {
    let Fixture { service, .. } = fixture();
    let user_id = open_user(&service).await;
    let slot = create_slot(&service, 450).await;
    let booking = service.engine.reserve(user_id, slot.id).await.unwrap().booking;
    service.engine.cancel(user_id, booking.id).await.unwrap();
    service.engine.reserve(user_id, slot.id).await.unwrap();

    let listed = service.directory.list_by_user_with_slots(user_id).await.unwrap();

    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].booking.id, booking.id);
    assert_eq!(listed[0].booking.status, BookingStatus::Cancelled);
    assert_eq!(listed[1].booking.status, BookingStatus::Confirmed);
    for entry in &listed {
        assert_eq!(entry.slot.id, slot.id);
        assert_eq!(entry.slot.doctor_name, "Dr. Suresh Pillai");
        assert_eq!(entry.slot.price, Money::from_major(450));
    }
}

#[tokio::test]
async fn test_history_of_unknown_user_is_not_found() {
    let Fixture { service, .. } = fixture();
    assert_matches!(
        service.ledger.history(Uuid::new_v4()).await,
        Err(ReservationError::UserNotFound)
    );
    assert_matches!(
        service.ledger.get_balance(Uuid::new_v4()).await,
        Err(ReservationError::UserNotFound)
    );
}
