// libs/reservation-cell/src/services/mod.rs
pub mod consistency;
pub mod directory;
pub mod engine;
pub mod ledger;
pub mod seed;
pub mod slots;

use std::sync::Arc;

use shared_config::AppConfig;

use crate::store::ReservationStore;

pub use consistency::ConsistencyService;
pub use directory::BookingDirectory;
pub use engine::ReservationEngine;
pub use ledger::LedgerService;
pub use slots::SlotRegistry;

/// Every reservation-core service wired to one store handle.
#[derive(Clone)]
pub struct ReservationService {
    pub ledger: LedgerService,
    pub slots: SlotRegistry,
    pub engine: ReservationEngine,
    pub directory: BookingDirectory,
    pub consistency: ConsistencyService,
}

impl ReservationService {
    pub fn new(store: Arc<dyn ReservationStore>, config: &AppConfig) -> Self {
        Self {
            ledger: LedgerService::new(store.clone(), config.signup_bonus),
            slots: SlotRegistry::new(store.clone()),
            engine: ReservationEngine::new(store.clone(), config.reservation.clone()),
            directory: BookingDirectory::new(store.clone()),
            consistency: ConsistencyService::new(store),
        }
    }
}
