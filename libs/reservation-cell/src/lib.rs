pub mod error;
pub mod handlers;
pub mod models;
pub mod router;
pub mod services;
pub mod store;

pub use error::ReservationError;
pub use handlers::AppState;
pub use router::reservation_routes;
pub use services::ReservationService;
