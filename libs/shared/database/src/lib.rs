pub mod postgres;

pub use postgres::{connect, migrate};
pub use sqlx::PgPool;
