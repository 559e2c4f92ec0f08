pub mod auth;
pub mod error;
pub mod money;

pub use money::{Money, MoneyParseError};
