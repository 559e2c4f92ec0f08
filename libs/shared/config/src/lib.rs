use std::env;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use shared_models::Money;

const DEFAULT_SIGNUP_BONUS_MAJOR: i64 = 1000;
const DEFAULT_PORT: u16 = 8000;

/// Knobs for the reservation engine's conflict handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationSettings {
    /// Retries after the first attempt when a transaction hits a transient conflict.
    pub max_retries: u32,
    /// Upper bound on any single row-lock wait.
    pub lock_timeout: Duration,
    /// Base delay between attempts; attempt `n` sleeps `n * retry_backoff`.
    pub retry_backoff: Duration,
}

impl Default for ReservationSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            lock_timeout: Duration::from_millis(2000),
            retry_backoff: Duration::from_millis(50),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// PostgreSQL connection string. `None` selects the in-process store.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub jwt_secret: String,
    pub signup_bonus: Money,
    pub reservation: ReservationSettings,
    pub seed_demo_data: bool,
    pub port: u16,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = ReservationSettings::default();

        let config = Self {
            database_url: env::var("DATABASE_URL")
                .ok()
                .filter(|url| !url.trim().is_empty())
                .or_else(|| {
                    warn!("DATABASE_URL not set, falling back to the in-memory store");
                    None
                }),
            database_max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 10),
            jwt_secret: env::var("JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("JWT_SECRET not set, using empty value");
                    String::new()
                }),
            signup_bonus: parse_env("SIGNUP_BONUS", Money::from_major(DEFAULT_SIGNUP_BONUS_MAJOR)),
            reservation: ReservationSettings {
                max_retries: parse_env("RESERVATION_MAX_RETRIES", defaults.max_retries),
                lock_timeout: lock_timeout_from_millis(
                    parse_env("RESERVATION_LOCK_TIMEOUT_MS", defaults.lock_timeout.as_millis() as u64),
                    defaults.lock_timeout,
                ),
                retry_backoff: Duration::from_millis(parse_env(
                    "RESERVATION_RETRY_BACKOFF_MS",
                    defaults.retry_backoff.as_millis() as u64,
                )),
            },
            seed_demo_data: parse_env("SEED_DEMO_DATA", false),
            port: parse_env("PORT", DEFAULT_PORT),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.jwt_secret.is_empty()
    }

    pub fn uses_database(&self) -> bool {
        self.database_url.is_some()
    }
}

/// PostgreSQL reads a zero `lock_timeout` as "wait forever", so zero is refused.
fn lock_timeout_from_millis(millis: u64, default: Duration) -> Duration {
    if millis == 0 {
        warn!("RESERVATION_LOCK_TIMEOUT_MS must be positive, using {:?}", default);
        return default;
    }
    Duration::from_millis(millis)
}

fn parse_env<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has an invalid value {:?}, using default", key, raw);
            default
        }),
        Err(_) => default,
    }
}
