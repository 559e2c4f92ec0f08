use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use dotenv::dotenv;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{self, TraceLayer};
use tracing::{info, warn, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod router;

use reservation_cell::services::seed::seed_demo_slots;
use reservation_cell::store::{InMemoryStore, PostgresStore, ReservationStore};
use reservation_cell::{AppState, ReservationService};
use shared_config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Ayurveda reservation API server");

    let config = Arc::new(AppConfig::from_env());
    let store = open_store(&config).await?;
    let service = ReservationService::new(store, &config);

    if config.seed_demo_data {
        seed_demo_slots(&service.slots)
            .await
            .context("Failed to seed demo slots")?;
    }

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let state = Arc::new(AppState {
        config: config.clone(),
        service,
    });

    let app = router::create_router(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Listening on {}", addr);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

async fn open_store(config: &AppConfig) -> anyhow::Result<Arc<dyn ReservationStore>> {
    if !config.uses_database() {
        warn!("No database configured; bookings live in memory and vanish on restart");
        return Ok(Arc::new(InMemoryStore::new(config.reservation.lock_timeout)));
    }

    let pool = shared_database::connect(config).await?;
    shared_database::migrate(&pool).await?;
    Ok(Arc::new(PostgresStore::new(pool, config.reservation.lock_timeout)))
}
