use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use warden_api::clock;
use warden_api::config::{self, StoreBackend};
use warden_api::domain::{MemoryDomainStore, PgDomainStore};
use warden_api::security::anomaly::alert_pipeline;
use warden_api::store::{MemoryCounterStore, PgCounterStore};
use warden_api::{router, AppState};

#[derive(Parser)]
#[command(name = "warden-api")]
#[command(about = "Record API with ownership checks, rate limits and anomaly monitoring")]
#[command(version)]
struct Args {
    #[arg(long, help = "Listen port (overrides configuration)")]
    port: Option<u16>,

    #[arg(long, value_enum, help = "Backend for records and shared counters")]
    store: Option<StoreArg>,

    #[arg(long, help = "Load demo members and records into the in-memory store")]
    seed_demo: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum StoreArg {
    Memory,
    Postgres,
}

impl From<StoreArg> for StoreBackend {
    fn from(arg: StoreArg) -> Self {
        match arg {
            StoreArg::Memory => StoreBackend::Memory,
            StoreArg::Postgres => StoreBackend::Postgres,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so cargo run picks up DATABASE_URL, JWT_SECRET, etc.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warden_api=info,tower_http=info")),
        )
        .init();

    let args = Args::parse();

    let mut config = config::config()
        .map_err(|e| anyhow::anyhow!("{}", e))
        .context("configuration rejected")?
        .clone();
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(store) = args.store {
        config.store.backend = store.into();
    }
    config.validate()?;

    tracing::info!("Starting Warden API in {:?} mode", config.environment);

    let clock = clock::system();
    let (alerts, _forwarder) = alert_pipeline(config.anomaly.alert_channel_capacity);
    let alerts = Arc::new(alerts);
    let sweep_every = Duration::from_secs(config.store.sweep_interval_secs.max(1));
    let port = config.server.port;

    let state = match config.store.backend {
        StoreBackend::Memory => {
            let domain = Arc::new(MemoryDomainStore::new());
            if args.seed_demo {
                domain.seed_demo().await;
                tracing::info!("Seeded demo members alice and bob");
            }
            let counters = Arc::new(MemoryCounterStore::new(clock.clone()));
            counters.clone().spawn_sweeper(sweep_every);
            AppState::builder(config)
                .clock(clock)
                .alert_sink(alerts)
                .counter_store(counters)
                .build(domain)?
        }
        StoreBackend::Postgres => {
            let url = config
                .store
                .database_url
                .clone()
                .context("postgres store requires DATABASE_URL")?;
            let timeout = Duration::from_millis(config.store.acquire_timeout_ms);
            let counters = Arc::new(PgCounterStore::connect(&url, timeout).await?);
            counters.ensure_schema().await?;

            let domain = Arc::new(PgDomainStore::new(counters.pool().clone()));
            domain.ensure_schema().await?;
            if args.seed_demo {
                tracing::warn!("--seed-demo only applies to the memory store");
            }

            let sweeper = counters.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(sweep_every);
                loop {
                    ticker.tick().await;
                    if let Err(e) = sweeper.sweep().await {
                        tracing::warn!("Counter sweep failed: {}", e);
                    }
                }
            });

            AppState::builder(config)
                .clock(clock)
                .alert_sink(alerts)
                .counter_store(counters)
                .build(domain)?
        }
    };
    state.spawn_fallback_sweeper(sweep_every);

    let bind_addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;

    tracing::info!("Warden API listening on http://{}", bind_addr);

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await?;

    Ok(())
}
