use chrono::Utc;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use visitstat::config::{Config, LogFormat};
use visitstat::ingest::geo::GeoTable;
use visitstat::ingest::handler::AppState;
use visitstat::ingest::recorder::VisitRecorder;
use visitstat::ingest::reference::ReferenceData;
use visitstat::server;
use visitstat::storage::store::{to_local, VisitStore, Website};

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "visitstat=info,tower_http=info".into());
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

fn seed_websites(store: &VisitStore, config: &Config) -> Result<(), duckdb::Error> {
    let now = to_local(Utc::now(), config.utc_offset());
    for seed in &config.websites {
        let existing = store.find_website(seed.id)?;
        if seed.start_time.is_some() && seed.start_time().is_none() {
            tracing::warn!(website_id = seed.id, "Unparseable start_time, keeping previous or now");
        }
        let start_time = seed
            .start_time()
            .or_else(|| existing.map(|w| w.start_time))
            .unwrap_or(now);
        store.register_website(&Website {
            id: seed.id,
            name: seed.name.clone(),
            url: seed.url.clone(),
            owner_id: seed.owner_id,
            is_public: seed.is_public,
            start_time,
        })?;
        tracing::info!(website_id = seed.id, name = %seed.name, "Website registered");
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() {
    // Load configuration first so the log format can be honoured
    let config_path = std::env::args().nth(1);
    let config = Config::load(config_path.as_deref().map(std::path::Path::new));
    init_tracing(config.log_format);

    let offset = config.utc_offset();
    tracing::info!(
        host = %config.host,
        port = config.port,
        database = ?config.database_path,
        utc_offset = %offset,
        "Starting visitstat"
    );

    // Opening the store also applies pending migrations
    let store = VisitStore::open(config.database_path.as_deref()).expect("Failed to open DuckDB");
    seed_websites(&store, &config).expect("Failed to register websites");

    let reference = ReferenceData::new(
        GeoTable::open(config.geo_ranges_path.as_deref()),
        config.rule_set(),
    );
    tracing::info!(
        geo_ranges = reference.geo().len(),
        referrer_rules = reference.rules().len(),
        "Reference data loaded"
    );

    let recorder = VisitRecorder::new(store, Arc::new(reference), offset);
    let state = Arc::new(AppState::new(recorder, config.trend_days));

    let app = server::build_router(state, Duration::from_secs(config.request_timeout_secs));
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| panic!("Failed to bind to {addr}: {e}"));

    tracing::info!(addr = %addr, "Listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("Server error");
}
