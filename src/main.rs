use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod config;
mod db;
mod error;
mod metrics;
mod models;
mod services;
mod utils;

use crate::config::AppConfig;
use crate::db::Database;
use crate::services::background::BackgroundEngine;
use crate::services::bookmaker::BookmakerEngine;
use crate::services::lmsr::LmsrEngine;
use crate::services::matching::{MatchingEngine, OrderbookRegistry};
use crate::services::query::QueryService;
use crate::services::settlement::SettlementService;

pub struct AppState {
    pub config: AppConfig,
    pub db: Database,
    pub matching_engine: Arc<MatchingEngine>,
    pub settlement_service: Arc<SettlementService>,
    pub lmsr_engine: Arc<LmsrEngine>,
    pub bookmaker_engine: Arc<BookmakerEngine>,
    pub query_service: Arc<QueryService>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "predictions_core=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::load()?;
    tracing::info!("starting predictions-core v{}", env!("CARGO_PKG_VERSION"));

    let db = Database::connect(&config.database_url).await?;
    tracing::info!("database connected");

    let prometheus_handle = metrics::init_metrics();

    let books = Arc::new(OrderbookRegistry::new());

    let matching_engine = Arc::new(MatchingEngine::new(db.clone(), config.clone(), books.clone()));
    let settlement_service = Arc::new(SettlementService::new(db.clone(), config.matching_fee_percentage));
    let lmsr_engine = Arc::new(LmsrEngine::new(db.clone()));
    let bookmaker_engine = Arc::new(BookmakerEngine::new(db.clone()));
    let query_service = Arc::new(QueryService::new(db.clone(), books));

    let background = BackgroundEngine::new(
        db.clone(),
        matching_engine.clone(),
        settlement_service.clone(),
        Duration::from_millis(config.background_loop_interval_ms),
    );
    tokio::spawn(async move { background.run().await });
    tracing::info!("background engine loop spawned");

    let state = Arc::new(AppState {
        config: config.clone(),
        db,
        matching_engine,
        settlement_service,
        lmsr_engine,
        bookmaker_engine,
        query_service,
    });

    let app = api::routes::create_router(state)
        .route("/metrics", get(move || render_metrics(prometheus_handle.clone())))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any));

    let addr = SocketAddr::from((
        std::net::IpAddr::from_str(&config.server_host)?,
        config.server_port,
    ));
    tracing::info!("listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn render_metrics(handle: metrics_exporter_prometheus::PrometheusHandle) -> String {
    handle.render()
}
