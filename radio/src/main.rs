mod config;
mod db;
mod models;
mod routes;
mod services;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::routing::{get, post};
use axum::Router;
use tokio::sync::RwLock;
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::db::repository::stations;
use crate::models::station::{ProcessedIndex, StationsPayload, CURRENT_SCHEMA_VERSION};
use crate::services::blob_store::BlobStore;
use crate::services::favorites::FavoritesService;
use crate::services::hls_proxy::HlsProxy;
use crate::services::redis_store::RedisStore;
use crate::services::refresh::RefreshOrchestrator;
use crate::services::validation_cache::ValidationCache;

pub struct AppState {
    pub config: Config,
    pub pool: sqlx::PgPool,
    pub http_client: reqwest::Client,
    pub blob_store: BlobStore,
    pub favorites: FavoritesService,
    pub hls_proxy: HlsProxy,
    pub refresh: Arc<RefreshOrchestrator>,
    pub shared_redis: Option<RedisStore>,
    current: RwLock<(Arc<StationsPayload>, Arc<ProcessedIndex>)>,
    pub start_time: Instant,
}

impl AppState {
    pub async fn current_snapshot(&self) -> (Arc<StationsPayload>, Arc<ProcessedIndex>) {
        let guard = self.current.read().await;
        (guard.0.clone(), guard.1.clone())
    }

    pub async fn publish(&self, payload: Arc<StationsPayload>, index: Arc<ProcessedIndex>) {
        if let Err(err) = self.blob_store.put_json("stations-current", payload.as_ref()).await {
            tracing::warn!(error = %err, "failed to mirror published payload to blob store");
        }
        if let Some(redis) = &self.shared_redis {
            let ttl_seconds = (self.config.stations_cache_ttl_ms / 1000).max(1) as u64;
            if let Err(err) = redis.set_ex(&self.config.stations_cache_key, payload.as_ref(), ttl_seconds).await {
                tracing::warn!(error = %err, "failed to mirror published payload to redis cache");
            }
        }
        let mut guard = self.current.write().await;
        *guard = (payload, index);
    }
}

fn empty_payload(source: &str) -> StationsPayload {
    StationsPayload {
        schema_version: CURRENT_SCHEMA_VERSION,
        updated_at: 0,
        source: source.to_string(),
        requests: Vec::new(),
        total: 0,
        fingerprint: crate::services::fingerprint::fingerprint(&[]),
        stations: Vec::new(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "radio=info,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = Config::from_env();
    let port = config.port;
    if let Err(reason) = config.validate() {
        tracing::error!(%reason, "fatal configuration error");
        std::process::exit(1);
    }

    let pool = db::create_pool(&config).await?;
    db::run_migrations(&pool).await?;

    let shared_redis = match &config.redis_url {
        Some(url) => Some(RedisStore::new(url).await?),
        None => None,
    };

    let validation_cache = match &shared_redis {
        Some(redis) => ValidationCache::with_redis(redis.clone()),
        None => ValidationCache::in_memory(),
    };
    let favorites = match &shared_redis {
        Some(redis) => FavoritesService::with_redis(redis.clone(), config.favorites_ttl_seconds),
        None => FavoritesService::in_memory(config.favorites_ttl_seconds),
    };

    let http_client = reqwest::Client::builder().user_agent(config.user_agent.clone()).build()?;
    let blob_store = BlobStore::new(config.blob_store_dir.clone()).await?;
    let hls_proxy = HlsProxy::new(http_client.clone(), "stream/segment".to_string());

    let refresh = Arc::new(RefreshOrchestrator::new(
        config.clone(),
        http_client.clone(),
        pool.clone(),
        validation_cache.clone(),
        shared_redis.clone(),
    ));

    let initial_payload = match stations::load_current(&pool).await {
        Ok(Some(payload)) => payload,
        Ok(None) => empty_payload(&config.radio_browser_default_host),
        Err(err) => {
            tracing::warn!(error = %err, "failed to load persisted catalog; starting empty");
            empty_payload(&config.radio_browser_default_host)
        }
    };
    let initial_index = ProcessedIndex::build(&initial_payload);

    let state = Arc::new(AppState {
        config: config.clone(),
        pool,
        http_client,
        blob_store,
        favorites,
        hls_proxy,
        refresh,
        shared_redis,
        current: RwLock::new((Arc::new(initial_payload), Arc::new(initial_index))),
        start_time: Instant::now(),
    });

    match state.config.stations_refresh_interval_ms {
        Some(interval_ms) => spawn_background_refresh(state.clone(), interval_ms),
        None => tracing::info!("STATIONS_REFRESH_INTERVAL not set; refresh runs only via /internal/refresh"),
    }

    let app = Router::new()
        .route("/stations", get(routes::stations::list))
        .route("/stations/meta", get(routes::stations::meta))
        .route("/stations/:id", get(routes::stations::get_one))
        .route("/stations/:id/click", post(routes::stations::click))
        .route("/stations/:id/stream", get(routes::stream::playlist))
        .route("/stations/:id/stream/segment", get(routes::stream::segment))
        .route(
            "/favorites",
            get(routes::favorites::list),
        )
        .route(
            "/favorites/:stationId",
            axum::routing::put(routes::favorites::put).delete(routes::favorites::delete),
        )
        .route("/healthz", get(routes::health::healthz))
        .route("/internal/status", get(routes::health::internal_status))
        .route("/stations/refresh", post(routes::health::trigger_refresh))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "radio service listening");
    axum::serve(listener, app.into_make_service()).with_graceful_shutdown(shutdown_signal()).await?;

    Ok(())
}

/// Periodically re-runs the refresh pipeline on `STATIONS_REFRESH_INTERVAL`.
/// Supplemental to the authorized `/internal/refresh` trigger, which remains
/// the primary way to publish a new catalog; this loop is off unless the
/// operator opts in. Any failure is logged and retried on the next tick
/// rather than crashing the service (§4.7: a single bad cycle must not take
/// down the catalog).
fn spawn_background_refresh(state: Arc<AppState>, interval_ms: u64) {
    let interval = Duration::from_millis(interval_ms.max(60_000));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match state.refresh.clone().refresh().await {
                Ok(result) => state.publish(result.payload.clone(), result.index.clone()).await,
                Err(err) => tracing::error!(error = %err, "background refresh cycle failed"),
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received, draining connections");
}
