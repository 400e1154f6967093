mod config;
mod models;
mod routes;
mod services;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::routing::get;
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::services::cors::CorsPolicy;
use crate::services::redis_store::RedisStore;
use crate::services::response_cache::ResponseCache;
use crate::services::session_manager::SessionManager;

/// Application state shared across every handler: one `reqwest::Client`
/// (connection-pooled, reused for every upstream call), the session/CSRF
/// manager, the tiered response cache, and the CORS policy.
pub struct AppState {
    pub config: Config,
    pub cors: CorsPolicy,
    pub session_manager: SessionManager,
    pub response_cache: ResponseCache,
    pub http_client: reqwest::Client,
    pub shared_store: Option<RedisStore>,
    pub start_time: Instant,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gateway=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = Config::from_env();
    let port = config.port;

    if let Err(reason) = config.validate() {
        tracing::error!(%reason, "fatal configuration error");
        std::process::exit(1);
    }

    tracing::info!("Starting API gateway v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(env = %config.node_env, "environment");

    let secret = if config.session_secret.len() >= 32 {
        config.session_secret.clone().into_bytes()
    } else {
        tracing::warn!("SESSION_SECRET missing or under 32 bytes; generating an ephemeral secret");
        services::csrf::generate_secret().into_bytes()
    };

    let shared_store = match config.session_redis_url.as_ref().or(config.redis_url.as_ref()) {
        Some(url) => match RedisStore::new(url).await {
            Ok(store) => {
                tracing::info!("connected to shared store");
                Some(store)
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to connect to shared store; falling back to in-process state");
                None
            }
        },
        None => None,
    };

    let session_manager = match &shared_store {
        Some(store) => SessionManager::with_redis(
            store.clone(),
            secret,
            config.session_cookie_name.clone(),
            config.session_max_age_seconds,
        ),
        None => SessionManager::in_memory(
            secret,
            config.session_cookie_name.clone(),
            config.session_max_age_seconds,
        ),
    };
    session_manager.bootstrap_secret().await.ok();

    let response_cache = ResponseCache::new(
        config.response_cache_max_entries,
        config.response_cache_ttl_ms,
        shared_store.clone(),
    );

    let http_client = reqwest::Client::builder()
        .user_agent(config.user_agent.clone())
        .pool_idle_timeout(Duration::from_secs(90))
        .build()?;

    let cors = CorsPolicy::new(config.cors_allow_origins.clone(), config.cors_allow_any);

    let state = Arc::new(AppState {
        config,
        cors,
        session_manager,
        response_cache,
        http_client,
        shared_store,
        start_time: Instant::now(),
    });

    let fixed_routes = Router::new()
        .route(
            "/session",
            axum::routing::post(routes::session::create)
                .options(routes::preflight)
                .get(routes::session::method_not_allowed)
                .put(routes::session::method_not_allowed)
                .delete(routes::session::method_not_allowed)
                .patch(routes::session::method_not_allowed),
        )
        .route("/healthz", get(routes::health::healthz))
        .route("/internal/status", get(routes::health::internal_status))
        .route("/docs", get(routes::docs::swagger_ui))
        .route("/api/docs/json", get(routes::docs::openapi_json));

    // Defense-in-depth against oversized request bodies (§6: 413, ~2KB):
    // rejects before Bytes fully buffers anything past a generous ceiling;
    // the precise ~2KB limit is enforced in routes::proxy::fallback itself.
    let body_limit_ceiling = state.config.max_request_body_bytes.max(2048) * 16;

    let app = fixed_routes
        .fallback(routes::proxy::fallback)
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(axum::extract::DefaultBodyLimit::max(body_limit_ceiling))
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
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

    tracing::info!("shutdown signal received, draining in-flight requests");
}
