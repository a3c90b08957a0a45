use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use push_api::config::Config;
use push_api::db::kv::{KeyValueStore, MemoryStore, RedisStore};
use push_api::gateway::hub::spawn_token_sweeper;
use push_api::push::clock::{Clock, SystemClock};
use push_api::AppState;

const TOKEN_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() {
    // Load .env file (silently skip if missing; env vars may be set externally)
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };
    let port = config.port;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let kv: Arc<dyn KeyValueStore> = match &config.redis_url {
        Some(url) => match RedisStore::connect(url, clock.clone()).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                tracing::error!(error = %e, "failed to connect to redis");
                std::process::exit(1);
            }
        },
        None => {
            tracing::warn!("REDIS_URL not set; subscriptions are kept in memory");
            Arc::new(MemoryStore::with_clock(clock.clone()))
        }
    };

    tracing::info!(
        ttl_minutes = config.subscriptions_expiration_minutes,
        encoding = ?config.encoding_mode,
        max_concurrency = config.push_max_concurrency,
        "push-api configured"
    );

    let state = match AppState::assemble(config, kv, clock) {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(error = %e, "failed to assemble push service");
            std::process::exit(1);
        }
    };

    spawn_token_sweeper(state.hub.clone(), TOKEN_SWEEP_INTERVAL);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .merge(push_api::routes::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "push-api listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");
    axum::serve(listener, app).await.expect("server error");
}
