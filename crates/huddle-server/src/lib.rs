pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod health;
pub mod manager;
pub mod rate_limit;
pub mod room;
pub mod state;
pub mod ws;

use std::time::Duration;

use axum::Router;
use axum::http::HeaderValue;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;

use config::ServerConfig;
use state::AppState;

/// Build the axum router and application state from a config.
pub fn build_app(config: ServerConfig) -> (Router<()>, AppState) {
    let cors = build_cors(&config);
    let state = AppState::new(config);

    let api_routes = Router::new()
        .route("/chat/create", axum::routing::post(api::create_room))
        .route("/chat/{code}", axum::routing::get(api::room_status))
        .route("/chat/{code}/join", axum::routing::post(api::join_room))
        .layer(ServiceBuilder::new().layer(TimeoutLayer::new(Duration::from_secs(30))));

    let app = Router::new()
        .route("/health", axum::routing::get(health::health_check))
        .nest("/api", api_routes)
        .route("/ws/{code}", axum::routing::get(ws::ws_handler))
        .layer(cors)
        .with_state(state.clone());

    (app, state)
}

fn build_cors(config: &ServerConfig) -> CorsLayer {
    if config.is_development() || config.allowed_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Background task that periodically sweeps stale rate limiter buckets.
pub fn spawn_rate_limit_cleanup(state: AppState) {
    let shutdown = state.shutdown.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Rate limiter cleanup shutting down");
                    break;
                }
                _ = interval.tick() => {
                    state.create_limiter.cleanup(Duration::from_secs(300)).await;
                    state.join_limiter.cleanup(Duration::from_secs(300)).await;
                }
            }
        }
    });
}
