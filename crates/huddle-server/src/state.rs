use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use rand::Rng;
use rand::rngs::OsRng;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::manager::RoomManager;
use crate::rate_limit::IpRateLimiter;

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<RoomManager>,
    pub config: Arc<ServerConfig>,
    pub create_limiter: Arc<IpRateLimiter>,
    pub join_limiter: Arc<IpRateLimiter>,
    pub ws_connection_count: Arc<AtomicUsize>,
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        let jwt_secret = match config.jwt_secret {
            Some(ref secret) => secret.clone().into_bytes(),
            None => {
                tracing::warn!("No jwt_secret configured, generating an ephemeral one");
                let mut bytes = [0u8; 32];
                OsRng.fill(&mut bytes[..]);
                bytes.to_vec()
            },
        };

        let create_limiter = Arc::new(IpRateLimiter::new(
            config.limits.create_burst,
            config.limits.create_rate_per_sec,
        ));
        let join_limiter = Arc::new(IpRateLimiter::new(
            config.limits.join_burst,
            config.limits.join_rate_per_sec,
        ));

        Self {
            manager: Arc::new(RoomManager::new(jwt_secret, &config)),
            config: Arc::new(config),
            create_limiter,
            join_limiter,
            ws_connection_count: Arc::new(AtomicUsize::new(0)),
            shutdown: CancellationToken::new(),
        }
    }
}

/// RAII guard that decrements the live-connection counter on drop.
pub struct ConnectionGuard {
    counter: Arc<AtomicUsize>,
}

impl ConnectionGuard {
    pub fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self { counter }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::Relaxed);
    }
}
