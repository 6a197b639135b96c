use serde::Deserialize;

/// Top-level server configuration, loaded from `huddle.toml` with
/// environment-variable overrides.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// "development" relaxes origin checks; anything else is production.
    pub environment: String,
    /// HMAC signing secret for room-access and identity tokens.
    /// When unset, an ephemeral secret is generated at startup.
    pub jwt_secret: Option<String>,
    pub allowed_origins: Vec<String>,
    pub limits: LimitsConfig,
    pub rooms: RoomsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            environment: "development".to_string(),
            jwt_secret: None,
            allowed_origins: Vec::new(),
            limits: LimitsConfig::default(),
            rooms: RoomsConfig::default(),
        }
    }
}

/// Connection and channel tunables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Global cap on concurrent WebSocket connections.
    pub max_ws_connections: usize,
    /// Per-connection outbound frame queue depth.
    pub outbound_queue_capacity: usize,
    /// Per-room broadcast channel depth.
    pub broadcast_capacity: usize,
    pub ws_ping_interval_secs: u64,
    pub ws_pong_timeout_secs: u64,
    pub ws_write_timeout_secs: u64,
    /// Room-creation rate limit (tokens per second / burst), per IP.
    pub create_rate_per_sec: f64,
    pub create_burst: f64,
    /// Join and upgrade rate limit (tokens per second / burst), per IP.
    pub join_rate_per_sec: f64,
    pub join_burst: f64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_ws_connections: 1024,
            outbound_queue_capacity: 256,
            broadcast_capacity: 1024,
            ws_ping_interval_secs: 54,
            ws_pong_timeout_secs: 60,
            ws_write_timeout_secs: 10,
            create_rate_per_sec: 0.05, // 1 per 20s
            create_burst: 2.0,
            join_rate_per_sec: 0.2, // 1 per 5s
            join_burst: 5.0,
        }
    }
}

/// Room lifecycle tunables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoomsConfig {
    /// Seconds an empty room survives before self-terminating.
    pub idle_timeout_secs: u64,
    /// Depth of the manager's reap notification channel.
    pub reap_buffer: usize,
}

impl Default for RoomsConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 300,
            reap_buffer: 16,
        }
    }
}

impl ServerConfig {
    /// Load config from `huddle.toml` if it exists, then apply env var
    /// overrides.
    pub fn load() -> Self {
        let mut config = match std::fs::read_to_string("huddle.toml") {
            Ok(content) => match toml::from_str::<ServerConfig>(&content) {
                Ok(cfg) => {
                    tracing::info!("Loaded configuration from huddle.toml");
                    cfg
                },
                Err(e) => {
                    tracing::warn!("Failed to parse huddle.toml: {e}, using defaults");
                    ServerConfig::default()
                },
            },
            Err(_) => {
                tracing::info!("No huddle.toml found, using defaults");
                ServerConfig::default()
            },
        };

        if let Ok(addr) = std::env::var("HUDDLE_LISTEN_ADDR")
            && !addr.is_empty()
        {
            config.listen_addr = addr;
        }
        if let Ok(env) = std::env::var("HUDDLE_ENVIRONMENT")
            && !env.is_empty()
        {
            config.environment = env;
        }
        if let Ok(secret) = std::env::var("HUDDLE_JWT_SECRET")
            && !secret.is_empty()
        {
            config.jwt_secret = Some(secret);
        }
        if let Ok(origins) = std::env::var("HUDDLE_ALLOWED_ORIGINS")
            && !origins.is_empty()
        {
            config.allowed_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }

        config
    }

    /// Whether the server runs with relaxed development defaults.
    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }

    /// Validate configuration, logging warnings for issues.
    pub fn validate(&self) {
        if self.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            tracing::error!(
                addr = %self.listen_addr,
                "listen_addr is not a valid socket address"
            );
            std::process::exit(1);
        }

        if self.jwt_secret.is_none() && !self.is_development() {
            tracing::error!("jwt_secret must be set outside development (HUDDLE_JWT_SECRET)");
            std::process::exit(1);
        }
        if self.jwt_secret.is_some() {
            tracing::warn!(
                "jwt_secret is set in config file — use HUDDLE_JWT_SECRET env var in production"
            );
        }

        if self.limits.outbound_queue_capacity == 0 || self.limits.broadcast_capacity == 0 {
            tracing::error!("channel capacities must be > 0");
            std::process::exit(1);
        }
        if self.limits.ws_ping_interval_secs >= self.limits.ws_pong_timeout_secs {
            tracing::warn!(
                ping = self.limits.ws_ping_interval_secs,
                pong = self.limits.ws_pong_timeout_secs,
                "ping interval should be shorter than the pong timeout"
            );
        }
    }
}
