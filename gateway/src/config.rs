use std::env;

/// Gateway configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub node_env: String,

    // Upstream targets
    pub radio_service_url: String,
    pub terminal_service_url: String,
    /// Documented as a defense-in-depth allowlist (spec.md §6); the router's
    /// SSRF pin already requires an exact match against the configured base
    /// URL's host per request, which is strictly tighter than this list, so
    /// it is surfaced here for operators but not consulted on the request
    /// path.
    pub allowed_service_hostnames: Vec<String>,
    pub service_auth_token: String,
    pub upstream_timeout_ms: u64,

    // CORS
    pub cors_allow_origins: Vec<String>,
    pub cors_allow_any: bool,

    // Session / CSRF
    pub session_cookie_name: String,
    pub session_secret: String,
    pub session_max_age_seconds: i64,
    pub session_redis_url: Option<String>,

    // Response cache
    pub redis_url: Option<String>,
    pub response_cache_max_entries: usize,
    pub response_cache_ttl_ms: i64,

    /// Request body size cap (§6: "413, limit ≈2KB"). The gateway only ever
    /// forwards small JSON control-plane bodies (session/CSRF, click
    /// notifications); anything larger is rejected before it reaches the
    /// upstream proxy.
    pub max_request_body_bytes: usize,

    // Networking
    pub trust_proxy: bool,
    pub allow_insecure_transport: bool,

    pub user_agent: String,
}

impl Config {
    /// Load configuration from environment variables with defaults.
    pub fn from_env() -> Self {
        Self {
            port: env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .unwrap_or(3000),
            node_env: env::var("NODE_ENV").unwrap_or_else(|_| "development".to_string()),

            radio_service_url: env::var("RADIO_SERVICE_URL")
                .unwrap_or_else(|_| "http://localhost:3001".to_string()),
            terminal_service_url: env::var("TERMINAL_SERVICE_URL")
                .unwrap_or_else(|_| "http://localhost:3002".to_string()),
            allowed_service_hostnames: env::var("ALLOWED_SERVICE_HOSTNAMES")
                .ok()
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_default(),
            service_auth_token: env::var("SERVICE_AUTH_TOKEN").unwrap_or_default(),
            upstream_timeout_ms: env::var("UPSTREAM_TIMEOUT_MS")
                .unwrap_or_else(|_| "10000".to_string())
                .parse()
                .unwrap_or(10_000),

            cors_allow_origins: env::var("CORS_ALLOW_ORIGINS")
                .unwrap_or_default()
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            cors_allow_any: env::var("CORS_ALLOW_ORIGINS")
                .map(|v| v.trim() == "*")
                .unwrap_or(false),

            session_cookie_name: env::var("SESSION_COOKIE_NAME")
                .unwrap_or_else(|_| "gw_session".to_string()),
            session_secret: env::var("SESSION_SECRET").unwrap_or_default(),
            session_max_age_seconds: env::var("SESSION_MAX_AGE_SECONDS")
                .unwrap_or_else(|_| "43200".to_string())
                .parse()
                .unwrap_or(43_200), // 12h
            session_redis_url: env::var("SESSION_REDIS_URL").ok(),

            redis_url: env::var("REDIS_URL").ok(),
            response_cache_max_entries: env::var("RESPONSE_CACHE_MAX_ENTRIES")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()
                .unwrap_or(1000),
            response_cache_ttl_ms: env::var("RESPONSE_CACHE_TTL_MS")
                .unwrap_or_else(|_| "30000".to_string())
                .parse()
                .unwrap_or(30_000),

            max_request_body_bytes: env::var("MAX_REQUEST_BODY_BYTES")
                .unwrap_or_else(|_| "2048".to_string())
                .parse()
                .unwrap_or(2048),

            trust_proxy: env::var("TRUST_PROXY")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            allow_insecure_transport: env::var("ALLOW_INSECURE_TRANSPORT")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),

            user_agent: env::var("USER_AGENT")
                .unwrap_or_else(|_| "ativeplay-gateway/1.0".to_string()),
        }
    }

    /// Validates config at startup; returns a human-readable list of fatal problems.
    pub fn validate(&self) -> Result<(), String> {
        if !self.allow_insecure_transport {
            for (name, url) in [
                ("RADIO_SERVICE_URL", &self.radio_service_url),
                ("TERMINAL_SERVICE_URL", &self.terminal_service_url),
            ] {
                if !url.starts_with("https://") && !url.starts_with("http://localhost") {
                    return Err(format!(
                        "{name} must be https:// unless ALLOW_INSECURE_TRANSPORT=true (got {url})"
                    ));
                }
            }
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
