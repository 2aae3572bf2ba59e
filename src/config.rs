use std::time::Duration;

/// Runtime knobs, read once at startup. Every var has a default so a bare
/// `cargo run` against nothing works.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    /// Approximate retention cap of each room's message log.
    pub message_log_cap: usize,
    /// How long after their last message a user counts as active.
    pub presence_timeout: Duration,
    pub preview_ttl: Duration,
    /// Cap on concurrent outbound preview fetches.
    pub preview_max_fetches: usize,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            bind_addr: var_or("BIND_ADDR", "0.0.0.0:8080"),
            message_log_cap: parse_or("MESSAGE_LOG_CAP", 100),
            presence_timeout: Duration::from_secs(parse_or("PRESENCE_TIMEOUT_SECS", 600)),
            preview_ttl: Duration::from_secs(parse_or("PREVIEW_TTL_SECS", 12 * 60 * 60)),
            preview_max_fetches: parse_or("PREVIEW_MAX_FETCHES", 8),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_owned(),
            message_log_cap: 100,
            presence_timeout: Duration::from_secs(600),
            preview_ttl: Duration::from_secs(12 * 60 * 60),
            preview_max_fetches: 8,
        }
    }
}

fn var_or(name: &str, default: &str) -> String {
    dotenv::var(name).unwrap_or_else(|_| default.to_owned())
}

fn parse_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    dotenv::var(name)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}
