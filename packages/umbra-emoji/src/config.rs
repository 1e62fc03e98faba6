//! Emoji pipeline configuration.

use std::env;
use std::time::Duration;

/// Default server the datasets are fetched from
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";

/// Default readiness timeout of the background worker
pub const DEFAULT_WORKER_TIMEOUT: Duration = Duration::from_secs(1);

/// Emoji pipeline configuration.
#[derive(Debug, Clone)]
pub struct EmojiConfig {
    /// Path to the database file (None for in-memory)
    pub database_path: Option<String>,
    /// Base URL of the server serving emoji datasets and custom emoji
    pub base_url: String,
    /// Prefix of emoji image URLs (e.g. a CDN host)
    pub asset_host: String,
    /// Resolution cache entries kept per locale (and for custom emoji)
    pub resolution_cache_capacity: usize,
    /// Rendered outputs kept
    pub render_cache_capacity: usize,
    /// How long to wait for the background worker to report ready
    pub worker_timeout: Duration,
}

impl EmojiConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_path: env::var("UMBRA_EMOJI_DB").ok().or(defaults.database_path),
            base_url: env::var("UMBRA_EMOJI_BASE_URL").unwrap_or(defaults.base_url),
            asset_host: env::var("UMBRA_EMOJI_ASSET_HOST").unwrap_or(defaults.asset_host),
            worker_timeout: env::var("UMBRA_EMOJI_WORKER_TIMEOUT_MS")
                .ok()
                .and_then(|ms| ms.parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.worker_timeout),
            ..defaults
        }
    }

    /// Base URL without a trailing slash
    pub fn base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    /// Asset host without a trailing slash
    pub fn asset_host(&self) -> &str {
        self.asset_host.trim_end_matches('/')
    }
}

impl Default for EmojiConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            asset_host: String::new(),
            resolution_cache_capacity: 1000,
            render_cache_capacity: 200,
            worker_timeout: DEFAULT_WORKER_TIMEOUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EmojiConfig::default();
        assert_eq!(config.worker_timeout, Duration::from_secs(1));
        assert!(config.database_path.is_none());
        assert!(config.resolution_cache_capacity > 0);
    }

    #[test]
    fn test_trailing_slashes_trimmed() {
        let config = EmojiConfig {
            base_url: "https://social.example/".into(),
            asset_host: "https://cdn.example//".into(),
            ..Default::default()
        };
        assert_eq!(config.base_url(), "https://social.example");
        assert_eq!(config.asset_host(), "https://cdn.example");
    }
}
