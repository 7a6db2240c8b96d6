use std::time::Duration;

use crate::retry::RetryPolicy;

pub const DEFAULT_DB_URL: &str = "sqlite://learn.sqlite3";
pub const DEFAULT_FRESHNESS_SECS: u64 = 60;
pub const DEFAULT_FETCH_ATTEMPTS: u32 = 2;
pub const DEFAULT_RETRY_BASE_MS: u64 = 50;

/// Runtime settings for the sync services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub db_url: String,
    /// Maximum age at which a cached progress value is served.
    pub freshness: Duration,
    pub fetch_attempts: u32,
    pub retry_base_delay: Duration,
    pub log_level: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            db_url: DEFAULT_DB_URL.to_owned(),
            freshness: Duration::from_secs(DEFAULT_FRESHNESS_SECS),
            fetch_attempts: DEFAULT_FETCH_ATTEMPTS,
            retry_base_delay: Duration::from_millis(DEFAULT_RETRY_BASE_MS),
            log_level: "info".to_owned(),
        }
    }
}

impl SyncConfig {
    /// Reads settings from the process environment. Unset or unparsable
    /// values fall back to defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads settings through `lookup`, which maps a variable name to its value.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parse_u64 = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        Self {
            db_url: lookup("LEARN_DB_URL")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.db_url),
            freshness: parse_u64("LEARN_CACHE_FRESHNESS_SECS")
                .map_or(defaults.freshness, Duration::from_secs),
            fetch_attempts: lookup("LEARN_FETCH_ATTEMPTS")
                .and_then(|v| v.trim().parse::<u32>().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.fetch_attempts),
            retry_base_delay: parse_u64("LEARN_RETRY_BASE_MS")
                .map_or(defaults.retry_base_delay, Duration::from_millis),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
        }
    }

    #[must_use]
    pub fn with_db_url(mut self, db_url: impl Into<String>) -> Self {
        self.db_url = db_url.into();
        self
    }

    #[must_use]
    pub fn with_freshness(mut self, freshness: Duration) -> Self {
        self.freshness = freshness;
        self
    }

    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.fetch_attempts, self.retry_base_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = SyncConfig::from_lookup(lookup(&[]));
        assert_eq!(config, SyncConfig::default());
        assert_eq!(config.freshness, Duration::from_secs(60));
    }

    #[test]
    fn reads_overrides_and_ignores_garbage() {
        let config = SyncConfig::from_lookup(lookup(&[
            ("LEARN_DB_URL", "sqlite::memory:"),
            ("LEARN_CACHE_FRESHNESS_SECS", "5"),
            ("LEARN_FETCH_ATTEMPTS", "0"),
            ("LEARN_RETRY_BASE_MS", "soon"),
        ]));
        assert_eq!(config.db_url, "sqlite::memory:");
        assert_eq!(config.freshness, Duration::from_secs(5));
        assert_eq!(config.fetch_attempts, DEFAULT_FETCH_ATTEMPTS);
        assert_eq!(
            config.retry_base_delay,
            Duration::from_millis(DEFAULT_RETRY_BASE_MS)
        );
    }
}
