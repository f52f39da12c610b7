#![forbid(unsafe_code)]

// Server configuration, loaded from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_TIMELINE_INTERVAL: Duration = Duration::from_secs(5 * 60);
/// 24 hours of samples at the default interval
pub const DEFAULT_TIMELINE_MAX_SAMPLES: usize = 288;
pub const DEFAULT_EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    /// Secret for verifying session tokens; stage endpoints refuse requests without it
    pub jwt_secret: Option<String>,
    /// Directory holding the analytics record when no database is configured
    pub data_dir: PathBuf,
    pub database_url: Option<String>,
    pub timeline_interval: Duration,
    pub timeline_max_samples: usize,
    pub metrics_token: Option<String>,
    pub webhook_token: Option<String>,
    pub event_buffer: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            jwt_secret: None,
            data_dir: PathBuf::from("./data"),
            database_url: None,
            timeline_interval: DEFAULT_TIMELINE_INTERVAL,
            timeline_max_samples: DEFAULT_TIMELINE_MAX_SAMPLES,
            metrics_token: None,
            webhook_token: None,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup. Unparseable values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let mut timeline_max_samples =
            parse_or(&lookup, "TIMELINE_MAX_SAMPLES", defaults.timeline_max_samples);
        if timeline_max_samples == 0 {
            warn!("TIMELINE_MAX_SAMPLES=0 would drop every sample, using default {}", DEFAULT_TIMELINE_MAX_SAMPLES);
            timeline_max_samples = DEFAULT_TIMELINE_MAX_SAMPLES;
        }

        let interval_secs = parse_or(
            &lookup,
            "TIMELINE_INTERVAL_SECS",
            defaults.timeline_interval.as_secs(),
        );
        let timeline_interval = if interval_secs == 0 {
            warn!("TIMELINE_INTERVAL_SECS=0 is not a valid interval, using default");
            DEFAULT_TIMELINE_INTERVAL
        } else {
            Duration::from_secs(interval_secs)
        };

        let jwt_secret = non_empty(lookup("JWT_SECRET"));
        if jwt_secret.is_some() {
            info!("Session token verification enabled");
        } else {
            info!("JWT_SECRET not set, stage endpoints will reject every request");
        }

        Self {
            port: parse_or(&lookup, "PORT", defaults.port),
            jwt_secret,
            data_dir: lookup("DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            database_url: non_empty(lookup("DATABASE_URL")),
            timeline_interval,
            timeline_max_samples,
            metrics_token: non_empty(lookup("METRICS_TOKEN")),
            webhook_token: non_empty(lookup("WEBHOOK_TOKEN")),
            event_buffer: parse_or(&lookup, "EVENT_BUFFER", defaults.event_buffer).max(1),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                warn!("Invalid {}={}, using default", key, raw);
                default
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> AppConfig {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]);
        assert_eq!(config.port, 3000);
        assert_eq!(config.timeline_interval, Duration::from_secs(300));
        assert_eq!(config.timeline_max_samples, 288);
        assert!(config.jwt_secret.is_none());
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("PORT", "8080"),
            ("JWT_SECRET", "s3cret"),
            ("TIMELINE_INTERVAL_SECS", "60"),
            ("DATA_DIR", "/tmp/stagecast"),
        ]);
        assert_eq!(config.port, 8080);
        assert_eq!(config.jwt_secret.as_deref(), Some("s3cret"));
        assert_eq!(config.timeline_interval, Duration::from_secs(60));
        assert_eq!(config.data_dir, PathBuf::from("/tmp/stagecast"));
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = config_from(&[
            ("PORT", "not-a-port"),
            ("TIMELINE_INTERVAL_SECS", "0"),
            ("TIMELINE_MAX_SAMPLES", "0"),
            ("JWT_SECRET", "   "),
        ]);
        assert_eq!(config.port, 3000);
        assert_eq!(config.timeline_interval, DEFAULT_TIMELINE_INTERVAL);
        assert_eq!(config.timeline_max_samples, DEFAULT_TIMELINE_MAX_SAMPLES);
        assert!(config.jwt_secret.is_none());
    }
}
