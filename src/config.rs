//! Runtime tunables. Every field has a default, so an empty JSON object
//! (or no file at all) is a valid configuration.

use crate::application::matching::MatchingPolicy;
use crate::application::notifications::DEFAULT_QUEUE_CAPACITY;
use crate::application::settlement::{DEFAULT_MAX_CONCURRENCY, DEFAULT_MAX_RETRIES};
use crate::domain::fare::FareSchedule;
use crate::error::Result;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub fares: FareSchedule,
    pub notifications: NotificationConfig,
    pub locations: LocationConfig,
    pub payment: PaymentConfig,
    pub matching: MatchingPolicy,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub queue_capacity: usize,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    pub workers: usize,
    pub flush_interval_ms: u64,
    pub batch_size: usize,
    /// Per-batcher inbound queue.
    pub queue_capacity: usize,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            flush_interval_ms: 100,
            batch_size: 100,
            queue_capacity: 1024,
        }
    }
}

impl LocationConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PaymentConfig {
    /// Used when the store has no `payment_gateway_url` setting.
    pub gateway_url: Option<String>,
    pub max_concurrency: usize,
    pub max_retries: u32,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            gateway_url: None,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl DispatchConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::fare::Fare;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = DispatchConfig::default();
        assert_eq!(config.fares.initial_fare, Fare(500));
        assert_eq!(config.fares.fare_per_distance, Fare(100));
        assert_eq!(config.notifications.queue_capacity, 60);
        assert_eq!(config.locations.batch_size, 100);
        assert_eq!(config.locations.flush_interval(), Duration::from_millis(100));
        assert_eq!(config.payment.max_concurrency, 100);
        assert_eq!(config.payment.max_retries, 5);
        assert_eq!(config.matching.chunk_size, 40);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"payment": {{"gateway_url": "http://pg:12345", "max_retries": 2}}, "locations": {{"workers": 2}}}}"#
        )
        .unwrap();

        let config = DispatchConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.payment.gateway_url.as_deref(), Some("http://pg:12345"));
        assert_eq!(config.payment.max_retries, 2);
        assert_eq!(config.payment.max_concurrency, 100);
        assert_eq!(config.locations.workers, 2);
        assert_eq!(config.locations.batch_size, 100);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(DispatchConfig::from_json_file(file.path()).is_err());
    }
}
