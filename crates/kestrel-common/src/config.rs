//! Configuration for Kestrel: storage, Kafka-facing, and replication
//! knobs loaded from a TOML file.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};

/// Root configuration structure, loadable from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KestrelConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub kafka: KafkaConfig,
    #[serde(default)]
    pub replication: ReplicationConfig,
}

impl Default for KestrelConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            kafka: KafkaConfig::default(),
            replication: ReplicationConfig::default(),
        }
    }
}

impl KestrelConfig {
    /// Load configuration from a TOML file, falling back to defaults if it
    /// doesn't exist.
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::Config(format!("failed to read config file: {e}")))?;

        toml::from_str(&content).map_err(|e| Error::Config(format!("failed to parse TOML config: {e}")))
    }
}

/// `storage.*` options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StorageConfig {
    /// `storage.data.dir`
    pub data_dir: String,
    /// `storage.log.segment.size`
    pub log_segment_size_bytes: u64,
    /// `storage.log.retention.hours` (-1/0 = unlimited)
    pub log_retention_hours: i64,
    /// `storage.log.retention.bytes` (-1/0 = unlimited)
    pub log_retention_bytes: i64,
    /// `storage.log.flush.interval.ms`
    pub log_flush_interval_ms: u64,
    /// `storage.log.flush.messages`
    pub log_flush_messages: u64,
    /// `storage.cleaner.enabled`
    pub cleaner_enabled: bool,
    /// `storage.compaction.interval.ms`
    pub compaction_interval_ms: u64,
    /// `storage.compaction.min.cleanable.ratio`
    pub compaction_min_cleanable_ratio: f64,
    /// `storage.compaction.delete.retention.ms`
    pub compaction_delete_retention_ms: u64,
    /// Minimum record age before it's eligible for compaction, ms.
    pub compaction_min_lag_ms: u64,
    /// Cleanup tick interval, seconds.
    pub cleanup_interval_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "/var/lib/kestrel/data".to_string(),
            log_segment_size_bytes: 1024 * 1024 * 1024,
            log_retention_hours: 168, // 7 days
            log_retention_bytes: -1,
            log_flush_interval_ms: 1000,
            log_flush_messages: 10_000,
            cleaner_enabled: true,
            compaction_interval_ms: 15_000,
            compaction_min_cleanable_ratio: 0.5,
            compaction_delete_retention_ms: 24 * 60 * 60 * 1000,
            compaction_min_lag_ms: 0,
            cleanup_interval_secs: 300,
        }
    }
}

/// `kafka.*` options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct KafkaConfig {
    pub broker_id: i32,
    pub cluster_brokers: Vec<i32>,
    pub advertised_host: String,
    pub advertised_port: u16,
    pub max_message_bytes: usize,
    pub max_connections: usize,
    pub request_timeout_ms: u64,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            broker_id: 1,
            cluster_brokers: vec![1],
            advertised_host: "localhost".to_string(),
            advertised_port: 9092,
            max_message_bytes: 1024 * 1024,
            max_connections: 1000,
            request_timeout_ms: 30_000,
        }
    }
}

/// `replication.*` options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ReplicationConfig {
    pub default_factor: i16,
    pub replica_lag_time_max_ms: u64,
    pub replica_fetch_wait_max_ms: u64,
    pub replica_fetch_max_bytes: usize,
    pub min_insync_replicas: usize,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            default_factor: 1,
            replica_lag_time_max_ms: 10_000,
            replica_fetch_wait_max_ms: 500,
            replica_fetch_max_bytes: 1024 * 1024,
            min_insync_replicas: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_falls_back_to_defaults() {
        let cfg = KestrelConfig::load("/nonexistent/path/kestrel.toml").await.unwrap();
        assert_eq!(cfg.kafka.broker_id, 1);
    }

    #[tokio::test]
    async fn loads_toml_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kestrel.toml");
        tokio::fs::write(
            &path,
            r#"
            [kafka]
            broker-id = 7
            cluster-brokers = [1, 2, 3]
            advertised-host = "broker-7"
            advertised-port = 9093
            max-message-bytes = 2048
            max-connections = 10
            request-timeout-ms = 5000
            "#,
        )
        .await
        .unwrap();

        let cfg = KestrelConfig::load(&path).await.unwrap();
        assert_eq!(cfg.kafka.broker_id, 7);
        assert_eq!(cfg.kafka.cluster_brokers, vec![1, 2, 3]);
        // Unspecified sections keep their defaults.
        assert_eq!(cfg.storage.log_segment_size_bytes, 1024 * 1024 * 1024);
    }
}
