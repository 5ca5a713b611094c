//! Background retention and compaction sweeper. Two
//! independent `tokio::time::interval` tickers walk every registered log;
//! narrower than a general-purpose thread-per-core reactor since this
//! component only ever has two kinds of work to schedule.

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use kestrel_common::types::PartitionId;
use kestrel_log::Log;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Cumulative counters a metrics/admin endpoint can surface.
#[derive(Debug, Default)]
pub struct CleanerStats {
    pub retention_runs: AtomicU64,
    pub compaction_runs: AtomicU64,
    pub segments_deleted: AtomicU64,
    pub bytes_reclaimed: AtomicU64,
    pub last_error: Mutex<Option<String>>,
}

impl CleanerStats {
    fn record_error(&self, err: impl std::fmt::Display) {
        *self.last_error.lock() = Some(err.to_string());
    }
}

/// Tunables for the two tickers, mirroring `StorageConfig`'s
/// `cleanup-interval-secs`/`compaction-interval-ms` and the retention /
/// compaction knobs `Log::apply_retention`/`apply_compaction` take.
#[derive(Debug, Clone)]
pub struct CleanerConfig {
    pub enabled: bool,
    pub cleanup_interval: Duration,
    pub compaction_interval: Duration,
    pub retention_bytes: i64,
    pub retention_ms: i64,
    pub compaction_min_cleanable_ratio: f64,
    pub compaction_delete_retention_ms: i64,
    pub compaction_min_lag_ms: i64,
}

struct RegisteredLog {
    topic: String,
    partition: PartitionId,
    log: Arc<Log>,
}

/// Drives retention and compaction over every log registered with it.
/// Logs are registered/unregistered as the registry opens/closes
/// partitions, so the cleaner never needs to know about topic creation
/// directly.
pub struct Cleaner {
    logs: DashMap<(String, PartitionId), RegisteredLog>,
    config: CleanerConfig,
    stats: Arc<CleanerStats>,
}

impl Cleaner {
    #[must_use]
    pub fn new(config: CleanerConfig) -> Self {
        Self {
            logs: DashMap::new(),
            config,
            stats: Arc::new(CleanerStats::default()),
        }
    }

    #[must_use]
    pub fn stats(&self) -> Arc<CleanerStats> {
        self.stats.clone()
    }

    /// No-op when `config.enabled` is false, so a broker started with
    /// cleaning disabled never accrues registrations for topics created
    /// while it's running either.
    pub fn register(&self, topic: &str, partition: PartitionId, log: Arc<Log>) {
        if !self.config.enabled {
            return;
        }
        self.logs.insert(
            (topic.to_string(), partition),
            RegisteredLog {
                topic: topic.to_string(),
                partition,
                log,
            },
        );
    }

    pub fn unregister(&self, topic: &str, partition: PartitionId) {
        self.logs.remove(&(topic.to_string(), partition));
    }

    #[must_use]
    pub fn is_registered(&self, topic: &str, partition: PartitionId) -> bool {
        self.logs.contains_key(&(topic.to_string(), partition))
    }

    fn run_retention_pass(&self) {
        for entry in &self.logs {
            let log = entry.value();
            match log.log.apply_retention(self.config.retention_bytes, self.config.retention_ms) {
                Ok(report) => {
                    if report.deleted_count > 0 {
                        info!(
                            topic = %log.topic,
                            partition = log.partition,
                            deleted = report.deleted_count,
                            bytes = report.deleted_bytes,
                            "retention deleted segments"
                        );
                    }
                    self.stats.segments_deleted.fetch_add(report.deleted_count, Ordering::Relaxed);
                    self.stats.bytes_reclaimed.fetch_add(report.deleted_bytes, Ordering::Relaxed);
                }
                Err(e) => {
                    error!(topic = %log.topic, partition = log.partition, error = %e, "retention pass failed");
                    self.stats.record_error(e);
                }
            }
        }
        self.stats.retention_runs.fetch_add(1, Ordering::Relaxed);
    }

    fn run_compaction_pass(&self) {
        for entry in &self.logs {
            let log = entry.value();
            match log.log.apply_compaction(
                self.config.compaction_min_cleanable_ratio,
                self.config.compaction_delete_retention_ms,
                self.config.compaction_min_lag_ms,
            ) {
                Ok(report) => {
                    if report.segments_compacted > 0 {
                        info!(
                            topic = %log.topic,
                            partition = log.partition,
                            segments = report.segments_compacted,
                            keys_removed = report.keys_removed,
                            bytes_reclaimed = report.bytes_reclaimed,
                            "compaction pass completed"
                        );
                    }
                    self.stats.bytes_reclaimed.fetch_add(report.bytes_reclaimed, Ordering::Relaxed);
                }
                Err(e) => {
                    error!(topic = %log.topic, partition = log.partition, error = %e, "compaction pass failed");
                    self.stats.record_error(e);
                }
            }
        }
        self.stats.compaction_runs.fetch_add(1, Ordering::Relaxed);
    }

    /// Spawns the two independent tickers, returning their join handles so
    /// the caller can shut them down alongside the rest of the broker.
    #[must_use]
    pub fn spawn(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        let retention_cleaner = self.clone();
        let retention_handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(retention_cleaner.config.cleanup_interval);
            loop {
                ticker.tick().await;
                retention_cleaner.run_retention_pass();
            }
        });

        let compaction_cleaner = self;
        let compaction_handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(compaction_cleaner.config.compaction_interval);
            loop {
                ticker.tick().await;
                compaction_cleaner.run_compaction_pass();
            }
        });

        vec![retention_handle, compaction_handle]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_log::FlushPolicy;

    fn flush_policy() -> FlushPolicy {
        FlushPolicy {
            every_records: 1,
            every_ms: 1000,
        }
    }

    #[test]
    fn register_and_unregister_tracks_logs() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(Log::open(dir.path(), 0, 1024 * 1024, flush_policy()).unwrap());
        let cleaner = Cleaner::new(CleanerConfig {
            enabled: true,
            cleanup_interval: Duration::from_secs(1),
            compaction_interval: Duration::from_secs(1),
            retention_bytes: -1,
            retention_ms: -1,
            compaction_min_cleanable_ratio: 0.5,
            compaction_delete_retention_ms: 0,
            compaction_min_lag_ms: 0,
        });

        cleaner.register("orders", 0, log);
        assert_eq!(cleaner.logs.len(), 1);
        cleaner.unregister("orders", 0);
        assert_eq!(cleaner.logs.len(), 0);
    }

    #[test]
    fn retention_pass_records_stats() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(Log::open(dir.path(), 0, 256, flush_policy()).unwrap());
        for i in 0..50 {
            log.append(None, Some(format!("v{i}").into_bytes().into())).unwrap();
        }

        let cleaner = Cleaner::new(CleanerConfig {
            enabled: true,
            cleanup_interval: Duration::from_secs(1),
            compaction_interval: Duration::from_secs(1),
            retention_bytes: 0,
            retention_ms: -1,
            compaction_min_cleanable_ratio: 0.5,
            compaction_delete_retention_ms: 0,
            compaction_min_lag_ms: 0,
        });
        cleaner.register("orders", 0, log);
        cleaner.run_retention_pass();

        assert_eq!(cleaner.stats.retention_runs.load(Ordering::Relaxed), 1);
    }
}
