//! Broker process orchestration: wires storage, replication, the metadata
//! plane, the coordinator, and the cleaner behind a [`Router`], and drives
//! their background tasks until asked to shut down.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::info;

use kestrel_cleaner::{Cleaner, CleanerConfig};
use kestrel_common::KestrelConfig;
use kestrel_coordinator::{Coordinator, CoordinatorConfig};
use kestrel_log::FlushPolicy;
use kestrel_raft::{Direct, MetadataBackend, Raft, Registry, RegistryConfig};
use kestrel_replication::ReplicaConfig;
use kestrel_router::Router;

/// The running broker: a `Router` plus the background tasks (cleaner
/// tickers, coordinator sweep) that keep its storage and group state
/// healthy without a client request driving them.
pub struct Broker {
    router: Arc<Router>,
    cleaner: Arc<Cleaner>,
    coordinator: Arc<Coordinator>,
    sweep_interval: Duration,
    running: Arc<RwLock<bool>>,
    shutdown_notify: Arc<Notify>,
}

impl Broker {
    pub async fn new(config: KestrelConfig) -> Result<Self> {
        info!("Initializing Kestrel broker components...");

        let registry_cfg = RegistryConfig {
            data_dir: PathBuf::from(&config.storage.data_dir),
            broker_id: config.kafka.broker_id,
            segment_cap_bytes: config.storage.log_segment_size_bytes,
            flush_policy: FlushPolicy {
                every_records: config.storage.log_flush_messages,
                every_ms: config.storage.log_flush_interval_ms,
            },
            replica_config: ReplicaConfig {
                replica_lag_time_max_ms: config.replication.replica_lag_time_max_ms,
                min_insync_replicas: config.replication.min_insync_replicas,
            },
        };
        let registry = Registry::load(registry_cfg)?;

        // A single-broker `cluster-brokers` list runs writes inline; more
        // than one broker means committed state has to go through Raft
        // consensus before it's visible.
        let backend: Arc<dyn MetadataBackend> = if config.kafka.cluster_brokers.len() <= 1 {
            Arc::new(Direct::new(registry))
        } else {
            Arc::new(Raft::new(config.kafka.broker_id, config.kafka.cluster_brokers.len(), registry))
        };

        let coordinator = Arc::new(Coordinator::new(
            config.kafka.broker_id,
            config.kafka.cluster_brokers.clone(),
            backend.clone(),
            CoordinatorConfig::default(),
        ));

        // Both bounds are documented as "(-1/0 = unlimited)", so both get
        // the same <=0 -> -1 translation before reaching `apply_retention`,
        // which otherwise reads a literal `0` as a 0-byte bound and deletes
        // every non-active segment.
        let cleaner = Arc::new(Cleaner::new(CleanerConfig {
            enabled: config.storage.cleaner_enabled,
            cleanup_interval: Duration::from_secs(config.storage.cleanup_interval_secs),
            compaction_interval: Duration::from_millis(config.storage.compaction_interval_ms),
            retention_bytes: if config.storage.log_retention_bytes <= 0 {
                -1
            } else {
                config.storage.log_retention_bytes
            },
            retention_ms: if config.storage.log_retention_hours <= 0 {
                -1
            } else {
                config.storage.log_retention_hours * 3600 * 1000
            },
            compaction_min_cleanable_ratio: config.storage.compaction_min_cleanable_ratio,
            compaction_delete_retention_ms: config.storage.compaction_delete_retention_ms as i64,
            compaction_min_lag_ms: config.storage.compaction_min_lag_ms as i64,
        }));

        for topic in backend.list_topics() {
            for partition in &topic.partitions {
                if let Some(replica) = backend.registry().partition(&topic.name, partition.id) {
                    cleaner.register(&topic.name, partition.id, replica.log().clone());
                }
            }
        }

        // This process only knows its own advertised address; discovering
        // the rest of the cluster's broker directory is Raft/gossip
        // machinery out of scope here.
        let brokers = vec![kestrel_common::types::BrokerInfo {
            id: config.kafka.broker_id,
            host: config.kafka.advertised_host.clone(),
            port: config.kafka.advertised_port,
        }];

        let router = Arc::new(Router::new(
            backend,
            coordinator.clone(),
            cleaner.clone(),
            brokers,
            config.kafka.broker_id,
            Duration::from_millis(config.kafka.request_timeout_ms),
        ));

        info!("Kestrel broker initialization complete");

        Ok(Self {
            router,
            cleaner,
            coordinator,
            sweep_interval: Duration::from_secs(5),
            running: Arc::new(RwLock::new(false)),
            shutdown_notify: Arc::new(Notify::new()),
        })
    }

    /// The request router other components (a future wire-protocol server,
    /// an embedding test harness) dispatch decoded requests through.
    #[must_use]
    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    #[must_use]
    pub fn cleaner_stats(&self) -> Arc<kestrel_cleaner::CleanerStats> {
        self.cleaner.stats()
    }

    /// Starts the background tickers and blocks until [`Broker::shutdown`]
    /// is called.
    pub async fn run(&self) -> Result<()> {
        *self.running.write().await = true;

        let cleaner_handles: Vec<JoinHandle<()>> = self.cleaner.clone().spawn();

        let coordinator = self.coordinator.clone();
        let sweep_interval = self.sweep_interval;
        let sweep_handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            loop {
                ticker.tick().await;
                coordinator.sweep();
            }
        });

        info!("Kestrel broker started; cleaner and coordinator sweep tickers running");

        self.shutdown_notify.notified().await;

        sweep_handle.abort();
        for handle in cleaner_handles {
            handle.abort();
        }

        Ok(())
    }

    /// Signals [`Broker::run`] to stop its background tasks.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Initiating graceful shutdown...");
        *self.running.write().await = false;
        self.shutdown_notify.notify_one();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_common::config::{KafkaConfig, StorageConfig};

    #[tokio::test]
    async fn broker_builds_from_default_config_and_shuts_down() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = KestrelConfig::default();
        config.storage = StorageConfig {
            data_dir: dir.path().to_string_lossy().into_owned(),
            ..StorageConfig::default()
        };
        config.kafka = KafkaConfig {
            broker_id: 1,
            cluster_brokers: vec![1],
            ..KafkaConfig::default()
        };

        let broker = Broker::new(config).await.unwrap();
        let running = tokio::spawn({
            let notify = broker.shutdown_notify.clone();
            async move {
                notify.notified().await;
            }
        });

        broker.shutdown().await.unwrap();
        running.await.unwrap();
    }
}
