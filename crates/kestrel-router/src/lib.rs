//! Request router: dispatches already-decoded requests to
//! the log/replication, metadata, and coordinator layers. One request/
//! response struct pair per supported Kafka API key, with one handler
//! method per pair on [`Router`].

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod requests;
mod router;

pub use requests::*;
pub use router::Router;

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_cleaner::{Cleaner, CleanerConfig};
    use kestrel_coordinator::{Coordinator, CoordinatorConfig};
    use kestrel_log::FlushPolicy;
    use kestrel_raft::{round_robin_assign, Direct, MetadataBackend, Registry, RegistryConfig};
    use kestrel_replication::ReplicaConfig;
    use std::sync::Arc;
    use std::time::Duration;

    fn make_router() -> (Router, Arc<Cleaner>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::new(RegistryConfig {
            data_dir: dir.path().to_path_buf(),
            broker_id: 1,
            segment_cap_bytes: 1024 * 1024,
            flush_policy: FlushPolicy {
                every_records: 1,
                every_ms: 1000,
            },
            replica_config: ReplicaConfig {
                replica_lag_time_max_ms: 10_000,
                min_insync_replicas: 1,
            },
        });

        let assignment = round_robin_assign(&[1], 1, 1).unwrap();
        registry
            .create_topic(
                kestrel_common::types::TopicConfig::new("orders", 1, 1),
                assignment,
                0,
            )
            .unwrap();

        let backend: Arc<dyn MetadataBackend> = Arc::new(Direct::new(registry));
        let coordinator = Arc::new(Coordinator::new(1, vec![1], backend.clone(), CoordinatorConfig::default()));
        let cleaner = Arc::new(Cleaner::new(CleanerConfig {
            enabled: true,
            cleanup_interval: Duration::from_secs(300),
            compaction_interval: Duration::from_secs(15),
            retention_bytes: -1,
            retention_ms: -1,
            compaction_min_cleanable_ratio: 0.5,
            compaction_delete_retention_ms: 0,
            compaction_min_lag_ms: 0,
        }));

        let brokers = vec![kestrel_common::types::BrokerInfo {
            id: 1,
            host: "localhost".to_string(),
            port: 9092,
        }];

        let router = Router::new(backend, coordinator, cleaner.clone(), brokers, 1, Duration::from_secs(5));
        (router, cleaner, dir)
    }

    #[tokio::test]
    async fn produce_then_fetch_round_trips_a_record() {
        let (router, _cleaner, _dir) = make_router();

        let produced = router
            .produce(ProduceRequest {
                topic: "orders".to_string(),
                partition: 0,
                key: None,
                value: Some(bytes::Bytes::from_static(b"hello")),
                acks: 1,
                timeout_ms: 1000,
                leader_epoch: None,
            })
            .await
            .unwrap();
        assert_eq!(produced.offset, 0);

        let fetched = router
            .fetch(FetchRequest {
                topic: "orders".to_string(),
                partition: 0,
                replica_id: -1,
                fetch_offset: 0,
                max_bytes: 1024,
            })
            .unwrap();
        assert_eq!(fetched.records.len(), 1);
        assert_eq!(fetched.records[0].value.as_deref(), Some(&b"hello"[..]));
    }

    #[test]
    fn fetch_unknown_partition_fails() {
        let (router, _cleaner, _dir) = make_router();
        let result = router.fetch(FetchRequest {
            topic: "missing".to_string(),
            partition: 0,
            replica_id: -1,
            fetch_offset: 0,
            max_bytes: 1024,
        });
        assert!(result.is_err());
    }

    #[test]
    fn api_versions_advertises_every_supported_key() {
        let (router, _cleaner, _dir) = make_router();
        let versions = router.api_versions();
        assert!(versions.versions.iter().any(|(k, _, _)| *k == 0));
        assert!(versions.versions.iter().any(|(k, _, _)| *k == 18));
    }

    #[tokio::test]
    async fn create_topics_registers_partitions_with_cleaner_and_delete_unregisters() {
        let (router, cleaner, _dir) = make_router();
        assert!(!cleaner.is_registered("new-topic", 0));

        router
            .create_topics(CreateTopicsRequest {
                name: "new-topic".to_string(),
                partitions: 2,
                replication_factor: 1,
                config: Default::default(),
            })
            .await
            .unwrap();
        assert!(cleaner.is_registered("new-topic", 0));
        assert!(cleaner.is_registered("new-topic", 1));

        router
            .delete_topics(DeleteTopicsRequest {
                name: "new-topic".to_string(),
            })
            .await
            .unwrap();
        assert!(!cleaner.is_registered("new-topic", 0));
        assert!(!cleaner.is_registered("new-topic", 1));
    }
}
