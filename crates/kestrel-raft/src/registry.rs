//! Topic/Partition Registry: per-broker in-memory map of
//! `(topic, partitionId) -> PartitionReplica`, rebuilt on startup from
//! on-disk partition directories and their `metadata.json`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use kestrel_common::error::{RaftError, Result};
use kestrel_common::types::{
    NodeId, PartitionAssignment, PartitionId, PartitionMetadata, Timestamp, TopicConfig,
    TopicMetadata, TopicMetadataFile,
};
use kestrel_log::{FlushPolicy, Log};
use kestrel_replication::{PartitionReplica, ReplicaConfig};
use tracing::{info, warn};

/// Knobs the registry needs to open logs and replicas for newly assigned
/// (or recovered) partitions.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub data_dir: PathBuf,
    pub broker_id: NodeId,
    pub segment_cap_bytes: u64,
    pub flush_policy: FlushPolicy,
    pub replica_config: ReplicaConfig,
}

struct TopicEntry {
    config: TopicConfig,
    created_at: Timestamp,
    updated_at: Timestamp,
    partitions: DashMap<PartitionId, Arc<PartitionReplica>>,
}

/// Per-broker registry of topics and their partition replicas.
pub struct Registry {
    cfg: RegistryConfig,
    topics: DashMap<String, TopicEntry>,
}

impl Registry {
    #[must_use]
    pub fn new(cfg: RegistryConfig) -> Self {
        Self {
            cfg,
            topics: DashMap::new(),
        }
    }

    /// Rebuild the registry from `<data-dir>/<topic>-<partitionId>/metadata.json`
    /// directories left behind by a prior run.
    pub fn load(cfg: RegistryConfig) -> Result<Self> {
        std::fs::create_dir_all(&cfg.data_dir)?;
        let registry = Self::new(cfg);

        for entry in std::fs::read_dir(&registry.cfg.data_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let dir_name = entry.file_name();
            let dir_name = dir_name.to_string_lossy();
            let Some((topic, partition_str)) = dir_name.rsplit_once('-') else {
                continue;
            };
            let Ok(partition_id) = partition_str.parse::<PartitionId>() else {
                continue;
            };

            let metadata_path = entry.path().join("metadata.json");
            if !metadata_path.exists() {
                warn!(dir = %dir_name, "partition directory missing metadata.json, skipping");
                continue;
            }
            let bytes = std::fs::read(&metadata_path)?;
            let file: TopicMetadataFile = serde_json::from_slice(&bytes)?;
            let Some(assignment) = file.partitions.iter().find(|p| p.partition_id == partition_id).cloned() else {
                continue;
            };

            registry.open_partition(topic, &file, &assignment)?;
            info!(topic, partition_id, "recovered partition from disk");
        }

        Ok(registry)
    }

    fn partition_dir(&self, topic: &str, partition_id: PartitionId) -> PathBuf {
        self.cfg.data_dir.join(format!("{topic}-{partition_id}"))
    }

    fn open_partition(
        &self,
        topic: &str,
        file: &TopicMetadataFile,
        assignment: &PartitionAssignment,
    ) -> Result<()> {
        let dir = self.partition_dir(topic, assignment.partition_id);
        std::fs::create_dir_all(&dir)?;

        let log = Arc::new(Log::open(
            &dir,
            assignment.partition_id,
            self.cfg.segment_cap_bytes,
            self.cfg.flush_policy,
        )?);

        let replica = Arc::new(PartitionReplica::new(
            topic,
            assignment.partition_id,
            self.cfg.broker_id,
            log,
            assignment.replicas.clone(),
            assignment.leader,
            assignment.leader_epoch,
            self.cfg.replica_config,
        ));

        let entry = self.topics.entry(topic.to_string()).or_insert_with(|| TopicEntry {
            config: TopicConfig::new(topic, file.partitions.len() as i32, file.replication_factor),
            created_at: file.created_at,
            updated_at: file.updated_at,
            partitions: DashMap::new(),
        });
        entry.partitions.insert(assignment.partition_id, replica);
        Ok(())
    }

    fn write_metadata_file(&self, topic: &str, entry: &TopicEntry) -> Result<()> {
        let partitions: Vec<PartitionAssignment> = entry
            .partitions
            .iter()
            .map(|r| PartitionAssignment {
                partition_id: r.partition_id,
                replicas: r.replicas(),
                isr: r.isr(),
                leader: r.leader_id(),
                leader_epoch: r.leader_epoch(),
            })
            .collect();

        let file = TopicMetadataFile {
            version: 1,
            name: topic.to_string(),
            replication_factor: entry.config.replication_factor,
            partitions,
            created_at: entry.created_at,
            updated_at: entry.updated_at,
        };

        for partition in entry.partitions.iter() {
            let dir = self.partition_dir(topic, *partition.key());
            std::fs::create_dir_all(&dir)?;
            atomic_write_json(&dir.join("metadata.json"), &file)?;
        }
        Ok(())
    }

    /// Apply a committed `CreateTopic` command: persist assignment, open
    /// logs and replicas for every partition. Deterministic given
    /// `(config, assignment)` — safe to call from FSM apply.
    pub fn create_topic(
        &self,
        config: TopicConfig,
        assignment: Vec<PartitionAssignment>,
        now: Timestamp,
    ) -> Result<()> {
        if self.topics.contains_key(&config.name) {
            return Err(RaftError::TopicAlreadyExists(config.name.clone()).into());
        }

        let name = config.name.clone();
        let entry = TopicEntry {
            config,
            created_at: now,
            updated_at: now,
            partitions: DashMap::new(),
        };
        self.topics.insert(name.clone(), entry);

        for a in &assignment {
            let dir = self.partition_dir(&name, a.partition_id);
            std::fs::create_dir_all(&dir)?;
            let log = Arc::new(Log::open(
                &dir,
                a.partition_id,
                self.cfg.segment_cap_bytes,
                self.cfg.flush_policy,
            )?);
            let replica = Arc::new(PartitionReplica::new(
                &name,
                a.partition_id,
                self.cfg.broker_id,
                log,
                a.replicas.clone(),
                a.leader,
                a.leader_epoch,
                self.cfg.replica_config,
            ));
            self.topics.get(&name).unwrap().partitions.insert(a.partition_id, replica);
        }

        let entry = self.topics.get(&name).unwrap();
        self.write_metadata_file(&name, &entry)
    }

    /// Apply a committed `DeleteTopic` command: remove partition directories.
    pub fn delete_topic(&self, name: &str) -> Result<()> {
        let Some((_, entry)) = self.topics.remove(name) else {
            return Err(RaftError::UnknownTopic(name.to_string()).into());
        };
        for partition in entry.partitions.iter() {
            let dir = self.partition_dir(name, *partition.key());
            if dir.exists() {
                std::fs::remove_dir_all(dir)?;
            }
        }
        Ok(())
    }

    pub fn set_replicas(
        &self,
        topic: &str,
        partition: PartitionId,
        replicas: Vec<NodeId>,
        leader: NodeId,
        leader_epoch: i32,
    ) -> Result<()> {
        let entry = self
            .topics
            .get(topic)
            .ok_or_else(|| RaftError::UnknownTopic(topic.to_string()))?;
        let replica = entry
            .partitions
            .get(&partition)
            .ok_or_else(|| RaftError::UnknownTopic(format!("{topic}-{partition}")))?;
        replica.set_replicas(replicas, leader, leader_epoch);
        drop(replica);
        self.write_metadata_file(topic, &entry)
    }

    pub fn set_isr(
        &self,
        topic: &str,
        partition: PartitionId,
        isr: Vec<NodeId>,
        leader_epoch: i32,
    ) -> Result<()> {
        let entry = self
            .topics
            .get(topic)
            .ok_or_else(|| RaftError::UnknownTopic(topic.to_string()))?;
        let replica = entry
            .partitions
            .get(&partition)
            .ok_or_else(|| RaftError::UnknownTopic(format!("{topic}-{partition}")))?;
        replica.set_isr(isr, leader_epoch);
        drop(replica);
        self.write_metadata_file(topic, &entry)
    }

    #[must_use]
    pub fn partition(&self, topic: &str, partition: PartitionId) -> Option<Arc<PartitionReplica>> {
        self.topics.get(topic)?.partitions.get(&partition).map(|r| r.clone())
    }

    #[must_use]
    pub fn topic_metadata(&self, name: &str) -> Option<TopicMetadata> {
        let entry = self.topics.get(name)?;
        let partitions = entry
            .partitions
            .iter()
            .map(|r| PartitionMetadata {
                id: *r.key(),
                leader: Some(r.leader_id()),
                replicas: r.replicas(),
                isr: r.isr(),
                leader_epoch: r.leader_epoch(),
            })
            .collect();
        Some(TopicMetadata {
            name: name.to_string(),
            partitions,
            is_internal: false,
        })
    }

    #[must_use]
    pub fn list_topics(&self) -> Vec<TopicMetadata> {
        self.topics
            .iter()
            .filter_map(|e| self.topic_metadata(e.key()))
            .collect()
    }
}

fn atomic_write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    let bytes = serde_json::to_vec_pretty(value)?;
    {
        use std::io::Write as _;
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Round-robin replica assignment. Deterministic: the same
/// `(brokers, partitions, replication_factor)` always yields the same
/// assignment.
pub fn round_robin_assign(
    brokers: &[NodeId],
    partitions: i32,
    replication_factor: i16,
) -> Result<Vec<PartitionAssignment>> {
    let n = brokers.len();
    if replication_factor < 1 || replication_factor as usize > n {
        return Err(RaftError::InvalidReplicationFactor {
            requested: replication_factor.max(0) as u16,
            broker_count: n,
        }
        .into());
    }
    if partitions < 1 {
        return Err(RaftError::InvalidPartitions(partitions).into());
    }

    let mut assignments = Vec::with_capacity(partitions as usize);
    for partition_id in 0..partitions {
        let start = partition_id as usize % n;
        let replicas: Vec<NodeId> = (0..replication_factor as usize)
            .map(|i| brokers[(start + i) % n])
            .collect();
        let leader = replicas[0];
        assignments.push(PartitionAssignment {
            partition_id,
            isr: replicas.clone(),
            replicas,
            leader,
            leader_epoch: 0,
        });
    }
    Ok(assignments)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_robin_balances_leaders_and_replicas() {
        let brokers = vec![1, 2, 3];
        let assignments = round_robin_assign(&brokers, 6, 2).unwrap();

        let mut leader_counts = std::collections::HashMap::new();
        let mut replica_counts = std::collections::HashMap::new();
        for a in &assignments {
            *leader_counts.entry(a.leader).or_insert(0) += 1;
            for &r in &a.replicas {
                *replica_counts.entry(r).or_insert(0) += 1;
            }
        }
        let leader_spread = leader_counts.values().max().unwrap() - leader_counts.values().min().unwrap();
        let replica_spread = replica_counts.values().max().unwrap() - replica_counts.values().min().unwrap();
        assert!(leader_spread <= 1);
        assert!(replica_spread <= 1);
    }

    #[test]
    fn replication_factor_above_broker_count_fails() {
        let brokers = vec![1, 2];
        let result = round_robin_assign(&brokers, 3, 3);
        assert!(matches!(
            result,
            Err(kestrel_common::error::Error::Raft(
                RaftError::InvalidReplicationFactor { .. }
            ))
        ));
    }

    #[test]
    fn create_and_load_topic_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = RegistryConfig {
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
        };
        let registry = Registry::new(cfg.clone());
        let config = TopicConfig::new("orders", 2, 1);
        let assignment = round_robin_assign(&[1], 2, 1).unwrap();
        registry.create_topic(config, assignment, 0).unwrap();

        assert!(registry.partition("orders", 0).is_some());
        assert!(registry.partition("orders", 1).is_some());

        let reloaded = Registry::load(cfg).unwrap();
        assert!(reloaded.partition("orders", 0).is_some());
        assert_eq!(reloaded.topic_metadata("orders").unwrap().partitions.len(), 2);
    }
}
