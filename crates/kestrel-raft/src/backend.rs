//! `MetadataBackend`: the seam that lets the same core
//! run single-node (`Direct`) or clustered (`Raft`) without the router or
//! coordinator knowing the difference.

use std::sync::Arc;

use async_trait::async_trait;
use kestrel_common::error::{RaftError, Result};
use kestrel_common::types::{
    NodeId, Offset, PartitionAssignment, PartitionId, Timestamp, TopicConfig, TopicMetadata,
};

use crate::command::Command;
use crate::node::{RaftFsm, RaftNode};
use crate::offsets::OffsetStore;
use crate::registry::Registry;

/// Operations the router and coordinator need from the metadata plane,
/// independent of whether writes go through Raft or are applied inline.
#[async_trait]
pub trait MetadataBackend: Send + Sync {
    async fn create_topic(
        &self,
        config: TopicConfig,
        assignment: Vec<PartitionAssignment>,
    ) -> Result<()>;

    async fn delete_topic(&self, name: &str) -> Result<()>;

    async fn set_replicas(
        &self,
        topic: &str,
        partition: PartitionId,
        replicas: Vec<NodeId>,
        leader: NodeId,
        leader_epoch: i32,
    ) -> Result<()>;

    async fn set_isr(
        &self,
        topic: &str,
        partition: PartitionId,
        isr: Vec<NodeId>,
        leader_epoch: i32,
    ) -> Result<()>;

    async fn commit_offset(
        &self,
        group: &str,
        topic: &str,
        partition: PartitionId,
        offset: Offset,
        metadata: String,
        commit_timestamp: Timestamp,
    ) -> Result<()>;

    /// Read-only: served from the local registry/offset store without
    /// going through consensus.
    fn topic_metadata(&self, name: &str) -> Option<TopicMetadata>;

    fn list_topics(&self) -> Vec<TopicMetadata>;

    fn fetch_offsets(
        &self,
        group: &str,
        filter: Option<&[(String, PartitionId)]>,
    ) -> Vec<(String, PartitionId, Offset, String)>;

    fn reset_offsets(&self, group: &str, offsets: &[(String, PartitionId, Offset)]);

    fn delete_group_offsets(&self, group: &str);

    fn registry(&self) -> &Registry;

    /// Whether this broker currently accepts metadata proposals (the Raft
    /// leader, or always-true for `Direct`). The router uses this to
    /// return `NotController` without attempting the call.
    fn is_controller(&self) -> bool {
        true
    }
}

/// Single-broker backend: mutates the registry and offset store inline,
/// no consensus round-trip.
pub struct Direct {
    registry: Registry,
    offsets: OffsetStore,
}

impl Direct {
    #[must_use]
    pub fn new(registry: Registry) -> Self {
        Self {
            registry,
            offsets: OffsetStore::new(),
        }
    }
}

#[async_trait]
impl MetadataBackend for Direct {
    async fn create_topic(
        &self,
        config: TopicConfig,
        assignment: Vec<PartitionAssignment>,
    ) -> Result<()> {
        self.registry.create_topic(config, assignment, now_ms())
    }

    async fn delete_topic(&self, name: &str) -> Result<()> {
        self.registry.delete_topic(name)
    }

    async fn set_replicas(
        &self,
        topic: &str,
        partition: PartitionId,
        replicas: Vec<NodeId>,
        leader: NodeId,
        leader_epoch: i32,
    ) -> Result<()> {
        self.registry.set_replicas(topic, partition, replicas, leader, leader_epoch)
    }

    async fn set_isr(
        &self,
        topic: &str,
        partition: PartitionId,
        isr: Vec<NodeId>,
        leader_epoch: i32,
    ) -> Result<()> {
        self.registry.set_isr(topic, partition, isr, leader_epoch)
    }

    async fn commit_offset(
        &self,
        group: &str,
        topic: &str,
        partition: PartitionId,
        offset: Offset,
        metadata: String,
        commit_timestamp: Timestamp,
    ) -> Result<()> {
        self.offsets.commit(group, topic, partition, offset, metadata, commit_timestamp);
        Ok(())
    }

    fn topic_metadata(&self, name: &str) -> Option<TopicMetadata> {
        self.registry.topic_metadata(name)
    }

    fn list_topics(&self) -> Vec<TopicMetadata> {
        self.registry.list_topics()
    }

    fn fetch_offsets(
        &self,
        group: &str,
        filter: Option<&[(String, PartitionId)]>,
    ) -> Vec<(String, PartitionId, Offset, String)> {
        self.offsets.fetch(group, filter)
    }

    fn reset_offsets(&self, group: &str, offsets: &[(String, PartitionId, Offset)]) {
        self.offsets.reset(group, offsets);
    }

    fn delete_group_offsets(&self, group: &str) {
        self.offsets.delete_group(group);
    }

    fn registry(&self) -> &Registry {
        &self.registry
    }
}

/// The FSM target the Raft node drives: applies committed commands to the
/// registry and offset store it shares with the surrounding [`Raft`]
/// backend. Deterministic given `(command, prior state)`.
struct MetadataFsm {
    registry: Arc<Registry>,
    offsets: Arc<OffsetStore>,
}

impl RaftFsm for MetadataFsm {
    fn apply(&self, command: &Command) -> Result<()> {
        match command.clone() {
            Command::CreateTopic { config, assignment } => {
                self.registry.create_topic(config, assignment, now_ms())
            }
            Command::DeleteTopic { name } => self.registry.delete_topic(&name),
            Command::SetReplicas { topic, partition, replicas, leader, leader_epoch } => {
                self.registry.set_replicas(&topic, partition, replicas, leader, leader_epoch)
            }
            Command::SetISR { topic, partition, isr, leader_epoch } => {
                self.registry.set_isr(&topic, partition, isr, leader_epoch)
            }
            Command::CommitOffset { group, topic, partition, offset, metadata, commit_timestamp } => {
                self.offsets.commit(&group, &topic, partition, offset, metadata, commit_timestamp);
                Ok(())
            }
        }
    }

    fn snapshot(&self) -> Vec<u8> {
        // The registry already persists itself via per-partition
        // metadata.json files; nothing further to capture
        // here since offsets have no independent on-disk form outside the
        // Raft log they're reconstructed from.
        Vec::new()
    }

    fn restore(&self, _bytes: &[u8]) -> Result<()> {
        Ok(())
    }
}

/// Clustered backend: proposes commands through a [`RaftNode`] and waits
/// for local apply before returning (which implies durable on a quorum).
/// Read-only queries bypass Raft entirely and hit the shared registry.
pub struct Raft {
    node: RaftNode,
    registry: Arc<Registry>,
    offsets: Arc<OffsetStore>,
}

impl Raft {
    #[must_use]
    pub fn new(node_id: NodeId, cluster_size: usize, registry: Registry) -> Self {
        let registry = Arc::new(registry);
        let offsets = Arc::new(OffsetStore::new());
        let fsm = Arc::new(MetadataFsm {
            registry: registry.clone(),
            offsets: offsets.clone(),
        });
        Self {
            node: RaftNode::new(node_id, cluster_size, fsm),
            registry,
            offsets,
        }
    }

    #[must_use]
    pub fn node(&self) -> &RaftNode {
        &self.node
    }
}

#[async_trait]
impl MetadataBackend for Raft {
    async fn create_topic(
        &self,
        config: TopicConfig,
        assignment: Vec<PartitionAssignment>,
    ) -> Result<()> {
        self.node.propose(Command::CreateTopic { config, assignment }).await?;
        Ok(())
    }

    async fn delete_topic(&self, name: &str) -> Result<()> {
        self.node.propose(Command::DeleteTopic { name: name.to_string() }).await?;
        Ok(())
    }

    async fn set_replicas(
        &self,
        topic: &str,
        partition: PartitionId,
        replicas: Vec<NodeId>,
        leader: NodeId,
        leader_epoch: i32,
    ) -> Result<()> {
        self.node
            .propose(Command::SetReplicas {
                topic: topic.to_string(),
                partition,
                replicas,
                leader,
                leader_epoch,
            })
            .await?;
        Ok(())
    }

    async fn set_isr(
        &self,
        topic: &str,
        partition: PartitionId,
        isr: Vec<NodeId>,
        leader_epoch: i32,
    ) -> Result<()> {
        self.node
            .propose(Command::SetISR {
                topic: topic.to_string(),
                partition,
                isr,
                leader_epoch,
            })
            .await?;
        Ok(())
    }

    async fn commit_offset(
        &self,
        group: &str,
        topic: &str,
        partition: PartitionId,
        offset: Offset,
        metadata: String,
        commit_timestamp: Timestamp,
    ) -> Result<()> {
        self.node
            .propose(Command::CommitOffset {
                group: group.to_string(),
                topic: topic.to_string(),
                partition,
                offset,
                metadata,
                commit_timestamp,
            })
            .await?;
        Ok(())
    }

    fn topic_metadata(&self, name: &str) -> Option<TopicMetadata> {
        self.registry.topic_metadata(name)
    }

    fn list_topics(&self) -> Vec<TopicMetadata> {
        self.registry.list_topics()
    }

    fn fetch_offsets(
        &self,
        group: &str,
        filter: Option<&[(String, PartitionId)]>,
    ) -> Vec<(String, PartitionId, Offset, String)> {
        self.offsets.fetch(group, filter)
    }

    fn reset_offsets(&self, group: &str, offsets: &[(String, PartitionId, Offset)]) {
        self.offsets.reset(group, offsets);
    }

    fn delete_group_offsets(&self, group: &str) {
        self.offsets.delete_group(group);
    }

    fn registry(&self) -> &Registry {
        &self.registry
    }

    fn is_controller(&self) -> bool {
        self.node.is_leader()
    }
}

/// Maps a non-controller node's lack of leadership onto the router-facing
/// `NotController` error.
#[must_use]
pub fn not_controller_error(leader_id: Option<NodeId>) -> kestrel_common::error::Error {
    RaftError::NotController(leader_id.map(|n| n as u64)).into()
}

fn now_ms() -> Timestamp {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
