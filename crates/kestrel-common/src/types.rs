//! Shared type definitions for Kestrel

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Offset type for log positions
pub type Offset = i64;

/// Partition identifier
pub type PartitionId = i32;

/// Broker / node identifier
pub type NodeId = i32;

/// Term number for Raft consensus
pub type Term = u64;

/// Log index for Raft consensus
pub type LogIndex = u64;

/// Timestamp in milliseconds since Unix epoch
pub type Timestamp = i64;

// ============================================================================
// Record types
// ============================================================================

/// A single record appended to a partition.
///
/// Null `value` is a compaction tombstone.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    pub offset: Offset,
    pub timestamp: Timestamp,
    pub key: Option<Bytes>,
    pub value: Option<Bytes>,
    pub headers: Vec<(Bytes, Bytes)>,
}

impl Record {
    pub fn new(key: Option<Bytes>, value: Option<Bytes>, timestamp: Timestamp) -> Self {
        Self {
            offset: -1,
            timestamp,
            key,
            value,
            headers: Vec::new(),
        }
    }

    /// A tombstone is a keyed record with a null value.
    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }
}

/// Metadata returned to a producer after a successful append.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub topic: String,
    pub partition: PartitionId,
    pub offset: Offset,
    pub timestamp: Timestamp,
}

// ============================================================================
// Topic / partition types
// ============================================================================

/// Topic configuration as accepted by `CreateTopic`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicConfig {
    pub name: String,
    pub partitions: i32,
    pub replication_factor: i16,
    pub config: std::collections::HashMap<String, String>,
}

impl TopicConfig {
    pub fn new(name: impl Into<String>, partitions: i32, replication_factor: i16) -> Self {
        Self {
            name: name.into(),
            partitions,
            replication_factor,
            config: std::collections::HashMap::new(),
        }
    }
}

/// Per-partition replica assignment, as persisted in `metadata.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartitionAssignment {
    pub partition_id: PartitionId,
    pub replicas: Vec<NodeId>,
    pub isr: Vec<NodeId>,
    pub leader: NodeId,
    pub leader_epoch: i32,
}

/// On-disk `metadata.json` shape for a topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicMetadataFile {
    pub version: u32,
    pub name: String,
    pub replication_factor: i16,
    pub partitions: Vec<PartitionAssignment>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Partition metadata as surfaced to clients via the Metadata API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionMetadata {
    pub id: PartitionId,
    pub leader: Option<NodeId>,
    pub replicas: Vec<NodeId>,
    pub isr: Vec<NodeId>,
    pub leader_epoch: i32,
}

/// Topic metadata as surfaced to clients via the Metadata API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicMetadata {
    pub name: String,
    pub partitions: Vec<PartitionMetadata>,
    pub is_internal: bool,
}

// ============================================================================
// Cluster / broker types
// ============================================================================

/// A broker participating in the cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerInfo {
    pub id: NodeId,
    pub host: String,
    pub port: u16,
}
