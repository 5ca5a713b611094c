//! Raft FSM commands. A closed set, modelled as a tagged
//! enum rather than a class hierarchy so apply's `match` is exhaustive.

use kestrel_common::types::{NodeId, Offset, PartitionId, Timestamp, TopicConfig};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Command {
    CreateTopic {
        config: TopicConfig,
        assignment: Vec<kestrel_common::types::PartitionAssignment>,
    },
    DeleteTopic {
        name: String,
    },
    SetReplicas {
        topic: String,
        partition: PartitionId,
        replicas: Vec<NodeId>,
        leader: NodeId,
        leader_epoch: i32,
    },
    SetISR {
        topic: String,
        partition: PartitionId,
        isr: Vec<NodeId>,
        leader_epoch: i32,
    },
    CommitOffset {
        group: String,
        topic: String,
        partition: PartitionId,
        offset: Offset,
        metadata: String,
        commit_timestamp: Timestamp,
    },
}
