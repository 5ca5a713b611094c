//! Unified error hierarchy for Kestrel
//!
//! Each subsystem owns its own error enum; `Error` composes them. Every
//! variant's doc comment names the Kafka protocol error it corresponds to,
//! so a wire-codec layer can map this enum onto numeric error codes
//! mechanically (that mapping table itself lives outside this crate, per
//! scope).

use thiserror::Error;

/// Result type alias using Kestrel's `Error` type
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for Kestrel
#[derive(Error, Debug)]
pub enum Error {
    #[error("log error: {0}")]
    Log(#[from] LogError),

    #[error("replication error: {0}")]
    Replication(#[from] ReplicationError),

    #[error("raft error: {0}")]
    Raft(#[from] RaftError),

    #[error("coordinator error: {0}")]
    Coordinator(#[from] CoordinatorError),

    #[error("router error: {0}")]
    Router(#[from] RouterError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Errors from the partitioned log storage engine (segment/log)
#[derive(Error, Debug)]
pub enum LogError {
    /// Kafka: OFFSET_OUT_OF_RANGE
    #[error("offset {offset} out of range [{base}, {next})")]
    OffsetOutOfRange {
        offset: i64,
        base: i64,
        next: i64,
    },

    #[error("segment is full")]
    SegmentFull,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt record at position {position}: {reason}")]
    CorruptRecord { position: u64, reason: String },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("no such segment for base offset {0}")]
    NoSuchSegment(i64),
}

/// Errors from replication / ISR management
#[derive(Error, Debug)]
pub enum ReplicationError {
    /// Kafka: UNKNOWN_TOPIC_OR_PARTITION
    #[error("unknown topic or partition: {topic}-{partition}")]
    UnknownTopicOrPartition { topic: String, partition: i32 },

    /// Kafka: NOT_LEADER_FOR_PARTITION
    #[error("not leader for partition {topic}-{partition}")]
    NotLeaderForPartition { topic: String, partition: i32 },

    /// Kafka: FENCED_LEADER_EPOCH
    #[error("fenced leader epoch: request={request_epoch} current={current_epoch}")]
    FencedLeaderEpoch {
        request_epoch: i32,
        current_epoch: i32,
    },

    /// Kafka: NOT_ENOUGH_REPLICAS
    #[error("not enough replicas: isr has {isr_size}, need {min_insync}")]
    NotEnoughReplicas { isr_size: usize, min_insync: usize },

    /// Kafka: NOT_ENOUGH_REPLICAS_AFTER_APPEND
    #[error("not enough replicas after append: waited for offset {offset}")]
    NotEnoughReplicasAfterAppend { offset: i64 },

    /// Kafka: REQUEST_TIMED_OUT
    #[error("request timed out after {0}ms")]
    RequestTimedOut(u64),

    #[error(transparent)]
    Log(#[from] LogError),
}

/// Errors from the Raft-backed metadata plane
#[derive(Error, Debug)]
pub enum RaftError {
    /// Kafka: NOT_CONTROLLER
    #[error("not controller; current leader is {0:?}")]
    NotController(Option<u64>),

    #[error("invalid replication factor {requested}: cluster has {broker_count} brokers")]
    InvalidReplicationFactor {
        requested: u16,
        broker_count: usize,
    },

    #[error("invalid partition count {0}")]
    InvalidPartitions(i32),

    /// Kafka: TOPIC_ALREADY_EXISTS
    #[error("topic already exists: {0}")]
    TopicAlreadyExists(String),

    /// Kafka: UNKNOWN_TOPIC_OR_PARTITION
    #[error("unknown topic: {0}")]
    UnknownTopic(String),

    #[error("propose timed out after {0}ms")]
    ProposeTimedOut(u64),

    #[error("internal raft error: {0}")]
    Internal(String),
}

/// Errors from consumer-group coordination
#[derive(Error, Debug)]
pub enum CoordinatorError {
    /// Kafka: NOT_COORDINATOR
    #[error("not coordinator for group {0}")]
    NotCoordinator(String),

    /// Kafka: ILLEGAL_GENERATION
    #[error("illegal generation: request={request} current={current}")]
    IllegalGeneration { request: i32, current: i32 },

    /// Kafka: REBALANCE_IN_PROGRESS
    #[error("rebalance in progress for group {0}")]
    RebalanceInProgress(String),

    /// Kafka: UNKNOWN_MEMBER_ID
    #[error("unknown member id {0}")]
    UnknownMemberId(String),

    #[error("group {0} not found")]
    GroupNotFound(String),

    #[error("cannot reset offsets while group {0} is active")]
    CannotResetWhileActive(String),
}

/// Errors surfaced by the request router
#[derive(Error, Debug)]
pub enum RouterError {
    #[error(transparent)]
    Log(#[from] LogError),

    #[error(transparent)]
    Replication(#[from] ReplicationError),

    #[error(transparent)]
    Raft(#[from] RaftError),

    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
