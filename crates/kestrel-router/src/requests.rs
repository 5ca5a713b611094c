//! Decoded request/response pairs, one per supported Kafka API key.
//! The wire codec producing/consuming these from bytes lives outside this
//! crate; `Router` only ever sees the structs below, already decoded and
//! ready to dispatch on `api_key`.

use bytes::Bytes;
use kestrel_common::types::{NodeId, Offset, PartitionId, Timestamp};

#[derive(Debug, Clone)]
pub struct ProduceRequest {
    pub topic: String,
    pub partition: PartitionId,
    pub key: Option<Bytes>,
    pub value: Option<Bytes>,
    pub acks: i8,
    pub timeout_ms: u64,
    pub leader_epoch: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct ProduceResponse {
    pub topic: String,
    pub partition: PartitionId,
    pub offset: Offset,
    pub timestamp: Timestamp,
}

/// `replicaId < 0` means a consumer fetch; `>= 0` is a follower fetch from
/// that broker.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub topic: String,
    pub partition: PartitionId,
    pub replica_id: NodeId,
    pub fetch_offset: Offset,
    pub max_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub topic: String,
    pub partition: PartitionId,
    pub records: Vec<kestrel_common::types::Record>,
    pub high_water_mark: Offset,
}

#[derive(Debug, Clone)]
pub enum OffsetSpec {
    Earliest,
    Latest,
    Timestamp(Timestamp),
}

#[derive(Debug, Clone)]
pub struct ListOffsetsRequest {
    pub topic: String,
    pub partition: PartitionId,
    pub spec: OffsetSpec,
}

#[derive(Debug, Clone)]
pub struct ListOffsetsResponse {
    pub offset: Offset,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, Default)]
pub struct MetadataRequest {
    /// Empty means "all topics", matching Kafka's Metadata semantics.
    pub topics: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct MetadataResponse {
    pub brokers: Vec<kestrel_common::types::BrokerInfo>,
    pub controller_id: Option<NodeId>,
    pub topics: Vec<kestrel_common::types::TopicMetadata>,
}

#[derive(Debug, Clone)]
pub struct OffsetCommitRequest {
    pub group_id: String,
    pub topic: String,
    pub partition: PartitionId,
    pub offset: Offset,
    pub metadata: String,
}

#[derive(Debug, Clone)]
pub struct OffsetFetchRequest {
    pub group_id: String,
    /// `None` fetches every committed offset for the group.
    pub partitions: Option<Vec<(String, PartitionId)>>,
}

#[derive(Debug, Clone)]
pub struct OffsetFetchResponse {
    pub offsets: Vec<(String, PartitionId, Offset, String)>,
}

#[derive(Debug, Clone)]
pub struct FindCoordinatorRequest {
    pub group_id: String,
}

#[derive(Debug, Clone)]
pub struct FindCoordinatorResponse {
    pub node_id: NodeId,
}

#[derive(Debug, Clone)]
pub struct JoinGroupRequest {
    pub group_id: String,
    pub member_id: Option<String>,
    pub client_id: String,
    pub client_host: String,
    pub session_timeout_ms: u64,
    pub rebalance_timeout_ms: u64,
    pub protocol_type: String,
    pub protocols: Vec<(String, Vec<u8>)>,
}

#[derive(Debug, Clone)]
pub struct JoinGroupResponse {
    pub generation_id: i32,
    pub protocol: String,
    pub leader_id: String,
    pub member_id: String,
    pub members: Vec<(String, Vec<u8>)>,
}

#[derive(Debug, Clone)]
pub struct HeartbeatRequest {
    pub group_id: String,
    pub member_id: String,
    pub generation_id: i32,
}

#[derive(Debug, Clone)]
pub struct LeaveGroupRequest {
    pub group_id: String,
    pub member_id: String,
}

#[derive(Debug, Clone)]
pub struct SyncGroupRequest {
    pub group_id: String,
    pub member_id: String,
    pub generation_id: i32,
    /// Populated only by the group leader's call.
    pub assignments: Option<std::collections::HashMap<String, Vec<u8>>>,
}

#[derive(Debug, Clone)]
pub struct SyncGroupResponse {
    pub assignment: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct DescribeGroupsRequest {
    pub group_ids: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct GroupDescription {
    pub group_id: String,
    pub state: String,
    pub protocol_type: String,
    pub member_count: usize,
}

#[derive(Debug, Clone)]
pub struct ListGroupsResponse {
    pub groups: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct CreateTopicsRequest {
    pub name: String,
    pub partitions: i32,
    pub replication_factor: i16,
    pub config: std::collections::HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct DeleteTopicsRequest {
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct DeleteRecordsRequest {
    pub topic: String,
    pub partition: PartitionId,
    pub before_offset: Offset,
}

#[derive(Debug, Clone)]
pub struct InitProducerIdRequest {
    pub transactional_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct InitProducerIdResponse {
    pub producer_id: i64,
    pub producer_epoch: i16,
}

/// The API keys 24–28 range (`AddPartitionsToTxn`..`TxnOffsetCommit`):
/// accepted and acknowledged at control-record granularity, with no
/// transaction coordinator behind them.
#[derive(Debug, Clone)]
pub struct TransactionalStubRequest {
    pub api_key: i16,
}

#[derive(Debug, Clone)]
pub struct TransactionalStubResponse {
    pub api_key: i16,
    pub acknowledged: bool,
}

#[derive(Debug, Clone)]
pub struct DescribeConfigsRequest {
    pub topic: String,
}

#[derive(Debug, Clone)]
pub struct DescribeConfigsResponse {
    pub config: std::collections::HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct AlterConfigsRequest {
    pub topic: String,
    pub config: std::collections::HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct DescribeLogDirsRequest {
    pub topics: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct LogDirPartitionSize {
    pub topic: String,
    pub partition: PartitionId,
    pub size_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct DescribeLogDirsResponse {
    pub partitions: Vec<LogDirPartitionSize>,
}

/// SASL handshake/authenticate (API keys 17/36): passthrough to an
/// external auth module — this crate only forwards the opaque bytes.
#[derive(Debug, Clone)]
pub struct SaslPassthroughRequest {
    pub api_key: i16,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct SaslPassthroughResponse {
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ApiVersionsResponse {
    pub versions: Vec<(i16, i16, i16)>,
}
