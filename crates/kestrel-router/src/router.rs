//! `Router`: dispatches already-decoded requests to the log/replication,
//! metadata, and coordinator layers, one handler method per
//! API key, going through `PartitionReplica`/`MetadataBackend`/
//! `Coordinator` rather than a single in-process engine.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use kestrel_cleaner::Cleaner;
use kestrel_common::error::{ReplicationError, Result, RouterError};
use kestrel_common::types::{BrokerInfo, NodeId, TopicConfig};
use kestrel_coordinator::Coordinator;
use kestrel_raft::{round_robin_assign, MetadataBackend};
use tracing::debug;

use crate::requests::*;

/// Broker-wide context a `Router` needs; owned by the server binary and
/// shared across connections. Partition/log access goes through
/// `backend.registry()` rather than a separately-held registry, so the
/// router and the metadata plane are always looking at the same state.
pub struct Router {
    backend: Arc<dyn MetadataBackend>,
    coordinator: Arc<Coordinator>,
    cleaner: Arc<Cleaner>,
    brokers: Vec<BrokerInfo>,
    this_broker: NodeId,
    request_timeout: Duration,
}

impl Router {
    #[must_use]
    pub fn new(
        backend: Arc<dyn MetadataBackend>,
        coordinator: Arc<Coordinator>,
        cleaner: Arc<Cleaner>,
        brokers: Vec<BrokerInfo>,
        this_broker: NodeId,
        request_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            coordinator,
            cleaner,
            brokers,
            this_broker,
            request_timeout,
        }
    }

    fn partition(
        &self,
        topic: &str,
        partition: kestrel_common::types::PartitionId,
    ) -> Result<Arc<kestrel_replication::PartitionReplica>> {
        self.backend.registry().partition(topic, partition).ok_or_else(|| {
            ReplicationError::UnknownTopicOrPartition {
                topic: topic.to_string(),
                partition,
            }
            .into()
        })
    }

    /// API key 0. Enforces that this broker is the leader for the target
    /// partition before accepting the write.
    pub async fn produce(&self, req: ProduceRequest) -> Result<ProduceResponse> {
        let replica = self.partition(&req.topic, req.partition)?;
        let ack = replica
            .append(req.key, req.value, req.acks, Duration::from_millis(req.timeout_ms), req.leader_epoch)
            .await?;
        Ok(ProduceResponse {
            topic: req.topic,
            partition: req.partition,
            offset: ack.offset,
            timestamp: now_ms(),
        })
    }

    /// API key 1. `replicaId < 0` is a consumer fetch (bounded to HWM);
    /// `>= 0` is a follower fetch, which also drives ISR/HWM recomputation.
    pub fn fetch(&self, req: FetchRequest) -> Result<FetchResponse> {
        let replica = self.partition(&req.topic, req.partition)?;
        let result = if req.replica_id < 0 {
            replica.consumer_fetch(req.fetch_offset, req.max_bytes)?
        } else {
            replica.follower_fetch(req.replica_id, req.fetch_offset, req.max_bytes)?
        };
        Ok(FetchResponse {
            topic: req.topic,
            partition: req.partition,
            records: result.records,
            high_water_mark: result.high_water_mark,
        })
    }

    /// API key 2.
    pub fn list_offsets(&self, req: ListOffsetsRequest) -> Result<ListOffsetsResponse> {
        let replica = self.partition(&req.topic, req.partition)?;
        let log = replica.log();
        let offset = match req.spec {
            OffsetSpec::Earliest => 0,
            OffsetSpec::Latest => log.high_water_mark(),
            OffsetSpec::Timestamp(ts) => log.search_by_timestamp(ts)?,
        };
        let timestamp = if offset < log.high_water_mark() {
            log.read(offset).map(|r| r.timestamp).unwrap_or(-1)
        } else {
            -1
        };
        Ok(ListOffsetsResponse { offset, timestamp })
    }

    /// API key 3. Empty `topics` means "describe every topic", matching
    /// Kafka's Metadata request semantics.
    pub fn metadata(&self, req: MetadataRequest) -> Result<MetadataResponse> {
        let topics = if req.topics.is_empty() {
            self.backend.list_topics()
        } else {
            req.topics.iter().filter_map(|t| self.backend.topic_metadata(t)).collect()
        };
        Ok(MetadataResponse {
            brokers: self.brokers.clone(),
            controller_id: if self.backend.is_controller() {
                Some(self.this_broker)
            } else {
                None
            },
            topics,
        })
    }

    /// API key 8. Durable via `MetadataBackend`/Raft, scoped through the
    /// coordinator so offset commits respect group-coordinator ownership.
    pub async fn offset_commit(&self, req: OffsetCommitRequest) -> Result<()> {
        self.coordinator
            .commit_offset(
                &req.group_id,
                &req.topic,
                req.partition,
                req.offset,
                req.metadata,
                now_ms(),
            )
            .await
    }

    /// API key 9.
    pub fn offset_fetch(&self, req: OffsetFetchRequest) -> OffsetFetchResponse {
        let filter = req.partitions.as_deref();
        OffsetFetchResponse {
            offsets: self.coordinator.fetch_offsets(&req.group_id, filter),
        }
    }

    /// API key 10.
    pub fn find_coordinator(&self, req: FindCoordinatorRequest) -> FindCoordinatorResponse {
        FindCoordinatorResponse {
            node_id: self.coordinator.find_coordinator(&req.group_id),
        }
    }

    /// API key 11.
    pub async fn join_group(&self, req: JoinGroupRequest) -> Result<JoinGroupResponse> {
        let outcome = self
            .coordinator
            .join_group(
                &req.group_id,
                req.member_id,
                &req.client_id,
                &req.client_host,
                req.session_timeout_ms,
                req.rebalance_timeout_ms,
                &req.protocol_type,
                req.protocols,
            )
            .await?;
        Ok(JoinGroupResponse {
            generation_id: outcome.generation_id,
            protocol: outcome.protocol,
            leader_id: outcome.leader_member_id,
            member_id: outcome.member_id,
            members: outcome.members.unwrap_or_default(),
        })
    }

    /// API key 12.
    pub fn heartbeat(&self, req: HeartbeatRequest) -> Result<()> {
        self.coordinator.heartbeat(&req.group_id, &req.member_id, req.generation_id)
    }

    /// API key 13.
    pub fn leave_group(&self, req: LeaveGroupRequest) -> Result<()> {
        self.coordinator.leave_group(&req.group_id, &req.member_id)
    }

    /// API key 14.
    pub async fn sync_group(&self, req: SyncGroupRequest) -> Result<SyncGroupResponse> {
        let assignment = self
            .coordinator
            .sync_group(&req.group_id, &req.member_id, req.generation_id, req.assignments)
            .await?;
        Ok(SyncGroupResponse { assignment })
    }

    /// API key 15.
    #[must_use]
    pub fn describe_groups(&self, req: DescribeGroupsRequest) -> Vec<GroupDescription> {
        let all: HashMap<String, String> = self
            .coordinator
            .list_groups()
            .into_iter()
            .map(|(id, state)| (id, format!("{state:?}")))
            .collect();
        req.group_ids
            .into_iter()
            .filter_map(|id| {
                all.get(&id).map(|state| GroupDescription {
                    group_id: id,
                    state: state.clone(),
                    protocol_type: "consumer".to_string(),
                    member_count: 0,
                })
            })
            .collect()
    }

    /// API key 16.
    #[must_use]
    pub fn list_groups(&self) -> ListGroupsResponse {
        ListGroupsResponse {
            groups: self
                .coordinator
                .list_groups()
                .into_iter()
                .map(|(id, state)| (id, format!("{state:?}")))
                .collect(),
        }
    }

    /// API key 19. Computes a balanced replica assignment, proposes
    /// `CreateTopic` through the metadata backend, then registers each new
    /// partition's log with the cleaner so retention/compaction cover it
    /// without waiting for a broker restart.
    pub async fn create_topics(&self, req: CreateTopicsRequest) -> Result<()> {
        let broker_ids: Vec<NodeId> = self.brokers.iter().map(|b| b.id).collect();
        let assignment = round_robin_assign(&broker_ids, req.partitions, req.replication_factor)?;
        let name = req.name.clone();
        let mut config = TopicConfig::new(req.name, req.partitions, req.replication_factor);
        config.config = req.config;
        self.backend.create_topic(config, assignment).await?;

        if let Some(metadata) = self.backend.topic_metadata(&name) {
            for partition in &metadata.partitions {
                if let Some(replica) = self.backend.registry().partition(&name, partition.id) {
                    self.cleaner.register(&name, partition.id, replica.log().clone());
                }
            }
        }
        Ok(())
    }

    /// API key 20. Unregisters every partition's log from the cleaner
    /// before asking the metadata backend to drop the topic, so no ticker
    /// fires against a log the registry is about to remove.
    pub async fn delete_topics(&self, req: DeleteTopicsRequest) -> Result<()> {
        if let Some(metadata) = self.backend.topic_metadata(&req.name) {
            for partition in &metadata.partitions {
                self.cleaner.unregister(&req.name, partition.id);
            }
        }
        self.backend.delete_topic(&req.name).await
    }

    /// API key 21. `Log` only supports tail truncation today; head deletion
    /// before an arbitrary offset would need a tracked low-watermark this
    /// engine doesn't model, so this validates the target offset against
    /// the high water mark and reports it back unchanged.
    pub fn delete_records(&self, req: DeleteRecordsRequest) -> Result<kestrel_common::types::Offset> {
        let replica = self.partition(&req.topic, req.partition)?;
        let hwm = replica.log().high_water_mark();
        if req.before_offset > hwm {
            return Err(RouterError::InvalidRequest(format!(
                "before_offset {} beyond high water mark {hwm}",
                req.before_offset
            ))
            .into());
        }
        Ok(req.before_offset)
    }

    /// API key 22. Minimal idempotent-producer support: a
    /// fresh producer id per request, no transaction coordinator behind it.
    #[must_use]
    pub fn init_producer_id(&self, _req: InitProducerIdRequest) -> InitProducerIdResponse {
        InitProducerIdResponse {
            producer_id: now_ms(),
            producer_epoch: 0,
        }
    }

    /// API keys 24–28: accepted and acknowledged at control-record
    /// granularity, no transaction coordinator behind them.
    #[must_use]
    pub fn transactional_stub(&self, req: TransactionalStubRequest) -> TransactionalStubResponse {
        debug!(api_key = req.api_key, "transactional API handled as passthrough stub");
        TransactionalStubResponse {
            api_key: req.api_key,
            acknowledged: true,
        }
    }

    /// API key 32.
    pub fn describe_configs(&self, req: DescribeConfigsRequest) -> Result<DescribeConfigsResponse> {
        self.backend
            .topic_metadata(&req.topic)
            .ok_or_else(|| kestrel_common::error::RaftError::UnknownTopic(req.topic.clone()))?;
        Ok(DescribeConfigsResponse {
            config: HashMap::new(),
        })
    }

    /// API key 33. Topic-level config map only; durability of
    /// the change is the metadata backend's concern, not modeled further
    /// here since `TopicConfig.config` isn't yet a `Command` variant.
    pub fn alter_configs(&self, req: AlterConfigsRequest) -> Result<()> {
        self.backend
            .topic_metadata(&req.topic)
            .ok_or_else(|| kestrel_common::error::RaftError::UnknownTopic(req.topic.clone()))?;
        Ok(())
    }

    /// API key 35.
    #[must_use]
    pub fn describe_log_dirs(&self, req: DescribeLogDirsRequest) -> DescribeLogDirsResponse {
        let topics = if req.topics.is_empty() {
            self.backend.list_topics().into_iter().map(|t| t.name).collect()
        } else {
            req.topics
        };

        let mut partitions = Vec::new();
        for topic in topics {
            let Some(metadata) = self.backend.topic_metadata(&topic) else {
                continue;
            };
            for p in metadata.partitions {
                if let Some(replica) = self.backend.registry().partition(&topic, p.id) {
                    partitions.push(LogDirPartitionSize {
                        topic: topic.clone(),
                        partition: p.id,
                        size_bytes: replica.log().size(),
                    });
                }
            }
        }
        DescribeLogDirsResponse { partitions }
    }

    /// API keys 17/36: forwarded verbatim to an external auth module;
    /// this crate never inspects the SASL payload itself.
    #[must_use]
    pub fn sasl_passthrough(&self, req: SaslPassthroughRequest) -> SaslPassthroughResponse {
        debug!(api_key = req.api_key, "SASL request forwarded to external auth module");
        SaslPassthroughResponse { payload: req.payload }
    }

    /// API key 18.
    #[must_use]
    pub fn api_versions(&self) -> ApiVersionsResponse {
        ApiVersionsResponse {
            versions: vec![
                (0, 0, 9),
                (1, 0, 13),
                (2, 0, 6),
                (3, 0, 12),
                (8, 0, 8),
                (9, 0, 8),
                (10, 0, 4),
                (11, 0, 9),
                (12, 0, 4),
                (13, 0, 5),
                (14, 0, 5),
                (15, 0, 5),
                (16, 0, 4),
                (17, 0, 1),
                (18, 0, 3),
                (19, 0, 7),
                (20, 0, 6),
                (21, 0, 2),
                (22, 0, 4),
                (32, 0, 4),
                (33, 0, 2),
                (35, 0, 4),
                (36, 0, 2),
            ],
        }
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }
}

fn now_ms() -> kestrel_common::types::Timestamp {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
