//! Consumer-group coordinator: `findCoordinator`,
//! `joinGroup`/`syncGroup`/`heartbeat`/`leaveGroup`, and offset
//! commit/fetch/reset/delete, all forwarding durable writes through
//! [`kestrel_raft::MetadataBackend`] so a group's committed offsets survive
//! a broker restart the same way topic metadata does.

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod group;

pub use group::{Group, GroupState, JoinOutcome, Member};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use kestrel_common::error::{CoordinatorError, Result};
use kestrel_common::types::{NodeId, Offset, PartitionId, Timestamp};
use kestrel_raft::MetadataBackend;
use tokio::time::timeout;

/// Tunables that would live in `KestrelConfig` proper once consumer-group
/// behaviour grows config knobs of its own.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub min_session_timeout_ms: u64,
    pub max_session_timeout_ms: u64,
    pub dead_group_retention: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            min_session_timeout_ms: 6_000,
            max_session_timeout_ms: 300_000,
            dead_group_retention: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

/// Owns every consumer group this broker coordinates. One
/// `Arc<parking_lot::RwLock<Group>>` per group behind a `DashMap`, so
/// concurrent operations on different groups never contend.
pub struct Coordinator {
    groups: DashMap<String, Arc<parking_lot::RwLock<Group>>>,
    brokers: Vec<NodeId>,
    this_broker: NodeId,
    backend: Arc<dyn MetadataBackend>,
    config: CoordinatorConfig,
}

impl Coordinator {
    #[must_use]
    pub fn new(
        this_broker: NodeId,
        brokers: Vec<NodeId>,
        backend: Arc<dyn MetadataBackend>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            groups: DashMap::new(),
            brokers,
            this_broker,
            backend,
            config,
        }
    }

    fn group_handle(&self, group_id: &str) -> Arc<parking_lot::RwLock<Group>> {
        self.groups
            .entry(group_id.to_string())
            .or_insert_with(|| Arc::new(parking_lot::RwLock::new(Group::new(group_id))))
            .clone()
    }

    /// `findCoordinator(groupId)`: deterministic hash of the
    /// group id onto the broker list, the same shape as partition
    /// assignment's use of a stable hash rather than random placement.
    #[must_use]
    pub fn find_coordinator(&self, group_id: &str) -> NodeId {
        if self.brokers.is_empty() {
            return self.this_broker;
        }
        let hash = xxhash_rust::xxh3::xxh3_64(group_id.as_bytes());
        let idx = (hash as usize) % self.brokers.len();
        self.brokers[idx]
    }

    #[must_use]
    pub fn is_coordinator_for(&self, group_id: &str) -> bool {
        self.find_coordinator(group_id) == self.this_broker
    }

    fn require_coordinator(&self, group_id: &str) -> Result<()> {
        if self.is_coordinator_for(group_id) {
            Ok(())
        } else {
            Err(CoordinatorError::NotCoordinator(group_id.to_string()).into())
        }
    }

    /// `joinGroup`. Blocks (up to `rebalance_timeout_ms`)
    /// until the rebalance this call joined completes, returning the
    /// assigned generation, this member's id, the group leader, and —
    /// only for the elected leader — every member's protocol metadata so
    /// the leader can compute assignments for the follow-up `syncGroup`.
    #[allow(clippy::too_many_arguments)]
    pub async fn join_group(
        &self,
        group_id: &str,
        member_id: Option<String>,
        client_id: &str,
        client_host: &str,
        session_timeout_ms: u64,
        rebalance_timeout_ms: u64,
        protocol_type: &str,
        protocols: Vec<(String, Vec<u8>)>,
    ) -> Result<JoinOutcome> {
        self.require_coordinator(group_id)?;
        let session_timeout_ms = session_timeout_ms
            .clamp(self.config.min_session_timeout_ms, self.config.max_session_timeout_ms);

        let handle = self.group_handle(group_id);
        let assigned_id = {
            let mut group = handle.write();
            let now = Instant::now();
            let id = group.begin_join(
                member_id,
                client_id,
                client_host,
                session_timeout_ms,
                rebalance_timeout_ms,
                protocol_type,
                protocols,
                now,
            );
            if group.rebalance_ready(now) {
                group.complete_rebalance();
            }
            id
        };

        self.wait_for_rebalance(&handle, rebalance_timeout_ms).await;

        let group = handle.read();
        Ok(group.join_outcome(&assigned_id))
    }

    /// Waits for `Group::complete_rebalance`'s notify, re-checking
    /// readiness on each wake since `Notify` coalesces wakeups and another
    /// member's `leaveGroup`/`begin_join` may have re-armed the round.
    async fn wait_for_rebalance(&self, handle: &Arc<parking_lot::RwLock<Group>>, rebalance_timeout_ms: u64) {
        let deadline = Duration::from_millis(rebalance_timeout_ms.max(1));
        let wait = async {
            loop {
                let (ready, notified) = {
                    let group = handle.read();
                    let ready = group.state != GroupState::PreparingRebalance;
                    (ready, group.notify.notified())
                };
                if ready {
                    return;
                }
                notified.await;
            }
        };
        let _ = timeout(deadline, wait).await;

        let mut group = handle.write();
        if group.rebalance_ready(Instant::now()) {
            group.complete_rebalance();
        }
    }

    /// `syncGroup`: the leader supplies `assignments` for
    /// every member id; followers call with `assignments = None` and block
    /// until the leader's call lands, then read back their own assignment.
    pub async fn sync_group(
        &self,
        group_id: &str,
        member_id: &str,
        generation_id: i32,
        assignments: Option<HashMap<String, Vec<u8>>>,
    ) -> Result<Vec<u8>> {
        self.require_coordinator(group_id)?;
        let handle = self.group_handle(group_id);

        if let Some(assignments) = assignments {
            let mut group = handle.write();
            group.sync(member_id, generation_id, Some(assignments))?;
        } else {
            let wait = async {
                loop {
                    let (ready, notified) = {
                        let group = handle.read();
                        (group.state == GroupState::Stable, group.notify.notified())
                    };
                    if ready {
                        return;
                    }
                    notified.await;
                }
            };
            let _ = timeout(Duration::from_secs(60), wait).await;
            let group = handle.read();
            if group.generation_id != generation_id {
                return Err(CoordinatorError::IllegalGeneration {
                    request: generation_id,
                    current: group.generation_id,
                }
                .into());
            }
        }

        let group = handle.read();
        Ok(group.assignment_for(member_id).unwrap_or_default())
    }

    /// `heartbeat`.
    pub fn heartbeat(&self, group_id: &str, member_id: &str, generation_id: i32) -> Result<()> {
        self.require_coordinator(group_id)?;
        let handle = self.group_handle(group_id);
        let mut group = handle.write();
        group.heartbeat(member_id, generation_id, Instant::now())
    }

    /// `leaveGroup`.
    pub fn leave_group(&self, group_id: &str, member_id: &str) -> Result<()> {
        self.require_coordinator(group_id)?;
        let handle = self.group_handle(group_id);
        handle.write().leave(member_id, Instant::now());
        Ok(())
    }

    /// `commitOffset`: durable via the metadata backend, so
    /// it survives a leader change the same way topic metadata does.
    pub async fn commit_offset(
        &self,
        group_id: &str,
        topic: &str,
        partition: PartitionId,
        offset: Offset,
        metadata: String,
        commit_timestamp: Timestamp,
    ) -> Result<()> {
        self.require_coordinator(group_id)?;
        self.backend
            .commit_offset(group_id, topic, partition, offset, metadata, commit_timestamp)
            .await
    }

    /// `fetchOffset`: local read, no consensus round-trip.
    #[must_use]
    pub fn fetch_offsets(
        &self,
        group_id: &str,
        filter: Option<&[(String, PartitionId)]>,
    ) -> Vec<(String, PartitionId, Offset, String)> {
        self.backend.fetch_offsets(group_id, filter)
    }

    /// `resetOffsets`: only permitted while the group has
    /// no active generation (`Empty` or `Dead`), matching Kafka's
    /// `offsets.topic` reset semantics.
    pub fn reset_offsets(&self, group_id: &str, offsets: &[(String, PartitionId, Offset)]) -> Result<()> {
        self.require_coordinator(group_id)?;
        if let Some(handle) = self.groups.get(group_id) {
            let state = handle.read().state;
            if state != GroupState::Empty && state != GroupState::Dead {
                return Err(CoordinatorError::CannotResetWhileActive(group_id.to_string()).into());
            }
        }
        self.backend.reset_offsets(group_id, offsets);
        Ok(())
    }

    /// `canDeleteGroup`: a group may be deleted once it has
    /// no members and is `Empty`/`Dead`.
    #[must_use]
    pub fn can_delete_group(&self, group_id: &str) -> (bool, Option<String>) {
        match self.groups.get(group_id) {
            Some(handle) => handle.read().can_delete(),
            None => (true, None),
        }
    }

    /// `deleteGroupOffsets`: admin operation, bypasses the
    /// active-group guard `resetOffsets` enforces.
    pub fn delete_group_offsets(&self, group_id: &str) {
        self.backend.delete_group_offsets(group_id);
    }

    /// `forceDeleteGroup`: removes the group's in-memory
    /// state and its committed offsets regardless of lifecycle state —
    /// an administrative override, not a client-facing API.
    pub fn force_delete_group(&self, group_id: &str) {
        self.groups.remove(group_id);
        self.backend.delete_group_offsets(group_id);
    }

    /// Periodic sweep a background task drives (the coordinator analogue
    /// of the cleaner's retention/compaction tickers): evicts members past
    /// their session timeout and promotes `Empty` groups to `Dead` once
    /// they've been idle past the retention window.
    pub fn sweep(&self) {
        let now = Instant::now();
        for entry in &self.groups {
            let mut group = entry.value().write();
            if group.evict_expired(now) && group.rebalance_ready(now) {
                group.complete_rebalance();
            }
            group.mark_dead_if_idle(now, self.config.dead_group_retention);
        }
    }

    #[must_use]
    pub fn list_groups(&self) -> Vec<(String, GroupState)> {
        self.groups.iter().map(|e| (e.key().clone(), e.value().read().state)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_log::FlushPolicy;
    use kestrel_raft::{Direct, Registry, RegistryConfig};
    use kestrel_replication::ReplicaConfig;
    use tempfile::tempdir;

    fn make_coordinator() -> Coordinator {
        let dir = tempdir().unwrap();
        let registry = Registry::new(RegistryConfig {
            data_dir: dir.path().to_path_buf(),
            broker_id: 0,
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
        let backend: Arc<dyn MetadataBackend> = Arc::new(Direct::new(registry));
        std::mem::forget(dir);
        Coordinator::new(0, vec![0], backend, CoordinatorConfig::default())
    }

    #[test]
    fn find_coordinator_is_deterministic() {
        let coordinator = make_coordinator();
        let first = coordinator.find_coordinator("my-group");
        let second = coordinator.find_coordinator("my-group");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn single_member_join_reaches_stable_after_sync() {
        let coordinator = make_coordinator();
        let outcome = coordinator
            .join_group(
                "g",
                None,
                "client-a",
                "127.0.0.1",
                10_000,
                30_000,
                "consumer",
                vec![("range".to_string(), vec![])],
            )
            .await
            .unwrap();
        assert_eq!(outcome.generation_id, 1);
        assert_eq!(outcome.leader_member_id, outcome.member_id);

        let mut assignments = HashMap::new();
        assignments.insert(outcome.member_id.clone(), vec![9, 9]);
        let assignment = coordinator
            .sync_group("g", &outcome.member_id, outcome.generation_id, Some(assignments))
            .await
            .unwrap();
        assert_eq!(assignment, vec![9, 9]);
    }

    #[tokio::test]
    async fn heartbeat_on_unknown_member_fails() {
        let coordinator = make_coordinator();
        let result = coordinator.heartbeat("g", "ghost", 1);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn reset_offsets_rejected_while_group_active() {
        let coordinator = make_coordinator();
        coordinator
            .join_group("g", None, "c", "h", 10_000, 30_000, "consumer", vec![])
            .await
            .unwrap();

        let result = coordinator.reset_offsets("g", &[("t".to_string(), 0, 0)]);
        assert!(matches!(
            result,
            Err(kestrel_common::error::Error::Coordinator(
                CoordinatorError::CannotResetWhileActive(_)
            ))
        ));
    }

    #[tokio::test]
    async fn reset_offsets_succeeds_on_empty_group_and_is_visible_to_fetch() {
        let coordinator = make_coordinator();
        coordinator.reset_offsets("g", &[("t".to_string(), 0, 50)]).unwrap();

        let offsets = coordinator.fetch_offsets("g", None);
        assert_eq!(offsets, vec![("t".to_string(), 0, 50, String::new())]);
    }
}
