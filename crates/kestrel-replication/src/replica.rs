//! `PartitionReplica`: log ownership plus replication state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use kestrel_common::error::{ReplicationError, Result};
use kestrel_common::types::{NodeId, Offset, PartitionId, Record};
use parking_lot::RwLock;
use tracing::{debug, warn};

use kestrel_log::Log;

use crate::waiter::AckWaiters;

/// Tunables this crate needs from `kestrel_common::config::ReplicationConfig`.
#[derive(Debug, Clone, Copy)]
pub struct ReplicaConfig {
    pub replica_lag_time_max_ms: u64,
    pub min_insync_replicas: usize,
}

/// Whether this broker is the leader or a follower for a given replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaRole {
    Leader,
    Follower,
}

struct ReplicaState {
    leader_id: NodeId,
    replicas: Vec<NodeId>,
    isr: Vec<NodeId>,
    leader_epoch: i32,
    follower_leo: HashMap<NodeId, Offset>,
    last_fetch_at: HashMap<NodeId, Instant>,
    hwm: Offset,
}

/// Outcome of a leader-side append.
#[derive(Debug, Clone, Copy)]
pub struct AppendAck {
    pub offset: Offset,
}

/// Outcome of a fetch, whether consumer- or follower-initiated.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub records: Vec<Record>,
    pub high_water_mark: Offset,
}

/// One partition's log plus the replication bookkeeping layered over it.
pub struct PartitionReplica {
    pub topic: String,
    pub partition_id: PartitionId,
    node_id: NodeId,
    log: Arc<Log>,
    state: RwLock<ReplicaState>,
    waiters: AckWaiters,
    config: ReplicaConfig,
}

impl PartitionReplica {
    #[must_use]
    pub fn new(
        topic: impl Into<String>,
        partition_id: PartitionId,
        node_id: NodeId,
        log: Arc<Log>,
        replicas: Vec<NodeId>,
        leader_id: NodeId,
        leader_epoch: i32,
        config: ReplicaConfig,
    ) -> Self {
        let isr = replicas.clone();
        Self {
            topic: topic.into(),
            partition_id,
            node_id,
            log,
            state: RwLock::new(ReplicaState {
                leader_id,
                replicas,
                isr,
                leader_epoch,
                follower_leo: HashMap::new(),
                last_fetch_at: HashMap::new(),
                hwm: 0,
            }),
            waiters: AckWaiters::new(),
            config,
        }
    }

    #[must_use]
    pub fn role(&self) -> ReplicaRole {
        if self.state.read().leader_id == self.node_id {
            ReplicaRole::Leader
        } else {
            ReplicaRole::Follower
        }
    }

    #[must_use]
    pub fn is_leader(&self) -> bool {
        self.role() == ReplicaRole::Leader
    }

    #[must_use]
    pub fn leader_epoch(&self) -> i32 {
        self.state.read().leader_epoch
    }

    #[must_use]
    pub fn leader_id(&self) -> NodeId {
        self.state.read().leader_id
    }

    #[must_use]
    pub fn high_water_mark(&self) -> Offset {
        self.state.read().hwm
    }

    #[must_use]
    pub fn log_end_offset(&self) -> Offset {
        self.log.high_water_mark()
    }

    /// Direct access to the underlying log, for operations the replication
    /// layer itself has no opinion on (timestamp search, size reporting,
    /// explicit truncation) — router calls through this for
    /// `ListOffsets`/`DeleteRecords`/`DescribeLogDirs`.
    #[must_use]
    pub fn log(&self) -> &Arc<Log> {
        &self.log
    }

    #[must_use]
    pub fn isr(&self) -> Vec<NodeId> {
        self.state.read().isr.clone()
    }

    #[must_use]
    pub fn replicas(&self) -> Vec<NodeId> {
        self.state.read().replicas.clone()
    }

    fn fail_if_epoch_stale(&self, request_epoch: Option<i32>) -> Result<()> {
        if let Some(request_epoch) = request_epoch {
            let current = self.state.read().leader_epoch;
            if request_epoch < current {
                return Err(ReplicationError::FencedLeaderEpoch {
                    request_epoch,
                    current_epoch: current,
                }
                .into());
            }
        }
        Ok(())
    }

    /// Leader-side append path. `acks`: 0 = fire-and-forget,
    /// 1 = wait for local append, -1 = wait for HWM to reach the appended
    /// offset (or fail on ISR shrink / timeout).
    pub async fn append(
        &self,
        key: Option<Bytes>,
        value: Option<Bytes>,
        acks: i8,
        timeout: Duration,
        leader_epoch: Option<i32>,
    ) -> Result<AppendAck> {
        if !self.is_leader() {
            return Err(ReplicationError::NotLeaderForPartition {
                topic: self.topic.clone(),
                partition: self.partition_id,
            }
            .into());
        }
        self.fail_if_epoch_stale(leader_epoch)?;

        let offset = self.log.append(key, value)?;
        // The leader's own LEO is one of the inputs to HWM; recompute now so
        // a leader-only ISR (replication factor 1) doesn't wait forever for
        // a follower fetch that will never come.
        self.recompute_hwm();

        match acks {
            0 | 1 => Ok(AppendAck { offset }),
            -1 => {
                self.await_hwm(offset, timeout).await?;
                Ok(AppendAck { offset })
            }
            other => Err(kestrel_common::error::Error::Internal(format!(
                "invalid acks value {other}"
            ))),
        }
    }

    async fn await_hwm(&self, offset: Offset, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;

        loop {
            if self.high_water_mark() >= offset {
                return Ok(());
            }

            let isr_size = self.state.read().isr.len();
            if isr_size < self.config.min_insync_replicas {
                return Err(ReplicationError::NotEnoughReplicas {
                    isr_size,
                    min_insync: self.config.min_insync_replicas,
                }
                .into());
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ReplicationError::NotEnoughReplicasAfterAppend { offset }.into());
            }

            // Register before re-checking the HWM: a `recompute_hwm` that
            // advances past `offset` and notifies between the check above
            // and the registration below must not be lost.
            let waiter = self.waiters.register(offset);
            if self.high_water_mark() >= offset {
                self.waiters.remove(&waiter);
                return Ok(());
            }
            let woke = tokio::time::timeout(remaining, waiter.notified()).await;
            self.waiters.remove(&waiter);
            if woke.is_err() {
                // The timeout and the HWM crossing can race; a final check
                // avoids surfacing a spurious error for data that's already
                // durably committed.
                if self.high_water_mark() >= offset {
                    return Ok(());
                }
                return Err(ReplicationError::NotEnoughReplicasAfterAppend { offset }.into());
            }
        }
    }

    /// Leader-side handling of a follower fetch: acknowledges the bytes the
    /// follower already holds, then recomputes ISR and HWM.
    pub fn follower_fetch(
        &self,
        replica_id: NodeId,
        fetch_offset: Offset,
        max_bytes: usize,
    ) -> Result<FetchResult> {
        {
            let mut state = self.state.write();
            let prior_leo = state.follower_leo.get(&replica_id).copied().unwrap_or(0);
            if fetch_offset == prior_leo || !state.follower_leo.contains_key(&replica_id) {
                state.follower_leo.insert(replica_id, fetch_offset);
                state.last_fetch_at.insert(replica_id, Instant::now());
            }
        }

        self.recompute_isr();
        self.recompute_hwm();

        let records = if fetch_offset >= self.log.high_water_mark() {
            Vec::new()
        } else {
            self.log.read_range(fetch_offset, max_bytes)?
        };

        Ok(FetchResult {
            records,
            high_water_mark: self.high_water_mark(),
        })
    }

    /// Consumer-fetch path: bounded to HWM; past-HWM reads return empty,
    /// never an error.
    pub fn consumer_fetch(&self, offset: Offset, max_bytes: usize) -> Result<FetchResult> {
        let hwm = self.high_water_mark();
        let records = if offset >= hwm {
            Vec::new()
        } else {
            self.log.read_range(offset, max_bytes)?
        };
        Ok(FetchResult {
            records,
            high_water_mark: hwm,
        })
    }

    /// Recomputes ISR membership from follower LEO lag. Returns `Some(new_isr)`
    /// when membership changed, so the caller can propose `SetISR` via Raft.
    pub fn recompute_isr(&self) -> Option<Vec<NodeId>> {
        let mut state = self.state.write();
        let leader_leo = self.log.high_water_mark();
        let now = Instant::now();
        let lag_max = Duration::from_millis(self.config.replica_lag_time_max_ms);

        let mut new_isr = vec![state.leader_id];
        for &replica_id in &state.replicas {
            if replica_id == state.leader_id {
                continue;
            }
            let follower_leo = state.follower_leo.get(&replica_id).copied().unwrap_or(0);
            let last_fetch = state.last_fetch_at.get(&replica_id).copied();
            let in_sync = leader_leo.saturating_sub(follower_leo) <= 1
                && last_fetch.is_some_and(|t| now.duration_since(t) <= lag_max);
            if in_sync {
                new_isr.push(replica_id);
            }
        }
        new_isr.sort_unstable();

        if new_isr != state.isr {
            let shrunk = new_isr.len() < state.isr.len();
            debug!(
                topic = %self.topic,
                partition = self.partition_id,
                old = ?state.isr,
                new = ?new_isr,
                "ISR changed"
            );
            state.isr = new_isr.clone();
            drop(state);
            if shrunk {
                self.waiters.notify_isr_changed();
            }
            Some(new_isr)
        } else {
            None
        }
    }

    fn recompute_hwm(&self) {
        let mut state = self.state.write();
        let isr_leos: Vec<Offset> = state
            .isr
            .iter()
            .map(|&r| {
                if r == state.leader_id {
                    self.log.high_water_mark()
                } else {
                    state.follower_leo.get(&r).copied().unwrap_or(0)
                }
            })
            .collect();
        let new_hwm = isr_leos.into_iter().min().unwrap_or(0);
        if new_hwm > state.hwm {
            state.hwm = new_hwm;
            drop(state);
            self.waiters.notify_hwm_advanced(new_hwm);
        } else if new_hwm < state.hwm {
            warn!(
                topic = %self.topic,
                partition = self.partition_id,
                "computed HWM {} below current {}, ignoring",
                new_hwm,
                state.hwm
            );
        }
    }

    /// Applied by the Raft FSM after a committed `SetReplicas` command.
    pub fn set_replicas(&self, replicas: Vec<NodeId>, leader_id: NodeId, leader_epoch: i32) {
        let mut state = self.state.write();
        state.replicas = replicas;
        state.leader_id = leader_id;
        state.leader_epoch = leader_epoch;
    }

    /// Applied by the Raft FSM after a committed `SetISR` command.
    pub fn set_isr(&self, isr: Vec<NodeId>, leader_epoch: i32) {
        let mut state = self.state.write();
        state.isr = isr;
        state.leader_epoch = leader_epoch;
        drop(state);
        self.recompute_hwm();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ReplicaConfig {
        ReplicaConfig {
            replica_lag_time_max_ms: 10_000,
            min_insync_replicas: 1,
        }
    }

    fn open_log(dir: &std::path::Path) -> Arc<Log> {
        Arc::new(
            Log::open(
                dir,
                0,
                1024 * 1024,
                kestrel_log::FlushPolicy {
                    every_records: 1,
                    every_ms: 1000,
                },
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn single_replica_acks_all_succeeds_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let log = open_log(dir.path());
        let replica = PartitionReplica::new("t", 0, 1, log, vec![1], 1, 0, config());

        // Leader alone is always in ISR; HWM tracks LEO once recomputed.
        replica.recompute_isr();
        let ack = replica
            .append(
                Some(Bytes::from_static(b"k")),
                Some(Bytes::from_static(b"v")),
                -1,
                Duration::from_millis(500),
                None,
            )
            .await
            .unwrap();
        assert_eq!(ack.offset, 0);
        assert_eq!(replica.high_water_mark(), 1);
    }

    #[tokio::test]
    async fn not_enough_replicas_when_isr_below_min_insync() {
        let dir = tempfile::tempdir().unwrap();
        let log = open_log(dir.path());
        let cfg = ReplicaConfig {
            replica_lag_time_max_ms: 10_000,
            min_insync_replicas: 2,
        };
        let replica = PartitionReplica::new("t", 0, 1, log, vec![1, 2], 1, 0, cfg);
        replica.recompute_isr(); // replica 2 never fetched -> isr = [1]

        let result = replica
            .append(
                Some(Bytes::from_static(b"k")),
                Some(Bytes::from_static(b"v")),
                -1,
                Duration::from_millis(100),
                None,
            )
            .await;
        assert!(matches!(
            result,
            Err(kestrel_common::error::Error::Replication(
                ReplicationError::NotEnoughReplicas { .. }
            ))
        ));
    }

    #[tokio::test]
    async fn concurrent_follower_fetch_satisfies_pending_ack_wait() {
        let dir = tempfile::tempdir().unwrap();
        let log = open_log(dir.path());
        let cfg = ReplicaConfig {
            replica_lag_time_max_ms: 10_000,
            min_insync_replicas: 2,
        };
        let replica = Arc::new(PartitionReplica::new("t", 0, 1, log, vec![1, 2], 1, 0, cfg));

        // First record's offset (0) is trivially satisfied by the initial
        // HWM, so append it with acks=1 to set up a second record whose
        // commit genuinely depends on a concurrent follower fetch.
        replica
            .append(None, Some(Bytes::from_static(b"1")), 1, Duration::from_millis(500), None)
            .await
            .unwrap();

        let follower = replica.clone();
        let driver = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            // Follower reports LEO 2: it has both records, advancing HWM
            // past offset 1 and waking whoever is blocked on it.
            follower.follower_fetch(2, 2, 1024).unwrap();
        });

        let ack = replica
            .append(None, Some(Bytes::from_static(b"2")), -1, Duration::from_millis(500), None)
            .await
            .unwrap();
        assert_eq!(ack.offset, 1);
        assert_eq!(replica.high_water_mark(), 2);
        driver.await.unwrap();
    }

    #[test]
    fn follower_catching_up_joins_isr_and_advances_hwm() {
        let dir = tempfile::tempdir().unwrap();
        let log = open_log(dir.path());
        log.append(None, Some(Bytes::from_static(b"1"))).unwrap();
        let replica = PartitionReplica::new("t", 0, 1, log, vec![1, 2], 1, 0, config());
        replica.recompute_isr();

        let result = replica.follower_fetch(2, 0, 1024).unwrap();
        assert!(replica.isr().contains(&2));
        assert_eq!(result.high_water_mark, replica.high_water_mark());
    }
}
