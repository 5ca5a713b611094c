//! Per-group state machine.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use kestrel_common::error::{CoordinatorError, Result};
use tokio::sync::Notify;

/// The five group states, modeled as a sum-type enum rather than a class
/// hierarchy so transition matches are exhaustive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupState {
    Empty,
    PreparingRebalance,
    CompletingRebalance,
    Stable,
    Dead,
}

/// A single group member.
#[derive(Debug, Clone)]
pub struct Member {
    pub member_id: String,
    pub client_id: String,
    pub client_host: String,
    pub session_timeout_ms: u64,
    pub rebalance_timeout_ms: u64,
    pub supported_protocols: Vec<(String, Vec<u8>)>,
    pub assignment: Vec<u8>,
    pub last_heartbeat_at: Instant,
}

impl Member {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.last_heartbeat_at) > Duration::from_millis(self.session_timeout_ms)
    }
}

/// One consumer group's full state.
pub struct Group {
    pub group_id: String,
    pub state: GroupState,
    pub protocol_type: String,
    pub protocol: String,
    pub generation_id: i32,
    pub leader_member_id: Option<String>,
    pub members: HashMap<String, Member>,
    /// Members that have (re)joined in the current generation's rebalance
    /// round — used to decide "all known members rejoined".
    joined_this_round: HashSet<String>,
    rebalance_deadline: Option<Instant>,
    pub(crate) notify: Notify,
    dead_since: Option<Instant>,
}

/// Outcome of a successful `joinGroup`.
pub struct JoinOutcome {
    pub member_id: String,
    pub generation_id: i32,
    pub leader_member_id: String,
    pub protocol: String,
    /// Populated only for the member elected leader: `(memberId,
    /// protocolMetadata)` for every member, so the leader can compute
    /// assignments in its subsequent `SyncGroup`.
    pub members: Option<Vec<(String, Vec<u8>)>>,
}

impl Group {
    #[must_use]
    pub fn new(group_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            state: GroupState::Empty,
            protocol_type: String::new(),
            protocol: String::new(),
            generation_id: 0,
            leader_member_id: None,
            members: HashMap::new(),
            joined_this_round: HashSet::new(),
            rebalance_deadline: None,
            notify: Notify::new(),
            dead_since: None,
        }
    }

    #[must_use]
    pub fn is_empty_of_members(&self) -> bool {
        self.members.is_empty()
    }

    /// Register (or refresh) a member and move the group into
    /// `PreparingRebalance`, per the `Empty`/`Stable -> PreparingRebalance`
    /// rows of table. Returns the assigned `member_id` (newly
    /// allocated if the caller passed none) and whether this member is the
    /// round's provisional leader (the first member, or re-elected if the
    /// prior leader left).
    pub fn begin_join(
        &mut self,
        member_id: Option<String>,
        client_id: &str,
        client_host: &str,
        session_timeout_ms: u64,
        rebalance_timeout_ms: u64,
        protocol_type: &str,
        protocols: Vec<(String, Vec<u8>)>,
        now: Instant,
    ) -> String {
        let member_id = member_id.unwrap_or_else(|| format!("{client_id}-{}", uuid_like(now)));

        self.members.insert(
            member_id.clone(),
            Member {
                member_id: member_id.clone(),
                client_id: client_id.to_string(),
                client_host: client_host.to_string(),
                session_timeout_ms,
                rebalance_timeout_ms,
                supported_protocols: protocols,
                assignment: Vec::new(),
                last_heartbeat_at: now,
            },
        );

        if self.state == GroupState::Stable || self.state == GroupState::Empty {
            self.protocol_type = protocol_type.to_string();
            self.joined_this_round.clear();
            self.state = GroupState::PreparingRebalance;
            self.generation_id += 1;
            self.rebalance_deadline = Some(now + Duration::from_millis(rebalance_timeout_ms));
        }
        self.joined_this_round.insert(member_id.clone());

        self.leader_member_id.get_or_insert(member_id.clone());

        member_id
    }

    /// True once every currently-known member has rejoined this round, or
    /// the rebalance timeout has elapsed.
    #[must_use]
    pub fn rebalance_ready(&self, now: Instant) -> bool {
        if self.state != GroupState::PreparingRebalance {
            return true;
        }
        let all_rejoined = self.members.keys().all(|id| self.joined_this_round.contains(id));
        let timed_out = self.rebalance_deadline.is_some_and(|d| now >= d);
        all_rejoined || timed_out
    }

    /// Moves `PreparingRebalance -> CompletingRebalance` once
    /// [`rebalance_ready`] is true, electing the leader (oldest surviving
    /// member, i.e. the current leader if still present, else an arbitrary
    /// remaining member), settling on the common protocol name every member
    /// supports, and notifying every blocked `joinGroup` caller.
    pub fn complete_rebalance(&mut self) {
        if self.state != GroupState::PreparingRebalance {
            return;
        }
        if self.leader_member_id.as_ref().is_none_or(|l| !self.members.contains_key(l)) {
            self.leader_member_id = self.members.keys().next().cloned();
        }
        self.protocol = self.select_protocol();
        self.state = GroupState::CompletingRebalance;
        self.notify.notify_waiters();
    }

    /// Picks the protocol name every current member supports, preferring
    /// the leader's own priority order (the way Kafka's `GroupMetadata`
    /// picks a protocol: the first name, in the leader's preference order,
    /// that every member's supported-protocols list also contains).
    fn select_protocol(&self) -> String {
        let Some(leader) = self.leader_member_id.as_ref().and_then(|id| self.members.get(id)) else {
            return String::new();
        };
        leader
            .supported_protocols
            .iter()
            .map(|(name, _)| name)
            .find(|name| {
                self.members
                    .values()
                    .all(|m| m.supported_protocols.iter().any(|(n, _)| n == *name))
            })
            .cloned()
            .unwrap_or_default()
    }

    pub fn join_outcome(&self, member_id: &str) -> JoinOutcome {
        let all_members = if self.leader_member_id.as_deref() == Some(member_id) {
            Some(
                self.members
                    .values()
                    .map(|m| {
                        let metadata = m
                            .supported_protocols
                            .iter()
                            .find(|(name, _)| *name == self.protocol)
                            .map(|(_, bytes)| bytes.clone())
                            .unwrap_or_default();
                        (m.member_id.clone(), metadata)
                    })
                    .collect(),
            )
        } else {
            None
        };

        JoinOutcome {
            member_id: member_id.to_string(),
            generation_id: self.generation_id,
            leader_member_id: self.leader_member_id.clone().unwrap_or_default(),
            protocol: self.protocol.clone(),
            members: all_members,
        }
    }

    /// `syncGroup`: the leader supplies `assignments` for
    /// every member; followers block until the leader's call lands. Moves
    /// `CompletingRebalance -> Stable`.
    pub fn sync(
        &mut self,
        member_id: &str,
        generation_id: i32,
        assignments: Option<HashMap<String, Vec<u8>>>,
    ) -> Result<()> {
        if generation_id != self.generation_id {
            return Err(CoordinatorError::IllegalGeneration {
                request: generation_id,
                current: self.generation_id,
            }
            .into());
        }
        if !self.members.contains_key(member_id) {
            return Err(CoordinatorError::UnknownMemberId(member_id.to_string()).into());
        }

        if let Some(assignments) = assignments {
            for (id, bytes) in assignments {
                if let Some(member) = self.members.get_mut(&id) {
                    member.assignment = bytes;
                }
            }
            self.state = GroupState::Stable;
            self.notify.notify_waiters();
        }
        Ok(())
    }

    #[must_use]
    pub fn assignment_for(&self, member_id: &str) -> Option<Vec<u8>> {
        self.members.get(member_id).map(|m| m.assignment.clone())
    }

    /// `heartbeat`: refreshes the member's liveness; returns
    /// `RebalanceInProgress` if the group has left `Stable` so the client
    /// knows to rejoin.
    pub fn heartbeat(&mut self, member_id: &str, generation_id: i32, now: Instant) -> Result<()> {
        let Some(member) = self.members.get_mut(member_id) else {
            return Err(CoordinatorError::UnknownMemberId(member_id.to_string()).into());
        };
        if generation_id != self.generation_id {
            return Err(CoordinatorError::IllegalGeneration {
                request: generation_id,
                current: self.generation_id,
            }
            .into());
        }
        member.last_heartbeat_at = now;
        if self.state != GroupState::Stable {
            return Err(CoordinatorError::RebalanceInProgress(self.group_id.clone()).into());
        }
        Ok(())
    }

    /// `leaveGroup`: removes the member; `Stable ->
    /// PreparingRebalance` if members remain, else `Empty`.
    pub fn leave(&mut self, member_id: &str, now: Instant) {
        self.members.remove(member_id);
        self.joined_this_round.remove(member_id);
        if self.leader_member_id.as_deref() == Some(member_id) {
            self.leader_member_id = self.members.keys().next().cloned();
        }

        if self.members.is_empty() {
            self.state = GroupState::Empty;
            self.dead_since = None;
        } else {
            self.state = GroupState::PreparingRebalance;
            self.generation_id += 1;
            self.joined_this_round.clear();
            self.rebalance_deadline = Some(now + Duration::from_millis(10_000));
        }
        self.notify.notify_waiters();
    }

    /// Evicts members whose session has expired. Returns
    /// true if eviction changed group membership.
    pub fn evict_expired(&mut self, now: Instant) -> bool {
        let expired: Vec<String> = self
            .members
            .values()
            .filter(|m| m.is_expired(now))
            .map(|m| m.member_id.clone())
            .collect();
        for id in &expired {
            self.leave(id, now);
        }
        !expired.is_empty()
    }

    /// `any -> Dead` once the group has had no members for the retention
    /// window.
    pub fn mark_dead_if_idle(&mut self, now: Instant, retention: Duration) -> bool {
        if self.state == GroupState::Empty {
            let since = *self.dead_since.get_or_insert(now);
            if now.duration_since(since) >= retention {
                self.state = GroupState::Dead;
                return true;
            }
        }
        false
    }

    #[must_use]
    pub fn can_delete(&self) -> (bool, Option<String>) {
        if self.state == GroupState::Dead {
            return (true, None);
        }
        if !self.members.is_empty() {
            return (false, Some("group has active members".to_string()));
        }
        if self.state != GroupState::Empty {
            return (false, Some(format!("group is in state {:?}", self.state)));
        }
        (true, None)
    }
}

/// Cheap per-process-unique suffix for auto-allocated member ids; does not
/// need global uniqueness guarantees beyond "distinct within this group".
fn uuid_like(now: Instant) -> u64 {
    let ptr = std::ptr::addr_of!(now) as u64;
    ptr.wrapping_add(now.elapsed().as_nanos() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_join_triggers_preparing_rebalance() {
        let mut group = Group::new("g");
        let now = Instant::now();
        let id = group.begin_join(None, "client", "host", 10_000, 30_000, "consumer", vec![], now);
        assert_eq!(group.state, GroupState::PreparingRebalance);
        assert_eq!(group.leader_member_id.as_deref(), Some(id.as_str()));
        assert_eq!(group.generation_id, 1);
    }

    #[test]
    fn rebalance_ready_once_all_members_rejoin() {
        let mut group = Group::new("g");
        let now = Instant::now();
        let m1 = group.begin_join(None, "c1", "h", 10_000, 30_000, "consumer", vec![], now);
        let m2 = group.begin_join(None, "c2", "h", 10_000, 30_000, "consumer", vec![], now);
        // Both rejoined within the same round already, so the group is
        // immediately ready with no timeout needed.
        assert!(group.rebalance_ready(now));
        group.complete_rebalance();

        let mut assignments = HashMap::new();
        assignments.insert(m1.clone(), vec![1, 2, 3]);
        assignments.insert(m2.clone(), vec![4, 5]);
        group.sync(&m1, 1, Some(assignments)).unwrap();
        assert_eq!(group.state, GroupState::Stable);

        // A third member joining kicks the group back into
        // PreparingRebalance with m1/m2 now "not yet rejoined" this round,
        // so readiness must wait for them (or the timeout).
        let m3 = group.begin_join(None, "c3", "h", 10_000, 30_000, "consumer", vec![], now);
        assert_eq!(group.state, GroupState::PreparingRebalance);
        assert!(!group.rebalance_ready(now));

        group.begin_join(Some(m1), "c1", "h", 10_000, 30_000, "consumer", vec![], now);
        group.begin_join(Some(m2), "c2", "h", 10_000, 30_000, "consumer", vec![], now);
        assert!(group.rebalance_ready(now));
        let _ = m3;
    }

    #[test]
    fn stale_generation_sync_fails() {
        let mut group = Group::new("g");
        let now = Instant::now();
        let m1 = group.begin_join(None, "c1", "h", 10_000, 30_000, "consumer", vec![], now);
        group.complete_rebalance();

        let result = group.sync(&m1, 99, Some(HashMap::new()));
        assert!(matches!(
            result,
            Err(kestrel_common::error::Error::Coordinator(
                CoordinatorError::IllegalGeneration { .. }
            ))
        ));
    }

    #[test]
    fn leave_last_member_empties_group() {
        let mut group = Group::new("g");
        let now = Instant::now();
        let m1 = group.begin_join(None, "c1", "h", 10_000, 30_000, "consumer", vec![], now);
        group.leave(&m1, now);
        assert_eq!(group.state, GroupState::Empty);
    }

    #[test]
    fn common_protocol_picked_from_leaders_preference_order() {
        let mut group = Group::new("g");
        let now = Instant::now();
        let protocols = vec![("range".to_string(), vec![]), ("roundrobin".to_string(), vec![])];
        let m1 = group.begin_join(None, "c1", "h", 10_000, 30_000, "consumer", protocols.clone(), now);
        group.begin_join(None, "c2", "h", 10_000, 30_000, "consumer", protocols, now);
        assert_eq!(group.leader_member_id.as_deref(), Some(m1.as_str()));

        group.complete_rebalance();
        assert_eq!(group.protocol, "range");
    }

    #[test]
    fn member_leaving_triggers_rebalance_and_reassigns_remaining_partitions() {
        // Two members join, the leader assigns partitions range-style, one
        // member leaves, and the survivor ends up owning every partition
        // under a fresh generation.
        let mut group = Group::new("g");
        let now = Instant::now();
        let m1 = group.begin_join(None, "c1", "h", 10_000, 30_000, "consumer", vec![], now);
        let m2 = group.begin_join(None, "c2", "h", 10_000, 30_000, "consumer", vec![], now);
        assert!(group.rebalance_ready(now));
        group.complete_rebalance();

        let mut assignments = HashMap::new();
        assignments.insert(m1.clone(), vec![0, 1]);
        assignments.insert(m2.clone(), vec![2, 3]);
        group.sync(&m1, 1, Some(assignments)).unwrap();
        assert_eq!(group.state, GroupState::Stable);
        let first_generation = group.generation_id;

        group.leave(&m1, now);
        assert_eq!(group.state, GroupState::PreparingRebalance);
        assert!(group.rebalance_ready(now));
        group.complete_rebalance();

        let mut reassignment = HashMap::new();
        reassignment.insert(m2.clone(), vec![0, 1, 2, 3]);
        group.sync(&m2, group.generation_id, Some(reassignment)).unwrap();

        assert_eq!(group.state, GroupState::Stable);
        assert_eq!(group.generation_id, first_generation + 1);
        assert_eq!(group.assignment_for(&m2), Some(vec![0, 1, 2, 3]));
        assert!(!group.members.contains_key(&m1));
    }
}
