//! `RaftNode`: the black-box consensus surface —
//! `propose`/apply/snapshot/restore plus leadership queries — built around
//! a term/vote/commit-index log that can track a real multi-node term and
//! commit index, even though the replication transport that would carry
//! `AppendEntries`/`RequestVote` between brokers is an external network
//! layer this crate doesn't own. A deployed cluster wires that transport
//! to call `advance_commit_index` as acks arrive; single-node/test
//! configurations commit locally and immediately.

use std::sync::Arc;

use kestrel_common::error::{RaftError, Result};
use kestrel_common::types::{LogIndex, NodeId, Term};
use parking_lot::RwLock;
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::command::Command;

/// The deterministic state-transition target a `RaftNode` drives. Apply
/// must be a pure function of `(command, prior state)` — no side effects
/// that aren't reproducible from the command stream alone.
pub trait RaftFsm: Send + Sync {
    fn apply(&self, command: &Command) -> Result<()>;
    fn snapshot(&self) -> Vec<u8>;
    fn restore(&self, bytes: &[u8]) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Follower,
    Candidate,
    Leader,
}

struct LogEntry {
    term: Term,
    index: LogIndex,
    command: Command,
}

struct NodeState {
    current_term: Term,
    role: Role,
    voted_for: Option<NodeId>,
    leader_id: Option<NodeId>,
    commit_index: LogIndex,
    last_applied: LogIndex,
}

pub struct RaftNode {
    node_id: NodeId,
    cluster_size: usize,
    state: RwLock<NodeState>,
    log: RwLock<Vec<LogEntry>>,
    fsm: Arc<dyn RaftFsm>,
    commit_notify: Notify,
}

impl RaftNode {
    /// `cluster_size` is the total replica count of the metadata group
    /// (including this node). A single-node group becomes leader of term 1
    /// immediately; a multi-node group starts as a follower awaiting the
    /// external transport to drive election.
    #[must_use]
    pub fn new(node_id: NodeId, cluster_size: usize, fsm: Arc<dyn RaftFsm>) -> Self {
        let single_node = cluster_size <= 1;
        if single_node {
            info!(node_id, "single-node metadata group: becoming leader immediately");
        }
        Self {
            node_id,
            cluster_size,
            state: RwLock::new(NodeState {
                current_term: u64::from(single_node),
                role: if single_node { Role::Leader } else { Role::Follower },
                voted_for: None,
                leader_id: if single_node { Some(node_id) } else { None },
                commit_index: 0,
                last_applied: 0,
            }),
            log: RwLock::new(Vec::new()),
            fsm,
            commit_notify: Notify::new(),
        }
    }

    #[must_use]
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    #[must_use]
    pub fn is_leader(&self) -> bool {
        self.state.read().role == Role::Leader
    }

    #[must_use]
    pub fn leader(&self) -> Option<NodeId> {
        self.state.read().leader_id
    }

    #[must_use]
    pub fn term(&self) -> Term {
        self.state.read().current_term
    }

    fn quorum_size(&self) -> usize {
        self.cluster_size / 2 + 1
    }

    /// Append `command` to the log and, once a quorum has durably stored
    /// it, apply it to the FSM. Only the leader may propose.
    pub async fn propose(&self, command: Command) -> Result<LogIndex> {
        let (index, term, immediate_commit) = {
            let state = self.state.read();
            if state.role != Role::Leader {
                return Err(RaftError::NotController(state.leader_id).into());
            }
            let index = self.log.read().len() as LogIndex + 1;
            (index, state.current_term, self.quorum_size() <= 1)
        };

        self.log.write().push(LogEntry { term, index, command });
        debug!(index, term, "appended raft log entry");

        if immediate_commit {
            self.advance_commit_index(index)?;
        } else {
            // Multi-node acknowledgement arrives via `advance_commit_index`,
            // driven by the (external) replication transport; wait for it.
            loop {
                if self.state.read().commit_index >= index {
                    break;
                }
                self.commit_notify.notified().await;
            }
        }

        Ok(index)
    }

    /// Called once a quorum of peers have durably stored entries through
    /// `index` (by the external replication transport, or immediately for
    /// a single-node group). Applies every newly committed entry in order.
    pub fn advance_commit_index(&self, index: LogIndex) -> Result<()> {
        {
            let mut state = self.state.write();
            if index <= state.commit_index {
                return Ok(());
            }
            state.commit_index = index;
        }
        self.commit_notify.notify_waiters();
        self.apply_committed()
    }

    fn apply_committed(&self) -> Result<()> {
        let commit_index = self.state.read().commit_index;
        loop {
            let next = {
                let state = self.state.read();
                if state.last_applied >= commit_index {
                    return Ok(());
                }
                state.last_applied + 1
            };
            let log = self.log.read();
            let Some(entry) = log.iter().find(|e| e.index == next) else {
                return Ok(());
            };
            self.fsm.apply(&entry.command)?;
            drop(log);
            self.state.write().last_applied = next;
        }
    }

    #[must_use]
    pub fn commit_index(&self) -> LogIndex {
        self.state.read().commit_index
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<u8> {
        self.fsm.snapshot()
    }

    pub fn restore(&self, bytes: &[u8]) -> Result<()> {
        self.fsm.restore(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct RecordingFsm {
        applied: Mutex<Vec<Command>>,
    }

    impl RaftFsm for RecordingFsm {
        fn apply(&self, command: &Command) -> Result<()> {
            self.applied.lock().push(command.clone());
            Ok(())
        }
        fn snapshot(&self) -> Vec<u8> {
            Vec::new()
        }
        fn restore(&self, _bytes: &[u8]) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn single_node_commits_and_applies_immediately() {
        let fsm = Arc::new(RecordingFsm {
            applied: Mutex::new(Vec::new()),
        });
        let node = RaftNode::new(1, 1, fsm.clone());
        assert!(node.is_leader());

        let index = node.propose(Command::DeleteTopic { name: "t".into() }).await.unwrap();
        assert_eq!(index, 1);
        assert_eq!(node.commit_index(), 1);
        assert_eq!(fsm.applied.lock().len(), 1);
    }

    #[tokio::test]
    async fn non_leader_propose_fails_with_not_controller() {
        let fsm = Arc::new(RecordingFsm {
            applied: Mutex::new(Vec::new()),
        });
        let node = RaftNode::new(2, 3, fsm);
        assert!(!node.is_leader());

        let result = node.propose(Command::DeleteTopic { name: "t".into() }).await;
        assert!(matches!(
            result,
            Err(kestrel_common::error::Error::Raft(RaftError::NotController(_)))
        ));
    }
}
