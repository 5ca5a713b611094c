//! Committed consumer-group offset store. Lives in this crate because `CommitOffset` is a
//! Raft FSM command applied the same way `CreateTopic`/`SetISR` are —
//! the coordinator crate only reads this store and proposes commits
//! through [`crate::MetadataBackend`].

use std::collections::HashMap;

use dashmap::DashMap;
use kestrel_common::types::{Offset, PartitionId, Timestamp};

/// One committed offset plus its opaque client metadata string.
#[derive(Debug, Clone)]
pub struct CommittedOffset {
    pub offset: Offset,
    pub metadata: String,
    pub commit_timestamp: Timestamp,
}

/// `group -> (topic, partition) -> CommittedOffset`.
#[derive(Default)]
pub struct OffsetStore {
    groups: DashMap<String, HashMap<(String, PartitionId), CommittedOffset>>,
}

impl OffsetStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applied by the FSM on a committed `CommitOffset` command.
    pub fn commit(
        &self,
        group: &str,
        topic: &str,
        partition: PartitionId,
        offset: Offset,
        metadata: String,
        commit_timestamp: Timestamp,
    ) {
        self.groups
            .entry(group.to_string())
            .or_default()
            .insert(
                (topic.to_string(), partition),
                CommittedOffset {
                    offset,
                    metadata,
                    commit_timestamp,
                },
            );
    }

    /// `fetchOffset(groupId, [(topic,partition)?])`: `None`
    /// for the filter returns every commit for the group; a `Some` filter
    /// restricts to the given topic/partition pairs.
    #[must_use]
    pub fn fetch(
        &self,
        group: &str,
        filter: Option<&[(String, PartitionId)]>,
    ) -> Vec<(String, PartitionId, Offset, String)> {
        let Some(entry) = self.groups.get(group) else {
            return Vec::new();
        };
        entry
            .iter()
            .filter(|((topic, partition), _)| {
                filter.map_or(true, |f| f.iter().any(|(t, p)| t == topic && p == partition))
            })
            .map(|((topic, partition), committed)| {
                (topic.clone(), *partition, committed.offset, committed.metadata.clone())
            })
            .collect()
    }

    /// `resetOffsets`: direct overwrite, not a Raft command
    /// replay — only valid while the group is Empty/Dead, which the
    /// caller (the coordinator) enforces before calling in.
    pub fn reset(&self, group: &str, offsets: &[(String, PartitionId, Offset)]) {
        let mut entry = self.groups.entry(group.to_string()).or_default();
        for (topic, partition, offset) in offsets {
            entry.insert(
                (topic.clone(), *partition),
                CommittedOffset {
                    offset: *offset,
                    metadata: String::new(),
                    commit_timestamp: 0,
                },
            );
        }
    }

    pub fn delete_group(&self, group: &str) {
        self.groups.remove(group);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_without_filter_returns_all_commits() {
        let store = OffsetStore::new();
        store.commit("g", "t", 0, 10, String::new(), 0);
        store.commit("g", "t", 1, 20, String::new(), 0);

        let all = store.fetch("g", None);
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn reset_overwrites_existing_commits() {
        let store = OffsetStore::new();
        store.commit("g", "t", 0, 10, String::new(), 0);
        store.reset("g", &[("t".to_string(), 0, 50)]);

        let fetched = store.fetch("g", Some(&[("t".to_string(), 0)]));
        assert_eq!(fetched[0].2, 50);
    }
}
