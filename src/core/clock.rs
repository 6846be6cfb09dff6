//! Vector clock for causal ordering of playlist mutations.
//!
//! Each node tracks one counter per peer. A node increments its own entry
//! before sending a causal message; receivers merge componentwise and gate
//! delivery on readiness (see [`VectorClock::ready_for`]).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::NodeId;

/// Mapping `node_id -> count of causal messages originated by that node`.
///
/// Every entry is monotonically non-decreasing: the own entry only moves
/// through [`VectorClock::increment`], remote entries only through
/// componentwise-max [`VectorClock::merge`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorClock {
    entries: BTreeMap<NodeId, u64>,
}

impl VectorClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &NodeId) -> u64 {
        self.entries.get(id).copied().unwrap_or(0)
    }

    /// Advance `id`'s entry by one and return the new value.
    ///
    /// Called with the local node id before transmitting a causal message.
    pub fn increment(&mut self, id: &NodeId) -> u64 {
        let entry = self.entries.entry(id.clone()).or_insert(0);
        *entry += 1;
        *entry
    }

    /// Componentwise max with `incoming`.
    pub fn merge(&mut self, incoming: &VectorClock) {
        for (id, count) in &incoming.entries {
            let entry = self.entries.entry(id.clone()).or_insert(0);
            if *count > *entry {
                *entry = *count;
            }
        }
    }

    /// Ensure `id` has an entry so it participates in snapshots.
    pub fn observe(&mut self, id: &NodeId) {
        self.entries.entry(id.clone()).or_insert(0);
    }

    /// Causal readiness of a message stamped `incoming` from `sender`.
    ///
    /// True iff `incoming[sender] == self[sender] + 1` and, for every other
    /// node `k`, `incoming[k] <= self[k]`: the message is the next one from
    /// its sender and we have seen everything the sender had seen.
    pub fn ready_for(&self, sender: &NodeId, incoming: &VectorClock) -> bool {
        if incoming.get(sender) != self.get(sender) + 1 {
            return false;
        }
        incoming
            .entries
            .iter()
            .filter(|(id, _)| *id != sender)
            .all(|(id, count)| *count <= self.get(id))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, u64)> {
        self.entries.iter().map(|(id, count)| (id, *count))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(NodeId, u64)> for VectorClock {
    fn from_iter<T: IntoIterator<Item = (NodeId, u64)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> NodeId {
        NodeId::new(s)
    }

    fn clock(pairs: &[(&str, u64)]) -> VectorClock {
        pairs.iter().map(|(s, n)| (id(s), *n)).collect()
    }

    #[test]
    fn increment_is_monotonic() {
        let mut c = VectorClock::new();
        assert_eq!(c.increment(&id("a")), 1);
        assert_eq!(c.increment(&id("a")), 2);
        assert_eq!(c.get(&id("a")), 2);
    }

    #[test]
    fn merge_takes_componentwise_max() {
        let mut local = clock(&[("a", 3), ("b", 1)]);
        local.merge(&clock(&[("a", 2), ("b", 4), ("c", 1)]));
        assert_eq!(local.get(&id("a")), 3);
        assert_eq!(local.get(&id("b")), 4);
        assert_eq!(local.get(&id("c")), 1);
    }

    #[test]
    fn ready_requires_next_from_sender() {
        let local = clock(&[("a", 1)]);
        assert!(local.ready_for(&id("a"), &clock(&[("a", 2)])));
        // Gap: message 3 before 2.
        assert!(!local.ready_for(&id("a"), &clock(&[("a", 3)])));
        // Stale duplicate.
        assert!(!local.ready_for(&id("a"), &clock(&[("a", 1)])));
    }

    #[test]
    fn ready_requires_senders_context() {
        // b sent a message after having seen a:1, but we have not seen a:1.
        let local = VectorClock::new();
        let incoming = clock(&[("a", 1), ("b", 1)]);
        assert!(!local.ready_for(&id("b"), &incoming));

        let caught_up = clock(&[("a", 1)]);
        assert!(caught_up.ready_for(&id("b"), &incoming));
    }
}
