use std::{cmp::Ordering, collections::BTreeMap};

use serde::{Deserialize, Serialize};

/// Stable identifier of a cluster member. Opaque to the protocol.
pub type NodeId = String;

/// Vector clock over a fixed cluster membership.
///
/// Every member gets a materialised entry at construction, so two clocks of
/// the same cluster always range over the same keys and structural equality
/// coincides with the causal one. Entries absent from a received clock (a
/// peer built against a differing map) still read as zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorClock(BTreeMap<NodeId, u64>);

impl VectorClock {
    pub fn new(members: impl IntoIterator<Item = NodeId>) -> Self {
        Self(members.into_iter().map(|id| (id, 0)).collect())
    }

    pub fn get(&self, id: &str) -> u64 {
        self.0.get(id).copied().unwrap_or(0)
    }

    /// Advance `id`'s component by one, returning the new value.
    pub fn increment(&mut self, id: &str) -> u64 {
        let counter = self.0.entry(id.to_owned()).or_default();
        *counter += 1;
        *counter
    }

    /// Componentwise max. Never decreases any entry.
    pub fn merge(&mut self, other: &Self) {
        for (id, n) in &other.0 {
            let counter = self.0.entry(id.clone()).or_default();
            *counter = (*counter).max(*n);
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = (&NodeId, u64)> {
        self.0.iter().map(|(id, n)| (id, *n))
    }
}

// the happens-before relation: Less means every component is <= with at
// least one strictly smaller, None means the clocks are concurrent
impl PartialOrd for VectorClock {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        fn ge(clock: &VectorClock, other_clock: &VectorClock) -> bool {
            other_clock.entries().all(|(id, n)| clock.get(id) >= n)
        }
        match (ge(self, other), ge(other, self)) {
            (true, true) => Some(Ordering::Equal),
            (true, false) => Some(Ordering::Greater),
            (false, true) => Some(Ordering::Less),
            (false, false) => None,
        }
    }
}
