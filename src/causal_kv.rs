// notes on this implementation of vector clock gated causal delivery, in the
// lineage of
// Lightweight Causal and Atomic Group Multicast (ACM TOCS'91)
// each replica owns a key/value store, a vector clock and a buffer of not yet
// deliverable replications, and the three advance as one event under a single
// lock held by the caller. a local put ticks the writer's own component and
// fans the write out with a snapshot of the clock; an inbound replication is
// delivered only when it is the next message in its sender's sequence and
// every third party component it carries has already been observed locally.
// everything else waits in the buffer, which is swept to a fixpoint after
// every delivery
// deliveries merge the received clock but do not tick the receiver's own
// component: a receive is not observable to any peer, and advertising it
// would open a gap in the local sequence that peers could never fill (they
// only learn this replica's counter from this replica's own writes). client
// reads do not tick for the same reason
// a replication whose sender component is not beyond the local view is a
// duplicate or already obsolete and is dropped outright, never buffered.
// concurrent writes to the same key are not totalized by causal order, so the
// last delivered one wins and replicas may disagree on such keys
// membership is fixed for the process lifetime and the buffer is unbounded by
// design. a lost payload permanently parks every later message from that
// sender; recovering from loss would take an anti-entropy layer that this
// module deliberately does not have
use std::{collections::HashMap, mem::take};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    clock::{NodeId, VectorClock},
    net::{All, SendMessage},
};

pub type Key = String;
pub type Value = String;

/// One replicated write: the payload plus the sender's clock snapshot taken
/// right after the write ticked, so `vector_clock[sender_id]` is the write's
/// sequence number at its author.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicatePut {
    pub key: Key,
    pub value: Value,
    pub vector_clock: VectorClock,
    pub sender_id: NodeId,
}

// the wire `type` tag comes from serde, keeping the tagging uniform if more
// message kinds ever join
#[derive(Debug, Clone, Serialize, Deserialize, derive_more::From)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    ReplicatePut(ReplicatePut),
}

pub trait ReplicaNet: SendMessage<All, Message> {}
impl<T: SendMessage<All, Message>> ReplicaNet for T {}

/// What the delivery engine did with one inbound replication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// Causally ready; written to the store, possibly unblocking buffered
    /// messages.
    Applied,
    /// Dependencies unmet; parked until they arrive.
    Buffered,
    /// Already delivered or obsolete; dropped without effect.
    Discarded,
}

// soft high-water mark only: messages are never dropped, because dropping
// would silently break causal delivery for everything behind them
const PENDING_HIGH_WATER: usize = 1024;

pub struct Replica<N> {
    id: NodeId,
    store: HashMap<Key, Value>,
    clock: VectorClock,
    pending: Vec<ReplicatePut>,
    net: N,
}

/// Snapshot of a replica's observable state, also the `/status` body.
#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub node_id: NodeId,
    pub kv_store: HashMap<Key, Value>,
    pub vector_clock: VectorClock,
    pub buffered_messages_count: usize,
}

impl<N> Replica<N> {
    pub fn new(id: NodeId, members: impl IntoIterator<Item = NodeId>, net: N) -> Self {
        Self {
            clock: VectorClock::new(members),
            store: Default::default(),
            pending: Default::default(),
            id,
            net,
        }
    }

    pub fn clock(&self) -> &VectorClock {
        &self.clock
    }

    /// Local read. Does not tick: a read is observable to no peer, so
    /// advertising it would only inflate vector clocks.
    pub fn get(&self, key: &str) -> (Option<Value>, VectorClock) {
        (self.store.get(key).cloned(), self.clock.clone())
    }

    pub fn status(&self) -> Status {
        Status {
            node_id: self.id.clone(),
            kv_store: self.store.clone(),
            vector_clock: self.clock.clone(),
            buffered_messages_count: self.pending.len(),
        }
    }
}

impl<N: ReplicaNet> Replica<N> {
    /// Local write: tick, store, then fan out one payload per peer carrying
    /// the post-tick snapshot. The returned snapshot is the clock the write
    /// advertises.
    pub fn put(&mut self, key: Key, value: Value) -> anyhow::Result<VectorClock> {
        self.clock.increment(&self.id);
        self.store.insert(key.clone(), value.clone());
        let snapshot = self.clock.clone();
        debug!(key = %key, clock = ?snapshot, "client put");
        let replicate = ReplicatePut {
            key,
            value,
            vector_clock: snapshot.clone(),
            sender_id: self.id.clone(),
        };
        self.net.send(All, replicate.into())?;
        Ok(snapshot)
    }

    /// Feed one inbound replication to the delivery engine. Never fails on
    /// protocol input: the message is applied, buffered or discarded. An
    /// error here means the local causal history is corrupt and the node
    /// must not continue.
    pub fn on_replicate(&mut self, message: ReplicatePut) -> anyhow::Result<DeliveryStatus> {
        if self.is_delivered(&message) {
            debug!(sender = %message.sender_id, key = %message.key, "discarding duplicate replication");
            return Ok(DeliveryStatus::Discarded);
        }
        if !self.is_ready(&message) {
            warn!(
                sender = %message.sender_id,
                key = %message.key,
                clock = ?message.vector_clock,
                "buffering replication with unmet dependencies"
            );
            self.pending.push(message);
            if self.pending.len() == PENDING_HIGH_WATER {
                warn!(
                    pending = self.pending.len(),
                    "pending buffer past high water, a dependency is likely lost"
                )
            }
            return Ok(DeliveryStatus::Buffered);
        }
        self.apply(message)?;
        self.drain_pending()?;
        Ok(DeliveryStatus::Applied)
    }

    // the sender component must be the next in that sender's sequence, which
    // catches gaps; every other component is a dependency the local node
    // must already have observed
    fn is_ready(&self, message: &ReplicatePut) -> bool {
        message.vector_clock.get(&message.sender_id) == self.clock.get(&message.sender_id) + 1
            && message
                .vector_clock
                .entries()
                .all(|(id, n)| *id == message.sender_id || n <= self.clock.get(id))
    }

    fn is_delivered(&self, message: &ReplicatePut) -> bool {
        message.vector_clock.get(&message.sender_id) <= self.clock.get(&message.sender_id)
    }

    fn apply(&mut self, message: ReplicatePut) -> anyhow::Result<()> {
        let own = self.clock.get(&self.id);
        debug!(
            sender = %message.sender_id,
            key = %message.key,
            clock = ?message.vector_clock,
            "applying replication"
        );
        self.store.insert(message.key, message.value);
        self.clock.merge(&message.vector_clock);
        // no peer can have observed more of our events than we performed
        anyhow::ensure!(
            self.clock.get(&self.id) == own,
            "received clock advanced own component of {}",
            self.id
        );
        Ok(())
    }

    // each delivery strictly advances the sender's component, so every pass
    // either delivers something or the fixpoint is reached; with a finite
    // buffer this terminates
    fn drain_pending(&mut self) -> anyhow::Result<()> {
        loop {
            let mut delivered = false;
            for message in take(&mut self.pending) {
                if self.is_delivered(&message) {
                    debug!(sender = %message.sender_id, key = %message.key, "dropping obsolete buffered replication")
                } else if self.is_ready(&message) {
                    self.apply(message)?;
                    delivered = true
                } else {
                    self.pending.push(message)
                }
            }
            if !delivered {
                return Ok(());
            }
        }
    }
}


// cSpell:words fixpoint proptest
