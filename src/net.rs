use std::{collections::HashMap, time::Duration};

use tracing::warn;

use crate::{causal_kv::Message, clock::NodeId};

/// One-way message submission: no completion notification, no delivery
/// guarantee. Implementations must not block the caller; socket work
/// happens on detached tasks.
pub trait SendMessage<A, M> {
    fn send(&mut self, dest: A, message: M) -> anyhow::Result<()>;
}

/// Fan-out address: every peer of the local node.
#[derive(Debug, Clone, Copy)]
pub struct All;

#[derive(Debug)]
pub struct Void; // for testing

impl<A, M> SendMessage<A, M> for Void {
    fn send(&mut self, _: A, _: M) -> anyhow::Result<()> {
        Ok(())
    }
}

const REPLICATE_TIMEOUT: Duration = Duration::from_secs(2);

/// Best-effort replication fan-out over HTTP.
///
/// Each send spawns one detached POST per peer. Failures (and non-2xx
/// replies) are logged and dropped: a peer that misses a payload stays
/// behind on that sender until it hears from it again. There is no retry
/// layer underneath or above this one.
#[derive(Debug, Clone)]
pub struct HttpNet {
    client: reqwest::Client,
    peers: Vec<(NodeId, String)>,
}

impl HttpNet {
    /// `cluster` maps every node id, the local one included, to its base URL.
    pub fn new(id: &str, cluster: &HashMap<NodeId, String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REPLICATE_TIMEOUT)
            .build()?;
        let peers = cluster
            .iter()
            .filter(|(peer, _)| peer.as_str() != id)
            .map(|(peer, url)| (peer.clone(), url.trim_end_matches('/').to_owned()))
            .collect();
        Ok(Self { client, peers })
    }
}

impl SendMessage<All, Message> for HttpNet {
    fn send(&mut self, All: All, message: Message) -> anyhow::Result<()> {
        for (peer, url) in &self.peers {
            let request = self
                .client
                .post(format!("{url}/replicate"))
                .json(&message);
            let peer = peer.clone();
            tokio::spawn(async move {
                let result = async { request.send().await?.error_for_status() }.await;
                if let Err(err) = result {
                    warn!(%peer, %err, "dropping replication payload")
                }
            });
        }
        Ok(())
    }
}
