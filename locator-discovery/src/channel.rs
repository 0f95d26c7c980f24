//! Probe channels: one lookup endpoint and its reply endpoints per interface.
//!
//! Sending is fire-and-forget. [`ProbeChannels::broadcast`] spawns one send
//! per channel and reports failures through a callback instead of returning
//! them, so the discovery state never waits on the network.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::Endpoint;

/// A lookup endpoint paired with the reply endpoints bound to the same
/// interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeEndpointPair {
    lookup: Endpoint,
    reply: Vec<Endpoint>,
}

impl ProbeEndpointPair {
    /// Pair a lookup endpoint with explicit reply endpoints.
    pub fn new(lookup: Endpoint, reply: Vec<Endpoint>) -> Self {
        Self { lookup, reply }
    }

    /// Pair every lookup endpoint with the reply endpoint listening on its
    /// multicast interface.
    ///
    /// A lookup endpoint without an interface, or whose interface matches no
    /// reply endpoint host, gets the full reply endpoint list.
    pub fn pair_all(lookup: &[Endpoint], reply: &[Endpoint]) -> Vec<Self> {
        lookup
            .iter()
            .map(|lookup| {
                let matching = lookup
                    .interface
                    .as_deref()
                    .filter(|intf| !intf.is_empty())
                    .and_then(|intf| reply.iter().find(|r| r.host == intf));
                let reply = match matching {
                    Some(endpoint) => vec![endpoint.clone()],
                    None => reply.to_vec(),
                };
                Self::new(lookup.clone(), reply)
            })
            .collect()
    }

    /// Where probes are sent.
    pub fn lookup(&self) -> &Endpoint {
        &self.lookup
    }

    /// Where replies to probes sent on this channel should go.
    pub fn reply(&self) -> &[Endpoint] {
        &self.reply
    }
}

/// A probe: "who is the locator for this instance?"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeRequest {
    /// Requested instance name; empty asks every locator to answer.
    pub instance_name: String,
    /// Endpoints the answer must be sent to.
    pub reply: Vec<Endpoint>,
}

/// Sends probes over the network.
#[async_trait]
pub trait ProbeTransport: Send + Sync + 'static {
    /// Send one probe to `lookup`.
    async fn send_probe(&self, lookup: &Endpoint, request: &ProbeRequest) -> io::Result<()>;
}

/// Receives channel send failures: the channel index and the error.
pub type FailureSink = Arc<dyn Fn(usize, io::Error) + Send + Sync>;

/// The set of probe channels used by one discovery state.
#[derive(Clone)]
pub struct ProbeChannels {
    pairs: Vec<ProbeEndpointPair>,
    transport: Arc<dyn ProbeTransport>,
}

impl ProbeChannels {
    /// Create channels sending through `transport`.
    pub fn new(pairs: Vec<ProbeEndpointPair>, transport: Arc<dyn ProbeTransport>) -> Self {
        Self { pairs, transport }
    }

    /// Number of channels.
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Whether there are no channels.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// The channel pairs.
    pub fn pairs(&self) -> &[ProbeEndpointPair] {
        &self.pairs
    }

    /// Send one probe per channel without waiting for the sends.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn broadcast(&self, instance_name: &str, on_failure: FailureSink) {
        for (index, pair) in self.pairs.iter().enumerate() {
            let transport = Arc::clone(&self.transport);
            let lookup = pair.lookup.clone();
            let request = ProbeRequest {
                instance_name: instance_name.to_string(),
                reply: pair.reply.clone(),
            };
            let on_failure = Arc::clone(&on_failure);
            tokio::spawn(async move {
                if let Err(err) = transport.send_probe(&lookup, &request).await {
                    tracing::debug!(
                        channel = index,
                        lookup = %lookup,
                        error = %err,
                        "probe send failed"
                    );
                    on_failure(index, err);
                }
            });
        }
    }
}

impl std::fmt::Debug for ProbeChannels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeChannels")
            .field("pairs", &self.pairs)
            .finish_non_exhaustive()
    }
}
