//! Bootstrap: wires configuration, channels, the discovery task, reply
//! listeners and the facade together.

use std::sync::Arc;

use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::channel::{ProbeChannels, ProbeEndpointPair, ProbeTransport};
use crate::config::DiscoveryConfig;
use crate::correlator::{ReplyCorrelator, ReplyListener};
use crate::error::DiscoveryError;
use crate::facade::{LocatorFacade, LocatorTransport};
use crate::state::DiscoveryState;
use crate::time::{Scheduler, TimeProvider, TokioScheduler, TokioTimeProvider};
use crate::types::{Endpoint, Identity};
use crate::udp::{UdpProbeTransport, UdpReplyListener, local_multicast_interfaces};

/// Identity name of the facade; the category is the instance name.
const FACADE_NAME: &str = "Locator";

/// A running locator discovery.
///
/// Dropping it, or calling [`destroy`](Self::destroy), stops discovery and
/// the reply listeners. Facade clones outliving it answer
/// [`DiscoveryError::Shutdown`].
pub struct LocatorDiscovery<L, T = TokioTimeProvider>
where
    L: LocatorTransport,
    T: TimeProvider,
{
    facade: LocatorFacade<L, T>,
    correlator: Arc<ReplyCorrelator>,
    reply_endpoints: Vec<Endpoint>,
    discovery_task: JoinHandle<()>,
    listener_tasks: Vec<JoinHandle<()>>,
}

impl<L: LocatorTransport> LocatorDiscovery<L, TokioTimeProvider> {
    /// Start discovery over UDP.
    ///
    /// Binds one reply listener per configured reply endpoint, then probes
    /// the configured lookup endpoints on demand. Without a configured
    /// interface, lookups go out on every local interface.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Io`] if a reply endpoint cannot be bound.
    pub async fn initialize(
        config: DiscoveryConfig,
        transport: Arc<L>,
    ) -> Result<Self, DiscoveryError> {
        let config = config.expand_lookup(local_multicast_interfaces);
        let mut listeners = Vec::with_capacity(config.reply().len());
        for endpoint in config.reply() {
            listeners.push(UdpReplyListener::bind(endpoint, config.ipv6()).await?);
        }
        let reply_endpoints = listeners.iter().map(|l| l.endpoint().clone()).collect();

        let mut discovery = Self::with_parts(
            config,
            transport,
            Arc::new(UdpProbeTransport::new()),
            reply_endpoints,
            Arc::new(TokioScheduler::new()),
            TokioTimeProvider::new(),
        );
        let reply_listener = discovery.reply_listener();
        discovery.listener_tasks = listeners
            .iter()
            .map(|listener| listener.spawn(Arc::clone(&reply_listener)))
            .collect();
        Ok(discovery)
    }
}

impl<L, T> LocatorDiscovery<L, T>
where
    L: LocatorTransport,
    T: TimeProvider,
{
    /// Start discovery with caller-provided probe transport, scheduler and
    /// clock. Replies are fed through [`reply_listener`](Self::reply_listener).
    ///
    /// Must be called from within a Tokio runtime.
    pub fn with_parts(
        config: DiscoveryConfig,
        transport: Arc<L>,
        probe: Arc<dyn ProbeTransport>,
        reply_endpoints: Vec<Endpoint>,
        scheduler: Arc<dyn Scheduler>,
        time: T,
    ) -> Self {
        let category = match config.instance_name() {
            Some(name) => name.to_string(),
            None => Uuid::new_v4().to_string(),
        };
        let identity = Identity::new(FACADE_NAME, category);
        let pairs = ProbeEndpointPair::pair_all(config.lookup(), &reply_endpoints);

        tracing::debug!(
            identity = %identity,
            channels = pairs.len(),
            timeout = ?config.timeout(),
            retry_count = config.retry_count(),
            "starting locator discovery"
        );

        let (handle, discovery_task) = DiscoveryState::spawn(
            config,
            ProbeChannels::new(pairs, probe),
            scheduler,
            time.clone(),
        );
        let correlator = Arc::new(ReplyCorrelator::new(handle.clone()));
        let facade = LocatorFacade::new(identity, handle, transport, time);

        Self {
            facade,
            correlator,
            reply_endpoints,
            discovery_task,
            listener_tasks: Vec::new(),
        }
    }

    /// The locator to install in the RPC runtime.
    pub fn facade(&self) -> &LocatorFacade<L, T> {
        &self.facade
    }

    /// Where probe replies go.
    pub fn reply_listener(&self) -> Arc<dyn ReplyListener> {
        self.correlator.clone()
    }

    /// The reply endpoints advertised in probes.
    pub fn reply_endpoints(&self) -> &[Endpoint] {
        &self.reply_endpoints
    }

    /// Stop discovery and the reply listeners.
    pub fn destroy(self) {
        drop(self);
    }

    fn stop(&self) {
        for task in &self.listener_tasks {
            task.abort();
        }
        self.discovery_task.abort();
    }
}

impl<L, T> Drop for LocatorDiscovery<L, T>
where
    L: LocatorTransport,
    T: TimeProvider,
{
    fn drop(&mut self) {
        self.stop();
        tracing::debug!(identity = %self.facade.identity(), "locator discovery destroyed");
    }
}
