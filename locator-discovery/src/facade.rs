//! The locator seen by the RPC runtime.
//!
//! [`LocatorFacade`] answers locator operations by forwarding them to
//! whichever locator discovery resolved, or to the [`VoidLocator`] when
//! discovery came up empty. It is cheap to clone and safe to share between
//! tasks; every call resolves within the discovery budget of
//! `timeout × (retries + 1)` plus the forwarded call itself.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use locator_discovery::{
//!     DiscoveryConfig, Identity, InvokeError, LocatorDiscovery, LocatorTransport, ObjectRef,
//!     Request,
//! };
//!
//! struct Rpc;
//!
//! #[async_trait::async_trait]
//! impl LocatorTransport for Rpc {
//!     async fn invoke(
//!         &self,
//!         _target: &ObjectRef,
//!         _request: &Request,
//!     ) -> Result<Vec<u8>, InvokeError> {
//!         Err(InvokeError::ConnectionRefused("no runtime".into()))
//!     }
//! }
//!
//! # async fn example() -> Result<(), locator_discovery::DiscoveryError> {
//! let discovery = LocatorDiscovery::initialize(DiscoveryConfig::default(), Arc::new(Rpc)).await?;
//! let hello = discovery
//!     .facade()
//!     .find_object_by_id(&Identity::new("hello", ""))
//!     .await?;
//! println!("hello is at {:?}", hello);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::codec::{JsonCodec, MessageCodec};
use crate::error::{DiscoveryError, InvokeError};
use crate::fallback::VoidLocator;
use crate::invocation::{PendingInvocation, Request};
use crate::state::{DiscoveryHandle, DiscoverySnapshot};
use crate::time::{TimeProvider, TokioTimeProvider};
use crate::types::{Identity, ObjectRef};

/// Locator operation names.
pub mod ops {
    /// Resolve an object identity to a reference.
    pub const FIND_OBJECT_BY_ID: &str = "findObjectById";
    /// Resolve an adapter id to a reference.
    pub const FIND_ADAPTER_BY_ID: &str = "findAdapterById";
    /// The locator registry; never exposed through discovery.
    pub const GET_REGISTRY: &str = "getRegistry";
}

/// Sends a request to a remote locator.
///
/// Implemented by the RPC runtime. Errors are classified with
/// [`InvokeError::class`] to decide between surfacing and retrying.
#[async_trait]
pub trait LocatorTransport: Send + Sync + 'static {
    /// Invoke `request` on `target` and return the encoded result.
    async fn invoke(&self, target: &ObjectRef, request: &Request) -> Result<Vec<u8>, InvokeError>;
}

/// The locator handed to the RPC runtime.
pub struct LocatorFacade<L, T = TokioTimeProvider, C = JsonCodec>
where
    L: LocatorTransport,
    T: TimeProvider,
    C: MessageCodec,
{
    identity: Identity,
    discovery: DiscoveryHandle,
    transport: Arc<L>,
    fallback: VoidLocator<C>,
    time: T,
    codec: C,
}

impl<L, T> LocatorFacade<L, T, JsonCodec>
where
    L: LocatorTransport,
    T: TimeProvider,
{
    /// Create a facade encoding its typed calls as JSON.
    pub fn new(identity: Identity, discovery: DiscoveryHandle, transport: Arc<L>, time: T) -> Self {
        Self::with_codec(identity, discovery, transport, time, JsonCodec)
    }
}

impl<L, T, C> LocatorFacade<L, T, C>
where
    L: LocatorTransport,
    T: TimeProvider,
    C: MessageCodec,
{
    /// Create a facade with a custom codec.
    pub fn with_codec(
        identity: Identity,
        discovery: DiscoveryHandle,
        transport: Arc<L>,
        time: T,
        codec: C,
    ) -> Self {
        Self {
            identity,
            discovery,
            transport,
            fallback: VoidLocator::new(codec.clone()),
            time,
            codec,
        }
    }

    /// Identity the facade is registered under.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Forward an arbitrary operation and return its encoded result.
    ///
    /// `getRegistry` is answered locally with `None`.
    pub async fn invoke_raw(&self, request: Request) -> Result<Vec<u8>, DiscoveryError> {
        if request.operation == ops::GET_REGISTRY {
            return self.fallback.dispatch(&request);
        }
        PendingInvocation::new(request)
            .run(&self.discovery, self.transport.as_ref(), &self.fallback)
            .await
    }

    /// Resolve an object identity through the discovered locator.
    pub async fn find_object_by_id(
        &self,
        id: &Identity,
    ) -> Result<Option<ObjectRef>, DiscoveryError> {
        let params = self.codec.encode(id)?;
        let reply = self
            .invoke_raw(Request::new(ops::FIND_OBJECT_BY_ID, params).idempotent())
            .await?;
        Ok(self.codec.decode(&reply)?)
    }

    /// Resolve an adapter id through the discovered locator.
    pub async fn find_adapter_by_id(
        &self,
        adapter_id: &str,
    ) -> Result<Option<ObjectRef>, DiscoveryError> {
        let params = self.codec.encode(&adapter_id)?;
        let reply = self
            .invoke_raw(Request::new(ops::FIND_ADAPTER_BY_ID, params).idempotent())
            .await?;
        Ok(self.codec.decode(&reply)?)
    }

    /// The locator registry. Discovery never exposes one.
    pub fn get_registry(&self) -> Option<ObjectRef> {
        self.fallback.get_registry()
    }

    /// Look up every reachable locator instance.
    ///
    /// Forgets previously collected instances and starts a lookup. With an
    /// empty `instance_name` this waits the full `wait`; otherwise it returns
    /// as soon as that instance replied or the lookup ended.
    pub async fn get_locators(
        &self,
        instance_name: &str,
        wait: Duration,
    ) -> Result<Vec<ObjectRef>, DiscoveryError> {
        match self.discovery.find_locators(instance_name)? {
            None => self.time.sleep(wait).await,
            Some(found) => {
                if self.time.timeout(wait, found).await.is_err() {
                    tracing::debug!(instance_name, ?wait, "no reply from locator instance");
                }
            }
        }
        self.discovery.known_locators().await
    }

    /// Current discovery state.
    pub async fn snapshot(&self) -> Result<DiscoverySnapshot, DiscoveryError> {
        self.discovery.snapshot().await
    }
}

impl<L, T, C> Clone for LocatorFacade<L, T, C>
where
    L: LocatorTransport,
    T: TimeProvider,
    C: MessageCodec,
{
    fn clone(&self) -> Self {
        Self {
            identity: self.identity.clone(),
            discovery: self.discovery.clone(),
            transport: Arc::clone(&self.transport),
            fallback: self.fallback.clone(),
            time: self.time.clone(),
            codec: self.codec.clone(),
        }
    }
}

impl<L, T, C> std::fmt::Debug for LocatorFacade<L, T, C>
where
    L: LocatorTransport,
    T: TimeProvider,
    C: MessageCodec,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocatorFacade")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}
