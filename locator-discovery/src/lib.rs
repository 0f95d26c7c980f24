//! # locator-discovery
//!
//! Finds a locator (the directory service mapping object identities and
//! adapter ids to endpoints) by multicast probing, and exposes it to the RPC
//! runtime as an ordinary locator.
//!
//! Until a locator answers, lookups park on the active probe round. Once one
//! does, every lookup is forwarded to it. When nobody answers within
//! `timeout × (retries + 1)`, lookups are answered "not found" and no new
//! round starts until a cooldown elapses.
//!
//! ## Pieces
//!
//! - [`DiscoveryState`]: the probe round state machine, run as a single task
//!   and driven through a [`DiscoveryHandle`]
//! - [`LocatorFacade`]: the locator handed to the RPC runtime
//! - [`PendingInvocation`]: forwarding with a single retry on an unreachable
//!   locator
//! - [`ReplyCorrelator`]: the [`ReplyListener`] feeding probe replies in
//! - [`VoidLocator`]: the "not found" fallback
//! - [`LocatorDiscovery`]: bootstrap over UDP ([`UdpProbeTransport`],
//!   [`UdpReplyListener`])
//!
//! ## Seams
//!
//! The network and the clock are traits so tests can drive discovery
//! deterministically:
//!
//! - [`ProbeTransport`]: sends probes
//! - [`LocatorTransport`]: invokes the resolved locator
//! - [`TimeProvider`] and [`Scheduler`]: monotonic time and timers

#![deny(clippy::unwrap_used)]

mod channel;
mod codec;
mod config;
mod correlator;
mod error;
mod facade;
mod fallback;
mod invocation;
mod plugin;
mod state;
mod time;
mod types;
mod udp;

// Addressing
pub use types::{Endpoint, EndpointParseError, Identity, ObjectRef, Transport, merge_endpoints};

// Codec and errors
pub use codec::{CodecError, JsonCodec, MessageCodec};
pub use error::{ConfigError, DiscoveryError, ErrorClass, InvokeError};

// Configuration
pub use config::{
    DEFAULT_IPV4_GROUP, DEFAULT_IPV6_GROUP, DEFAULT_PORT, DEFAULT_PREFIX, DiscoveryConfig,
    DiscoveryConfigBuilder,
};

// Time
pub use time::{
    Scheduler, TimeError, TimeProvider, TimerHandle, TimerTask, TokioScheduler, TokioTimeProvider,
};

// Discovery
pub use channel::{FailureSink, ProbeChannels, ProbeEndpointPair, ProbeRequest, ProbeTransport};
pub use correlator::{ReplyCorrelator, ReplyListener};
pub use state::{DiscoveryHandle, DiscoverySnapshot, DiscoveryState, Resolution};

// Forwarding
pub use facade::{LocatorFacade, LocatorTransport, ops};
pub use fallback::VoidLocator;
pub use invocation::{OperationMode, PendingInvocation, Request};

// Bootstrap
pub use plugin::LocatorDiscovery;
pub use udp::{
    LookupDatagram, UdpProbeTransport, UdpReplyListener, local_multicast_interfaces,
};
