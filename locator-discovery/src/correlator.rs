//! Entry point for probe replies.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::state::DiscoveryHandle;
use crate::types::ObjectRef;

/// Receives probe replies from the network.
pub trait ReplyListener: Send + Sync + 'static {
    /// A locator answered a probe. `None` for an empty reply.
    fn found_locator(&self, locator: Option<ObjectRef>);
}

/// Feeds probe replies into discovery.
///
/// Replies may arrive on any interface, at any time, including after their
/// round ended. The discovery state sorts those out; this only drops replies
/// that carry nothing to connect to.
#[derive(Debug)]
pub struct ReplyCorrelator {
    discovery: DiscoveryHandle,
    warned_empty: AtomicBool,
}

impl ReplyCorrelator {
    /// Forward replies to `discovery`.
    pub fn new(discovery: DiscoveryHandle) -> Self {
        Self {
            discovery,
            warned_empty: AtomicBool::new(false),
        }
    }
}

impl ReplyListener for ReplyCorrelator {
    fn found_locator(&self, locator: Option<ObjectRef>) {
        let Some(locator) = locator else {
            tracing::debug!("ignoring empty locator reply");
            return;
        };
        if locator.endpoints.is_empty() {
            if !self.warned_empty.swap(true, Ordering::Relaxed) {
                tracing::warn!(locator = %locator, "ignoring locator reply without endpoints");
            }
            return;
        }
        self.discovery.found_locator(locator);
    }
}
