//! Forwarded locator invocations and their single-hop retry.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::codec::MessageCodec;
use crate::error::{DiscoveryError, ErrorClass, InvokeError};
use crate::facade::LocatorTransport;
use crate::fallback::VoidLocator;
use crate::state::{DiscoveryHandle, Resolution};
use crate::types::ObjectRef;

/// Resolutions an invocation may go through after its first attempt failed.
const MAX_HOPS: u32 = 1;

/// Whether an operation can safely be sent twice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationMode {
    /// Regular operation.
    #[default]
    Normal,
    /// Operation without side effects on repeat.
    Idempotent,
}

/// A locator operation forwarded as opaque bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Operation name.
    pub operation: String,
    /// Operation mode.
    pub mode: OperationMode,
    /// Encoded arguments.
    pub params: Vec<u8>,
    /// Request context, forwarded unchanged.
    pub context: HashMap<String, String>,
}

impl Request {
    /// Create a normal-mode request without context.
    pub fn new(operation: impl Into<String>, params: Vec<u8>) -> Self {
        Self {
            operation: operation.into(),
            mode: OperationMode::Normal,
            params,
            context: HashMap::new(),
        }
    }

    /// Mark the request idempotent.
    pub fn idempotent(mut self) -> Self {
        self.mode = OperationMode::Idempotent;
        self
    }

    /// Add a context entry.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// An invocation in flight: the request, the locator it was last sent to and
/// the error that attempt produced.
#[derive(Debug)]
pub struct PendingInvocation {
    request: Request,
    bound: Option<ObjectRef>,
    last_error: Option<InvokeError>,
    hops: u32,
}

impl PendingInvocation {
    /// Wrap a request that has not been sent yet.
    pub fn new(request: Request) -> Self {
        Self {
            request,
            bound: None,
            last_error: None,
            hops: 0,
        }
    }

    /// Resolve the locator and send the request to it.
    ///
    /// An unreachable locator is reported back to discovery and the request
    /// is sent once more to whatever it resolves next. When that is the same
    /// locator, or the second attempt fails too, the caller gets the error.
    /// Permanent errors are returned without a retry.
    pub async fn run<L, C>(
        mut self,
        discovery: &DiscoveryHandle,
        transport: &L,
        fallback: &VoidLocator<C>,
    ) -> Result<Vec<u8>, DiscoveryError>
    where
        L: LocatorTransport + ?Sized,
        C: MessageCodec,
    {
        loop {
            let failed = self.last_error.as_ref().and(self.bound.clone());
            let locator = match discovery.resolve(failed).await? {
                Resolution::Locator(locator) => locator,
                Resolution::Fallback => return fallback.dispatch(&self.request),
            };

            if let Some(last_error) = self.last_error.take() {
                if self.bound.as_ref() == Some(&locator) {
                    tracing::debug!(
                        operation = %self.request.operation,
                        locator = %locator,
                        "locator resolved to the one that just failed"
                    );
                    return Err(last_error.into());
                }
            }

            let err = match transport.invoke(&locator, &self.request).await {
                Ok(reply) => return Ok(reply),
                Err(err) => err,
            };

            match err.class() {
                ErrorClass::Permanent => return Err(err.surfaced().into()),
                ErrorClass::Unreachable if self.hops >= MAX_HOPS => return Err(err.into()),
                ErrorClass::Unreachable => {
                    tracing::debug!(
                        operation = %self.request.operation,
                        locator = %locator,
                        error = %err,
                        "locator unreachable, resolving again"
                    );
                    self.hops += 1;
                    self.bound = Some(locator);
                    self.last_error = Some(err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let request = Request::new("findObjectById", b"{}".to_vec())
            .idempotent()
            .with_context("trace", "42");
        assert_eq!(request.mode, OperationMode::Idempotent);
        assert_eq!(request.context.get("trace").map(String::as_str), Some("42"));
        assert_eq!(Request::new("op", Vec::new()).mode, OperationMode::Normal);
    }
}
