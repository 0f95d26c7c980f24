//! The locator used when discovery finds nothing.

use crate::codec::{JsonCodec, MessageCodec};
use crate::error::{DiscoveryError, InvokeError};
use crate::facade::ops;
use crate::invocation::Request;
use crate::types::{Identity, ObjectRef};

/// A locator that knows nothing.
///
/// Every lookup answers "not found", so callers released against it see an
/// ordinary miss instead of an error.
#[derive(Debug, Clone, Default)]
pub struct VoidLocator<C: MessageCodec = JsonCodec> {
    codec: C,
}

impl<C: MessageCodec> VoidLocator<C> {
    /// Create a void locator encoding its answers with `codec`.
    pub fn new(codec: C) -> Self {
        Self { codec }
    }

    /// Always `None`.
    pub fn find_object_by_id(&self, _id: &Identity) -> Option<ObjectRef> {
        None
    }

    /// Always `None`.
    pub fn find_adapter_by_id(&self, _adapter_id: &str) -> Option<ObjectRef> {
        None
    }

    /// Always `None`.
    pub fn get_registry(&self) -> Option<ObjectRef> {
        None
    }

    /// Answer a forwarded request: an encoded `None` for the locator
    /// operations, `OperationNotExist` for anything else.
    pub fn dispatch(&self, request: &Request) -> Result<Vec<u8>, DiscoveryError> {
        let answer = match request.operation.as_str() {
            ops::FIND_OBJECT_BY_ID | ops::FIND_ADAPTER_BY_ID | ops::GET_REGISTRY => None,
            other => {
                return Err(InvokeError::OperationNotExist(other.to_string()).into());
            }
        };
        Ok(self.codec.encode::<Option<ObjectRef>>(&answer)?)
    }
}
