//! Pluggable encoding of invocation arguments and results.
//!
//! Forwarded invocations carry their arguments as opaque bytes; the facade
//! only encodes and decodes them for its typed helpers
//! ([`LocatorFacade::find_object_by_id`](crate::LocatorFacade::find_object_by_id)
//! and friends) and for the fallback's "not found" answers. [`JsonCodec`] is
//! the default.
//!
//! # Example
//!
//! ```rust
//! use locator_discovery::{JsonCodec, MessageCodec};
//!
//! let codec = JsonCodec;
//! let bytes = codec.encode(&Some(42u32)).unwrap();
//! let decoded: Option<u32> = codec.decode(&bytes).unwrap();
//! assert_eq!(decoded, Some(42));
//! ```

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Error type for codec operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Failed to encode a value to bytes.
    #[error("encode error: {0}")]
    Encode(Box<dyn std::error::Error + Send + Sync>),
    /// Failed to decode bytes to a value.
    #[error("decode error: {0}")]
    Decode(Box<dyn std::error::Error + Send + Sync>),
}

/// Serialization format for argument and result payloads.
///
/// The facade is shared across tasks, so codecs must be `Send + Sync`.
pub trait MessageCodec: Clone + Send + Sync + 'static {
    /// Encode a serializable value to bytes.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Encode` if serialization fails.
    fn encode<T: Serialize>(&self, msg: &T) -> Result<Vec<u8>, CodecError>;

    /// Decode bytes to a deserializable value.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Decode` if deserialization fails.
    fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, CodecError>;
}

/// JSON codec using serde_json.
#[derive(Clone, Default, Debug, Copy)]
pub struct JsonCodec;

impl MessageCodec for JsonCodec {
    fn encode<T: Serialize>(&self, msg: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(msg).map_err(|e| CodecError::Encode(Box::new(e)))
    }

    fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(buf).map_err(|e| CodecError::Decode(Box::new(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Endpoint, Identity, ObjectRef};

    #[test]
    fn test_json_codec_none_is_null() {
        let bytes = JsonCodec.encode(&None::<ObjectRef>).expect("encode");
        assert_eq!(&bytes, b"null");
    }

    #[test]
    fn test_json_codec_object_ref() {
        let obj = ObjectRef::new(Identity::new("hello", ""), vec![Endpoint::tcp("h", 1)]);
        let bytes = JsonCodec.encode(&Some(obj.clone())).expect("encode");
        let decoded: Option<ObjectRef> = JsonCodec.decode(&bytes).expect("decode");
        assert_eq!(decoded, Some(obj));
    }

    #[test]
    fn test_json_codec_decode_error() {
        let result: Result<Identity, _> = JsonCodec.decode(b"not json");
        assert!(matches!(result, Err(CodecError::Decode(_))));
        assert!(
            result
                .expect_err("decode should fail")
                .to_string()
                .contains("decode error")
        );
    }
}
