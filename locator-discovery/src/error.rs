//! Error types for locator discovery.

use thiserror::Error;

use crate::codec::CodecError;
use crate::types::EndpointParseError;

/// Invalid discovery configuration. Fatal at startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A property is not an integer.
    #[error("property `{property}` is not a number: `{value}`")]
    InvalidNumber { property: String, value: String },

    /// A duration or count property is negative.
    #[error("property `{property}` must not be negative (got {value})")]
    Negative { property: String, value: i64 },

    /// The multicast port is zero or out of range.
    #[error("invalid lookup port {0}")]
    InvalidPort(i64),

    /// An address or interface property is not an IP address.
    #[error("property `{property}` is not an IP address: `{value}`")]
    InvalidAddress { property: String, value: String },

    /// An endpoint list property cannot be parsed.
    #[error("property `{property}` has an invalid endpoint: {source}")]
    Endpoint {
        property: String,
        #[source]
        source: EndpointParseError,
    },

    /// No lookup channel could be derived from the configuration.
    #[error("no lookup endpoints configured")]
    NoLookupChannels,
}

/// How the forwarding layer reacts to an [`InvokeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The target is gone or the request itself was rejected; surface it.
    Permanent,
    /// The locator could not be reached; re-resolve and retry once.
    Unreachable,
}

/// Errors reported by the transport when invoking a locator.
///
/// `Clone` so a forwarded invocation can remember the error of its first
/// attempt and surface it if the retry cannot make progress.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvokeError {
    /// The target object does not exist.
    #[error("object does not exist")]
    ObjectNotExist,

    /// The target facet does not exist.
    #[error("facet does not exist: {0}")]
    FacetNotExist(String),

    /// The target does not implement the operation.
    #[error("operation does not exist: {0}")]
    OperationNotExist(String),

    /// The server raised an exception the client cannot decode.
    #[error("unknown exception: {0}")]
    Unknown(String),

    /// The reference has no usable endpoint.
    #[error("no endpoint")]
    NoEndpoint,

    /// The local adapter serving the call was deactivated.
    #[error("object adapter deactivated")]
    AdapterDeactivated,

    /// The local runtime is shutting down.
    #[error("communicator destroyed")]
    CommunicatorDestroyed,

    /// An established connection was lost.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// The connection attempt was refused.
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    /// The invocation timed out.
    #[error("invocation timed out")]
    Timeout,

    /// Any other local failure.
    #[error("invocation failed: {0}")]
    Other(String),
}

impl InvokeError {
    /// Classify this error for the single-hop retry.
    pub fn class(&self) -> ErrorClass {
        match self {
            InvokeError::ObjectNotExist
            | InvokeError::FacetNotExist(_)
            | InvokeError::OperationNotExist(_)
            | InvokeError::Unknown(_)
            | InvokeError::NoEndpoint
            | InvokeError::AdapterDeactivated
            | InvokeError::CommunicatorDestroyed => ErrorClass::Permanent,
            InvokeError::ConnectionLost(_)
            | InvokeError::ConnectionRefused(_)
            | InvokeError::Timeout
            | InvokeError::Other(_) => ErrorClass::Unreachable,
        }
    }

    /// The error the caller sees for a permanent failure.
    ///
    /// A missing endpoint or a local shutdown means the locator cannot answer,
    /// which callers observe as an ordinary "object does not exist".
    pub fn surfaced(self) -> InvokeError {
        match self {
            InvokeError::NoEndpoint
            | InvokeError::AdapterDeactivated
            | InvokeError::CommunicatorDestroyed => InvokeError::ObjectNotExist,
            other => other,
        }
    }
}

impl From<std::io::Error> for InvokeError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::ConnectionRefused => {
                InvokeError::ConnectionRefused(err.to_string())
            }
            std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof => InvokeError::ConnectionLost(err.to_string()),
            std::io::ErrorKind::TimedOut => InvokeError::Timeout,
            _ => InvokeError::Other(err.to_string()),
        }
    }
}

/// Errors returned by the locator facade and the discovery plugin.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The forwarded invocation failed.
    #[error("invocation error: {0}")]
    Invoke(#[from] InvokeError),

    /// Arguments or results could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The configuration is invalid.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A socket could not be set up.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The discovery task has stopped.
    #[error("locator discovery shut down")]
    Shutdown,
}
