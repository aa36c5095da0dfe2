//! Error types for the dynamic provider host.

use thiserror::Error;

/// Errors surfaced by the host or raised by resource handlers.
///
/// Every variant converts into a `tonic::Status`, so failures reach the
/// engine as a failed RPC rather than a process fault.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The property bag carries no usable `__provider` reference.
    #[error("missing handler reference: {0}")]
    MissingHandler(String),

    /// The handler reference names nothing registered, or its factory failed.
    #[error("failed to load handler: {0}")]
    HandlerLoad(String),

    /// The handler does not implement the requested capability.
    #[error("handler does not implement {0}")]
    UnsupportedOperation(String),

    /// `Invoke` was called. Function invocation is not part of this protocol;
    /// the message names the requested token.
    #[error("unknown function {0}")]
    UnsupportedFunction(String),

    /// The caller broke a protocol contract, e.g. requested an update across
    /// a provider change instead of a replacement.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// A property bag failed to encode or decode.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A gRPC transport error occurred while binding or serving.
    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// An arbitrary failure raised by handler code, message carried verbatim.
    #[error("{0}")]
    Handler(String),
}

impl ProviderError {
    /// A handler-raised failure with the given message.
    pub fn handler(msg: impl Into<String>) -> Self {
        Self::Handler(msg.into())
    }
}

impl From<ProviderError> for tonic::Status {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::MissingHandler(_) => tonic::Status::invalid_argument(err.to_string()),
            ProviderError::HandlerLoad(_) => tonic::Status::failed_precondition(err.to_string()),
            ProviderError::UnsupportedOperation(_) => tonic::Status::unimplemented(err.to_string()),
            ProviderError::UnsupportedFunction(_) => tonic::Status::unimplemented(err.to_string()),
            ProviderError::InvariantViolation(_) => tonic::Status::internal(err.to_string()),
            ProviderError::Serialization(_) => tonic::Status::invalid_argument(err.to_string()),
            ProviderError::Transport(_) => tonic::Status::unavailable(err.to_string()),
            ProviderError::Handler(msg) => tonic::Status::unknown(msg),
        }
    }
}
