//! Error types for capwire.
//!
//! Three layers of failure are kept apart:
//! - [`SystemError`]: result codes of the handle kernel (transport errors)
//! - [`ValidationError`]: an untrusted message failed wire validation
//! - [`CapwireError`]: the main error for the dispatch layer, which wraps the
//!   two above and adds connection and application failures

use thiserror::Error;

/// Result codes returned by the capability kernel.
///
/// Success is `Ok(..)`; every other code of the closed enumeration is a
/// variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum SystemError {
    /// The operation cannot complete now; wait for a signal and retry.
    #[error("should wait")]
    ShouldWait,

    /// The deadline passed before the wait was satisfied.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The operation can never succeed in the current state (peer closed,
    /// signal unsatisfiable, ...).
    #[error("failed precondition")]
    FailedPrecondition,

    /// A handle value or argument is invalid.
    #[error("invalid argument")]
    InvalidArgument,

    /// A configured limit (message size, handle count, ...) was exceeded.
    #[error("resource exhausted")]
    ResourceExhausted,

    /// The operation is not supported for this handle type.
    #[error("unimplemented")]
    Unimplemented,

    /// An all-or-none transfer could not be satisfied.
    #[error("out of range")]
    OutOfRange,

    /// The handle was closed or transferred while the caller waited on it.
    #[error("cancelled")]
    Cancelled,
}

/// Result type alias for kernel operations.
pub type SystemResult<T> = std::result::Result<T, SystemError>;

/// Reasons an untrusted message is rejected by the decoder.
///
/// Every variant is fatal to the whole message: the decoder never returns a
/// partially built value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ValidationError {
    #[error("object is not 8-byte aligned")]
    MisalignedObject,

    #[error("object is out of bounds or overlaps claimed memory")]
    IllegalMemoryRange,

    #[error("unexpected struct header")]
    UnexpectedStructHeader,

    #[error("unexpected array header")]
    UnexpectedArrayHeader,

    #[error("illegal handle index")]
    IllegalHandle,

    #[error("unexpected invalid handle")]
    UnexpectedInvalidHandle,

    #[error("illegal pointer")]
    IllegalPointer,

    #[error("unexpected null pointer")]
    UnexpectedNullPointer,

    #[error("unexpected null union")]
    UnexpectedNullUnion,

    #[error("unexpected union size")]
    UnexpectedUnionSize,

    #[error("unknown union tag {0}")]
    UnknownUnionTag(u32),

    #[error("message header has invalid flags")]
    MessageHeaderInvalidFlags,

    #[error("message header is missing its request id")]
    MessageHeaderMissingRequestId,

    #[error("message header names unknown method {0}")]
    MessageHeaderUnknownMethod(u32),

    #[error("map keys and values have different lengths")]
    DifferentSizedArraysInMap,

    #[error("string is not valid UTF-8")]
    InvalidUtf8,
}

/// Main error type for stub/proxy operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapwireError {
    /// Kernel operation failed.
    #[error("system error: {0}")]
    System(#[from] SystemError),

    /// Incoming message failed validation.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The remote handler reported a typed failure.
    #[error("application error {code}: {message}")]
    Application { code: u32, message: String },

    /// The peer closed its end of the pipe.
    #[error("peer closed")]
    PeerClosed,

    /// The local end was closed, which cancelled the connection.
    #[error("connection cancelled")]
    Cancelled,

    /// A response arrived for a request id with no outstanding call.
    #[error("response for unknown request id {0}")]
    UnknownRequestId(u64),

    /// A proxy received a message that is not a response.
    #[error("unexpected request for method {0} on a proxy")]
    UnexpectedRequest(u32),
}

impl CapwireError {
    /// True for the expected ways a connection ends (peer closed, or local
    /// close), which are not logged as anomalies.
    pub fn is_benign_close(&self) -> bool {
        matches!(self, CapwireError::PeerClosed | CapwireError::Cancelled)
    }
}

/// Result type alias using CapwireError.
pub type Result<T> = std::result::Result<T, CapwireError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_benign_close_kinds() {
        assert!(CapwireError::PeerClosed.is_benign_close());
        assert!(CapwireError::Cancelled.is_benign_close());
        assert!(!CapwireError::UnknownRequestId(3).is_benign_close());
        assert!(!CapwireError::from(ValidationError::IllegalPointer).is_benign_close());
    }

    #[test]
    fn test_display_messages() {
        let err = CapwireError::Application {
            code: 7,
            message: "nope".to_string(),
        };
        assert_eq!(err.to_string(), "application error 7: nope");
        assert_eq!(
            CapwireError::from(ValidationError::UnknownUnionTag(9)).to_string(),
            "validation error: unknown union tag 9"
        );
        assert_eq!(
            CapwireError::from(SystemError::ShouldWait).to_string(),
            "system error: should wait"
        );
    }
}
