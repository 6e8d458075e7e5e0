//! Error types for the Luma session protocol.
//!
//! One enum, the whole taxonomy. Callers match on the variant to decide
//! whether to re-prompt the user (validation), retry the session
//! (connection), or give up and file a ticket (protocol).
//!
//! Note what is *not* here: a declined payment. A decline is a successful
//! protocol exchange whose business outcome happens to be bad news, so it
//! travels on the success path as [`TransactResult::Failure`] — conflating
//! it with transport errors is how integrators end up retrying charges.
//!
//! [`TransactResult::Failure`]: crate::protocol::TransactResult::Failure

use std::time::Duration;

use thiserror::Error;

use crate::crypto::CryptoError;

/// Errors surfaced by the public SDK operations.
#[derive(Debug, Error)]
pub enum SdkError {
    /// The API key is malformed. Fatal at construction — nothing downstream
    /// can work without valid routing parts.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The bootstrap token fetch failed (network, HTTP status, or body shape).
    #[error("token service error: {0}")]
    TokenService(String),

    /// The device attestation collaborator failed to produce a blob.
    #[error("attestation error: {0}")]
    Attestation(String),

    /// The socket could not be established, or dropped underneath an
    /// in-flight operation.
    #[error("connection error: {0}")]
    Connection(String),

    /// The caller attempted an operation that its local state does not
    /// permit: no valid visible instrument, ambiguous instruments, missing
    /// fee for service-fee mode, cash tokenization. Rejected before any
    /// network activity.
    #[error("validation error: {0}")]
    Validation(String),

    /// The server answered with an `error` message, an unparseable payload,
    /// or a message that violates the protocol sequence.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A new operation was requested while another is pending. Calls are
    /// rejected, not queued.
    #[error("transaction in progress")]
    InFlight,

    /// The coordinator already delivered a terminal transaction outcome;
    /// `reset_session()` is required before starting another.
    #[error("action already complete")]
    AlreadyComplete,

    /// The server did not answer within the response deadline. The pending
    /// expectation has been withdrawn; the session may need a reset.
    #[error("no response within {0:?}")]
    ResponseTimeout(Duration),

    /// Sealing or opening a message body failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// A wire message failed to serialize or deserialize.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SdkError {
    /// Returns `true` for errors that tear down the session when a host
    /// token had been established (the caller should expect a reset).
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            SdkError::Connection(_)
                | SdkError::Protocol(_)
                | SdkError::ResponseTimeout(_)
                | SdkError::Crypto(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_do_not_tear_down_the_session() {
        assert!(!SdkError::Validation("no instrument".into()).is_session_fatal());
        assert!(!SdkError::InFlight.is_session_fatal());
        assert!(!SdkError::AlreadyComplete.is_session_fatal());
    }

    #[test]
    fn wire_level_errors_are_session_fatal() {
        assert!(SdkError::Connection("gone".into()).is_session_fatal());
        assert!(SdkError::Protocol("bad frame".into()).is_session_fatal());
        assert!(SdkError::ResponseTimeout(Duration::from_secs(30)).is_session_fatal());
    }

    #[test]
    fn display_messages_are_stable() {
        // Integrators string-match these more than they should. Keep them.
        assert_eq!(SdkError::InFlight.to_string(), "transaction in progress");
        assert_eq!(
            SdkError::AlreadyComplete.to_string(),
            "action already complete"
        );
    }
}
