// SPDX-License-Identifier: MIT
//! Error taxonomy for the client runtime.
//!
//! Three classes matter to callers:
//!
//! - [`ClientError::Transport`] — the network was unreachable or the service
//!   answered with a non-2xx status. Surfaced to the user as a visible,
//!   non-fatal notice. The triggering action is never retried automatically;
//!   the user retries it (subscription reconnect is the one exception, and it
//!   lives below this layer in the push transport).
//! - [`ClientError::Validation`] — rejected at the interaction boundary,
//!   before any network call.
//! - [`ClientError::State`] — the operation is not meaningful in the current
//!   session state (completing twice, replying to a closed check-in). These
//!   reflect benign races: callers are expected to treat them as no-ops
//!   rather than show them to the user.
//!
//! A missed check-in deadline is not an error anywhere in this crate — it is
//! the defined default-response path.
//!
//! No remote-call failure leaves partially mutated state behind; the prior
//! in-memory state is always intact and the action retriable.

/// Errors returned by the client runtime.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Network unreachable, connection refused, or non-2xx response.
    #[error("transport failure: {0}")]
    Transport(String),

    /// Input rejected before it reached the network.
    #[error("invalid input: {0}")]
    Validation(String),

    /// Operation not valid in the current state. Benign; callers should
    /// treat this as a no-op.
    #[error("state violation: {0}")]
    State(String),

    /// The service answered 2xx but the body did not match the wire contract.
    #[error("malformed service response: {0}")]
    Protocol(String),
}

impl ClientError {
    /// `true` for errors the presentation layer should swallow silently.
    pub fn is_benign(&self) -> bool {
        matches!(self, Self::State(_))
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Protocol(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
