//! Client-side call error types.
//!
//! This module provides [`ClientError`], the error type for every fallible
//! call operation.

use duplex_rpc_core::{Code, Status};

/// Errors surfaced by a call.
///
/// Only [`ClientError::ChannelClosed`], [`ClientError::Encode`] and
/// [`ClientError::AlreadyConsumed`] are raised at the call site. Everything
/// else describes how a call terminated and reaches the caller through the
/// terminal status path.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ClientError {
    /// The request channel no longer accepts writes (after `complete()` or
    /// after the call terminated).
    #[error("request channel closed")]
    ChannelClosed,

    /// The peer finished the call with a non-OK status.
    #[error("{0}")]
    Status(Status),

    /// The call was cancelled, locally or by deadline.
    #[error("call cancelled: {0}")]
    Cancelled(Status),

    /// Transport-level failure (connection lost, reset, transport closed).
    #[error("transport error: {0}")]
    Transport(String),

    /// The transport violated the call protocol (ordering or cardinality).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Message encoding error.
    #[error("encode error: {0}")]
    Encode(String),

    /// Message decoding error.
    #[error("decode error: {0}")]
    Decode(String),

    /// The response sequence already has a consumer.
    #[error("response stream already consumed")]
    AlreadyConsumed,

    /// The method descriptor does not match the requested call shape.
    #[error("invalid call: {0}")]
    InvalidCall(String),
}

impl ClientError {
    /// Get the status code this error corresponds to.
    ///
    /// - Status / Cancelled: the carried status code
    /// - Transport: `Unavailable`
    /// - Protocol / Encode / Decode: `Internal`
    /// - ChannelClosed / AlreadyConsumed: `FailedPrecondition`
    /// - InvalidCall: `InvalidArgument`
    pub fn code(&self) -> Code {
        match self {
            ClientError::Status(status) | ClientError::Cancelled(status) => status.code(),
            ClientError::Transport(_) => Code::Unavailable,
            ClientError::Protocol(_) | ClientError::Encode(_) | ClientError::Decode(_) => {
                Code::Internal
            }
            ClientError::ChannelClosed | ClientError::AlreadyConsumed => Code::FailedPrecondition,
            ClientError::InvalidCall(_) => Code::InvalidArgument,
        }
    }

    /// Get the error message.
    pub fn message(&self) -> String {
        match self {
            ClientError::Status(status) | ClientError::Cancelled(status) => {
                status.message().to_string()
            }
            ClientError::Transport(msg)
            | ClientError::Protocol(msg)
            | ClientError::Encode(msg)
            | ClientError::Decode(msg)
            | ClientError::InvalidCall(msg) => msg.clone(),
            ClientError::ChannelClosed | ClientError::AlreadyConsumed => self.to_string(),
        }
    }

    /// The terminal status equivalent to this error.
    pub fn status(&self) -> Status {
        match self {
            ClientError::Status(status) | ClientError::Cancelled(status) => status.clone(),
            _ => Status::new(self.code(), self.message()),
        }
    }

    /// Returns `true` if the call ended through cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ClientError::Cancelled(_))
    }
}

impl From<Status> for ClientError {
    fn from(status: Status) -> Self {
        ClientError::Status(status)
    }
}
