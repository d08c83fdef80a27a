//! Error taxonomy for the core.
//!
//! Errors are classified by kind, not by call site. The completer never
//! surfaces errors through this type (malformed input yields an invalid
//! [`CompletionResult`](crate::repair::CompletionResult) with a trace);
//! these variants cover path parsing, session lifecycle, capacity limits,
//! the event bus, and cancellation.

use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq)]
pub enum CoreError {
    #[error("bad path: {0}")]
    BadPath(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("session closed: {0}")]
    SessionClosed(String),

    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    #[error("parse unrecoverable: {0}")]
    ParseUnrecoverable(String),

    #[error("subscriber overflow: dropped {dropped} events")]
    SubscriberOverflow { dropped: u64 },

    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Short machine code for logging and the wire `error.code` field.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::BadPath(_) => "bad_path",
            Self::NotFound(_) => "not_found",
            Self::SessionClosed(_) => "session_closed",
            Self::CapacityExceeded(_) => "capacity_exceeded",
            Self::ParseUnrecoverable(_) => "parse_unrecoverable",
            Self::SubscriberOverflow { .. } => "subscriber_overflow",
            Self::Cancelled => "cancelled",
            Self::Internal(_) => "internal",
        }
    }

    /// Whether the caller can retry or correct the operation.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::BadPath(_)
                | Self::NotFound(_)
                | Self::SubscriberOverflow { .. }
                | Self::CapacityExceeded(_)
        )
    }
}
