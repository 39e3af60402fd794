use thiserror::Error;

use order_shared::{DecodeError, EncodeError, EntityId, EntityKind, ProtocolError};

/// Errors produced by the client engine.
#[derive(Error, Debug)]
pub enum ClientError {
    /// An incoming record disagrees with the cached record's kind for the same id.
    #[error("Merge conflict: entity {id} is cached as {cached} but arrived as {incoming}")]
    MergeConflict {
        id: EntityId,
        cached: EntityKind,
        incoming: EntityKind,
    },

    /// Malformed inbound bytes.
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),

    /// A request could not be built from the caller's arguments.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The dispatcher task is no longer running.
    #[error("Session task has stopped")]
    SessionClosed,
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Transport channel closed")]
    Closed,

    #[error("Failed to encode outbound message: {0}")]
    Encode(#[from] EncodeError),
}

/// A transfer ended without delivering its payload.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Transfer failed: {reason}")]
pub struct TransferFailure {
    pub reason: String,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ClientError>;
