//! Error types shared by the store, the placement strategies and the transports.

use std::time::Duration;

use thiserror::Error;

use crate::membership::types::NodeId;
use crate::storage::protocol::RequestId;

/// Failures surfaced by the membership/transport substrate.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("endpoint is not connected to its group")]
    NotConnected,

    #[error("endpoint is already connected")]
    AlreadyConnected,

    #[error("unknown destination {0}")]
    UnknownDestination(NodeId),

    #[error("payload of {size} bytes exceeds the {limit} byte frame limit")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("destination {0} disconnected")]
    Disconnected(NodeId),

    #[error("io error: {0}")]
    Io(String),

    #[error("codec error: {0}")]
    Codec(String),
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        TransportError::Io(e.to_string())
    }
}

impl From<bincode::Error> for TransportError {
    fn from(e: bincode::Error) -> Self {
        TransportError::Codec(e.to_string())
    }
}

/// Errors returned by [`Store`](crate::storage::store::Store) operations and
/// by the inbound command path.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// No cluster members are known, so no key has an owner.
    #[error("membership view is empty")]
    EmptyView,

    /// A remote Get/Put received no Reply within the allotted window.
    #[error("request {request_id} to {owner} timed out after {timeout:?}")]
    RequestTimeout {
        owner: NodeId,
        request_id: RequestId,
        timeout: Duration,
    },

    /// An inbound envelope carried a tag this node does not understand.
    #[error("unsupported command tag {0}")]
    UnsupportedCommand(u32),

    /// A Reply arrived for a request that is no longer pending.
    #[error("no pending request {0} for reply")]
    UnmatchedReply(RequestId),

    #[error("store is not open")]
    NotOpen,

    #[error("store closed while the request was pending")]
    Closed,

    #[error("failed to join the membership group: {0}")]
    Join(TransportError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("codec error: {0}")]
    Codec(String),
}

impl From<bincode::Error> for StoreError {
    fn from(e: bincode::Error) -> Self {
        StoreError::Codec(e.to_string())
    }
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;
