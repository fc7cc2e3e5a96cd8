//! Storage Network Protocol
//!
//! Two vocabularies live here:
//! - the inter-node [`Command`] envelope (Get, Put, Reply, BulkTransfer), encoded
//!   with bincode and carried by the [`Transport`](crate::transport::Transport);
//! - the HTTP Data Transfer Objects served by the node binary.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, StoreError};
use crate::membership::types::NodeId;

// --- API Endpoints ---

/// Public endpoint for client write requests.
pub const ENDPOINT_PUT: &str = "/put";
/// Public endpoint for client read requests.
pub const ENDPOINT_GET: &str = "/get";
/// Node and view statistics.
pub const ENDPOINT_STATS: &str = "/stats";

// --- Inter-node envelope ---

/// Correlates a remote Get/Put with its Reply. Unique per issuing node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Wire tag of a [`Command`]; the first four bytes of every envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum CommandTag {
    Get = 0,
    Put = 1,
    Reply = 2,
    BulkTransfer = 3,
}

impl CommandTag {
    pub fn from_wire(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(CommandTag::Get),
            1 => Some(CommandTag::Put),
            2 => Some(CommandTag::Reply),
            3 => Some(CommandTag::BulkTransfer),
            _ => None,
        }
    }
}

impl fmt::Display for CommandTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandTag::Get => "Get",
            CommandTag::Put => "Put",
            CommandTag::Reply => "Reply",
            CommandTag::BulkTransfer => "BulkTransfer",
        };
        f.write_str(name)
    }
}

/// Everything one store node says to another.
///
/// Variant order is the wire tag order and must match [`CommandTag`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command<K, V> {
    Get {
        request_id: RequestId,
        key: K,
    },
    Put {
        request_id: RequestId,
        key: K,
        value: V,
    },
    /// Answer to a Get (current value) or Put (previous value).
    Reply {
        request_id: RequestId,
        value: Option<V>,
    },
    /// Entries migrating to the receiver.
    ///
    /// `members` is the member set the sender planned against. View versions are
    /// only comparable within one node, so receivers judge a transfer by this set.
    BulkTransfer {
        view_version: u64,
        members: Vec<NodeId>,
        entries: Vec<(K, V)>,
    },
}

impl<K, V> Command<K, V>
where
    K: Serialize + DeserializeOwned,
    V: Serialize + DeserializeOwned,
{
    pub fn tag(&self) -> CommandTag {
        match self {
            Command::Get { .. } => CommandTag::Get,
            Command::Put { .. } => CommandTag::Put,
            Command::Reply { .. } => CommandTag::Reply,
            Command::BulkTransfer { .. } => CommandTag::BulkTransfer,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Decodes an envelope, reporting unknown tags as `UnsupportedCommand`
    /// rather than as a generic codec failure.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let raw_tag = bytes
            .get(..4)
            .and_then(|head| <[u8; 4]>::try_from(head).ok())
            .map(u32::from_le_bytes)
            .ok_or_else(|| StoreError::Codec(format!("envelope of {} bytes", bytes.len())))?;

        if CommandTag::from_wire(raw_tag).is_none() {
            return Err(StoreError::UnsupportedCommand(raw_tag));
        }

        Ok(bincode::deserialize(bytes)?)
    }
}

// --- HTTP Data Transfer Objects ---

/// Client write request. The value travels as JSON text.
#[derive(Debug, Serialize, Deserialize)]
pub struct PutRequest {
    pub key: String,
    pub value_json: String,
}

/// Acknowledgment for a write, carrying the value it replaced.
#[derive(Debug, Serialize, Deserialize)]
pub struct PutResponse {
    pub success: bool,
    pub previous_json: Option<String>,
    pub error: Option<String>,
}

/// Standard response for data retrieval.
#[derive(Debug, Serialize, Deserialize)]
pub struct GetResponse {
    /// `None` indicates the key does not exist (or the request failed, see `error`).
    pub value_json: Option<String>,
    pub error: Option<String>,
}
