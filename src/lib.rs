//! Partitioned Key-Value Cluster Library
//!
//! This library crate defines the modules that make up a cluster of cooperating
//! in-memory key-value store nodes. It serves as the foundation for the node
//! binary (`main.rs`).
//!
//! ## Architecture Modules
//! - **`membership`**: node identity, versioned membership views and a UDP gossip
//!   protocol (SWIM-like) for discovery and failure detection.
//! - **`placement`**: maps keys to owners under a view (consistent-hash ring or
//!   round robin).
//! - **`transport`**: the substrate a store joins: group membership plus
//!   best-effort payload delivery, in-process or over UDP.
//! - **`storage`**: the store itself: local entries, request proxying to owners,
//!   command execution and rebalancing on membership change.
//! - **`config`** and **`error`**: store settings and the shared error types.

pub mod config;
pub mod error;
pub mod membership;
pub mod placement;
pub mod storage;
pub mod transport;
