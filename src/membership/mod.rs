//! Membership Module
//!
//! Who is in the cluster, and which version of that answer a node acts on.
//!
//! ## Contents
//! - [`types`]: node identity, the versioned [`MembershipView`](types::MembershipView)
//!   handed to stores, and the gossip wire format.
//! - [`service`]: a UDP gossip service (SWIM-style Join / Ping / Ack / Suspect / Alive /
//!   Leave) that detects failures through Suspect and Dead timeouts, settles disputes with
//!   incarnation numbers, and publishes a new view whenever the set of non-dead members
//!   changes.

pub mod service;
pub mod types;

#[cfg(test)]
mod tests;
