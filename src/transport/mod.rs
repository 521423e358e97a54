// SPDX-FileCopyrightText: 2026 Bagpipe Contributors
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Transport ports: the seam between the engine and whatever pub/sub
//! middleware carries the live traffic.
//!
//! The engine only ever sees opaque byte payloads; typed serialization
//! belongs to the adapter behind these traits. A factory handle is
//! passed into the recorder and player at construction and must outlive
//! them; there is no process-wide transport state in the engine.

pub mod memory;

use std::sync::Arc;

use crate::core::Result;

/// Callback invoked by a transport adapter with each received payload.
pub type MessageCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// A live subscription. Dropping the subscriber cancels it; no further
/// callbacks fire afterwards.
pub trait Subscriber: Send {
    /// Topic this subscription is attached to.
    fn topic_name(&self) -> &str;
}

/// A live publication endpoint.
pub trait Publisher: Send {
    /// Topic this publisher writes to.
    fn topic_name(&self) -> &str;

    /// Hand a payload to the transport. Returns `false` when the
    /// transport rejected it.
    fn publish(&self, payload: &[u8]) -> bool;
}

/// Factory for transport endpoints; the sole integration point with the
/// messaging middleware in use.
pub trait TransportFactory: Send + Sync {
    /// Create a subscription delivering raw payloads to `callback`.
    fn create_subscriber(&self, topic: &str, callback: MessageCallback)
        -> Result<Box<dyn Subscriber>>;

    /// Create a publication endpoint for `topic`.
    fn create_publisher(&self, topic: &str) -> Result<Box<dyn Publisher>>;
}

pub use memory::MemoryTransport;
