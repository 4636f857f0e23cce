//! # Integration Tests Crate
//!
//! End-to-end scenarios exercising complete bus instances talking to each
//! other, both over the in-process transport and over real loopback HTTP
//! servers on ephemeral ports.
//!
//! ## Structure
//!
//! ```text
//! integration-tests/
//! └── src/
//!     ├── lib.rs        # This file
//!     ├── harness.rs    # Test payload types and bus-pair construction
//!     ├── flows.rs      # Single-process flows over the in-memory transport
//!     ├── send_reply.rs # Send/reply, auth failure, and no-ack over HTTP
//!     ├── pubsub.rs     # Publish fan-out, TTL expiry, renewal
//!     └── durability.rs # Durable sends surviving process restart
//! ```
//!
//! Timing-sensitive scenarios run with TTLs and retry delays scaled down to
//! tens of milliseconds; every wait is bounded by an explicit timeout.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod harness;

#[cfg(test)]
mod durability;
#[cfg(test)]
mod flows;
#[cfg(test)]
mod pubsub;
#[cfg(test)]
mod send_reply;
