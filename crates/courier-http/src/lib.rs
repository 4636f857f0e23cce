//! # Courier HTTP - Transport Adapter
//!
//! The default transport for the courier message bus: a reqwest-based
//! client that delivers messages and subscription requests to peers, and an
//! axum server binding that feeds inbound traffic into the bus.
//!
//! ## Wire protocol
//!
//! - `POST {peer}/message/{urlEncodedMessageId}` — body is the raw message
//!   content, request headers carry the message headers. 202 on accept,
//!   401 unauthorized, 422 not acknowledged, 400 invalid, 500 internal.
//! - `POST {peer}/topic/{urlEncodedTopic}/subscriber?uri={u}[&ttl={secs}]`
//!   — subscribe or renew.
//! - `DELETE` on the same path — unsubscribe.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod client;
pub mod server;

pub use client::{HttpTransport, HttpTransportConfig};
pub use server::{
    router, AllowAnonymous, Authenticator, BasicAuthenticator, HttpServer, HttpServerConfig,
    ServerState,
};
