//! Relay server: routing, HTTP/WebSocket surface, TLS loading

pub mod router;
pub mod server;
pub mod tls;

pub use router::{ConnCtx, MessageRouter, RouterAction};
pub use server::RelayServer;
