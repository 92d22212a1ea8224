//! Session pairing state and call-mode gating

pub mod gate;
pub mod registry;

pub use registry::{Connection, OutboundFrame, SessionRegistry, SessionStatus};
