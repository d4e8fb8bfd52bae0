//! # rf-connector: relay connector
//!
//! Live connection to the collaboration relay via WebSocket.
//!
//! ## Features
//!
//! - Typed relay protocol (outbound/inbound envelopes, snapshots)
//! - `Transport` seam between the sync layer and the socket
//! - Automatic reconnection

pub mod connector;
pub mod protocol;

pub use connector::*;
pub use protocol::*;
