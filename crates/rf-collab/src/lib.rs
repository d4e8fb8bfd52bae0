//! rf-collab: Real-time collaboration layer
//!
//! - Throttled batchers for high-frequency edits
//! - The sync coordinator (emit paths, inbound dispatch, echo suppression)
//! - Snapshot reconciliation
//! - The session runner driving it all from one task

mod batcher;
mod clock;
mod config;
mod coordinator;
mod echo;
mod error;
mod host;
mod runner;
mod snapshot;

pub use batcher::*;
pub use clock::*;
pub use config::*;
pub use coordinator::*;
pub use echo::*;
pub use error::*;
pub use host::*;
pub use runner::*;
pub use snapshot::*;
