//! rf-state: Local document state for collaborative sessions
//!
//! - Observable entity stores (get / patch / replace / subscribe)
//! - The `Document` aggregate holding every store of one arrangement
//! - The lease table arbitrating exclusive edit rights
//! - Presence of the other participants

mod store;
mod document;
mod locks;
mod presence;

pub use store::*;
pub use document::*;
pub use locks::*;
pub use presence::*;
