//! rf-core: Shared arrangement document model for ReelForge Collab
//!
//! This crate provides the types every other crate exchanges: tracks,
//! regions with their notes, effect chains, instrument parameters,
//! markers and project settings, plus the partial-update types that travel
//! on the wire when only some fields change.

mod error;
mod ids;
mod track;
mod region;
mod note;
mod effects;
mod project;
mod marker;

pub use error::*;
pub use ids::*;
pub use track::*;
pub use region::*;
pub use note::*;
pub use effects::*;
pub use project::*;
pub use marker::*;

