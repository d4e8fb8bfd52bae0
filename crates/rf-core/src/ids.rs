//! Typed identifiers
//!
//! Every entity is addressed by an opaque string id on the wire. The newtypes
//! keep a region id from being handed to a track lookup by accident while
//! serializing as plain strings.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Fresh random id (UUID v4)
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            #[inline]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

define_id!(
    /// Track identifier
    TrackId
);
define_id!(
    /// Region identifier
    RegionId
);
define_id!(
    /// Note identifier (unique within its parent region)
    NoteId
);
define_id!(
    /// Marker identifier
    MarkerId
);
define_id!(
    /// Participant identifier
    UserId
);
define_id!(
    /// Collaboration room identifier
    RoomId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_serializes_as_plain_string() {
        let id = TrackId::new("T1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"T1\"");
        let back: TrackId = serde_json::from_str("\"T1\"").unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = RegionId::generate();
        let b = RegionId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }
}
