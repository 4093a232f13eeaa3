#![forbid(unsafe_code)]

//! Stable arena identifiers for schema objects.
//!
//! Entities and relationships reference each other cyclically, so the schema
//! stores them in flat vectors and links them through these indices.

use std::fmt;

macro_rules! arena_id {
    ($(#[$meta:meta])* $name:ident, $tag:literal) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub u32);

        impl $name {
            /// Returns the arena slot this id points at.
            #[inline]
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($tag, "#{}"), self.0)
            }
        }
    };
}

arena_id!(
    /// Index of an [`Entity`](crate::schema::Entity) in the schema arena.
    EntityId,
    "entity"
);
arena_id!(
    /// Index of a [`Relationship`](crate::schema::Relationship) in the schema arena.
    RelationshipId,
    "relationship"
);
arena_id!(
    /// Index of an interface or union in the schema arena.
    AbstractId,
    "abstract"
);
