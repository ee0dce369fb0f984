pub mod relationship_linker;

pub use relationship_linker::{RelationshipLinker, RelationshipLinkerStats};
