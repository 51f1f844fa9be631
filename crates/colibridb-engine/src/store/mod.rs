//! Collection storage: the in-memory document store and its secondary
//! indexes.

pub mod collection;
pub mod index;

pub use collection::{Collection, CollectionState};
pub use index::{IndexSpec, SecondaryIndex};
