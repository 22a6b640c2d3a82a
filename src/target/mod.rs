//! Target catalog parsing and deterministic target selection.

mod catalog;
mod selector;

pub use catalog::{
    Abi, BLOCK_SEPARATOR, Tag, TagAbiPair, Target, TargetCatalog, TargetKind, TargetParser,
};
pub use selector::{Selection, TargetSelector};
