// jsonslab - arena-backed storage for dynamically typed JSON trees
//
// Every value of a tree is a fixed-size slot in one pre-sized arena, and
// every owned string is a refcounted node in one deduplicating pool.

#![warn(rust_2018_idioms)]

pub mod collection;
pub mod config;
pub mod memory;

// Re-exports for convenience
pub use collection::{ArrayData, CollectionData, CollectionIterator, ObjectData};
pub use crate::config::PoolConfig;
pub use memory::{
    Allocator, Compaction, DefaultAllocator, PoolStats, ResourceManager, SlotId, SlotKind,
    StringBuilder, StringRef, VariantContent, NULL_ID,
};

/// jsonslab error types
pub mod error {
    use crate::memory::{PoolKind, SlotId};
    use thiserror::Error;

    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum Error {
        #[error("{pool} exhausted: {requested} bytes requested")]
        Exhausted { pool: PoolKind, requested: usize },

        #[error("Invalid slot id: {0}")]
        InvalidId(SlotId),

        #[error("Corrupted pool: {0}")]
        Corrupted(String),

        #[error("Configuration error: {0}")]
        Config(String),
    }

    pub type Result<T> = std::result::Result<T, Error>;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let error = error::Error::Exhausted {
            pool: memory::PoolKind::Strings,
            requested: 40,
        };
        assert_eq!(error.to_string(), "string pool exhausted: 40 bytes requested");
        assert_eq!(
            error::Error::InvalidId(SlotId::new(4)).to_string(),
            "Invalid slot id: Slot(4)"
        );
    }

    #[test]
    fn test_version_format() {
        assert!(!VERSION.is_empty());
    }
}
