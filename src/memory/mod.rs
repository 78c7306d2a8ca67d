//! Resource layer
//!
//! Every node of a tree lives in one [`SlotArena`]; every owned string lives
//! in one [`StringPool`]. The [`ResourceManager`] owns both and is the only
//! component allowed to mutate them.
//!
//! # Architecture
//!
//! ```text
//! ResourceManager (overflowed flag)
//!   ├─→ SlotArena   [slot 0][slot 1][slot 2]…   → free list threaded through `next`
//!   ├─→ StringPool  node("id") → node("name")   → refcounted, deduplicated
//!   └─→ Rc<dyn Allocator>                       → shared with both pools
//! ```
//!
//! Slots reference each other by [`SlotId`], never by address, so shrinking
//! the arena moves no logical reference. Allocation failures never panic:
//! they raise the manager's overflow flag and hand back `None`.

pub mod allocator;
pub mod arena;
pub mod resource_manager;
pub mod slot;
pub mod string_builder;
pub mod string_pool;
pub mod usage;

use std::fmt;

pub use allocator::{Allocator, DefaultAllocator, BLOCK_ALIGN};
pub use arena::{Compaction, SlotArena};
pub use resource_manager::{PoolStats, ResourceManager};
pub use slot::{SlotId, SlotKind, VariantContent, VariantSlot, NULL_ID};
pub use string_builder::StringBuilder;
pub use string_pool::{PendingString, StringNode, StringPool, StringRef};
pub use usage::{
    bytes_to_slots, sizeof_array, sizeof_object, sizeof_string, slots_to_bytes, SLOT_SIZE,
};

/// Which pool failed to satisfy a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolKind {
    Slots,
    Strings,
}

impl fmt::Display for PoolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolKind::Slots => write!(f, "slot arena"),
            PoolKind::Strings => write!(f, "string pool"),
        }
    }
}
