//! Exact memory accounting
//!
//! These helpers let a caller compute the bytes a tree will need before
//! building it. [`ResourceManager::size`](super::ResourceManager::size)
//! reports usage in the same units.

use super::slot::{SlotId, VariantSlot};
use super::string_pool::StringNode;

/// Bytes occupied by one slot
pub const SLOT_SIZE: usize = std::mem::size_of::<VariantSlot>();

pub const fn slots_to_bytes(slots: usize) -> usize {
    slots.saturating_mul(SLOT_SIZE)
}

/// Number of whole slots that fit in `bytes`
pub const fn bytes_to_slots(bytes: usize) -> usize {
    let slots = bytes / SLOT_SIZE;
    if slots > SlotId::MAX_SLOTS {
        SlotId::MAX_SLOTS
    } else {
        slots
    }
}

/// Bytes used by the elements of an array with `elements` scalar members
pub const fn sizeof_array(elements: usize) -> usize {
    slots_to_bytes(elements)
}

/// Bytes used by the members of an object with `members` key/value pairs
pub const fn sizeof_object(members: usize) -> usize {
    slots_to_bytes(members.saturating_mul(2))
}

/// Bytes used by one owned string of `length` bytes
pub const fn sizeof_string(length: usize) -> usize {
    StringNode::size_for(length)
}
