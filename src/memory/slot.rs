//! Slot types for the variant arena

use super::string_pool::StringRef;
use crate::collection::{ArrayData, ObjectData};
use std::fmt;

/// Dense identifier of a slot in a [`SlotArena`](super::SlotArena)
///
/// Ids are indices, not addresses, so they stay valid when the arena's
/// backing block moves during [`shrink_to_fit`](super::SlotArena::shrink_to_fit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotId(u32);

/// Sentinel terminating every linked list of slots
pub const NULL_ID: SlotId = SlotId(u32::MAX);

impl SlotId {
    /// Same as [`NULL_ID`]
    pub const NULL: SlotId = NULL_ID;

    /// Largest number of slots an arena can address (the last index is the sentinel)
    pub const MAX_SLOTS: usize = u32::MAX as usize;

    /// Create a slot ID from a raw index
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Position of the slot in the arena
    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn is_null(self) -> bool {
        self == NULL_ID
    }

    pub(crate) fn from_index(index: usize) -> Self {
        debug_assert!(index < Self::MAX_SLOTS);
        Self(index as u32)
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "Slot(null)")
        } else {
            write!(f, "Slot({})", self.0)
        }
    }
}

/// Type tag of a live slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotKind {
    Null,
    Bool,
    Int,
    UInt,
    Float,
    OwnedString,
    LinkedString,
    Array,
    Object,
}

/// Payload of a live slot
///
/// Owned strings point into the [`StringPool`](super::StringPool) and hold one
/// reference on their node. Linked strings borrow caller data that outlives
/// the tree and are never pooled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VariantContent {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    OwnedString(StringRef),
    LinkedString(&'static str),
    Array(ArrayData),
    Object(ObjectData),
}

impl VariantContent {
    pub fn kind(&self) -> SlotKind {
        match self {
            VariantContent::Null => SlotKind::Null,
            VariantContent::Bool(_) => SlotKind::Bool,
            VariantContent::Int(_) => SlotKind::Int,
            VariantContent::UInt(_) => SlotKind::UInt,
            VariantContent::Float(_) => SlotKind::Float,
            VariantContent::OwnedString(_) => SlotKind::OwnedString,
            VariantContent::LinkedString(_) => SlotKind::LinkedString,
            VariantContent::Array(_) => SlotKind::Array,
            VariantContent::Object(_) => SlotKind::Object,
        }
    }

    pub fn is_collection(&self) -> bool {
        matches!(self, VariantContent::Array(_) | VariantContent::Object(_))
    }
}

/// Fixed-size arena node
///
/// A live slot carries one [`VariantContent`]. A free slot carries nothing and
/// its `next` field links it into the arena's free list.
#[derive(Debug, Clone, Copy)]
pub struct VariantSlot {
    pub(crate) content: Option<VariantContent>,
    pub(crate) next: SlotId,
}

impl VariantSlot {
    pub(crate) const fn new() -> Self {
        Self {
            content: Some(VariantContent::Null),
            next: NULL_ID,
        }
    }

    pub(crate) const fn free(next: SlotId) -> Self {
        Self {
            content: None,
            next,
        }
    }

    pub(crate) fn is_free(&self) -> bool {
        self.content.is_none()
    }

    /// Content of the slot; free slots are never handed out, so they read as null
    pub fn content(&self) -> &VariantContent {
        match &self.content {
            Some(content) => content,
            None => &VariantContent::Null,
        }
    }

    pub fn kind(&self) -> SlotKind {
        self.content().kind()
    }

    /// Next slot in the owning collection, or [`NULL_ID`]
    pub fn next(&self) -> SlotId {
        self.next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_id_null() {
        assert!(NULL_ID.is_null());
        assert!(SlotId::NULL.is_null());
        assert!(!SlotId::new(0).is_null());
        assert_eq!(NULL_ID.index(), u32::MAX as usize);
    }

    #[test]
    fn test_slot_id_display() {
        assert_eq!(SlotId::new(7).to_string(), "Slot(7)");
        assert_eq!(NULL_ID.to_string(), "Slot(null)");
    }

    #[test]
    fn test_new_slot_is_null_and_unlinked() {
        let slot = VariantSlot::new();
        assert_eq!(slot.kind(), SlotKind::Null);
        assert!(slot.next().is_null());
        assert!(!slot.is_free());
    }

    #[test]
    fn test_free_slot_reads_as_null() {
        let slot = VariantSlot::free(SlotId::new(3));
        assert!(slot.is_free());
        assert_eq!(slot.kind(), SlotKind::Null);
        assert_eq!(slot.next(), SlotId::new(3));
    }

    #[test]
    fn test_content_kinds() {
        assert_eq!(VariantContent::Int(-1).kind(), SlotKind::Int);
        assert_eq!(VariantContent::LinkedString("x").kind(), SlotKind::LinkedString);
        assert!(VariantContent::Array(ArrayData::new()).is_collection());
        assert!(!VariantContent::Float(1.5).is_collection());
    }
}
