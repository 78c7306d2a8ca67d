//! Iteration over the slots of a collection

use crate::memory::{ResourceManager, SlotId, VariantSlot, NULL_ID};

/// Cursor over a collection's linked slots
///
/// Holds the current id and the id that follows it, captured when the cursor
/// reached its current position. Removing the current slot through this
/// cursor therefore does not stop iteration; any other structural change
/// to the collection invalidates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionIterator {
    current: SlotId,
    next: SlotId,
}

impl CollectionIterator {
    pub(crate) fn new(start: SlotId, resources: &ResourceManager) -> Self {
        match resources.slot(start) {
            Some(slot) => Self {
                current: start,
                next: slot.next(),
            },
            None => Self::finished(),
        }
    }

    pub(crate) const fn finished() -> Self {
        Self {
            current: NULL_ID,
            next: NULL_ID,
        }
    }

    pub fn done(&self) -> bool {
        self.current.is_null()
    }

    /// Id of the current slot, [`NULL_ID`] once done
    pub fn id(&self) -> SlotId {
        self.current
    }

    /// Id captured as the successor of the current slot
    pub fn next_id(&self) -> SlotId {
        self.next
    }

    pub fn slot<'a>(&self, resources: &'a ResourceManager) -> Option<&'a VariantSlot> {
        resources.slot(self.current)
    }

    /// Move to the captured successor, resolving it afresh in the arena
    pub fn advance(&mut self, resources: &ResourceManager) {
        *self = Self::new(self.next, resources);
    }
}

/// Borrowing iterator over `(id, slot)` pairs of a collection
pub struct Slots<'a> {
    cursor: CollectionIterator,
    resources: &'a ResourceManager,
}

impl<'a> Slots<'a> {
    pub(crate) fn new(cursor: CollectionIterator, resources: &'a ResourceManager) -> Self {
        Self { cursor, resources }
    }
}

impl<'a> Iterator for Slots<'a> {
    type Item = (SlotId, &'a VariantSlot);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cursor.id();
        let slot = self.cursor.slot(self.resources)?;
        self.cursor.advance(self.resources);
        Some((id, slot))
    }
}

/// Borrowing iterator over the `(key, value)` slot ids of an object
pub struct Members<'a> {
    cursor: CollectionIterator,
    resources: &'a ResourceManager,
}

impl<'a> Members<'a> {
    pub(crate) fn new(cursor: CollectionIterator, resources: &'a ResourceManager) -> Self {
        Self { cursor, resources }
    }
}

impl<'a> Iterator for Members<'a> {
    type Item = (SlotId, SlotId);

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor.done() {
            return None;
        }
        let key = self.cursor.id();
        self.cursor.advance(self.resources);
        let value = self.cursor.id();
        self.cursor.advance(self.resources);
        Some((key, value))
    }
}
