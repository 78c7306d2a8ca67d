//! Arrays and objects as linked lists of arena slots
//!
//! A collection only stores the ids of its first and last slot. The slots
//! themselves are chained through their `next` field:
//!
//! ```text
//! array:   head → [elem] → [elem] → [elem] ← tail
//! object:  head → [key] → [value] → [key] → [value] ← tail
//! ```
//!
//! Appending is O(1) thanks to the tail id. Removal scans from the head for
//! the predecessor, since predecessors are not stored.

pub mod iterator;

use crate::error::{Error, Result};
use crate::memory::{ResourceManager, SlotId, NULL_ID};
use std::ops::{Deref, DerefMut};

pub use iterator::{CollectionIterator, Members, Slots};

/// Head and tail of a singly-linked slot list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionData {
    head: SlotId,
    tail: SlotId,
}

impl Default for CollectionData {
    fn default() -> Self {
        Self::new()
    }
}

impl CollectionData {
    pub const fn new() -> Self {
        Self {
            head: NULL_ID,
            tail: NULL_ID,
        }
    }

    pub fn head(&self) -> SlotId {
        self.head
    }

    pub fn tail(&self) -> SlotId {
        self.tail
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_null()
    }

    pub fn create_iterator(&self, resources: &ResourceManager) -> CollectionIterator {
        CollectionIterator::new(self.head, resources)
    }

    pub fn slots<'a>(&self, resources: &'a ResourceManager) -> Slots<'a> {
        Slots::new(self.create_iterator(resources), resources)
    }

    /// Attach one slot at the tail.
    ///
    /// The slot's old `next` link is cut. Invalid ids and the current tail
    /// are ignored.
    pub fn append_one(&mut self, id: SlotId, resources: &mut ResourceManager) {
        if resources.slot(id).is_none() || id == self.tail {
            return;
        }
        resources.set_next(id, NULL_ID);
        if self.tail.is_null() {
            self.head = id;
        } else {
            resources.set_next(self.tail, id);
        }
        self.tail = id;
    }

    /// Chain `key → value` and attach the pair at the tail.
    ///
    /// Ignored if either id is invalid, if they are equal, or if either is
    /// the current tail.
    pub fn append_pair(&mut self, key: SlotId, value: SlotId, resources: &mut ResourceManager) {
        if resources.slot(key).is_none() || resources.slot(value).is_none() {
            return;
        }
        if key == value || key == self.tail || value == self.tail {
            return;
        }
        resources.set_next(key, value);
        resources.set_next(value, NULL_ID);
        if self.tail.is_null() {
            self.head = key;
        } else {
            resources.set_next(self.tail, key);
        }
        self.tail = value;
    }

    /// Predecessor of `target`: `Some(NULL_ID)` for the head, `None` if absent
    fn previous_slot(&self, target: SlotId, resources: &ResourceManager) -> Option<SlotId> {
        let mut previous = NULL_ID;
        for (id, _) in self.slots(resources) {
            if id == target {
                return Some(previous);
            }
            previous = id;
        }
        None
    }

    /// Unlink the slot under the cursor and free it
    pub fn remove_one(&mut self, it: CollectionIterator, resources: &mut ResourceManager) {
        if it.done() {
            return;
        }
        let current = it.id();
        let Some(previous) = self.previous_slot(current, resources) else {
            return;
        };
        let next = resources.slot(current).map(|slot| slot.next()).unwrap_or(NULL_ID);

        if previous.is_null() {
            self.head = next;
        } else {
            resources.set_next(previous, next);
        }
        if next.is_null() {
            self.tail = previous;
        }
        resources.free_slot(current);
    }

    /// Remove the key under the cursor together with its value.
    ///
    /// The value is spliced out and freed first, then the key.
    pub fn remove_pair(&mut self, it: CollectionIterator, resources: &mut ResourceManager) {
        if it.done() || self.previous_slot(it.id(), resources).is_none() {
            return;
        }
        let key = it.id();
        let value = resources.slot(key).map(|slot| slot.next()).unwrap_or(NULL_ID);

        if let Some(after_value) = resources.slot(value).map(|slot| slot.next()) {
            resources.set_next(key, after_value);
            resources.free_slot(value);
        }
        self.remove_one(it, resources);
    }

    /// Free every slot and empty the list
    pub fn clear(&mut self, resources: &mut ResourceManager) {
        let mut next = self.head;
        while !next.is_null() {
            let current = next;
            next = resources.slot(current).map(|slot| slot.next()).unwrap_or(NULL_ID);
            resources.free_slot(current);
        }
        self.head = NULL_ID;
        self.tail = NULL_ID;
    }

    /// Number of slots in the list, not members
    pub fn slot_count(&self, resources: &ResourceManager) -> usize {
        self.slots(resources).count()
    }

    /// Walk the list and check that it ends at `tail`; returns the slot count
    pub fn validate(&self, resources: &ResourceManager) -> Result<usize> {
        if self.head.is_null() != self.tail.is_null() {
            return Err(Error::Corrupted(format!(
                "collection head {} and tail {} disagree on emptiness",
                self.head, self.tail
            )));
        }

        let limit = resources.stats().slot_usage;
        let mut count = 0;
        let mut last = NULL_ID;
        let mut current = self.head;
        while !current.is_null() {
            let slot = resources.slot(current).ok_or(Error::InvalidId(current))?;
            count += 1;
            if count > limit {
                return Err(Error::Corrupted("cycle in collection".to_string()));
            }
            last = current;
            current = slot.next();
        }

        if last != self.tail {
            return Err(Error::Corrupted(format!(
                "collection ends at {} but tail is {}",
                last, self.tail
            )));
        }
        Ok(count)
    }
}

/// Ordered elements of an array
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArrayData(CollectionData);

impl ArrayData {
    pub const fn new() -> Self {
        Self(CollectionData::new())
    }

    /// Number of elements
    pub fn size(&self, resources: &ResourceManager) -> usize {
        self.slot_count(resources)
    }

    /// 1 + the deepest element
    pub fn nesting(&self, resources: &ResourceManager) -> usize {
        resources.list_nesting(self.head)
    }

    /// Allocate a null element at the end
    pub fn add_element(&mut self, resources: &mut ResourceManager) -> Option<SlotId> {
        let id = resources.alloc_slot()?;
        self.append_one(id, resources);
        Some(id)
    }

    /// Id of the element at `index`
    pub fn get(&self, index: usize, resources: &ResourceManager) -> Option<SlotId> {
        self.slots(resources).nth(index).map(|(id, _)| id)
    }

    /// Remove the element at `index`; out-of-range indices are ignored
    pub fn remove(&mut self, index: usize, resources: &mut ResourceManager) {
        let mut it = self.create_iterator(resources);
        for _ in 0..index {
            if it.done() {
                return;
            }
            it.advance(resources);
        }
        self.remove_one(it, resources);
    }
}

impl Deref for ArrayData {
    type Target = CollectionData;

    fn deref(&self) -> &CollectionData {
        &self.0
    }
}

impl DerefMut for ArrayData {
    fn deref_mut(&mut self) -> &mut CollectionData {
        &mut self.0
    }
}

/// Ordered key/value pairs of an object
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObjectData(CollectionData);

impl ObjectData {
    pub const fn new() -> Self {
        Self(CollectionData::new())
    }

    pub fn members<'a>(&self, resources: &'a ResourceManager) -> Members<'a> {
        Members::new(self.create_iterator(resources), resources)
    }

    /// Number of key/value pairs
    pub fn size(&self, resources: &ResourceManager) -> usize {
        let mut count = 0;
        let mut it = self.create_iterator(resources);
        while !it.done() {
            count += 1;
            it.advance(resources);
            it.advance(resources);
        }
        count
    }

    /// 1 + the deepest value
    pub fn nesting(&self, resources: &ResourceManager) -> usize {
        resources.list_nesting(self.head)
    }

    /// Cursor positioned on the key slot equal to `key`, done if absent
    pub fn find_key(&self, key: &str, resources: &ResourceManager) -> CollectionIterator {
        let mut it = self.create_iterator(resources);
        while !it.done() {
            if resources.slot_str(it.id()) == Some(key) {
                return it;
            }
            it.advance(resources);
            it.advance(resources);
        }
        CollectionIterator::finished()
    }

    /// Id of the value stored under `key`
    pub fn get_member(&self, key: &str, resources: &ResourceManager) -> Option<SlotId> {
        self.members(resources)
            .find(|(key_id, _)| resources.slot_str(*key_id) == Some(key))
            .map(|(_, value)| value)
    }

    /// Append a member with an owned copy of `key` and a null value.
    ///
    /// Returns the value slot, or `None` if the arena or the string pool is
    /// exhausted, in which case nothing is attached.
    pub fn add_member(&mut self, key: &str, resources: &mut ResourceManager) -> Option<SlotId> {
        let key_id = resources.alloc_slot()?;
        let Some(value_id) = resources.alloc_slot() else {
            resources.free_slot(key_id);
            return None;
        };
        if !resources.set_string(key_id, key) {
            resources.free_slot(value_id);
            resources.free_slot(key_id);
            return None;
        }
        self.append_pair(key_id, value_id, resources);
        Some(value_id)
    }

    /// Remove the member stored under `key`, if any
    pub fn remove_member(&mut self, key: &str, resources: &mut ResourceManager) {
        let it = self.find_key(key, resources);
        self.remove_pair(it, resources);
    }
}

impl Deref for ObjectData {
    type Target = CollectionData;

    fn deref(&self) -> &CollectionData {
        &self.0
    }
}

impl DerefMut for ObjectData {
    fn deref_mut(&mut self) -> &mut CollectionData {
        &mut self.0
    }
}
