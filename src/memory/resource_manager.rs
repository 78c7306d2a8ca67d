//! Resource manager: the single allocation authority for a tree

use super::allocator::{Allocator, DefaultAllocator};
use super::arena::{Compaction, SlotArena};
use super::slot::{SlotId, VariantContent, VariantSlot};
use super::string_pool::{PendingString, StringPool, StringRef};
use super::usage::{bytes_to_slots, slots_to_bytes};
use super::PoolKind;
use crate::collection::{ArrayData, ObjectData};
use crate::config::PoolConfig;
use crate::error::{Error, Result};
use serde::Serialize;
use std::rc::Rc;
use tracing::{debug, info, warn};

/// Snapshot of a manager's accounting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Arena capacity in bytes
    pub capacity: usize,
    /// Bytes in use: issued slots plus live string nodes
    pub size: usize,
    pub slot_capacity: usize,
    pub slot_usage: usize,
    pub free_slots: usize,
    pub string_count: usize,
    pub string_bytes: usize,
    pub overflowed: bool,
}

/// Owns one slot arena, one string pool and the allocator handle
///
/// Allocation failures are never reported as errors: the requested handle
/// comes back as `None`, writes through it become no-ops, and
/// [`overflowed`](Self::overflowed) stays true until [`clear`](Self::clear).
pub struct ResourceManager {
    allocator: Rc<dyn Allocator>,
    overflowed: bool,
    /// Upper bound for `realloc_pool`, in bytes
    max_capacity: Option<usize>,
    strings: StringPool,
    slots: SlotArena,
}

impl ResourceManager {
    /// Create a manager whose arena holds `capacity` bytes worth of slots
    pub fn new(capacity: usize, allocator: Rc<dyn Allocator>) -> Self {
        let slot_count = bytes_to_slots(capacity);
        let slots = SlotArena::create(slot_count, allocator.clone());
        let mut manager = Self {
            strings: StringPool::new(allocator.clone()),
            slots,
            allocator,
            overflowed: false,
            max_capacity: None,
        };
        if manager.slots.capacity() < slot_count {
            manager.mark_overflowed(&Error::Exhausted {
                pool: PoolKind::Slots,
                requested: slots_to_bytes(slot_count),
            });
        }
        manager
    }

    /// Create a manager backed by the process heap
    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(capacity, DefaultAllocator::shared())
    }

    pub fn with_config(config: &PoolConfig, allocator: Rc<dyn Allocator>) -> Result<Self> {
        config.validate()?;
        let mut manager = Self::new(config.initial_capacity, allocator);
        manager.max_capacity = config.max_capacity;
        Ok(manager)
    }

    pub fn allocator(&self) -> &Rc<dyn Allocator> {
        &self.allocator
    }

    fn mark_overflowed(&mut self, error: &Error) {
        if !self.overflowed {
            warn!(%error, "Resource manager overflowed");
        }
        self.overflowed = true;
    }

    /// Recreate the arena so it holds `required_size` bytes worth of slots.
    ///
    /// Every slot id becomes invalid unless the capacity is unchanged, in
    /// which case nothing happens. Strings are left alone.
    pub fn realloc_pool(&mut self, required_size: usize) {
        let mut required = required_size;
        if let Some(max) = self.max_capacity {
            if required > max {
                self.mark_overflowed(&Error::Exhausted {
                    pool: PoolKind::Slots,
                    requested: required_size,
                });
                required = max;
            }
        }

        let capacity = bytes_to_slots(required);
        if capacity == self.slots.capacity() {
            return;
        }

        info!(
            from = self.slots.capacity(),
            to = capacity,
            "Reallocating slot arena"
        );
        if !self.slots.resize(capacity) {
            self.mark_overflowed(&Error::Exhausted {
                pool: PoolKind::Slots,
                requested: slots_to_bytes(capacity),
            });
        }
    }

    /// Arena capacity in bytes
    pub fn capacity(&self) -> usize {
        slots_to_bytes(self.slots.capacity())
    }

    /// Bytes in use: issued slots plus live string nodes
    pub fn size(&self) -> usize {
        slots_to_bytes(self.slots.usage()) + self.strings.size()
    }

    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    /// Issue a fresh null slot
    pub fn alloc_slot(&mut self) -> Option<SlotId> {
        match self.slots.alloc_slot() {
            Ok(id) => Some(id),
            Err(error) => {
                self.mark_overflowed(&error);
                None
            }
        }
    }

    /// Release what the slot owns, then return it to the arena.
    ///
    /// Owned strings lose one reference and every slot of a nested
    /// collection is freed, however deep. Invalid ids are ignored.
    pub fn free_slot(&mut self, id: SlotId) {
        let Some(content) = self.slots.get(id).map(|slot| *slot.content()) else {
            debug!(%id, "Ignoring free of invalid slot");
            return;
        };
        self.release(content);
        if let Err(error) = self.slots.free(id) {
            debug!(%error, "Slot vanished while releasing its content");
        }
    }

    /// Release `content` and everything nested below it.
    ///
    /// Nested collections are queued instead of recursed into, so the depth
    /// of a tree never grows the call stack.
    fn release(&mut self, content: VariantContent) {
        let mut pending = Vec::new();
        self.release_content(content, &mut pending);

        while let Some(head) = pending.pop() {
            let mut current = head;
            while let Some(slot) = self.slots.get(current).copied() {
                self.release_content(*slot.content(), &mut pending);
                if let Err(error) = self.slots.free(current) {
                    debug!(%error, "Slot vanished while releasing a collection");
                }
                current = slot.next();
            }
        }
    }

    fn release_content(&mut self, content: VariantContent, pending: &mut Vec<SlotId>) {
        match content {
            VariantContent::OwnedString(string) => {
                self.strings.dereference_ref(string);
            }
            VariantContent::Array(array) => pending.push(array.head()),
            VariantContent::Object(object) => pending.push(object.head()),
            VariantContent::Null
            | VariantContent::Bool(_)
            | VariantContent::Int(_)
            | VariantContent::UInt(_)
            | VariantContent::Float(_)
            | VariantContent::LinkedString(_) => {}
        }
    }

    /// Look up a live slot
    pub fn slot(&self, id: SlotId) -> Option<&VariantSlot> {
        self.slots.get(id)
    }

    pub(crate) fn set_next(&mut self, id: SlotId, next: SlotId) {
        if let Some(slot) = self.slots.get_mut(id) {
            slot.next = next;
        }
    }

    /// Replace the content of a live slot, releasing the previous content
    fn set_content(&mut self, id: SlotId, content: VariantContent) -> bool {
        let Some(previous) = self.slots.get(id).map(|slot| *slot.content()) else {
            return false;
        };
        self.release(previous);
        match self.slots.get_mut(id) {
            Some(slot) => {
                slot.content = Some(content);
                true
            }
            None => false,
        }
    }

    pub fn set_null(&mut self, id: SlotId) -> bool {
        self.set_content(id, VariantContent::Null)
    }

    pub fn set_bool(&mut self, id: SlotId, value: bool) -> bool {
        self.set_content(id, VariantContent::Bool(value))
    }

    pub fn set_i64(&mut self, id: SlotId, value: i64) -> bool {
        self.set_content(id, VariantContent::Int(value))
    }

    pub fn set_u64(&mut self, id: SlotId, value: u64) -> bool {
        self.set_content(id, VariantContent::UInt(value))
    }

    pub fn set_f64(&mut self, id: SlotId, value: f64) -> bool {
        self.set_content(id, VariantContent::Float(value))
    }

    /// Store a string the caller keeps alive; it is neither copied nor pooled
    pub fn set_linked_string(&mut self, id: SlotId, text: &'static str) -> bool {
        self.set_content(id, VariantContent::LinkedString(text))
    }

    /// Store a copy of `text` from the string pool.
    ///
    /// If the pool is exhausted the slot is left null.
    pub fn set_string(&mut self, id: SlotId, text: &str) -> bool {
        if !self.set_null(id) {
            return false;
        }
        match self.save_string(text) {
            Some(string) => self.set_content(id, VariantContent::OwnedString(string)),
            None => false,
        }
    }

    /// Store a string built with a [`StringBuilder`](super::StringBuilder).
    ///
    /// `string` must come from this manager; the slot takes over the
    /// reference the builder handed out.
    pub(crate) fn set_saved_string(&mut self, id: SlotId, string: StringRef) -> bool {
        if self.slots.get(id).is_none() {
            self.strings.dereference_ref(string);
            return false;
        }
        self.set_content(id, VariantContent::OwnedString(string))
    }

    /// Turn the slot into an empty array
    pub fn to_array(&mut self, id: SlotId) -> bool {
        self.set_content(id, VariantContent::Array(ArrayData::new()))
    }

    /// Turn the slot into an empty object
    pub fn to_object(&mut self, id: SlotId) -> bool {
        self.set_content(id, VariantContent::Object(ObjectData::new()))
    }

    /// Text of a string slot, owned or linked
    pub fn slot_str(&self, id: SlotId) -> Option<&str> {
        match self.slot(id)?.content() {
            // SAFETY: a live slot holds a counted reference on its node, and
            // nodes are only force-freed by `clear`, which also drops every slot
            VariantContent::OwnedString(string) => Some(unsafe { string.as_str() }),
            VariantContent::LinkedString(text) => Some(text),
            _ => None,
        }
    }

    /// Run `f` on the array stored in slot `id` and write the result back.
    ///
    /// `f` edits a copy of the array header, so looking slot `id` up again
    /// inside `f` shows the header as it was before the call. If `f`
    /// changes slot `id` itself (a nested `with_array` on it, a setter or a
    /// free), the edited header is discarded.
    pub fn with_array<R>(
        &mut self,
        id: SlotId,
        f: impl FnOnce(&mut ArrayData, &mut Self) -> R,
    ) -> Option<R> {
        let before = match self.slot(id)?.content() {
            VariantContent::Array(array) => *array,
            _ => return None,
        };
        let mut array = before;
        let result = f(&mut array, self);
        match self.slots.get_mut(id) {
            Some(VariantSlot {
                content: Some(VariantContent::Array(stored)),
                ..
            }) if *stored == before => *stored = array,
            _ => debug!(%id, "Array replaced while being edited; keeping the new content"),
        }
        Some(result)
    }

    /// Run `f` on the object stored in slot `id` and write the result back.
    ///
    /// Same rules as [`with_array`](Self::with_array).
    pub fn with_object<R>(
        &mut self,
        id: SlotId,
        f: impl FnOnce(&mut ObjectData, &mut Self) -> R,
    ) -> Option<R> {
        let before = match self.slot(id)?.content() {
            VariantContent::Object(object) => *object,
            _ => return None,
        };
        let mut object = before;
        let result = f(&mut object, self);
        match self.slots.get_mut(id) {
            Some(VariantSlot {
                content: Some(VariantContent::Object(stored)),
                ..
            }) if *stored == before => *stored = object,
            _ => debug!(%id, "Object replaced while being edited; keeping the new content"),
        }
        Some(result)
    }

    /// Depth of the value in slot `id`: 0 for scalars, 1 + deepest child for collections
    pub fn nesting(&self, id: SlotId) -> usize {
        self.slot(id)
            .map(|slot| self.content_nesting(slot.content()))
            .unwrap_or(0)
    }

    fn content_nesting(&self, content: &VariantContent) -> usize {
        collection_head(content)
            .map(|head| self.list_nesting(head))
            .unwrap_or(0)
    }

    /// Nesting of the collection whose list starts at `head`.
    ///
    /// Walks the tree with an explicit `(head, depth)` stack; the walk stops
    /// after visiting as many slots as are issued, so a corrupted list
    /// cannot loop forever.
    pub(crate) fn list_nesting(&self, head: SlotId) -> usize {
        let mut deepest = 0;
        let mut budget = self.slots.usage();
        let mut pending = vec![(head, 1)];

        while let Some((head, depth)) = pending.pop() {
            deepest = deepest.max(depth);
            let mut current = head;
            while let Some(slot) = self.slots.get(current) {
                if budget == 0 {
                    return deepest;
                }
                budget -= 1;
                if let Some(child) = collection_head(slot.content()) {
                    pending.push((child, depth + 1));
                }
                current = slot.next();
            }
        }
        deepest
    }

    /// Intern `text`, taking one reference on its node
    pub fn save_string(&mut self, text: &str) -> Option<StringRef> {
        match self.strings.add(text) {
            Ok(string) => Some(string),
            Err(error) => {
                self.mark_overflowed(&error);
                None
            }
        }
    }

    /// Intern the text written into a node from [`create_string`](Self::create_string).
    ///
    /// If the pool already holds that text the existing node gains a
    /// reference and `node` is released. Otherwise `node` is trimmed to its
    /// written length and pooled; if trimming fails the pool overflows.
    pub fn save_string_node(&mut self, node: PendingString) -> Option<StringRef> {
        if let Some(existing) = self.strings.get(node.as_str()) {
            self.strings.add_reference(existing);
            return Some(existing);
        }
        let length = node.len();
        let node = if node.capacity() == length {
            node
        } else {
            self.resize_string(node, length)?
        };
        Some(self.strings.adopt(node))
    }

    /// Find a pooled string without taking a reference
    pub fn get_string(&self, text: &str) -> Option<StringRef> {
        self.strings.get(text)
    }

    /// Reference count of the pooled string, zero if absent
    pub fn string_references(&self, text: &str) -> usize {
        self.strings.references(text)
    }

    pub(crate) fn reference_string(&mut self, string: StringRef) {
        self.strings.add_reference(string);
    }

    /// Allocate an unpooled node with room for `length` bytes
    pub fn create_string(&mut self, length: usize) -> Option<PendingString> {
        match PendingString::create(length, self.allocator.clone()) {
            Ok(node) => Some(node),
            Err(error) => {
                self.mark_overflowed(&error);
                None
            }
        }
    }

    /// Resize an unpooled node; on failure the node is released
    pub fn resize_string(&mut self, node: PendingString, length: usize) -> Option<PendingString> {
        match node.resize(length) {
            Ok(node) => Some(node),
            Err(error) => {
                self.mark_overflowed(&error);
                None
            }
        }
    }

    /// Release an unpooled node
    pub fn destroy_string(&mut self, node: PendingString) {
        drop(node);
    }

    /// Drop one reference on the pooled string holding `text`.
    ///
    /// # Safety
    ///
    /// The caller must own a reference taken with
    /// [`save_string`](Self::save_string). Releasing a reference held by a
    /// slot frees the node under that slot.
    pub unsafe fn dereference_string(&mut self, text: &str) {
        self.strings.dereference(text);
    }

    /// Forget every slot and string; capacity is kept and the overflow flag cleared
    pub fn clear(&mut self) {
        self.slots.clear();
        self.overflowed = false;
        self.strings.clear();
        debug!("Cleared resource manager");
    }

    /// Hand unused arena capacity back to the allocator.
    ///
    /// Slot ids stay valid. Holders of raw slot addresses must add
    /// [`Compaction::address_delta`] to them.
    pub fn shrink_to_fit(&mut self) -> Compaction {
        self.slots.shrink_to_fit()
    }

    /// Move the contents out, leaving an empty zero-capacity manager behind
    pub fn take(&mut self) -> ResourceManager {
        let empty = Self {
            strings: StringPool::new(self.allocator.clone()),
            slots: SlotArena::empty(self.allocator.clone()),
            allocator: self.allocator.clone(),
            overflowed: false,
            max_capacity: self.max_capacity,
        };
        std::mem::replace(self, empty)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            capacity: self.capacity(),
            size: self.size(),
            slot_capacity: self.slots.capacity(),
            slot_usage: self.slots.usage(),
            free_slots: self.slots.free_count(),
            string_count: self.strings.len(),
            string_bytes: self.strings.size(),
            overflowed: self.overflowed,
        }
    }

    /// Check the bookkeeping of both pools
    pub fn validate(&self) -> Result<()> {
        self.slots.validate()?;
        self.strings.validate()
    }
}

fn collection_head(content: &VariantContent) -> Option<SlotId> {
    match content {
        VariantContent::Array(array) => Some(array.head()),
        VariantContent::Object(object) => Some(object.head()),
        _ => None,
    }
}

impl std::fmt::Debug for ResourceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceManager")
            .field("overflowed", &self.overflowed)
            .field("slots", &self.slots)
            .field("strings", &self.strings)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::slot::SlotKind;
    use crate::memory::usage::{sizeof_string, SLOT_SIZE};

    #[test]
    fn test_capacity_in_bytes() {
        let resources = ResourceManager::with_capacity(SLOT_SIZE * 4 + 3);
        assert_eq!(resources.capacity(), SLOT_SIZE * 4);
        assert_eq!(resources.size(), 0);
        assert!(!resources.overflowed());
    }

    #[test]
    fn test_size_counts_slots_and_strings() {
        let mut resources = ResourceManager::with_capacity(SLOT_SIZE * 4);
        let a = resources.alloc_slot().unwrap();
        let b = resources.alloc_slot().unwrap();
        assert!(resources.set_string(a, "hello"));
        assert!(resources.set_string(b, "hello"));

        assert_eq!(resources.size(), 2 * SLOT_SIZE + sizeof_string(5));
        assert_eq!(resources.string_references("hello"), 2);
    }

    #[test]
    fn test_overwriting_string_releases_it() {
        let mut resources = ResourceManager::with_capacity(SLOT_SIZE * 2);
        let id = resources.alloc_slot().unwrap();
        resources.set_string(id, "first");
        resources.set_i64(id, 42);

        assert!(resources.get_string("first").is_none());
        assert_eq!(resources.slot(id).unwrap().kind(), SlotKind::Int);
    }

    #[test]
    fn test_writes_to_invalid_slot_are_noops() {
        let mut resources = ResourceManager::with_capacity(0);
        assert!(resources.alloc_slot().is_none());
        assert!(resources.overflowed());

        assert!(!resources.set_bool(SlotId::NULL, true));
        assert!(!resources.set_string(SlotId::new(3), "x"));
        assert!(resources.get_string("x").is_none());
        resources.free_slot(SlotId::new(3));
    }

    #[test]
    fn test_linked_string_is_not_pooled() {
        let mut resources = ResourceManager::with_capacity(SLOT_SIZE * 2);
        let a = resources.alloc_slot().unwrap();
        let b = resources.alloc_slot().unwrap();
        resources.set_linked_string(a, "static");
        resources.set_linked_string(b, "static");

        assert_eq!(resources.slot_str(a), Some("static"));
        assert_eq!(resources.slot(b).unwrap().kind(), SlotKind::LinkedString);
        assert!(resources.get_string("static").is_none());
        assert_eq!(resources.size(), 2 * SLOT_SIZE);
    }

    #[test]
    fn test_take_leaves_empty_manager() {
        let mut resources = ResourceManager::with_capacity(SLOT_SIZE * 2);
        let id = resources.alloc_slot().unwrap();
        resources.set_string(id, "moved");

        let moved = resources.take();
        assert_eq!(resources.capacity(), 0);
        assert_eq!(resources.size(), 0);
        assert!(resources.alloc_slot().is_none());

        assert_eq!(moved.slot_str(id), Some("moved"));
        assert_eq!(moved.capacity(), 2 * SLOT_SIZE);
    }

    #[test]
    fn test_stats_snapshot() {
        let mut resources = ResourceManager::with_capacity(SLOT_SIZE * 3);
        let id = resources.alloc_slot().unwrap();
        resources.set_string(id, "abc");
        let other = resources.alloc_slot().unwrap();
        resources.free_slot(other);

        let stats = resources.stats();
        assert_eq!(stats.slot_capacity, 3);
        assert_eq!(stats.slot_usage, 1);
        assert_eq!(stats.free_slots, 1);
        assert_eq!(stats.string_count, 1);
        assert_eq!(stats.size, SLOT_SIZE + sizeof_string(3));
        assert!(!stats.overflowed);
    }
}
