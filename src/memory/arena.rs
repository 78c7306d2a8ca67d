//! Slot arena
//!
//! A capacity-bounded block of [`VariantSlot`]s obtained from the
//! [`Allocator`]. Slots are issued in two ways:
//!
//! ```text
//! slots:   [ 0 | 1 | 2 | 3 | 4 | 5 | . | . ]
//!                ▲       ▲       ▲
//!   free_head ───┘       │       └─ high_water (next bump index)
//!   slot 1.next ─────────┘
//!   slot 3.next = NULL_ID
//! ```
//!
//! A freed slot stores the previous free-list head in its own `next` field,
//! so the free list costs no memory beyond the slots themselves.

use super::allocator::Allocator;
use super::slot::{SlotId, VariantSlot, NULL_ID};
use super::usage::slots_to_bytes;
use super::PoolKind;
use crate::error::{Error, Result};
use std::ptr::NonNull;
use std::rc::Rc;
use tracing::{debug, warn};

/// Result of [`SlotArena::shrink_to_fit`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Compaction {
    /// Bytes handed back to the allocator
    pub reclaimed_bytes: usize,
    /// Distance the backing block moved; holders of raw slot addresses add
    /// this to every address they keep. Slot ids need no fixup.
    pub address_delta: isize,
}

/// Fixed-capacity slot storage with free-list reuse
pub struct SlotArena {
    slots: Option<NonNull<VariantSlot>>,
    /// Number of slots the backing block can hold
    capacity: usize,
    /// Slots below this index have been initialized at least once
    high_water: usize,
    /// Slots currently issued
    usage: usize,
    free_head: SlotId,
    allocator: Rc<dyn Allocator>,
}

impl SlotArena {
    /// Create an arena for `capacity` slots.
    ///
    /// If the allocator refuses the block the arena ends up with zero
    /// capacity; check [`capacity`](Self::capacity).
    pub fn create(capacity: usize, allocator: Rc<dyn Allocator>) -> Self {
        let mut arena = Self::empty(allocator);
        arena.allocate_block(capacity);
        arena
    }

    /// Arena without backing storage
    pub fn empty(allocator: Rc<dyn Allocator>) -> Self {
        Self {
            slots: None,
            capacity: 0,
            high_water: 0,
            usage: 0,
            free_head: NULL_ID,
            allocator,
        }
    }

    fn allocate_block(&mut self, capacity: usize) -> bool {
        let capacity = capacity.min(SlotId::MAX_SLOTS);
        if capacity == 0 {
            return true;
        }

        match self.allocator.allocate(slots_to_bytes(capacity)) {
            Some(block) => {
                self.slots = Some(block.cast());
                self.capacity = capacity;
                debug!(capacity, "Created slot arena");
                true
            }
            None => {
                warn!(capacity, "Allocator refused slot arena block");
                false
            }
        }
    }

    /// Release the backing storage; every id becomes invalid
    pub fn destroy(&mut self) {
        if let Some(slots) = self.slots.take() {
            self.allocator
                .deallocate(slots.cast(), slots_to_bytes(self.capacity));
            debug!(capacity = self.capacity, "Destroyed slot arena");
        }
        self.capacity = 0;
        self.clear();
    }

    /// Destroy and recreate the backing storage at a new capacity.
    ///
    /// Returns false if the allocator refused the new block, in which case
    /// the arena is left with zero capacity.
    pub fn resize(&mut self, capacity: usize) -> bool {
        self.destroy();
        self.allocate_block(capacity)
    }

    /// Forget every issued slot without touching the backing storage
    pub fn clear(&mut self) {
        self.high_water = 0;
        self.usage = 0;
        self.free_head = NULL_ID;
    }

    /// Issue a slot, reusing freed ones first
    pub fn alloc_slot(&mut self) -> Result<SlotId> {
        if !self.free_head.is_null() {
            let id = self.free_head;
            self.free_head = self.raw(id.index()).next;
            *self.raw_mut(id.index()) = VariantSlot::new();
            self.usage += 1;
            return Ok(id);
        }

        if self.high_water < self.capacity {
            let index = self.high_water;
            if let Some(slots) = self.slots {
                // SAFETY: index < capacity, so the write stays inside the block
                unsafe { slots.as_ptr().add(index).write(VariantSlot::new()) };
            }
            self.high_water += 1;
            self.usage += 1;
            return Ok(SlotId::from_index(index));
        }

        Err(Error::Exhausted {
            pool: PoolKind::Slots,
            requested: slots_to_bytes(1),
        })
    }

    /// Return a slot to the free list
    pub fn free(&mut self, id: SlotId) -> Result<()> {
        if self.get(id).is_none() {
            return Err(Error::InvalidId(id));
        }

        let free_head = self.free_head;
        *self.raw_mut(id.index()) = VariantSlot::free(free_head);
        self.free_head = id;
        self.usage -= 1;
        Ok(())
    }

    /// Look up a live slot; null, out-of-range and freed ids yield `None`
    pub fn get(&self, id: SlotId) -> Option<&VariantSlot> {
        let index = id.index();
        if id.is_null() || index >= self.high_water {
            return None;
        }
        let slot = self.raw(index);
        (!slot.is_free()).then_some(slot)
    }

    pub fn get_mut(&mut self, id: SlotId) -> Option<&mut VariantSlot> {
        let index = id.index();
        if id.is_null() || index >= self.high_water {
            return None;
        }
        let slot = self.raw_mut(index);
        if slot.is_free() {
            None
        } else {
            Some(slot)
        }
    }

    fn raw(&self, index: usize) -> &VariantSlot {
        debug_assert!(index < self.high_water);
        match self.slots {
            // SAFETY: every slot below high_water has been initialized and
            // high_water never exceeds capacity
            Some(slots) => unsafe { &*slots.as_ptr().add(index) },
            None => unreachable!("high_water is zero without backing storage"),
        }
    }

    fn raw_mut(&mut self, index: usize) -> &mut VariantSlot {
        debug_assert!(index < self.high_water);
        match self.slots {
            // SAFETY: see `raw`; `&mut self` guarantees exclusive access
            Some(slots) => unsafe { &mut *slots.as_ptr().add(index) },
            None => unreachable!("high_water is zero without backing storage"),
        }
    }

    /// Give the unused tail of the block back to the allocator.
    ///
    /// The block is trimmed to the highest slot ever issued, so every id
    /// stays valid. Interior free slots remain on the free list.
    pub fn shrink_to_fit(&mut self) -> Compaction {
        let Some(slots) = self.slots else {
            return Compaction::default();
        };
        if self.high_water == self.capacity {
            return Compaction::default();
        }

        let old_bytes = slots_to_bytes(self.capacity);
        if self.high_water == 0 {
            self.allocator.deallocate(slots.cast(), old_bytes);
            self.slots = None;
            self.capacity = 0;
            debug!(reclaimed = old_bytes, "Released empty slot arena");
            return Compaction {
                reclaimed_bytes: old_bytes,
                address_delta: 0,
            };
        }

        let new_bytes = slots_to_bytes(self.high_water);
        match self
            .allocator
            .reallocate(slots.cast(), old_bytes, new_bytes)
        {
            Some(moved) => {
                let address_delta = moved.as_ptr() as isize - slots.as_ptr() as isize;
                self.slots = Some(moved.cast());
                self.capacity = self.high_water;
                debug!(
                    capacity = self.capacity,
                    reclaimed = old_bytes - new_bytes,
                    address_delta,
                    "Shrunk slot arena"
                );
                Compaction {
                    reclaimed_bytes: old_bytes - new_bytes,
                    address_delta,
                }
            }
            None => {
                warn!(capacity = self.capacity, "Allocator refused to shrink slot arena");
                Compaction::default()
            }
        }
    }

    /// Number of slots the arena can hold
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of slots currently issued
    pub fn usage(&self) -> usize {
        self.usage
    }

    /// Number of slots waiting on the free list
    pub fn free_count(&self) -> usize {
        self.high_water - self.usage
    }

    /// Number of slots ever bump-allocated since the last clear
    pub fn high_water(&self) -> usize {
        self.high_water
    }

    /// Walk the free list and reconcile it with the usage counters
    pub fn validate(&self) -> Result<()> {
        if self.high_water > self.capacity {
            return Err(Error::Corrupted(format!(
                "high water {} exceeds capacity {}",
                self.high_water, self.capacity
            )));
        }

        let mut free_len = 0;
        let mut current = self.free_head;
        while !current.is_null() {
            if current.index() >= self.high_water {
                return Err(Error::Corrupted(format!(
                    "free list points past high water: {}",
                    current
                )));
            }
            let slot = self.raw(current.index());
            if !slot.is_free() {
                return Err(Error::Corrupted(format!("live slot on free list: {}", current)));
            }
            free_len += 1;
            if free_len > self.high_water {
                return Err(Error::Corrupted("cycle in free list".to_string()));
            }
            current = slot.next;
        }

        if free_len + self.usage != self.high_water {
            return Err(Error::Corrupted(format!(
                "free list length {} + usage {} != high water {}",
                free_len, self.usage, self.high_water
            )));
        }
        Ok(())
    }
}

impl Drop for SlotArena {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl std::fmt::Debug for SlotArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotArena")
            .field("capacity", &self.capacity)
            .field("usage", &self.usage)
            .field("high_water", &self.high_water)
            .field("free_head", &self.free_head)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::allocator::DefaultAllocator;
    use crate::memory::slot::{SlotKind, VariantContent};

    fn arena(capacity: usize) -> SlotArena {
        SlotArena::create(capacity, DefaultAllocator::shared())
    }

    #[test]
    fn test_bump_allocation() -> Result<()> {
        let mut arena = arena(3);
        assert_eq!(arena.alloc_slot()?, SlotId::new(0));
        assert_eq!(arena.alloc_slot()?, SlotId::new(1));
        assert_eq!(arena.alloc_slot()?, SlotId::new(2));
        assert_eq!(arena.usage(), 3);
        arena.validate()
    }

    #[test]
    fn test_exhaustion() {
        let mut arena = arena(1);
        assert!(arena.alloc_slot().is_ok());
        assert!(matches!(
            arena.alloc_slot(),
            Err(Error::Exhausted { pool: PoolKind::Slots, .. })
        ));
        assert_eq!(arena.usage(), 1);
    }

    #[test]
    fn test_free_list_reuse_is_lifo() -> Result<()> {
        let mut arena = arena(4);
        let a = arena.alloc_slot()?;
        let b = arena.alloc_slot()?;
        let _c = arena.alloc_slot()?;

        arena.free(a)?;
        arena.free(b)?;
        assert_eq!(arena.free_count(), 2);
        arena.validate()?;

        assert_eq!(arena.alloc_slot()?, b);
        assert_eq!(arena.alloc_slot()?, a);
        assert_eq!(arena.alloc_slot()?, SlotId::new(3));
        assert_eq!(arena.free_count(), 0);
        arena.validate()
    }

    #[test]
    fn test_reused_slot_is_reset() -> Result<()> {
        let mut arena = arena(2);
        let id = arena.alloc_slot()?;
        arena.get_mut(id).unwrap().content = Some(VariantContent::Int(5));
        arena.free(id)?;

        let again = arena.alloc_slot()?;
        assert_eq!(again, id);
        assert_eq!(arena.get(again).unwrap().kind(), SlotKind::Null);
        assert!(arena.get(again).unwrap().next().is_null());
        Ok(())
    }

    #[test]
    fn test_invalid_lookups() -> Result<()> {
        let mut arena = arena(4);
        let id = arena.alloc_slot()?;

        assert!(arena.get(NULL_ID).is_none());
        assert!(arena.get(SlotId::new(1)).is_none());
        assert!(arena.get(SlotId::new(100)).is_none());

        arena.free(id)?;
        assert!(arena.get(id).is_none());
        assert_eq!(arena.free(id), Err(Error::InvalidId(id)));
        assert_eq!(arena.free(NULL_ID), Err(Error::InvalidId(NULL_ID)));
        Ok(())
    }

    #[test]
    fn test_zero_capacity() {
        let mut arena = arena(0);
        assert_eq!(arena.capacity(), 0);
        assert!(arena.alloc_slot().is_err());
        assert_eq!(arena.shrink_to_fit(), Compaction::default());
    }

    #[test]
    fn test_shrink_keeps_ids() -> Result<()> {
        let mut arena = arena(16);
        let ids: Vec<SlotId> = (0..5).map(|_| arena.alloc_slot()).collect::<Result<_>>()?;
        for (value, id) in ids.iter().enumerate() {
            arena.get_mut(*id).unwrap().content = Some(VariantContent::Int(value as i64));
        }
        arena.free(ids[1])?;

        let compaction = arena.shrink_to_fit();
        assert_eq!(compaction.reclaimed_bytes, slots_to_bytes(11));
        assert_eq!(arena.capacity(), 5);

        assert!(arena.get(ids[1]).is_none());
        for (value, id) in ids.iter().enumerate().filter(|(i, _)| *i != 1) {
            assert_eq!(
                arena.get(*id).unwrap().content(),
                &VariantContent::Int(value as i64)
            );
        }

        // the hole is still reusable
        assert_eq!(arena.alloc_slot()?, ids[1]);
        assert!(arena.alloc_slot().is_err());
        arena.validate()
    }

    #[test]
    fn test_shrink_empty_releases_block() {
        let mut arena = arena(8);
        let compaction = arena.shrink_to_fit();
        assert_eq!(compaction.reclaimed_bytes, slots_to_bytes(8));
        assert_eq!(arena.capacity(), 0);
    }

    #[test]
    fn test_resize_resets() -> Result<()> {
        let mut arena = arena(2);
        arena.alloc_slot()?;
        assert!(arena.resize(10));
        assert_eq!(arena.capacity(), 10);
        assert_eq!(arena.usage(), 0);
        assert!(arena.get(SlotId::new(0)).is_none());
        Ok(())
    }
}
