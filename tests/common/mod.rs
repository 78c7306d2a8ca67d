//! Allocators that record or refuse requests

#![allow(dead_code)]

use jsonslab::memory::{Allocator, DefaultAllocator};
use std::cell::{Cell, RefCell};
use std::ptr::NonNull;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocatorEvent {
    Allocate(usize),
    AllocateFail(usize),
    Reallocate(usize, usize),
    ReallocateFail(usize, usize),
    Deallocate(usize),
}

/// Heap allocator that logs every call and tracks live bytes
#[derive(Debug, Default)]
pub struct SpyingAllocator {
    log: RefCell<Vec<AllocatorEvent>>,
    live_bytes: Cell<usize>,
}

impl SpyingAllocator {
    pub fn shared() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn log(&self) -> Vec<AllocatorEvent> {
        self.log.borrow().clone()
    }

    pub fn clear_log(&self) {
        self.log.borrow_mut().clear();
    }

    pub fn live_bytes(&self) -> usize {
        self.live_bytes.get()
    }

    fn record(&self, event: AllocatorEvent) {
        self.log.borrow_mut().push(event);
    }
}

impl Allocator for SpyingAllocator {
    fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        let block = DefaultAllocator.allocate(size);
        match block {
            Some(_) => {
                self.record(AllocatorEvent::Allocate(size));
                self.live_bytes.set(self.live_bytes.get() + size);
            }
            None => self.record(AllocatorEvent::AllocateFail(size)),
        }
        block
    }

    fn reallocate(
        &self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        let block = DefaultAllocator.reallocate(ptr, old_size, new_size);
        match block {
            Some(_) => {
                self.record(AllocatorEvent::Reallocate(old_size, new_size));
                self.live_bytes.set(self.live_bytes.get() - old_size + new_size);
            }
            None => self.record(AllocatorEvent::ReallocateFail(old_size, new_size)),
        }
        block
    }

    fn deallocate(&self, ptr: NonNull<u8>, size: usize) {
        self.record(AllocatorEvent::Deallocate(size));
        self.live_bytes.set(self.live_bytes.get() - size);
        DefaultAllocator.deallocate(ptr, size);
    }
}

/// Heap allocator that refuses requests once a budget is spent
#[derive(Debug, Default)]
pub struct FailingAllocator {
    /// Successful allocate/reallocate calls left; `None` means unlimited
    remaining: Cell<Option<usize>>,
    /// Requests above this size always fail
    max_size: Option<usize>,
}

impl FailingAllocator {
    /// Succeeds `count` times, then fails every request
    pub fn after(count: usize) -> Rc<Self> {
        Rc::new(Self {
            remaining: Cell::new(Some(count)),
            max_size: None,
        })
    }

    /// Fails every request larger than `size` bytes
    pub fn above(size: usize) -> Rc<Self> {
        Rc::new(Self {
            remaining: Cell::new(None),
            max_size: Some(size),
        })
    }

    fn permit(&self, size: usize) -> bool {
        if self.max_size.is_some_and(|max| size > max) {
            return false;
        }
        match self.remaining.get() {
            Some(0) => false,
            Some(n) => {
                self.remaining.set(Some(n - 1));
                true
            }
            None => true,
        }
    }
}

impl Allocator for FailingAllocator {
    fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        if !self.permit(size) {
            return None;
        }
        DefaultAllocator.allocate(size)
    }

    fn reallocate(
        &self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        if !self.permit(new_size) {
            return None;
        }
        DefaultAllocator.reallocate(ptr, old_size, new_size)
    }

    fn deallocate(&self, ptr: NonNull<u8>, size: usize) {
        DefaultAllocator.deallocate(ptr, size);
    }
}
