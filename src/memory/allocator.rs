//! Allocator capability used by the resource layer
//!
//! The slot arena and the string pool never touch the global heap directly.
//! Every block comes from an [`Allocator`] handed to the
//! [`ResourceManager`](super::ResourceManager) at construction time.

use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::rc::Rc;

/// Alignment of every block handed out by [`DefaultAllocator`]
pub const BLOCK_ALIGN: usize = 16;

/// Raw memory provider for slot arenas and string nodes.
///
/// Implementations report failure by returning `None`. Callers never assume
/// an allocation succeeds; a failed request is recorded as an overflow by
/// the resource manager.
///
/// The size of a block is passed back on `reallocate` and `deallocate`
/// because Rust allocators need the original layout to release memory.
pub trait Allocator {
    /// Allocate `size` bytes aligned to [`BLOCK_ALIGN`]
    fn allocate(&self, size: usize) -> Option<NonNull<u8>>;

    /// Resize a block previously returned by this allocator.
    ///
    /// On failure the original block is left untouched.
    fn reallocate(&self, ptr: NonNull<u8>, old_size: usize, new_size: usize)
        -> Option<NonNull<u8>>;

    /// Release a block previously returned by this allocator
    fn deallocate(&self, ptr: NonNull<u8>, size: usize);
}

/// Allocator backed by the process heap
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultAllocator;

impl DefaultAllocator {
    /// Shared handle suitable for [`ResourceManager::new`](super::ResourceManager::new)
    pub fn shared() -> Rc<dyn Allocator> {
        Rc::new(DefaultAllocator)
    }
}

fn block_layout(size: usize) -> Option<Layout> {
    Layout::from_size_align(size.max(1), BLOCK_ALIGN).ok()
}

impl Allocator for DefaultAllocator {
    fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        let layout = block_layout(size)?;
        // SAFETY: `layout` has a non-zero size
        NonNull::new(unsafe { alloc::alloc(layout) })
    }

    fn reallocate(
        &self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        let old_layout = block_layout(old_size)?;
        // rejects sizes that overflow isize once rounded up to the alignment
        block_layout(new_size)?;
        // SAFETY: `ptr` was allocated by this allocator with `old_layout`,
        // and the new size is non-zero and valid for the same alignment
        NonNull::new(unsafe { alloc::realloc(ptr.as_ptr(), old_layout, new_size.max(1)) })
    }

    fn deallocate(&self, ptr: NonNull<u8>, size: usize) {
        if let Some(layout) = block_layout(size) {
            // SAFETY: `ptr` was allocated by this allocator with this layout
            unsafe { alloc::dealloc(ptr.as_ptr(), layout) }
        }
    }
}
