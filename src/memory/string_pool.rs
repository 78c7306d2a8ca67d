//! Deduplicating, reference-counted string storage
//!
//! Owned strings live in nodes allocated from the [`Allocator`], outside the
//! slot arena, so they never move when the arena is shrunk. Each node is a
//! header followed by the UTF-8 payload:
//!
//! ```text
//! ┌──────────┬──────────┬────────────┬─────────────────┐
//! │ next     │ length   │ references │ payload bytes…  │
//! └──────────┴──────────┴────────────┴─────────────────┘
//! ```
//!
//! Pooled nodes are chained through `next`. A node is freed the moment its
//! reference count drops to zero.

use super::allocator::Allocator;
use super::PoolKind;
use crate::error::{Error, Result};
use std::fmt;
use std::mem::ManuallyDrop;
use std::ptr::{self, NonNull};
use std::rc::Rc;
use tracing::debug;

/// Header of a string node; the payload follows it in the same block
#[repr(C)]
pub struct StringNode {
    next: Option<NonNull<StringNode>>,
    length: usize,
    references: usize,
}

impl StringNode {
    pub const HEADER_SIZE: usize = std::mem::size_of::<StringNode>();

    /// Size of the block holding a node with `length` payload bytes
    pub const fn size_for(length: usize) -> usize {
        Self::HEADER_SIZE.saturating_add(length)
    }

    fn create(length: usize, allocator: &dyn Allocator) -> Result<NonNull<StringNode>> {
        let size = Self::size_for(length);
        let block = allocator.allocate(size).ok_or(Error::Exhausted {
            pool: PoolKind::Strings,
            requested: size,
        })?;
        let node = block.cast::<StringNode>();
        // SAFETY: the block is large enough and aligned for the header
        unsafe {
            node.as_ptr().write(StringNode {
                next: None,
                length,
                references: 1,
            })
        };
        Ok(node)
    }
}

// SAFETY (all helpers below): `node` must point to a live node created by
// `StringNode::create`.

unsafe fn payload(node: NonNull<StringNode>) -> *mut u8 {
    node.as_ptr().cast::<u8>().add(StringNode::HEADER_SIZE)
}

unsafe fn length_of(node: NonNull<StringNode>) -> usize {
    (*node.as_ptr()).length
}

unsafe fn bytes_of<'a>(node: NonNull<StringNode>) -> &'a [u8] {
    std::slice::from_raw_parts(payload(node), length_of(node))
}

/// Identity of a pooled string node
///
/// Two owned strings with the same content share one node, so comparing
/// `StringRef`s compares node identity.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct StringRef(NonNull<StringNode>);

impl StringRef {
    /// Payload of the node.
    ///
    /// # Safety
    ///
    /// The node must still be in its pool with a non-zero reference count.
    pub(crate) unsafe fn as_str<'a>(self) -> &'a str {
        // the payload is only ever written from `&str` data
        std::str::from_utf8_unchecked(bytes_of(self.0))
    }
}

impl fmt::Debug for StringRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StringRef({:p})", self.0)
    }
}

/// Owned node that is not (yet) part of a pool
///
/// Produced by [`ResourceManager::create_string`](super::ResourceManager::create_string)
/// for incremental construction. Text is appended at the end of what was
/// already written, so the written prefix is always valid UTF-8 and the
/// rest of the payload is never read. Dropping it releases the node.
pub struct PendingString {
    node: NonNull<StringNode>,
    /// Payload bytes written so far
    len: usize,
    allocator: Rc<dyn Allocator>,
}

impl PendingString {
    pub(crate) fn create(length: usize, allocator: Rc<dyn Allocator>) -> Result<Self> {
        let node = StringNode::create(length, allocator.as_ref())?;
        Ok(Self {
            node,
            len: 0,
            allocator,
        })
    }

    /// Payload bytes the node can hold
    pub fn capacity(&self) -> usize {
        // SAFETY: the node is owned by self
        unsafe { length_of(self.node) }
    }

    /// Payload bytes written so far
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append `text` after the written bytes; returns false if it does not fit
    pub fn push_str(&mut self, text: &str) -> bool {
        let Some(end) = self.len.checked_add(text.len()) else {
            return false;
        };
        if end > self.capacity() {
            return false;
        }
        // SAFETY: the destination range lies within the payload
        unsafe {
            ptr::copy_nonoverlapping(text.as_ptr(), payload(self.node).add(self.len), text.len())
        };
        self.len = end;
        true
    }

    /// Forget the written bytes, keeping the capacity
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Text written so far
    pub fn as_str(&self) -> &str {
        // SAFETY: the first `len` bytes were copied from whole `&str`s
        unsafe {
            let bytes = std::slice::from_raw_parts(payload(self.node), self.len);
            std::str::from_utf8_unchecked(bytes)
        }
    }

    /// Grow or shrink the node; on failure the node is released.
    ///
    /// Shrinking below the written length cuts the text at the nearest
    /// character boundary.
    pub fn resize(self, length: usize) -> Result<Self> {
        let mut len = self.len.min(length);
        while !self.as_str().is_char_boundary(len) {
            len -= 1;
        }
        let old_size = StringNode::size_for(self.capacity());
        let new_size = StringNode::size_for(length);
        let (node, allocator) = self.into_parts();

        match allocator.reallocate(node.cast(), old_size, new_size) {
            Some(block) => {
                let node = block.cast::<StringNode>();
                // SAFETY: the reallocated block keeps the header intact
                unsafe { (*node.as_ptr()).length = length };
                Ok(Self {
                    node,
                    len,
                    allocator,
                })
            }
            None => {
                allocator.deallocate(node.cast(), old_size);
                Err(Error::Exhausted {
                    pool: PoolKind::Strings,
                    requested: new_size,
                })
            }
        }
    }

    fn into_parts(self) -> (NonNull<StringNode>, Rc<dyn Allocator>) {
        let this = ManuallyDrop::new(self);
        // SAFETY: `this` is never dropped, so the allocator is moved out exactly once
        let allocator = unsafe { ptr::read(&this.allocator) };
        (this.node, allocator)
    }
}

impl Drop for PendingString {
    fn drop(&mut self) {
        let size = StringNode::size_for(self.capacity());
        self.allocator.deallocate(self.node.cast(), size);
    }
}

impl fmt::Debug for PendingString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingString")
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .finish()
    }
}

/// Pool of owned strings, deduplicated by content
pub struct StringPool {
    head: Option<NonNull<StringNode>>,
    count: usize,
    bytes: usize,
    allocator: Rc<dyn Allocator>,
}

impl StringPool {
    pub fn new(allocator: Rc<dyn Allocator>) -> Self {
        Self {
            head: None,
            count: 0,
            bytes: 0,
            allocator,
        }
    }

    fn nodes(&self) -> impl Iterator<Item = NonNull<StringNode>> + '_ {
        // SAFETY: every node reachable from head is live
        std::iter::successors(self.head, |node| unsafe { (*node.as_ptr()).next })
    }

    fn find(&self, text: &[u8]) -> Option<NonNull<StringNode>> {
        // SAFETY: pooled nodes are live
        self.nodes().find(|node| unsafe { bytes_of(*node) } == text)
    }

    fn push(&mut self, node: NonNull<StringNode>) {
        // SAFETY: the node is live and not yet linked anywhere
        unsafe { (*node.as_ptr()).next = self.head };
        self.head = Some(node);
        self.count += 1;
        // SAFETY: as above
        self.bytes += StringNode::size_for(unsafe { length_of(node) });
    }

    /// Intern `text`: reuse an equal node or copy into a new one
    pub fn add(&mut self, text: &str) -> Result<StringRef> {
        if let Some(node) = self.find(text.as_bytes()) {
            // SAFETY: pooled nodes are live
            unsafe { (*node.as_ptr()).references += 1 };
            return Ok(StringRef(node));
        }

        let node = StringNode::create(text.len(), self.allocator.as_ref())?;
        // SAFETY: the payload was sized for `text`
        unsafe { ptr::copy_nonoverlapping(text.as_ptr(), payload(node), text.len()) };
        self.push(node);
        debug!(length = text.len(), "Created string node");
        Ok(StringRef(node))
    }

    /// Insert a node built outside the pool, holding one reference.
    ///
    /// The node must be filled exactly to its capacity and its content must
    /// not be pooled yet; the resource manager checks both.
    pub(crate) fn adopt(&mut self, pending: PendingString) -> StringRef {
        debug_assert_eq!(pending.len(), pending.capacity());
        debug_assert!(self.get(pending.as_str()).is_none());
        let (node, _allocator) = pending.into_parts();
        self.push(node);
        StringRef(node)
    }

    /// Find a node by content without taking a reference
    pub fn get(&self, text: &str) -> Option<StringRef> {
        self.find(text.as_bytes()).map(StringRef)
    }

    /// Reference count of the node holding `text`, zero if absent
    pub fn references(&self, text: &str) -> usize {
        self.find(text.as_bytes())
            // SAFETY: pooled nodes are live
            .map(|node| unsafe { (*node.as_ptr()).references })
            .unwrap_or(0)
    }

    /// Take one more reference on a node obtained from [`get`](Self::get)
    pub(crate) fn add_reference(&mut self, string: StringRef) {
        if let Some(node) = self.nodes().find(|node| *node == string.0) {
            // SAFETY: pooled nodes are live
            unsafe { (*node.as_ptr()).references += 1 };
        }
    }

    /// Drop one reference on the node holding `text`.
    ///
    /// Returns false if no such node exists; releasing a string more times
    /// than it was added is a no-op.
    pub fn dereference(&mut self, text: &str) -> bool {
        // SAFETY: pooled nodes are live
        self.release(|node| unsafe { bytes_of(node) } == text.as_bytes())
    }

    pub(crate) fn dereference_ref(&mut self, string: StringRef) -> bool {
        self.release(|node| node == string.0)
    }

    fn release(&mut self, mut matches: impl FnMut(NonNull<StringNode>) -> bool) -> bool {
        let mut previous: Option<NonNull<StringNode>> = None;
        let mut current = self.head;

        while let Some(node) = current {
            // SAFETY: nodes stay live until unlinked below
            let next = unsafe { (*node.as_ptr()).next };
            if !matches(node) {
                previous = Some(node);
                current = next;
                continue;
            }

            // SAFETY: as above
            let remaining = unsafe {
                let references = &mut (*node.as_ptr()).references;
                *references -= 1;
                *references
            };
            if remaining == 0 {
                match previous {
                    // SAFETY: `previous` is a live pooled node
                    Some(previous) => unsafe { (*previous.as_ptr()).next = next },
                    None => self.head = next,
                }
                self.destroy(node);
            }
            return true;
        }
        false
    }

    fn destroy(&mut self, node: NonNull<StringNode>) {
        // SAFETY: the node is live until deallocated here
        let size = StringNode::size_for(unsafe { length_of(node) });
        self.count -= 1;
        self.bytes -= size;
        self.allocator.deallocate(node.cast(), size);
        debug!(size, "Freed string node");
    }

    /// Free every node regardless of its reference count
    pub fn clear(&mut self) {
        while let Some(node) = self.head {
            // SAFETY: the node is live until destroyed
            self.head = unsafe { (*node.as_ptr()).next };
            self.destroy(node);
        }
    }

    /// Bytes held by live nodes, headers included
    pub fn size(&self) -> usize {
        self.bytes
    }

    /// Number of distinct live strings
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Recompute the accounting from the nodes themselves
    pub fn validate(&self) -> Result<()> {
        let mut count = 0;
        let mut bytes = 0;
        for node in self.nodes() {
            // SAFETY: pooled nodes are live
            let (length, references) =
                unsafe { ((*node.as_ptr()).length, (*node.as_ptr()).references) };
            if references == 0 {
                return Err(Error::Corrupted("pooled string with no references".to_string()));
            }
            count += 1;
            bytes += StringNode::size_for(length);
            if count > self.count {
                return Err(Error::Corrupted("string pool longer than its count".to_string()));
            }
        }

        if count != self.count || bytes != self.bytes {
            return Err(Error::Corrupted(format!(
                "string pool holds {} nodes / {} bytes, recorded {} / {}",
                count, bytes, self.count, self.bytes
            )));
        }
        Ok(())
    }
}

impl Drop for StringPool {
    fn drop(&mut self) {
        self.clear();
    }
}

impl fmt::Debug for StringPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StringPool")
            .field("count", &self.count)
            .field("bytes", &self.bytes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::allocator::DefaultAllocator;

    fn pool() -> StringPool {
        StringPool::new(DefaultAllocator::shared())
    }

    #[test]
    fn test_add_deduplicates() -> Result<()> {
        let mut pool = pool();
        let a = pool.add("hello")?;
        let b = pool.add("hello")?;
        assert_eq!(a, b);
        assert_eq!(pool.references("hello"), 2);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.size(), StringNode::size_for(5));
        pool.validate()
    }

    #[test]
    fn test_dereference_frees_at_zero() -> Result<()> {
        let mut pool = pool();
        pool.add("hello")?;
        pool.add("hello")?;

        assert!(pool.dereference("hello"));
        assert_eq!(pool.references("hello"), 1);
        assert!(pool.get("hello").is_some());

        assert!(pool.dereference("hello"));
        assert!(pool.get("hello").is_none());
        assert_eq!(pool.size(), 0);

        // one release too many is ignored
        assert!(!pool.dereference("hello"));
        pool.validate()
    }

    #[test]
    fn test_empty_string_is_pooled() -> Result<()> {
        let mut pool = pool();
        let empty = pool.add("")?;
        assert_eq!(pool.get(""), Some(empty));
        assert_eq!(pool.size(), StringNode::size_for(0));
        assert!(pool.get("a").is_none());
        Ok(())
    }

    #[test]
    fn test_dereference_middle_node() -> Result<()> {
        let mut pool = pool();
        pool.add("a")?;
        let b = pool.add("b")?;
        pool.add("c")?;

        assert!(pool.dereference_ref(b));
        assert!(pool.get("b").is_none());
        assert!(pool.get("a").is_some());
        assert!(pool.get("c").is_some());
        pool.validate()
    }

    #[test]
    fn test_clear_ignores_references() -> Result<()> {
        let mut pool = pool();
        pool.add("x")?;
        pool.add("x")?;
        pool.add("y")?;
        pool.clear();
        assert!(pool.is_empty());
        assert_eq!(pool.size(), 0);
        Ok(())
    }

    #[test]
    fn test_pending_string_resize() -> Result<()> {
        let mut pending = PendingString::create(4, DefaultAllocator::shared())?;
        assert!(pending.is_empty());
        assert!(pending.push_str("ab"));
        assert!(!pending.push_str("xyz"));
        assert!(pending.push_str("cd"));

        let mut pending = pending.resize(8)?;
        assert_eq!(pending.capacity(), 8);
        assert!(pending.push_str("efgh"));
        assert_eq!(pending.as_str(), "abcdefgh");

        let mut pool = pool();
        let adopted = pool.adopt(pending.resize(6)?);
        assert_eq!(pool.get("abcdef"), Some(adopted));
        assert_eq!(pool.references("abcdef"), 1);
        pool.validate()
    }

    #[test]
    fn test_pending_string_reads_only_written_bytes() -> Result<()> {
        let mut pending = PendingString::create(16, DefaultAllocator::shared())?;
        assert_eq!(pending.as_str(), "");
        pending.push_str("hi");
        assert_eq!(pending.as_str(), "hi");
        assert_eq!(pending.len(), 2);

        pending.clear();
        pending.push_str("x");
        assert_eq!(pending.as_str(), "x");
        Ok(())
    }

    #[test]
    fn test_pending_string_shrinks_on_char_boundary() -> Result<()> {
        let mut pending = PendingString::create(4, DefaultAllocator::shared())?;
        assert!(pending.push_str("aé"));

        let pending = pending.resize(2)?;
        assert_eq!(pending.as_str(), "a");
        assert_eq!(pending.capacity(), 2);
        Ok(())
    }
}
