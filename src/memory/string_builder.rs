//! Incremental construction of owned strings
//!
//! Text arrives piece by piece (a parser filling in a key, for instance), so
//! the builder writes into an unpooled node that doubles as it fills up. On
//! [`save`](StringBuilder::save) the content is looked up in the pool first:
//! a duplicate gains a reference and the scratch node is kept for the next
//! string, otherwise the node is trimmed and handed to the pool.

use super::resource_manager::ResourceManager;
use super::slot::SlotId;
use super::string_pool::{PendingString, StringRef};

/// Payload bytes reserved when a builder first needs a node
pub const INITIAL_CAPACITY: usize = 31;

pub struct StringBuilder<'a> {
    resources: &'a mut ResourceManager,
    node: Option<PendingString>,
}

impl<'a> StringBuilder<'a> {
    pub fn new(resources: &'a mut ResourceManager) -> Self {
        Self {
            resources,
            node: None,
        }
    }

    /// Begin a new string, reusing the scratch node if there is one
    pub fn start(&mut self) {
        match self.node.as_mut() {
            Some(node) => node.clear(),
            None => self.node = self.resources.create_string(INITIAL_CAPACITY),
        }
    }

    /// False once an allocation has failed
    pub fn is_valid(&self) -> bool {
        self.node.is_some()
    }

    pub fn append(&mut self, text: &str) {
        let Some(mut node) = self.node.take() else {
            return;
        };

        let needed = node.len() + text.len();
        if needed > node.capacity() {
            let grown = needed.max(node.capacity() * 2);
            match self.resources.resize_string(node, grown) {
                Some(resized) => node = resized,
                None => return,
            }
        }

        node.push_str(text);
        self.node = Some(node);
    }

    pub fn push(&mut self, c: char) {
        let mut buffer = [0u8; 4];
        self.append(c.encode_utf8(&mut buffer));
    }

    /// Bytes appended since [`start`](Self::start)
    pub fn size(&self) -> usize {
        self.node.as_ref().map_or(0, |node| node.len())
    }

    /// Content appended so far
    pub fn as_str(&self) -> &str {
        self.node.as_ref().map_or("", |node| node.as_str())
    }

    /// Intern the content, taking one reference on the resulting node
    pub fn save(&mut self) -> Option<StringRef> {
        let node = self.node.take()?;

        if let Some(existing) = self.resources.get_string(node.as_str()) {
            self.resources.reference_string(existing);
            self.node = Some(node);
            return Some(existing);
        }
        self.resources.save_string_node(node)
    }

    /// Intern the content and store it in slot `id`
    pub fn save_into(&mut self, id: SlotId) -> bool {
        match self.save() {
            Some(string) => self.resources.set_saved_string(id, string),
            None => false,
        }
    }
}
