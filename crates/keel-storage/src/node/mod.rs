//! B+-tree node types and their page codec.
//!
//! A node is either internal (keys + child offsets) or leaf (keys + values),
//! serialized into one fixed 4096-byte page. Both variants use a slotted
//! layout: `offsets` is the ordered slot array and is the single source of
//! truth for key order; `cells` is the unordered backing array it indexes.

mod internal;
mod leaf;

pub use internal::{InternalCell, InternalNode};
pub use leaf::{LeafCell, LeafNode};

use bytes::Bytes;
use keel_common::page::NodeType;
use keel_common::Result;
use parking_lot::RwLock;
use std::sync::Arc;

/// Shared handle to a resident node.
///
/// The cache and every caller observe the same object, so mutations made by
/// a foreground writer are what the background flusher persists. Lock order
/// is store-inner before node; callers must not hold a node guard across a
/// store call.
pub type PageRef = Arc<RwLock<Node>>;

/// A B+-tree node, one page on disk.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Internal(InternalNode),
    Leaf(LeafNode),
}

impl Node {
    /// Returns the variant tag.
    pub fn node_type(&self) -> NodeType {
        match self {
            Node::Internal(_) => NodeType::Internal,
            Node::Leaf(_) => NodeType::Leaf,
        }
    }

    /// Returns the file offset this node lives at.
    pub fn file_offset(&self) -> u64 {
        match self {
            Node::Internal(n) => n.file_offset(),
            Node::Leaf(n) => n.file_offset(),
        }
    }

    /// Sets the file offset. Called by the store when appending.
    pub fn set_file_offset(&mut self, offset: u64) {
        match self {
            Node::Internal(n) => n.set_file_offset(offset),
            Node::Leaf(n) => n.set_file_offset(offset),
        }
    }

    /// Returns the LSN of the most recent mutation.
    pub fn last_lsn(&self) -> u64 {
        match self {
            Node::Internal(n) => n.last_lsn(),
            Node::Leaf(n) => n.last_lsn(),
        }
    }

    /// Returns true if the in-memory copy diverges from disk.
    pub fn is_dirty(&self) -> bool {
        match self {
            Node::Internal(n) => n.is_dirty(),
            Node::Leaf(n) => n.is_dirty(),
        }
    }

    /// Stamps the mutation LSN and sets the dirty bit.
    pub fn mark_dirty(&mut self, lsn: u64) {
        match self {
            Node::Internal(n) => n.mark_dirty(lsn),
            Node::Leaf(n) => n.mark_dirty(lsn),
        }
    }

    /// Clears the dirty bit. Called by the flusher after a successful write.
    pub fn mark_clean(&mut self) {
        match self {
            Node::Internal(n) => n.mark_clean(),
            Node::Leaf(n) => n.mark_clean(),
        }
    }

    /// Encodes this node into exactly one page.
    ///
    /// # Panics
    ///
    /// Panics if the encoded length is not `PAGE_SIZE`; that is a programmer
    /// bug, not an I/O condition.
    pub fn encode(&self) -> Bytes {
        match self {
            Node::Internal(n) => n.encode(),
            Node::Leaf(n) => n.encode(),
        }
    }

    /// Decodes one page, dispatching on the type byte.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        match NodeType::try_from(*buf.first().unwrap_or(&u8::MAX))? {
            NodeType::Internal => Ok(Node::Internal(InternalNode::decode(buf)?)),
            NodeType::Leaf => Ok(Node::Leaf(LeafNode::decode(buf)?)),
        }
    }

    /// Wraps this node in a shared handle.
    pub fn into_ref(self) -> PageRef {
        Arc::new(RwLock::new(self))
    }

    /// Returns the internal variant, if this is one.
    pub fn as_internal(&self) -> Option<&InternalNode> {
        match self {
            Node::Internal(n) => Some(n),
            Node::Leaf(_) => None,
        }
    }

    /// Returns the internal variant mutably, if this is one.
    pub fn as_internal_mut(&mut self) -> Option<&mut InternalNode> {
        match self {
            Node::Internal(n) => Some(n),
            Node::Leaf(_) => None,
        }
    }

    /// Returns the leaf variant, if this is one.
    pub fn as_leaf(&self) -> Option<&LeafNode> {
        match self {
            Node::Leaf(n) => Some(n),
            Node::Internal(_) => None,
        }
    }

    /// Returns the leaf variant mutably, if this is one.
    pub fn as_leaf_mut(&mut self) -> Option<&mut LeafNode> {
        match self {
            Node::Leaf(n) => Some(n),
            Node::Internal(_) => None,
        }
    }
}

impl From<InternalNode> for Node {
    fn from(node: InternalNode) -> Self {
        Node::Internal(node)
    }
}

impl From<LeafNode> for Node {
    fn from(node: LeafNode) -> Self {
        Node::Leaf(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_common::KeelError;

    #[test]
    fn test_node_type_dispatch() {
        let node: Node = InternalNode::new().into();
        assert_eq!(node.node_type(), NodeType::Internal);
        assert!(node.as_internal().is_some());
        assert!(node.as_leaf().is_none());

        let node: Node = LeafNode::new().into();
        assert_eq!(node.node_type(), NodeType::Leaf);
        assert!(node.as_leaf().is_some());
        assert!(node.as_internal().is_none());
    }

    #[test]
    fn test_node_decode_dispatch() {
        let internal: Node = InternalNode::new().into();
        let decoded = Node::decode(&internal.encode()).unwrap();
        assert_eq!(decoded.node_type(), NodeType::Internal);

        let leaf: Node = LeafNode::new().into();
        let decoded = Node::decode(&leaf.encode()).unwrap();
        assert_eq!(decoded.node_type(), NodeType::Leaf);
    }

    #[test]
    fn test_node_decode_invalid_tag() {
        let mut buf = LeafNode::new().encode().to_vec();
        buf[0] = 7;

        let result = Node::decode(&buf);
        assert!(matches!(result, Err(KeelError::InvalidNodeType(7))));
    }

    #[test]
    fn test_node_decode_empty_buffer() {
        assert!(Node::decode(&[]).is_err());
    }

    #[test]
    fn test_node_dirty_lifecycle() {
        let mut node: Node = LeafNode::new().into();
        assert!(!node.is_dirty());
        assert_eq!(node.last_lsn(), 0);

        node.mark_dirty(5);
        assert!(node.is_dirty());
        assert_eq!(node.last_lsn(), 5);

        node.mark_clean();
        assert!(!node.is_dirty());
        // The LSN of the last mutation survives the clean bit.
        assert_eq!(node.last_lsn(), 5);
    }

    #[test]
    fn test_node_file_offset() {
        let mut node: Node = InternalNode::new().into();
        assert_eq!(node.file_offset(), 0);

        node.set_file_offset(8192);
        assert_eq!(node.file_offset(), 8192);
    }

    #[test]
    fn test_page_ref_shares_mutations() {
        let page = Node::from(LeafNode::new()).into_ref();
        let alias = Arc::clone(&page);

        page.write().mark_dirty(3);
        assert!(alias.read().is_dirty());
        assert_eq!(alias.read().last_lsn(), 3);
    }
}
