//! Page-level constants and the node type tag.
//!
//! Every B+-tree node is serialized into one fixed 4096-byte page. The
//! constants here pin down the on-disk layout budget: fixed header bytes per
//! node variant, the per-cell footprint, and the resulting cell maxima.

use crate::error::KeelError;

/// Page size in bytes. The unit of I/O and cache residence.
pub const PAGE_SIZE: usize = 4096;

/// Maximum length in bytes of a leaf cell value.
pub const MAX_VALUE_SIZE: usize = 400;

/// Size in bytes of one slot array element.
pub const SLOT_SIZE: usize = 2;

/// Fixed header bytes of an encoded internal node:
/// node_type(1) + file_offset(8) + last_lsn(8) + right_offset(8)
/// + cell_count(4) + free_size(2).
pub const INTERNAL_HEADER_SIZE: usize = 1 + 8 + 8 + 8 + 4 + 2;

/// Fixed header bytes of an encoded leaf node:
/// node_type(1) + file_offset(8) + last_lsn(8) + has_left_sibling(1)
/// + has_right_sibling(1) + left_sibling_offset(8) + right_sibling_offset(8)
/// + cell_count(4) + free_size(2).
pub const LEAF_HEADER_SIZE: usize = 1 + 8 + 8 + 1 + 1 + 8 + 8 + 4 + 2;

/// Size in bytes of an internal cell: key(4) + child_offset(8).
pub const INTERNAL_CELL_SIZE: usize = 4 + 8;

/// Worst-case size in bytes of a leaf cell:
/// key(4) + deleted(1) + value_size(4) + value(MAX_VALUE_SIZE).
pub const LEAF_CELL_SIZE: usize = 4 + 1 + 4 + MAX_VALUE_SIZE;

/// Maximum number of cells an internal node can hold.
pub const MAX_INTERNAL_CELLS: usize =
    (PAGE_SIZE - INTERNAL_HEADER_SIZE) / (SLOT_SIZE + INTERNAL_CELL_SIZE);

/// Maximum number of cells a leaf node can hold.
pub const MAX_LEAF_CELLS: usize = (PAGE_SIZE - LEAF_HEADER_SIZE) / (SLOT_SIZE + LEAF_CELL_SIZE);

/// Node variant tag, the first byte of every encoded page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NodeType {
    /// Internal node carrying keys and child page offsets.
    Internal = 0,
    /// Leaf node carrying keys and values.
    Leaf = 1,
}

impl TryFrom<u8> for NodeType {
    type Error = KeelError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(NodeType::Internal),
            1 => Ok(NodeType::Leaf),
            other => Err(KeelError::InvalidNodeType(other)),
        }
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            NodeType::Internal => "internal",
            NodeType::Leaf => "leaf",
        };
        write!(f, "{}", name)
    }
}
