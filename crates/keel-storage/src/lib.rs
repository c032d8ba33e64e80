//! Paged B+-tree storage engine over a single backing file.
//!
//! This crate provides:
//! - B+-tree node types (internal and leaf) with a slotted-page layout
//! - A fixed-width 4096-byte page codec
//! - The `PageStore` abstraction with a file-backed implementation,
//!   page cache, and background flush loop
//! - A memory-backed store for tests
//!
//! Higher-level tree traversal (search cascades, split orchestration,
//! sibling rewiring) lives with the caller; this crate owns the file
//! format and the lifecycle of dirty pages.

mod header;
mod node;
mod store;

pub use header::FileHeader;
pub use node::{InternalCell, InternalNode, LeafCell, LeafNode, Node, PageRef};
pub use store::{FileStore, MemStore, PageStore};
