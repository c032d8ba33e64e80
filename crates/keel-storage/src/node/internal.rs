//! Internal B+-tree node.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use keel_common::page::{NodeType, MAX_INTERNAL_CELLS, PAGE_SIZE};
use keel_common::{KeelError, Result};

/// One entry of an internal node: a key and the offset of the child holding
/// keys less than it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InternalCell {
    pub key: u32,
    pub child_offset: u64,
}

/// Internal node: ordered keys routing to child pages, plus the rightmost
/// pointer for keys greater than every key in the node.
#[derive(Debug, Clone, PartialEq)]
pub struct InternalNode {
    file_offset: u64,
    last_lsn: u64,
    dirty: bool,
    /// Offset of the child greater than every key in this node.
    right_offset: u64,
    /// Ordered slot array; `offsets[i]` indexes into `cells`.
    offsets: Vec<u16>,
    /// Unordered backing array of cells.
    cells: Vec<InternalCell>,
}

impl InternalNode {
    /// Creates an empty internal node.
    pub fn new() -> Self {
        Self {
            file_offset: 0,
            last_lsn: 0,
            dirty: false,
            right_offset: 0,
            offsets: Vec::new(),
            cells: Vec::new(),
        }
    }

    pub fn file_offset(&self) -> u64 {
        self.file_offset
    }

    pub fn set_file_offset(&mut self, offset: u64) {
        self.file_offset = offset;
    }

    pub fn last_lsn(&self) -> u64 {
        self.last_lsn
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self, lsn: u64) {
        self.last_lsn = lsn;
        self.dirty = true;
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Returns the offset of the child greater than every key in this node.
    pub fn right_offset(&self) -> u64 {
        self.right_offset
    }

    pub fn set_right_offset(&mut self, offset: u64) {
        self.right_offset = offset;
    }

    /// Returns the number of cells.
    pub fn cell_count(&self) -> usize {
        self.offsets.len()
    }

    /// Returns true once the node holds its maximum number of cells.
    pub fn is_full(&self) -> bool {
        self.offsets.len() >= MAX_INTERNAL_CELLS
    }

    /// Returns the key at slot `slot` (key order).
    pub fn key_at(&self, slot: usize) -> u32 {
        self.cells[self.offsets[slot] as usize].key
    }

    /// Returns the child offset at slot `slot` (key order).
    pub fn child_at(&self, slot: usize) -> u64 {
        self.cells[self.offsets[slot] as usize].child_offset
    }

    /// Returns the largest key in the node, if any.
    pub fn rightmost_key(&self) -> Option<u32> {
        self.offsets
            .last()
            .map(|&slot| self.cells[slot as usize].key)
    }

    /// Iterates over cells in key order.
    pub fn iter(&self) -> impl Iterator<Item = &InternalCell> {
        self.offsets
            .iter()
            .map(move |&slot| &self.cells[slot as usize])
    }

    /// Binary-searches the slot array for `key`.
    ///
    /// Returns `Ok(slot)` when the key is present, `Err(slot)` with the
    /// lower-bound insertion point otherwise.
    pub fn find_slot(&self, key: u32) -> std::result::Result<usize, usize> {
        self.offsets
            .binary_search_by(|&slot| self.cells[slot as usize].key.cmp(&key))
    }

    /// Appends a cell at the tail of the slot array. The caller guarantees
    /// monotonically increasing keys; no re-ordering is performed.
    pub fn append_cell(&mut self, key: u32, child_offset: u64) {
        self.offsets.push(self.cells.len() as u16);
        self.cells.push(InternalCell { key, child_offset });
    }

    /// Inserts a cell at slot `slot`, as returned by [`Self::find_slot`].
    pub fn insert_cell(&mut self, slot: usize, key: u32, child_offset: u64) {
        self.offsets.insert(slot, self.cells.len() as u16);
        self.cells.push(InternalCell { key, child_offset });
    }

    /// Splits a full node, keeping the lower half here and moving the upper
    /// half into a fresh node.
    ///
    /// The key at the median is promoted (returned) and its cell discarded:
    /// its child pointer becomes this node's new rightmost pointer. The new
    /// node inherits the old rightmost pointer. The caller appends the new
    /// node to the store and installs the separator in the parent.
    pub fn split(&mut self) -> (u32, InternalNode) {
        let mid = self.offsets.len() / 2;

        let mut right = InternalNode::new();
        for &slot in &self.offsets[mid + 1..] {
            let cell = self.cells[slot as usize];
            right.append_cell(cell.key, cell.child_offset);
        }
        right.right_offset = self.right_offset;

        let median = self.cells[self.offsets[mid] as usize];
        self.right_offset = median.child_offset;

        let lower: Vec<InternalCell> = self.offsets[..mid]
            .iter()
            .map(|&slot| self.cells[slot as usize])
            .collect();
        self.offsets = (0..lower.len() as u16).collect();
        self.cells = lower;

        (median.key, right)
    }

    /// Encodes this node into exactly one page.
    ///
    /// Layout: `node_type(1) | file_offset(8) | last_lsn(8) | right_offset(8)
    /// | cell_count(4) | offsets[](2n) | free_size(2) | padding | cells[](12n)`
    /// with cells written in slot order.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(PAGE_SIZE);
        buf.put_u8(NodeType::Internal as u8);
        buf.put_u64_le(self.file_offset);
        buf.put_u64_le(self.last_lsn);
        buf.put_u64_le(self.right_offset);
        buf.put_u32_le(self.offsets.len() as u32);
        for &slot in &self.offsets {
            buf.put_u16_le(slot);
        }

        let mut footer = BytesMut::new();
        for &slot in &self.offsets {
            let cell = &self.cells[slot as usize];
            footer.put_u32_le(cell.key);
            footer.put_u64_le(cell.child_offset);
        }

        let free_size = PAGE_SIZE - buf.len() - footer.len() - 2;
        buf.put_u16_le(free_size as u16);
        buf.put_bytes(0, free_size);
        buf.put_slice(&footer);

        assert_eq!(
            buf.len(),
            PAGE_SIZE,
            "encoded internal page is {} bytes",
            buf.len()
        );
        buf.freeze()
    }

    /// Decodes one page into an internal node. Cells are re-scattered so
    /// that `cells[offsets[i]]` yields the i-th key in order.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() != PAGE_SIZE {
            return Err(KeelError::PageCorrupted {
                offset: 0,
                reason: format!("internal page is {} bytes, expected {}", buf.len(), PAGE_SIZE),
            });
        }

        let mut data = buf;
        let tag = data.get_u8();
        if tag != NodeType::Internal as u8 {
            return Err(KeelError::UnexpectedNodeType {
                expected: NodeType::Internal as u8,
                actual: tag,
            });
        }

        let file_offset = data.get_u64_le();
        let last_lsn = data.get_u64_le();
        let right_offset = data.get_u64_le();

        let corrupted = |reason: String| KeelError::PageCorrupted {
            offset: file_offset,
            reason,
        };

        let cell_count = data.get_u32_le() as usize;
        if cell_count > MAX_INTERNAL_CELLS {
            return Err(corrupted(format!(
                "cell count {} exceeds internal maximum {}",
                cell_count, MAX_INTERNAL_CELLS
            )));
        }

        let mut offsets = Vec::with_capacity(cell_count);
        let mut seen = vec![false; cell_count];
        for _ in 0..cell_count {
            let slot = data.get_u16_le();
            let idx = slot as usize;
            if idx >= cell_count {
                return Err(corrupted(format!("slot index {} out of range", slot)));
            }
            if seen[idx] {
                return Err(corrupted(format!("duplicate slot index {}", slot)));
            }
            seen[idx] = true;
            offsets.push(slot);
        }

        let free_size = data.get_u16_le() as usize;
        if free_size > data.remaining() {
            return Err(corrupted(format!("free size {} overruns page", free_size)));
        }
        data.advance(free_size);

        let mut cells = vec![InternalCell::default(); cell_count];
        for &slot in &offsets {
            if data.remaining() < 12 {
                return Err(corrupted("truncated cell".to_string()));
            }
            let key = data.get_u32_le();
            let child_offset = data.get_u64_le();
            cells[slot as usize] = InternalCell { key, child_offset };
        }

        Ok(Self {
            file_offset,
            last_lsn,
            dirty: false,
            right_offset,
            offsets,
            cells,
        })
    }
}

impl Default for InternalNode {
    fn default() -> Self {
        Self::new()
    }
}
