//! Leaf B+-tree node.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use keel_common::page::{NodeType, MAX_LEAF_CELLS, MAX_VALUE_SIZE, PAGE_SIZE};
use keel_common::{KeelError, Result};

/// One entry of a leaf node: a key, its value bytes, and a tombstone flag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeafCell {
    pub key: u32,
    pub deleted: bool,
    pub value: Bytes,
}

/// Leaf node: ordered key-value cells plus sibling links forming a
/// doubly-linked list across leaves. Sibling pointers are maintained by the
/// tree walker, not by leaf operations.
#[derive(Debug, Clone, PartialEq)]
pub struct LeafNode {
    file_offset: u64,
    last_lsn: u64,
    dirty: bool,
    left_sibling: Option<u64>,
    right_sibling: Option<u64>,
    /// Ordered slot array; `offsets[i]` indexes into `cells`.
    offsets: Vec<u16>,
    /// Unordered backing array of cells.
    cells: Vec<LeafCell>,
}

fn check_value_size(value: &[u8]) -> Result<()> {
    if value.len() > MAX_VALUE_SIZE {
        return Err(KeelError::RowTooLarge {
            size: value.len(),
            max: MAX_VALUE_SIZE,
        });
    }
    Ok(())
}

impl LeafNode {
    /// Creates an empty leaf node with no siblings.
    pub fn new() -> Self {
        Self {
            file_offset: 0,
            last_lsn: 0,
            dirty: false,
            left_sibling: None,
            right_sibling: None,
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

    /// Returns the offset of the left sibling leaf, if linked.
    pub fn left_sibling(&self) -> Option<u64> {
        self.left_sibling
    }

    pub fn set_left_sibling(&mut self, offset: Option<u64>) {
        self.left_sibling = offset;
    }

    /// Returns the offset of the right sibling leaf, if linked.
    pub fn right_sibling(&self) -> Option<u64> {
        self.right_sibling
    }

    pub fn set_right_sibling(&mut self, offset: Option<u64>) {
        self.right_sibling = offset;
    }

    /// Returns the number of cells.
    pub fn cell_count(&self) -> usize {
        self.offsets.len()
    }

    /// Returns true once the node holds its maximum number of cells.
    pub fn is_full(&self) -> bool {
        self.offsets.len() >= MAX_LEAF_CELLS
    }

    /// Returns the key at slot `slot` (key order).
    pub fn key_at(&self, slot: usize) -> u32 {
        self.cells[self.offsets[slot] as usize].key
    }

    /// Returns the value bytes at slot `slot` (key order).
    pub fn value_at(&self, slot: usize) -> &[u8] {
        &self.cells[self.offsets[slot] as usize].value
    }

    /// Iterates over cells in key order.
    pub fn iter(&self) -> impl Iterator<Item = &LeafCell> {
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
    pub fn append_cell(&mut self, key: u32, value: Bytes) -> Result<()> {
        check_value_size(&value)?;
        self.push_cell(LeafCell {
            key,
            deleted: false,
            value,
        });
        Ok(())
    }

    /// Inserts a cell at slot `slot`, as returned by [`Self::find_slot`].
    /// The size check runs before any mutation.
    pub fn insert_cell(&mut self, slot: usize, key: u32, value: Bytes) -> Result<()> {
        check_value_size(&value)?;
        self.offsets.insert(slot, self.cells.len() as u16);
        self.cells.push(LeafCell {
            key,
            deleted: false,
            value,
        });
        Ok(())
    }

    /// Overwrites the value of an existing key. The size check runs before
    /// the lookup; a missing key fails with `RecordNotFound`.
    pub fn update_cell(&mut self, key: u32, value: Bytes) -> Result<()> {
        check_value_size(&value)?;
        let slot = self
            .find_slot(key)
            .map_err(|_| KeelError::RecordNotFound { key })?;
        self.cells[self.offsets[slot] as usize].value = value;
        Ok(())
    }

    /// Sets the tombstone flag of an existing key.
    pub fn mark_deleted(&mut self, key: u32) -> Result<()> {
        let slot = self
            .find_slot(key)
            .map_err(|_| KeelError::RecordNotFound { key })?;
        self.cells[self.offsets[slot] as usize].deleted = true;
        Ok(())
    }

    /// Splits a full leaf, keeping the lower half here and moving cells
    /// `[mid, n)` into a fresh leaf.
    ///
    /// Returns the new leaf's first key as the separator to promote. Sibling
    /// pointers are left untouched; the tree walker rewires them.
    pub fn split(&mut self) -> (u32, LeafNode) {
        let mid = self.offsets.len() / 2;

        let mut right = LeafNode::new();
        for &slot in &self.offsets[mid..] {
            right.push_cell(self.cells[slot as usize].clone());
        }

        let lower: Vec<LeafCell> = self.offsets[..mid]
            .iter()
            .map(|&slot| self.cells[slot as usize].clone())
            .collect();
        self.offsets = (0..lower.len() as u16).collect();
        self.cells = lower;

        let separator = right.cells[right.offsets[0] as usize].key;
        (separator, right)
    }

    fn push_cell(&mut self, cell: LeafCell) {
        self.offsets.push(self.cells.len() as u16);
        self.cells.push(cell);
    }

    /// Encodes this node into exactly one page.
    ///
    /// Layout: `node_type(1) | file_offset(8) | last_lsn(8) | has_l_sib(1)
    /// | has_r_sib(1) | l_sib_offset(8) | r_sib_offset(8) | cell_count(4)
    /// | offsets[](2n) | free_size(2) | padding
    /// | cells[](key:4, deleted:1, value_size:4, value)` with cells written
    /// in slot order and values at their declared length.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(PAGE_SIZE);
        buf.put_u8(NodeType::Leaf as u8);
        buf.put_u64_le(self.file_offset);
        buf.put_u64_le(self.last_lsn);
        buf.put_u8(self.left_sibling.is_some() as u8);
        buf.put_u8(self.right_sibling.is_some() as u8);
        buf.put_u64_le(self.left_sibling.unwrap_or(0));
        buf.put_u64_le(self.right_sibling.unwrap_or(0));
        buf.put_u32_le(self.offsets.len() as u32);
        for &slot in &self.offsets {
            buf.put_u16_le(slot);
        }

        let mut footer = BytesMut::new();
        for &slot in &self.offsets {
            let cell = &self.cells[slot as usize];
            footer.put_u32_le(cell.key);
            footer.put_u8(cell.deleted as u8);
            footer.put_u32_le(cell.value.len() as u32);
            footer.put_slice(&cell.value);
        }

        let free_size = PAGE_SIZE - buf.len() - footer.len() - 2;
        buf.put_u16_le(free_size as u16);
        buf.put_bytes(0, free_size);
        buf.put_slice(&footer);

        assert_eq!(
            buf.len(),
            PAGE_SIZE,
            "encoded leaf page is {} bytes",
            buf.len()
        );
        buf.freeze()
    }

    /// Decodes one page into a leaf node. Cells are re-scattered so that
    /// `cells[offsets[i]]` yields the i-th key in order.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() != PAGE_SIZE {
            return Err(KeelError::PageCorrupted {
                offset: 0,
                reason: format!("leaf page is {} bytes, expected {}", buf.len(), PAGE_SIZE),
            });
        }

        let mut data = buf;
        let tag = data.get_u8();
        if tag != NodeType::Leaf as u8 {
            return Err(KeelError::UnexpectedNodeType {
                expected: NodeType::Leaf as u8,
                actual: tag,
            });
        }

        let file_offset = data.get_u64_le();
        let last_lsn = data.get_u64_le();
        let has_left = data.get_u8() != 0;
        let has_right = data.get_u8() != 0;
        let left_offset = data.get_u64_le();
        let right_offset = data.get_u64_le();

        let corrupted = |reason: String| KeelError::PageCorrupted {
            offset: file_offset,
            reason,
        };

        let cell_count = data.get_u32_le() as usize;
        if cell_count > MAX_LEAF_CELLS {
            return Err(corrupted(format!(
                "cell count {} exceeds leaf maximum {}",
                cell_count, MAX_LEAF_CELLS
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

        let mut cells = vec![LeafCell::default(); cell_count];
        for &slot in &offsets {
            if data.remaining() < 9 {
                return Err(corrupted("truncated cell".to_string()));
            }
            let key = data.get_u32_le();
            let deleted = data.get_u8() != 0;
            let value_size = data.get_u32_le() as usize;
            if value_size > MAX_VALUE_SIZE {
                return Err(corrupted(format!(
                    "value size {} exceeds maximum {}",
                    value_size, MAX_VALUE_SIZE
                )));
            }
            if data.remaining() < value_size {
                return Err(corrupted("truncated cell value".to_string()));
            }
            let value = Bytes::copy_from_slice(&data[..value_size]);
            data.advance(value_size);
            cells[slot as usize] = LeafCell {
                key,
                deleted,
                value,
            };
        }

        Ok(Self {
            file_offset,
            last_lsn,
            dirty: false,
            left_sibling: has_left.then_some(left_offset),
            right_sibling: has_right.then_some(right_offset),
            offsets,
            cells,
        })
    }
}

impl Default for LeafNode {
    fn default() -> Self {
        Self::new()
    }
}
