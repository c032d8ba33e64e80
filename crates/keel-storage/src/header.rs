//! Persistent file header.

use keel_common::page::PAGE_SIZE;

/// Header stored in the first bytes of the backing file.
///
/// Layout (28 bytes, little-endian):
/// - last_key: 4 bytes (engine-wide monotonic key generator)
/// - page_table_root: 8 bytes (file offset of the page-table root)
/// - next_free_offset: 8 bytes (next page-aligned offset for allocation)
/// - next_lsn: 8 bytes (log sequence number counter)
///
/// Node pages start at offset `PAGE_SIZE`; the rest of the first frame is
/// reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    /// Last key handed out by the key generator.
    pub last_key: u32,
    /// File offset of the page-table root page.
    pub page_table_root: u64,
    /// Next page-aligned offset available for allocation.
    pub next_free_offset: u64,
    /// Next log sequence number.
    pub next_lsn: u64,
}

impl FileHeader {
    /// Size of the header in bytes.
    pub const SIZE: usize = 28;

    /// Creates the header for a freshly initialized file.
    pub fn new() -> Self {
        Self {
            last_key: 0,
            page_table_root: 0,
            next_free_offset: PAGE_SIZE as u64,
            next_lsn: 0,
        }
    }

    /// Serializes the header to bytes.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.last_key.to_le_bytes());
        buf[4..12].copy_from_slice(&self.page_table_root.to_le_bytes());
        buf[12..20].copy_from_slice(&self.next_free_offset.to_le_bytes());
        buf[20..28].copy_from_slice(&self.next_lsn.to_le_bytes());
        buf
    }

    /// Deserializes the header from bytes.
    pub fn from_bytes(buf: &[u8; Self::SIZE]) -> Self {
        Self {
            last_key: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            page_table_root: u64::from_le_bytes([
                buf[4], buf[5], buf[6], buf[7], buf[8], buf[9], buf[10], buf[11],
            ]),
            next_free_offset: u64::from_le_bytes([
                buf[12], buf[13], buf[14], buf[15], buf[16], buf[17], buf[18], buf[19],
            ]),
            next_lsn: u64::from_le_bytes([
                buf[20], buf[21], buf[22], buf[23], buf[24], buf[25], buf[26], buf[27],
            ]),
        }
    }
}

impl Default for FileHeader {
    fn default() -> Self {
        Self::new()
    }
}
