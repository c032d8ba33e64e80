//! File-backed page store with a background flusher.

use crate::header::FileHeader;
use crate::node::{Node, PageRef};
use crate::store::PageStore;
use keel_cache::LruCache;
use keel_common::page::PAGE_SIZE;
use keel_common::{KeelError, Result, StorageConfig};
use parking_lot::{Mutex, RwLock};
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Page store over a single backing file.
///
/// The first [`FileHeader::SIZE`] bytes hold the persistent header; node
/// pages are 4096-byte frames starting at offset 4096. Mutated nodes stay in
/// the cache until a background flusher tick (or an explicit [`flush`])
/// writes them back, pages before header.
///
/// One reader-writer lock guards the inner state. `fetch`, `append`,
/// `update`, and `flush` acquire it exclusively since a cache hit still
/// rewires the recency list; pure reads acquire it shared. Lock order is
/// store inner before node.
///
/// [`flush`]: PageStore::flush
pub struct FileStore {
    shared: Arc<StoreShared>,
    flusher: Mutex<Option<FlusherHandle>>,
}

struct StoreShared {
    fsync_enabled: bool,
    inner: RwLock<StoreInner>,
}

struct StoreInner {
    file: File,
    header: FileHeader,
    cache: LruCache<u64, PageRef>,
}

struct FlusherHandle {
    shutdown: mpsc::Sender<()>,
    thread: thread::JoinHandle<()>,
}

/// Only clean pages may be dropped from the cache; a dirty page is the only
/// current copy of its data.
fn evictable(page: &PageRef) -> bool {
    !page.read().is_dirty()
}

impl FileStore {
    /// Opens or creates the backing file and starts the flusher.
    ///
    /// An existing file must begin with a valid header; a fresh file is
    /// initialized with allocation starting at offset 4096.
    pub fn open(config: StorageConfig) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&config.path)?;

        let header = if file.metadata()?.len() >= FileHeader::SIZE as u64 {
            let mut buf = [0u8; FileHeader::SIZE];
            file.seek(SeekFrom::Start(0))?;
            file.read_exact(&mut buf)?;
            FileHeader::from_bytes(&buf)
        } else {
            let header = FileHeader::new();
            file.seek(SeekFrom::Start(0))?;
            file.write_all(&header.to_bytes())?;
            header
        };

        let shared = Arc::new(StoreShared {
            fsync_enabled: config.fsync_enabled,
            inner: RwLock::new(StoreInner {
                file,
                header,
                cache: LruCache::new(config.cache_capacity),
            }),
        });

        let (shutdown, ticks) = mpsc::channel();
        let thread = thread::Builder::new().name("keel-flusher".into()).spawn({
            let shared = Arc::clone(&shared);
            let interval = config.flush_interval;
            move || flush_loop(shared, ticks, interval)
        })?;

        tracing::debug!(path = %config.path.display(), "opened file store");

        Ok(Self {
            shared,
            flusher: Mutex::new(Some(FlusherHandle { shutdown, thread })),
        })
    }

    /// Returns the recorded page-table root offset.
    pub fn page_table_root(&self) -> u64 {
        self.shared.inner.read().header.page_table_root
    }

    /// Stops the flusher, performs a final flush, and syncs the file.
    pub fn close(&self) -> Result<()> {
        let handle = self.flusher.lock().take().ok_or(KeelError::StoreClosed)?;

        // A pending tick may race with shutdown; joining first guarantees the
        // final flush below is the last write.
        let _ = handle.shutdown.send(());
        let _ = handle.thread.join();

        self.shared.flush_pages()?;
        self.shared.inner.write().file.sync_all()?;

        tracing::debug!("closed file store");
        Ok(())
    }
}

impl PageStore for FileStore {
    fn append(&self, page: &PageRef) -> Result<()> {
        let mut inner = self.shared.inner.write();

        let offset = inner.header.next_free_offset;
        page.write().set_file_offset(offset);
        inner.cache.insert(offset, Arc::clone(page), evictable)?;
        inner.header.next_free_offset += PAGE_SIZE as u64;

        Ok(())
    }

    fn update(&self, page: &PageRef) -> Result<()> {
        let mut inner = self.shared.inner.write();

        let (offset, buf) = {
            let node = page.read();
            (node.file_offset(), node.encode())
        };
        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.write_all(&buf)?;
        inner.cache.insert(offset, Arc::clone(page), evictable)?;

        Ok(())
    }

    fn fetch(&self, offset: u64) -> Result<PageRef> {
        let mut inner = self.shared.inner.write();

        if let Some(page) = inner.cache.get(&offset) {
            return Ok(Arc::clone(page));
        }

        let mut buf = vec![0u8; PAGE_SIZE];
        inner.file.seek(SeekFrom::Start(offset))?;
        if let Err(e) = inner.file.read_exact(&mut buf) {
            // A frame that ends early was never fully written; decoding a
            // zero-padded buffer would hide the corruption.
            if e.kind() == ErrorKind::UnexpectedEof {
                let file_len = inner.file.metadata()?.len();
                return Err(KeelError::ShortRead {
                    offset,
                    expected: PAGE_SIZE,
                    actual: file_len.saturating_sub(offset).min(PAGE_SIZE as u64) as usize,
                });
            }
            return Err(e.into());
        }

        let page = Node::decode(&buf)?.into_ref();
        inner.cache.insert(offset, Arc::clone(&page), evictable)?;

        Ok(page)
    }

    fn last_key(&self) -> u32 {
        self.shared.inner.read().header.last_key
    }

    fn increment_last_key(&self) -> u32 {
        let mut inner = self.shared.inner.write();
        inner.header.last_key += 1;
        inner.header.last_key
    }

    fn next_lsn(&self) -> u64 {
        self.shared.inner.read().header.next_lsn
    }

    fn incr_lsn(&self) {
        self.shared.inner.write().header.next_lsn += 1;
    }

    fn set_page_table_root(&self, page: &PageRef) -> Result<()> {
        let mut inner = self.shared.inner.write();
        inner.header.page_table_root = page.read().file_offset();
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.shared.flush_pages()
    }
}

impl Drop for FileStore {
    fn drop(&mut self) {
        // Dropping without close simulates a crash: stop the flusher but skip
        // the final flush, leaving the file as of the last completed tick.
        if let Some(handle) = self.flusher.lock().take() {
            drop(handle.shutdown);
            let _ = handle.thread.join();
        }
    }
}

impl StoreShared {
    /// Writes every dirty cached node at its offset, then the header.
    /// Dirty bits are cleared only after the corresponding write succeeds,
    /// so a failed tick retries the remainder on the next one.
    fn flush_pages(&self) -> Result<()> {
        let mut inner = self.inner.write();
        let StoreInner {
            file,
            header,
            cache,
        } = &mut *inner;

        for (_, page) in cache.iter() {
            let mut node = page.write();
            if !node.is_dirty() {
                continue;
            }
            let buf = node.encode();
            file.seek(SeekFrom::Start(node.file_offset()))?;
            file.write_all(&buf)?;
            node.mark_clean();
        }

        file.seek(SeekFrom::Start(0))?;
        file.write_all(&header.to_bytes())?;

        if self.fsync_enabled {
            file.sync_all()?;
        }

        Ok(())
    }
}

/// Flusher loop: a tick fires whenever `interval` elapses without a shutdown
/// message. Tick errors are logged and swallowed; the dirty set is retried
/// on the next tick.
fn flush_loop(shared: Arc<StoreShared>, shutdown: mpsc::Receiver<()>, interval: Duration) {
    loop {
        match shutdown.recv_timeout(interval) {
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if let Err(e) = shared.flush_pages() {
                    tracing::error!(error = %e, "background flush failed");
                }
            }
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::LeafNode;
    use bytes::Bytes;
    use tempfile::tempdir;

    fn test_config(dir: &tempfile::TempDir, capacity: usize) -> StorageConfig {
        StorageConfig {
            path: dir.path().join("keel.db"),
            cache_capacity: capacity,
            // Keep the ticker out of the way unless a test wants it.
            flush_interval: Duration::from_secs(3600),
            fsync_enabled: false,
        }
    }

    #[test]
    fn test_open_initializes_header() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(test_config(&dir, 16)).unwrap();

        assert_eq!(store.last_key(), 0);
        assert_eq!(store.next_lsn(), 0);
        store.close().unwrap();

        let len = std::fs::metadata(dir.path().join("keel.db")).unwrap().len();
        assert!(len >= FileHeader::SIZE as u64);
    }

    #[test]
    fn test_reopen_reads_header() {
        let dir = tempdir().unwrap();

        {
            let store = FileStore::open(test_config(&dir, 16)).unwrap();
            store.increment_last_key();
            store.increment_last_key();
            store.incr_lsn();
            store.close().unwrap();
        }

        let store = FileStore::open(test_config(&dir, 16)).unwrap();
        assert_eq!(store.last_key(), 2);
        assert_eq!(store.next_lsn(), 1);
        store.close().unwrap();
    }

    #[test]
    fn test_append_assigns_page_aligned_offsets() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(test_config(&dir, 16)).unwrap();

        let first = Node::from(LeafNode::new()).into_ref();
        let second = Node::from(LeafNode::new()).into_ref();
        store.append(&first).unwrap();
        store.append(&second).unwrap();

        assert_eq!(first.read().file_offset(), 4096);
        assert_eq!(second.read().file_offset(), 8192);
        store.close().unwrap();
    }

    #[test]
    fn test_fetch_returns_resident_object() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(test_config(&dir, 16)).unwrap();

        let page = Node::from(LeafNode::new()).into_ref();
        store.append(&page).unwrap();
        page.write().mark_dirty(1);

        // Before any flush the cached object is the only copy.
        let fetched = store.fetch(4096).unwrap();
        assert!(Arc::ptr_eq(&page, &fetched));
        store.close().unwrap();
    }

    #[test]
    fn test_fetch_unwritten_offset_is_short_read() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(test_config(&dir, 16)).unwrap();

        let result = store.fetch(4096);
        assert!(matches!(
            result,
            Err(KeelError::ShortRead {
                offset: 4096,
                expected: 4096,
                actual: 0,
            })
        ));
        store.close().unwrap();
    }

    #[test]
    fn test_update_writes_through() {
        let dir = tempdir().unwrap();

        {
            let store = FileStore::open(test_config(&dir, 16)).unwrap();
            let mut leaf = LeafNode::new();
            leaf.append_cell(1, Bytes::from_static(b"one")).unwrap();
            let page = Node::from(leaf).into_ref();
            store.append(&page).unwrap();
            store.update(&page).unwrap();
            // Header still records the allocation even without close's flush.
            store.flush().unwrap();
            store.close().unwrap();
        }

        let store = FileStore::open(test_config(&dir, 16)).unwrap();
        let page = store.fetch(4096).unwrap();
        let node = page.read();
        let leaf = node.as_leaf().unwrap();
        assert_eq!(leaf.cell_count(), 1);
        assert_eq!(leaf.value_at(0), b"one");
        drop(node);
        store.close().unwrap();
    }

    #[test]
    fn test_close_twice_fails() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(test_config(&dir, 16)).unwrap();

        store.close().unwrap();
        assert!(matches!(store.close(), Err(KeelError::StoreClosed)));
    }
}
