//! Page files: where tree nodes live.
//!
//! [`MemoryPageFile`] keeps nodes in a map and never touches disk.
//! [`DiskPageFile`] lazily loads nodes from a [`Storage`] file through an LRU
//! [`PageCache`] and writes dirty pages back on eviction or flush.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use super::mtree_cache::PageCache;
use super::mtree_storage::Storage;
use super::mtree_types::{FileHeader, MTreeError, MTreeResult, Node, PageFileStats, PageId};

/// Backing store for tree nodes.
pub trait PageFile: Send + Sync {
    /// Reads a node. Unknown pages yield [`MTreeError::PageNotFound`].
    fn read_page(&self, page_id: PageId) -> MTreeResult<Node>;

    /// Stores a node, replacing any previous version of the page.
    fn write_page(&self, page_id: PageId, node: Node) -> MTreeResult<()>;

    /// Makes all written pages and the header durable.
    fn flush(&self, header: &FileHeader) -> MTreeResult<()>;

    fn stats(&self) -> PageFileStats;

    /// Whether pages survive the process
    fn is_persistent(&self) -> bool;
}

/// I/O counters shared by the page file implementations
#[derive(Debug, Default)]
struct IoCounters {
    reads: AtomicU64,
    writes: AtomicU64,
}

impl IoCounters {
    fn read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    fn wrote(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }
}

// ============================================================================
// Memory
// ============================================================================

/// Page file keeping every node in memory
#[derive(Debug, Default)]
pub struct MemoryPageFile {
    pages: RwLock<HashMap<PageId, Node>>,
    counters: IoCounters,
}

impl MemoryPageFile {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PageFile for MemoryPageFile {
    fn read_page(&self, page_id: PageId) -> MTreeResult<Node> {
        self.counters.read();
        self.pages
            .read()
            .get(&page_id)
            .cloned()
            .ok_or(MTreeError::PageNotFound(page_id))
    }

    fn write_page(&self, page_id: PageId, node: Node) -> MTreeResult<()> {
        self.counters.wrote();
        self.pages.write().insert(page_id, node);
        Ok(())
    }

    fn flush(&self, _header: &FileHeader) -> MTreeResult<()> {
        Ok(())
    }

    fn stats(&self) -> PageFileStats {
        PageFileStats {
            cached_pages: self.pages.read().len() as u64,
            cache_hits: 0,
            cache_misses: 0,
            page_reads: self.counters.reads.load(Ordering::Relaxed),
            page_writes: self.counters.writes.load(Ordering::Relaxed),
        }
    }

    fn is_persistent(&self) -> bool {
        false
    }
}

// ============================================================================
// Disk
// ============================================================================

/// Page file backed by a file of fixed-size pages.
///
/// Nodes are loaded one page at a time when first accessed. `page_reads`
/// and `page_writes` count physical disk I/O.
pub struct DiskPageFile {
    storage: Storage,
    cache: RwLock<PageCache>,
    counters: IoCounters,
}

impl DiskPageFile {
    /// Create a new file, truncating an existing one, and write `header`.
    pub fn create(
        path: impl AsRef<Path>,
        header: &FileHeader,
        cache_pages: usize,
    ) -> MTreeResult<Self> {
        let storage = Storage::create(path.as_ref(), header.page_size as usize)?;
        storage.write_header(header)?;
        storage.sync()?;
        log::debug!(
            "created tree file {} with {} byte pages",
            path.as_ref().display(),
            header.page_size
        );

        Ok(Self {
            storage,
            cache: RwLock::new(PageCache::new(cache_pages)),
            counters: IoCounters::default(),
        })
    }

    /// Open an existing file. Only the header is read.
    pub fn open(path: impl AsRef<Path>, cache_pages: usize) -> MTreeResult<(Self, FileHeader)> {
        let storage = Storage::open(path.as_ref())?;
        let header = storage.read_header()?;
        log::debug!(
            "opened tree file {}: {} objects, height {}",
            path.as_ref().display(),
            header.object_count,
            header.height
        );

        Ok((
            Self {
                storage,
                cache: RwLock::new(PageCache::new(cache_pages)),
                counters: IoCounters::default(),
            },
            header,
        ))
    }

    pub fn path(&self) -> &Path {
        self.storage.path()
    }

    /// Add a node to the cache, writing back evicted dirty pages.
    fn cache_node(&self, page_id: PageId, node: Node, dirty: bool) -> MTreeResult<()> {
        let mut cache = self.cache.write();

        while cache.needs_eviction() && !cache.contains(page_id) {
            match cache.evict_oldest() {
                Some((evict_id, evict_node, evict_dirty)) => {
                    if evict_dirty {
                        self.storage.write_page(evict_id, &evict_node)?;
                        self.counters.wrote();
                    }
                }
                None => break,
            }
        }

        cache.insert(page_id, node, dirty);
        Ok(())
    }
}

impl PageFile for DiskPageFile {
    fn read_page(&self, page_id: PageId) -> MTreeResult<Node> {
        if let Some(node) = self.cache.write().get(page_id) {
            return Ok(node.clone());
        }

        self.counters.read();
        let node = self.storage.read_page(page_id)?;
        self.cache_node(page_id, node.clone(), false)?;
        Ok(node)
    }

    fn write_page(&self, page_id: PageId, node: Node) -> MTreeResult<()> {
        self.cache_node(page_id, node, true)
    }

    fn flush(&self, header: &FileHeader) -> MTreeResult<()> {
        let mut cache = self.cache.write();
        let mut written = Vec::new();
        for (page_id, node) in cache.dirty_pages() {
            self.storage.write_page(page_id, node)?;
            self.counters.wrote();
            written.push(page_id);
        }
        for page_id in &written {
            cache.mark_clean(*page_id);
        }
        drop(cache);

        self.storage.write_header(header)?;
        self.storage.sync()?;
        log::trace!("flushed {} dirty pages", written.len());
        Ok(())
    }

    fn stats(&self) -> PageFileStats {
        let cache = self.cache.read();
        let (hits, misses) = cache.hit_counts();
        PageFileStats {
            cached_pages: cache.len() as u64,
            cache_hits: hits,
            cache_misses: misses,
            page_reads: self.counters.reads.load(Ordering::Relaxed),
            page_writes: self.counters.writes.load(Ordering::Relaxed),
        }
    }

    fn is_persistent(&self) -> bool {
        true
    }
}
