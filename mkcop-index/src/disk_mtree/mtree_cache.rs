//! LRU cache for tree pages.
//!
//! Pages enter the cache when first read or when created; nothing is
//! preloaded. Dirty pages are written back on eviction or flush.

use std::collections::{HashMap, VecDeque};

use super::mtree_types::{Node, PageId};

/// A cached page with its data and dirty flag
pub struct CachedPage {
    pub node: Node,
    pub dirty: bool,
}

/// LRU cache for tree pages
pub struct PageCache {
    pages: HashMap<PageId, CachedPage>,
    /// LRU order (front = oldest, back = newest)
    lru_order: VecDeque<PageId>,
    max_pages: usize,
    hits: u64,
    misses: u64,
}

impl PageCache {
    pub fn new(max_pages: usize) -> Self {
        Self {
            pages: HashMap::new(),
            lru_order: VecDeque::new(),
            max_pages: max_pages.max(1),
            hits: 0,
            misses: 0,
        }
    }

    fn touch(&mut self, page_id: PageId) {
        self.lru_order.retain(|&id| id != page_id);
        self.lru_order.push_back(page_id);
    }

    /// Get a page from cache, updating LRU order and hit counters.
    /// Returns None if the page must be loaded from disk.
    pub fn get(&mut self, page_id: PageId) -> Option<&Node> {
        if self.pages.contains_key(&page_id) {
            self.hits += 1;
            self.touch(page_id);
            self.pages.get(&page_id).map(|cached| &cached.node)
        } else {
            self.misses += 1;
            None
        }
    }

    /// Insert a page, replacing any cached version
    pub fn insert(&mut self, page_id: PageId, node: Node, dirty: bool) {
        self.touch(page_id);
        self.pages.insert(page_id, CachedPage { node, dirty });
    }

    /// Whether inserting another page requires an eviction first
    pub fn needs_eviction(&self) -> bool {
        self.pages.len() >= self.max_pages
    }

    /// Remove the least recently used page (page_id, node, dirty flag)
    pub fn evict_oldest(&mut self) -> Option<(PageId, Node, bool)> {
        while let Some(page_id) = self.lru_order.pop_front() {
            if let Some(cached) = self.pages.remove(&page_id) {
                return Some((page_id, cached.node, cached.dirty));
            }
        }
        None
    }

    /// Dirty pages in ascending page order
    pub fn dirty_pages(&self) -> Vec<(PageId, &Node)> {
        let mut dirty: Vec<_> = self
            .pages
            .iter()
            .filter(|(_, cached)| cached.dirty)
            .map(|(id, cached)| (*id, &cached.node))
            .collect();
        dirty.sort_by_key(|(id, _)| *id);
        dirty
    }

    pub fn mark_clean(&mut self, page_id: PageId) {
        if let Some(cached) = self.pages.get_mut(&page_id) {
            cached.dirty = false;
        }
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn contains(&self, page_id: PageId) -> bool {
        self.pages.contains_key(&page_id)
    }

    /// (hits, misses) since creation
    pub fn hit_counts(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_cache_new() {
        let cache = PageCache::new(10);
        assert!(cache.is_empty());
        assert!(!cache.needs_eviction());
    }

    #[test]
    fn test_page_cache_insert_and_get() {
        let mut cache = PageCache::new(10);
        cache.insert(1, Node::empty_leaf(), false);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(1));
        assert!(cache.get(1).is_some());
        assert!(cache.get(2).is_none());
        assert_eq!(cache.hit_counts(), (1, 1));
    }

    #[test]
    fn test_page_cache_lru_eviction() {
        let mut cache = PageCache::new(3);
        cache.insert(1, Node::empty_leaf(), false);
        cache.insert(2, Node::empty_leaf(), false);
        cache.insert(3, Node::empty_leaf(), false);
        assert!(cache.needs_eviction());

        // Page 1 becomes most recent
        let _ = cache.get(1);

        let evicted = cache.evict_oldest().unwrap();
        assert_eq!(evicted.0, 2);
        cache.insert(4, Node::empty_leaf(), false);

        assert!(!cache.contains(2));
        assert!(cache.contains(1));
        assert!(cache.contains(3));
        assert!(cache.contains(4));
    }

    #[test]
    fn test_reinsert_replaces_and_marks_dirty() {
        let mut cache = PageCache::new(4);
        cache.insert(1, Node::empty_leaf(), false);
        cache.insert(
            1,
            Node::Directory {
                entries: vec![],
                level: 2,
            },
            true,
        );
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(1).map(Node::level), Some(2));

        let dirty = cache.dirty_pages();
        assert_eq!(dirty.len(), 1);
        assert_eq!(dirty[0].0, 1);
    }

    #[test]
    fn test_dirty_pages_sorted_and_mark_clean() {
        let mut cache = PageCache::new(10);
        cache.insert(3, Node::empty_leaf(), true);
        cache.insert(1, Node::empty_leaf(), true);
        cache.insert(2, Node::empty_leaf(), false);

        let ids: Vec<_> = cache.dirty_pages().iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![1, 3]);

        cache.mark_clean(1);
        cache.mark_clean(3);
        assert!(cache.dirty_pages().is_empty());
    }

    #[test]
    fn test_evict_returns_dirty_flag() {
        let mut cache = PageCache::new(10);
        cache.insert(1, Node::empty_leaf(), true);
        let (id, _, dirty) = cache.evict_oldest().unwrap();
        assert_eq!(id, 1);
        assert!(dirty);
        assert!(cache.evict_oldest().is_none());
    }
}
