//! Tree construction settings.

use super::mtree_constants::{
    DEFAULT_CACHE_PAGES, DEFAULT_PAGE_SIZE, DIRECTORY_ENTRY_SIZE, LEAF_ENTRY_SIZE, NODE_OVERHEAD,
    SMALL_CAPACITY,
};
use super::mtree_types::{MTreeError, MTreeResult};

/// Parameters fixed when a tree is created.
///
/// Node capacities are derived from the page size unless set explicitly.
///
/// ```rust,ignore
/// let settings = TreeSettings::new(10).page_size(8192).cache_pages(256);
/// let tree = MkCoPTree::in_memory(settings, relation)?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeSettings {
    k_max: usize,
    page_size: usize,
    capacities: Option<(usize, usize)>,
    cache_pages: usize,
}

impl TreeSettings {
    /// Settings for a tree answering queries with `k <= k_max`.
    pub fn new(k_max: usize) -> Self {
        Self {
            k_max,
            page_size: DEFAULT_PAGE_SIZE,
            capacities: None,
            cache_pages: DEFAULT_CACHE_PAGES,
        }
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Overrides the derived node capacities. Both must fit a page.
    pub fn capacities(mut self, directory: usize, leaf: usize) -> Self {
        self.capacities = Some((directory, leaf));
        self
    }

    /// Number of pages a disk tree keeps in memory.
    pub fn cache_pages(mut self, cache_pages: usize) -> Self {
        self.cache_pages = cache_pages;
        self
    }

    pub fn k_max(&self) -> usize {
        self.k_max
    }

    pub fn get_page_size(&self) -> usize {
        self.page_size
    }

    pub fn get_cache_pages(&self) -> usize {
        self.cache_pages
    }

    /// Checks the settings and resolves `(directory_capacity, leaf_capacity)`.
    pub fn validate(&self) -> MTreeResult<(usize, usize)> {
        if self.k_max == 0 {
            return Err(MTreeError::Configuration(
                "k_max must be at least 1".into(),
            ));
        }
        if self.k_max > u32::MAX as usize {
            return Err(MTreeError::Configuration(format!(
                "k_max {} is too large",
                self.k_max
            )));
        }
        if self.cache_pages == 0 {
            return Err(MTreeError::Configuration(
                "cache must hold at least one page".into(),
            ));
        }

        let dir_fit = page_capacity(self.page_size, DIRECTORY_ENTRY_SIZE);
        let leaf_fit = page_capacity(self.page_size, LEAF_ENTRY_SIZE);
        let (directory, leaf) = self.capacities.unwrap_or((dir_fit, leaf_fit));

        for (kind, capacity, fit) in [("directory", directory, dir_fit), ("leaf", leaf, leaf_fit)] {
            if capacity <= 1 {
                return Err(MTreeError::Configuration(format!(
                    "{} capacity {} is too small, page size of {} bytes cannot hold two entries",
                    kind, capacity, self.page_size
                )));
            }
            if capacity > fit {
                return Err(MTreeError::Configuration(format!(
                    "{} capacity {} does not fit a page of {} bytes (max {})",
                    kind, capacity, self.page_size, fit
                )));
            }
            if capacity < SMALL_CAPACITY {
                log::warn!(
                    "{} capacity is only {}, the tree will be deep",
                    kind,
                    capacity
                );
            }
        }

        Ok((directory, leaf))
    }
}

/// Entries of `entry_size` bytes that fit a page next to the node overhead
fn page_capacity(page_size: usize, entry_size: usize) -> usize {
    page_size.saturating_sub(NODE_OVERHEAD) / entry_size
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_capacities() {
        let settings = TreeSettings::new(10);
        let (dir, leaf) = settings.validate().unwrap();
        assert_eq!(dir, (DEFAULT_PAGE_SIZE - NODE_OVERHEAD) / DIRECTORY_ENTRY_SIZE);
        assert_eq!(leaf, (DEFAULT_PAGE_SIZE - NODE_OVERHEAD) / LEAF_ENTRY_SIZE);
        assert_eq!(settings.k_max(), 10);
        assert_eq!(settings.get_page_size(), DEFAULT_PAGE_SIZE);
        assert_eq!(settings.get_cache_pages(), DEFAULT_CACHE_PAGES);
    }

    #[test]
    fn test_capacity_follows_page_size() {
        let (dir, leaf) = TreeSettings::new(5).page_size(1024).validate().unwrap();
        assert_eq!(dir, 1000 / DIRECTORY_ENTRY_SIZE);
        assert_eq!(leaf, 1000 / LEAF_ENTRY_SIZE);
    }

    #[test]
    fn test_tiny_page_rejected() {
        let result = TreeSettings::new(5).page_size(100).validate();
        assert!(matches!(result, Err(MTreeError::Configuration(_))));
    }

    #[test]
    fn test_explicit_capacities() {
        let (dir, leaf) = TreeSettings::new(5).capacities(3, 4).validate().unwrap();
        assert_eq!((dir, leaf), (3, 4));

        assert!(TreeSettings::new(5).capacities(1, 4).validate().is_err());
        assert!(TreeSettings::new(5)
            .page_size(512)
            .capacities(50, 4)
            .validate()
            .is_err());
    }

    #[test]
    fn test_invalid_k_max_and_cache() {
        assert!(TreeSettings::new(0).validate().is_err());
        assert!(TreeSettings::new(3).cache_pages(0).validate().is_err());
    }
}
