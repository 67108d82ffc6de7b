//! Paged MkCoP tree.
//!
//! Nodes live in a [`PageFile`], either in memory or as fixed-size pages of
//! a single file behind an LRU cache. Directory entries carry a routing
//! object, covering radius and an upper bound of the kNN distances below
//! them; leaf entries carry an upper and a lower bound per object.

pub mod mtree_constants;
pub mod mtree_types;
pub mod mtree_cache;
pub mod mtree_storage;
pub mod page_file;
pub mod settings;
pub mod integrity;
mod knn;
mod mtree_impl;
mod rknn_query;

pub use integrity::IntegrityReport;
pub use mtree_constants::{DEFAULT_CACHE_PAGES, DEFAULT_PAGE_SIZE};
pub use mtree_impl::MkCoPTree;
pub use mtree_types::{
    DirectoryEntry, FileHeader, LeafEntry, MTreeEntry, MTreeError, MTreeResult, Node,
    PageFileStats, PageId, PageWithChecksum, TreeStats,
};
pub use page_file::{DiskPageFile, MemoryPageFile, PageFile};
pub use rknn_query::CancellationToken;
pub use settings::TreeSettings;
