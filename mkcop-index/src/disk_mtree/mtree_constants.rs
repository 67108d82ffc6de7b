//! Constants for the disk-based MkCoP tree.

/// Default page size in bytes
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Default cache size in number of pages
pub const DEFAULT_CACHE_PAGES: usize = 1024;

/// Encoded size of an approximation line: k0 (u32) + m (f64) + t (f64)
pub const APPROXIMATION_LINE_SIZE: usize = 4 + 8 + 8;

/// Encoded size of a leaf entry: object id, parent distance and two lines
pub const LEAF_ENTRY_SIZE: usize = 8 + 8 + 2 * APPROXIMATION_LINE_SIZE;

/// Encoded size of a directory entry: routing object, parent distance,
/// child page, covering radius, k_max and the conservative line
pub const DIRECTORY_ENTRY_SIZE: usize = 8 + 8 + 8 + 8 + 4 + APPROXIMATION_LINE_SIZE;

/// Per-page bytes not spent on entries: checksum, node tag, level, entry count
pub const NODE_OVERHEAD: usize = 24;

/// Capacities below this produce a warning
pub const SMALL_CAPACITY: usize = 10;

/// Magic number for file format identification
pub const MAGIC: u32 = 0x4D4B4350; // "MKCP"

/// File format version
pub const VERSION: u32 = 1;
