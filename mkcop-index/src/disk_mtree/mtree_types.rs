//! Core types and data structures for the disk-based MkCoP tree.
//!
//! This module defines the fundamental types used throughout the tree:
//! - Error types and result types
//! - Entry types (leaf and directory) and the node container
//! - Statistics structures
//! - File header and page serialization types

use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

use super::mtree_constants::{MAGIC, VERSION};
use crate::approximation::{lower_envelope, upper_envelope, ApproximationLine};
use crate::distance::{DistanceFunction, ObjectId};
use crate::split::SplitMember;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur while building or querying the tree
#[derive(Debug, Error)]
pub enum MTreeError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A caller-supplied parameter is out of range (k > k_max, page too small, ...)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The tree is in a state that does not allow the operation
    #[error("Structural error: {0}")]
    Structural(String),

    #[error("Page {0} not found")]
    PageNotFound(PageId),

    #[error("Query cancelled")]
    Cancelled,

    #[error("Tree is closed")]
    Closed,
}

/// Result type for tree operations
pub type MTreeResult<T> = Result<T, MTreeError>;

/// Page ID - unique identifier for a node/page
pub type PageId = u64;

// ============================================================================
// Statistics
// ============================================================================

/// I/O counters of a page file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageFileStats {
    pub cached_pages: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub page_reads: u64,
    pub page_writes: u64,
}

/// Shape and I/O statistics of a tree
#[derive(Debug, Clone, Default)]
pub struct TreeStats {
    pub object_count: u64,
    pub height: u32,
    pub directory_nodes: u64,
    pub leaf_nodes: u64,
    pub directory_capacity: usize,
    pub leaf_capacity: usize,
    pub page_file: PageFileStats,
}

// ============================================================================
// Entries
// ============================================================================

/// Behavior shared by leaf and directory entries
pub trait MTreeEntry: Clone {
    /// The object stored (leaf) or the routing object (directory)
    fn object_id(&self) -> ObjectId;

    fn parent_distance(&self) -> f64;

    fn set_parent_distance(&mut self, distance: f64);

    /// Radius of the subtree below the entry, `0.0` for leaf entries
    fn covering_radius(&self) -> f64;

    fn conservative(&self) -> &ApproximationLine;

    fn split_member(&self) -> SplitMember {
        SplitMember {
            object_id: self.object_id(),
            covering_radius: self.covering_radius(),
        }
    }
}

/// An indexed object together with its kNN distance approximations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeafEntry {
    pub object_id: ObjectId,
    pub parent_distance: f64,
    pub conservative: ApproximationLine,
    pub progressive: ApproximationLine,
}

impl LeafEntry {
    /// Creates an entry with placeholder lines that bound nothing.
    pub fn new(object_id: ObjectId, parent_distance: f64) -> Self {
        Self {
            object_id,
            parent_distance,
            conservative: ApproximationLine::lower_sentinel(),
            progressive: ApproximationLine::upper_sentinel(),
        }
    }

    /// Whether the batch approximation phase has replaced the placeholders.
    pub fn is_fitted(&self) -> bool {
        self.progressive.t() != f64::INFINITY
    }

    pub fn set_approximations(
        &mut self,
        conservative: ApproximationLine,
        progressive: ApproximationLine,
    ) {
        self.conservative = conservative;
        self.progressive = progressive;
    }

    /// Upper bound of the object's k-th nearest neighbor distance.
    pub fn approximate_conservative_knn_distance(&self, k: usize) -> f64 {
        self.conservative.approximated_distance(k)
    }

    /// Lower bound of the object's k-th nearest neighbor distance.
    ///
    /// Below the line's `k0` the object only has duplicates as neighbors, so
    /// the bound is zero.
    pub fn approximate_progressive_knn_distance(&self, k: usize) -> f64 {
        if k < self.progressive.k0() as usize {
            return 0.0;
        }
        self.progressive.approximated_distance(k)
    }
}

impl MTreeEntry for LeafEntry {
    fn object_id(&self) -> ObjectId {
        self.object_id
    }

    fn parent_distance(&self) -> f64 {
        self.parent_distance
    }

    fn set_parent_distance(&mut self, distance: f64) {
        self.parent_distance = distance;
    }

    fn covering_radius(&self) -> f64 {
        0.0
    }

    fn conservative(&self) -> &ApproximationLine {
        &self.conservative
    }
}

/// A routing object referencing a child page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub routing_object: ObjectId,
    pub parent_distance: f64,
    pub child_page: PageId,
    pub covering_radius: f64,
    pub k_max: u32,
    /// Upper bound of the kNN distances of every object in the subtree
    pub conservative: ApproximationLine,
}

impl DirectoryEntry {
    pub fn new(
        routing_object: ObjectId,
        parent_distance: f64,
        child_page: PageId,
        covering_radius: f64,
        k_max: u32,
        conservative: ApproximationLine,
    ) -> Self {
        Self {
            routing_object,
            parent_distance,
            child_page,
            covering_radius,
            k_max,
            conservative,
        }
    }

    pub fn approximate_conservative_knn_distance(&self, k: usize) -> f64 {
        self.conservative.approximated_distance(k)
    }
}

impl MTreeEntry for DirectoryEntry {
    fn object_id(&self) -> ObjectId {
        self.routing_object
    }

    fn parent_distance(&self) -> f64 {
        self.parent_distance
    }

    fn set_parent_distance(&mut self, distance: f64) {
        self.parent_distance = distance;
    }

    fn covering_radius(&self) -> f64 {
        self.covering_radius
    }

    fn conservative(&self) -> &ApproximationLine {
        &self.conservative
    }
}

// ============================================================================
// Node Types
// ============================================================================

/// Node types in the tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    /// Leaf node containing indexed objects
    Leaf { entries: Vec<LeafEntry> },
    /// Directory node containing routing entries
    Directory {
        entries: Vec<DirectoryEntry>,
        level: u32, // Height from leaf level (leaves are 0)
    },
}

impl Node {
    pub fn empty_leaf() -> Self {
        Node::Leaf {
            entries: Vec::new(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf { .. })
    }

    pub fn len(&self) -> usize {
        match self {
            Node::Leaf { entries } => entries.len(),
            Node::Directory { entries, .. } => entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn level(&self) -> u32 {
        match self {
            Node::Leaf { .. } => 0,
            Node::Directory { level, .. } => *level,
        }
    }

    pub fn split_members(&self) -> Vec<SplitMember> {
        match self {
            Node::Leaf { entries } => entries.iter().map(MTreeEntry::split_member).collect(),
            Node::Directory { entries, .. } => {
                entries.iter().map(MTreeEntry::split_member).collect()
            }
        }
    }

    /// Conservative line dominating every entry's conservative line.
    pub fn aggregate_conservative(&self, k_max: usize) -> ApproximationLine {
        match self {
            Node::Leaf { entries } => {
                upper_envelope(entries.iter().map(|e| &e.conservative), k_max)
            }
            Node::Directory { entries, .. } => {
                upper_envelope(entries.iter().map(|e| &e.conservative), k_max)
            }
        }
    }

    /// Progressive line dominated by every entry's progressive line.
    ///
    /// Directory entries keep no progressive line, so only leaves can answer.
    pub fn aggregate_progressive(&self, k_max: usize) -> Option<ApproximationLine> {
        match self {
            Node::Leaf { entries } => Some(lower_envelope(
                entries.iter().map(|e| &e.progressive),
                k_max,
            )),
            Node::Directory { .. } => None,
        }
    }

    /// Smallest radius around `routing_object` covering every entry's subtree.
    pub fn covering_radius_from_entries(
        &self,
        routing_object: ObjectId,
        distance: &dyn DistanceFunction,
    ) -> f64 {
        let reach = |id: ObjectId, radius: f64| distance.distance(routing_object, id) + radius;
        match self {
            Node::Leaf { entries } => entries
                .iter()
                .map(|e| reach(e.object_id, 0.0))
                .fold(0.0, f64::max),
            Node::Directory { entries, .. } => entries
                .iter()
                .map(|e| reach(e.routing_object, e.covering_radius))
                .fold(0.0, f64::max),
        }
    }
}

// ============================================================================
// Page with Checksum
// ============================================================================

/// A page wrapped with CRC32 checksum for corruption detection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageWithChecksum {
    /// CRC32 checksum of the node data
    pub checksum: u32,
    /// The actual node data
    pub node: Node,
}

impl PageWithChecksum {
    pub fn new(node: Node) -> MTreeResult<Self> {
        let checksum = Self::calculate_checksum(&node)?;
        Ok(Self { checksum, node })
    }

    /// Calculate CRC32 checksum of node data
    pub fn calculate_checksum(node: &Node) -> MTreeResult<u32> {
        let serialized = bincode::serde::encode_to_vec(node, bincode::config::legacy())
            .map_err(|e| MTreeError::Serialization(e.to_string()))?;
        Ok(Self::crc32(&serialized))
    }

    /// CRC32-MPEG2 implementation (matching common checksums)
    fn crc32(data: &[u8]) -> u32 {
        let mut crc: u32 = 0xFFFFFFFF;
        const POLY: u32 = 0x04C11DB7;

        for &byte in data {
            crc ^= (byte as u32) << 24;
            for _ in 0..8 {
                crc = if crc & 0x80000000 != 0 {
                    (crc << 1) ^ POLY
                } else {
                    crc << 1
                };
            }
        }

        crc ^ 0xFFFFFFFF
    }

    /// Verify checksum and consume self to return node
    pub fn into_node(self) -> MTreeResult<Node> {
        let expected = Self::calculate_checksum(&self.node)?;
        if self.checksum != expected {
            return Err(MTreeError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Page checksum mismatch - possible corruption (expected: {:x}, got: {:x})",
                    expected, self.checksum
                ),
            )));
        }
        Ok(self.node)
    }
}

// ============================================================================
// File Header
// ============================================================================

/// File header stored in page 0 of a tree file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileHeader {
    pub magic: u32,
    pub version: u32,
    pub page_size: u32,
    pub k_max: u32,
    pub directory_capacity: u32,
    pub leaf_capacity: u32,
    pub root_page: PageId,
    pub next_page_id: PageId,
    pub object_count: u64,
    pub height: u32,
    /// Set once the batch approximation phase has completed
    pub approximated: bool,
}

impl FileHeader {
    pub fn new(page_size: usize, k_max: usize, directory_capacity: usize, leaf_capacity: usize) -> Self {
        Self {
            magic: MAGIC,
            version: VERSION,
            page_size: page_size as u32,
            k_max: k_max as u32,
            directory_capacity: directory_capacity as u32,
            leaf_capacity: leaf_capacity as u32,
            root_page: 0,
            next_page_id: 1,
            object_count: 0,
            height: 0,
            approximated: false,
        }
    }

    pub fn validate(&self) -> MTreeResult<()> {
        if self.magic != MAGIC {
            return Err(MTreeError::Structural(
                "Invalid file format (bad magic)".into(),
            ));
        }
        if self.version != VERSION {
            return Err(MTreeError::Structural(
                "Unsupported file format version".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approximation::fit_approximations;
    use crate::disk_mtree::mtree_constants::{
        DIRECTORY_ENTRY_SIZE, LEAF_ENTRY_SIZE, NODE_OVERHEAD,
    };
    use crate::distance::{VectorMetric, VectorRelation};

    fn encoded_len<T: Serialize>(value: &T) -> usize {
        bincode::serde::encode_to_vec(value, bincode::config::legacy())
            .unwrap()
            .len()
    }

    #[test]
    fn test_entry_sizes_match_constants() {
        let leaf = LeafEntry::new(1, 0.5);
        let dir = DirectoryEntry::new(1, 0.5, 3, 2.0, 10, ApproximationLine::lower_sentinel());
        assert_eq!(encoded_len(&leaf), LEAF_ENTRY_SIZE);
        assert_eq!(encoded_len(&dir), DIRECTORY_ENTRY_SIZE);

        let node = Node::Directory {
            entries: vec![dir.clone(), dir],
            level: 1,
        };
        let page = PageWithChecksum::new(node).unwrap();
        assert!(encoded_len(&page) <= NODE_OVERHEAD + 2 * DIRECTORY_ENTRY_SIZE);
    }

    #[test]
    fn test_new_leaf_entry_is_unfitted() {
        let entry = LeafEntry::new(4, 0.0);
        assert!(!entry.is_fitted());
        assert_eq!(entry.approximate_conservative_knn_distance(3), 0.0);
        assert_eq!(entry.approximate_progressive_knn_distance(3), f64::INFINITY);
    }

    #[test]
    fn test_progressive_is_zero_below_k0() {
        let mut entry = LeafEntry::new(4, 0.0);
        let (cons, prog) = fit_approximations(&[0.0, 1.0, 2.0], 3);
        entry.set_approximations(cons, prog);
        assert!(entry.is_fitted());
        assert_eq!(entry.approximate_progressive_knn_distance(1), 0.0);
        assert!(entry.approximate_progressive_knn_distance(2) > 0.0);
    }

    #[test]
    fn test_aggregate_conservative_dominates_entries() {
        let mut a = LeafEntry::new(0, 0.0);
        let fit_a = fit_approximations(&[1.0, 2.0, 3.0, 4.0], 4);
        a.set_approximations(fit_a.0, fit_a.1);
        let mut b = LeafEntry::new(1, 0.0);
        let fit_b = fit_approximations(&[0.0, 0.5, 5.0, 6.0], 4);
        b.set_approximations(fit_b.0, fit_b.1);

        let node = Node::Leaf {
            entries: vec![a.clone(), b.clone()],
        };
        let agg = node.aggregate_conservative(4);
        assert_eq!(agg.k0(), 2);
        for e in [&a, &b] {
            let k0 = agg.k0() as usize;
            assert!(agg.value_at(k0) >= e.conservative.value_at(k0) - 1e-12);
            assert!(agg.value_at(4) >= e.conservative.value_at(4) - 1e-12);
        }

        let prog = node.aggregate_progressive(4).unwrap();
        assert_eq!(prog.k0(), 1);
        assert!(prog.value_at(4) <= a.progressive.value_at(4) + 1e-12);
        assert!(prog.value_at(4) <= b.progressive.value_at(4) + 1e-12);
    }

    #[test]
    fn test_directory_has_no_progressive_aggregate() {
        let node = Node::Directory {
            entries: vec![],
            level: 1,
        };
        assert!(node.aggregate_progressive(5).is_none());
        assert_eq!(node.level(), 1);
    }

    #[test]
    fn test_covering_radius_from_entries() {
        let relation = VectorRelation::from_points(
            vec![vec![0.0], vec![3.0], vec![-1.0]],
            VectorMetric::Euclidean,
        );
        let leaf = Node::Leaf {
            entries: vec![LeafEntry::new(1, 0.0), LeafEntry::new(2, 0.0)],
        };
        assert!((leaf.covering_radius_from_entries(0, &relation) - 3.0).abs() < 1e-12);

        let dir = Node::Directory {
            entries: vec![DirectoryEntry::new(
                2,
                0.0,
                7,
                0.5,
                3,
                ApproximationLine::lower_sentinel(),
            )],
            level: 1,
        };
        assert!((dir.covering_radius_from_entries(1, &relation) - 4.5).abs() < 1e-12);
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let mut page = PageWithChecksum::new(Node::Leaf {
            entries: vec![LeafEntry::new(9, 1.0)],
        })
        .unwrap();
        page.checksum ^= 1;
        assert!(page.into_node().is_err());
    }

    #[test]
    fn test_header_validation() {
        let mut header = FileHeader::new(4096, 10, 72, 72);
        assert!(header.validate().is_ok());
        header.magic = 0;
        assert!(header.validate().is_err());
    }
}
