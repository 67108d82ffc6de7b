//! MkCoPTree implementation: construction, approximation fitting and
//! page management. Queries live in `knn` and `rknn_query`.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use parking_lot::RwLock;

use super::mtree_constants::DEFAULT_CACHE_PAGES;
use super::mtree_types::{
    DirectoryEntry, FileHeader, LeafEntry, MTreeEntry, MTreeError, MTreeResult, Node, PageId,
    TreeStats,
};
use super::page_file::{DiskPageFile, MemoryPageFile, PageFile};
use super::settings::TreeSettings;
use crate::approximation::{fit_approximations, lower_envelope, ApproximationLine};
use crate::distance::{DistanceFunction, ObjectId};
use crate::split::{FarthestPointsSplit, Split, SplitSide, SplitStrategy};
use crate::statistics::RkNNCounters;

/// Metric tree answering reverse k-nearest-neighbor queries.
///
/// Every leaf entry carries a conservative (upper) and a progressive (lower)
/// bound of its object's kNN distance for `k = 1..=k_max`; every directory
/// entry carries an upper bound valid for its whole subtree. The tree is
/// built once by [`MkCoPTree::insert`] and read-only afterwards.
///
/// ```rust,ignore
/// let relation = VectorRelation::from_points(points, VectorMetric::Euclidean);
/// let ids = relation.ids();
/// let mut tree = MkCoPTree::in_memory(TreeSettings::new(10), relation)?;
/// tree.insert(&ids)?;
/// let reverse_neighbors = tree.reverse_knn_query(ids[0], 5)?;
/// ```
pub struct MkCoPTree<D: DistanceFunction> {
    pub(crate) page_file: Box<dyn PageFile>,
    pub(crate) header: RwLock<FileHeader>,
    pub(crate) distance: D,
    split_strategy: Box<dyn SplitStrategy>,
    pub(crate) statistics: RkNNCounters,
    closed: RwLock<bool>,
}

/// Step of an insertion path: the directory page, the entry descended into,
/// and the routing object of the page itself (`None` for the root).
#[derive(Debug, Clone, Copy)]
struct PathStep {
    page_id: PageId,
    index: usize,
    routing_object: Option<ObjectId>,
}

/// Aggregated bounds of a whole subtree
#[derive(Debug, Clone, Copy)]
struct SubtreeBounds {
    conservative: ApproximationLine,
    progressive: ApproximationLine,
}

impl<D: DistanceFunction> MkCoPTree<D> {
    /// Create a new, empty tree stored in the file at `path`.
    pub fn create(
        path: impl AsRef<Path>,
        settings: TreeSettings,
        distance: D,
    ) -> MTreeResult<Self> {
        let header = Self::header_for(&settings)?;
        let page_file = DiskPageFile::create(path, &header, settings.get_cache_pages())?;
        Ok(Self::from_parts(Box::new(page_file), header, distance))
    }

    /// Create a new, empty tree kept entirely in memory.
    pub fn in_memory(settings: TreeSettings, distance: D) -> MTreeResult<Self> {
        let header = Self::header_for(&settings)?;
        Ok(Self::from_parts(
            Box::new(MemoryPageFile::new()),
            header,
            distance,
        ))
    }

    /// Open a tree file written by [`MkCoPTree::create`].
    ///
    /// Only the header is read; nodes are loaded on demand. `distance` must
    /// resolve the same object ids the tree was built with.
    pub fn open(path: impl AsRef<Path>, distance: D) -> MTreeResult<Self> {
        Self::open_with_cache_size(path, distance, DEFAULT_CACHE_PAGES)
    }

    /// Open with custom cache size (number of pages)
    pub fn open_with_cache_size(
        path: impl AsRef<Path>,
        distance: D,
        cache_pages: usize,
    ) -> MTreeResult<Self> {
        let (page_file, header) = DiskPageFile::open(path, cache_pages)?;
        if header.k_max == 0 || header.directory_capacity < 2 || header.leaf_capacity < 2 {
            return Err(MTreeError::Structural(format!(
                "Header describes an unusable tree (k_max {}, capacities {}/{})",
                header.k_max, header.directory_capacity, header.leaf_capacity
            )));
        }
        Ok(Self::from_parts(Box::new(page_file), header, distance))
    }

    /// Replace the default [`FarthestPointsSplit`] strategy.
    pub fn with_split_strategy(mut self, strategy: impl SplitStrategy + 'static) -> Self {
        self.split_strategy = Box::new(strategy);
        self
    }

    fn header_for(settings: &TreeSettings) -> MTreeResult<FileHeader> {
        let (directory_capacity, leaf_capacity) = settings.validate()?;
        log::debug!(
            "tree settings: k_max {}, page size {}, capacities {}/{}",
            settings.k_max(),
            settings.get_page_size(),
            directory_capacity,
            leaf_capacity
        );
        Ok(FileHeader::new(
            settings.get_page_size(),
            settings.k_max(),
            directory_capacity,
            leaf_capacity,
        ))
    }

    fn from_parts(page_file: Box<dyn PageFile>, header: FileHeader, distance: D) -> Self {
        Self {
            page_file,
            header: RwLock::new(header),
            distance,
            split_strategy: Box::new(FarthestPointsSplit),
            statistics: RkNNCounters::new(),
            closed: RwLock::new(false),
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn k_max(&self) -> usize {
        self.header.read().k_max as usize
    }

    /// Number of indexed objects
    pub fn len(&self) -> u64 {
        self.header.read().object_count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of levels, 0 for an empty tree
    pub fn height(&self) -> u32 {
        self.header.read().height
    }

    /// Whether the bulk build has completed and queries can run.
    pub fn is_approximated(&self) -> bool {
        self.header.read().approximated
    }

    pub fn directory_capacity(&self) -> usize {
        self.header.read().directory_capacity as usize
    }

    pub fn leaf_capacity(&self) -> usize {
        self.header.read().leaf_capacity as usize
    }

    pub fn distance_function(&self) -> &D {
        &self.distance
    }

    pub(crate) fn root_page(&self) -> PageId {
        self.header.read().root_page
    }

    pub(crate) fn check_closed(&self) -> MTreeResult<()> {
        if *self.closed.read() {
            Err(MTreeError::Closed)
        } else {
            Ok(())
        }
    }

    pub(crate) fn ensure_approximated(&self) -> MTreeResult<()> {
        self.check_closed()?;
        if self.is_approximated() {
            Ok(())
        } else {
            Err(MTreeError::Structural(
                "Approximations are not fitted yet, insert the objects first".into(),
            ))
        }
    }

    // ------------------------------------------------------------------
    // Page access
    // ------------------------------------------------------------------

    pub(crate) fn read_node(&self, page_id: PageId) -> MTreeResult<Node> {
        self.page_file.read_page(page_id)
    }

    fn write_node(&self, page_id: PageId, node: Node) -> MTreeResult<()> {
        self.page_file.write_page(page_id, node)
    }

    fn allocate_page(&self) -> PageId {
        let mut header = self.header.write();
        let page_id = header.next_page_id;
        header.next_page_id += 1;
        page_id
    }

    // ------------------------------------------------------------------
    // Bulk build
    // ------------------------------------------------------------------

    /// Builds the index over `objects`.
    ///
    /// All objects are inserted first, then the exact kNN distances of every
    /// object are computed and the approximation lines fitted leaf to root.
    /// The tree accepts a single batch: once any object has been stored,
    /// another call fails with [`MTreeError::Structural`], whether the first
    /// build succeeded or not. A failed build leaves an unusable tree.
    pub fn insert(&mut self, objects: &[ObjectId]) -> MTreeResult<()> {
        self.check_closed()?;
        if self.is_approximated() {
            return Err(MTreeError::Structural(
                "Approximations are already fitted, the tree is built in a single batch".into(),
            ));
        }
        if self.root_page() != 0 {
            return Err(MTreeError::Structural(
                "Tree holds objects from an unfinished build".into(),
            ));
        }

        let mut seen = HashSet::with_capacity(objects.len());
        if let Some(duplicate) = objects.iter().find(|id| !seen.insert(**id)) {
            return Err(MTreeError::Configuration(format!(
                "Object {} appears twice in the batch",
                duplicate
            )));
        }

        log::debug!("inserting {} objects", objects.len());
        for &object_id in objects {
            self.insert_object(object_id)?;
        }
        self.header.write().object_count += objects.len() as u64;

        let root = self.root_page();
        if root != 0 {
            log::debug!(
                "fitting approximations for k_max {} over a tree of height {}",
                self.k_max(),
                self.height()
            );
            let neighborhoods = self.batch_nn(objects, self.k_max())?;
            let knn_distances: HashMap<ObjectId, Vec<f64>> = objects
                .iter()
                .zip(neighborhoods)
                .map(|(&id, neighbors)| (id, neighbors.into_iter().map(|(_, d)| d).collect()))
                .collect();
            let bounds = self.adjust_approximations(root, &knn_distances)?;
            log::debug!(
                "root approximations: conservative {}, progressive {}",
                bounds.conservative,
                bounds.progressive
            );
        }

        self.header.write().approximated = true;
        Ok(())
    }

    /// Descends to the best leaf for `object_id` and appends it with
    /// placeholder lines, splitting overflowing nodes on the way back up.
    fn insert_object(&self, object_id: ObjectId) -> MTreeResult<()> {
        let root = self.root_page();
        if root == 0 {
            let page_id = self.allocate_page();
            self.write_node(
                page_id,
                Node::Leaf {
                    entries: vec![LeafEntry::new(object_id, 0.0)],
                },
            )?;
            let mut header = self.header.write();
            header.root_page = page_id;
            header.height = 1;
            return Ok(());
        }

        let mut path = Vec::new();
        let mut page_id = root;
        let mut routing_object = None;

        loop {
            match self.read_node(page_id)? {
                Node::Leaf { mut entries } => {
                    let parent_distance =
                        routing_object.map_or(0.0, |r| self.distance.distance(r, object_id));
                    entries.push(LeafEntry::new(object_id, parent_distance));
                    return self.store_with_splits(page_id, Node::Leaf { entries }, path);
                }
                Node::Directory { mut entries, level } => {
                    let (index, d) = self.choose_subtree(&entries, object_id)?;
                    let chosen = &mut entries[index];
                    let child_page = chosen.child_page;
                    let child_routing = chosen.routing_object;
                    if d > chosen.covering_radius {
                        chosen.covering_radius = d;
                        self.write_node(page_id, Node::Directory { entries, level })?;
                    }

                    path.push(PathStep {
                        page_id,
                        index,
                        routing_object,
                    });
                    routing_object = Some(child_routing);
                    page_id = child_page;
                }
            }
        }
    }

    /// Prefers the nearest routing object whose ball already covers the
    /// object, otherwise the one needing the least radius increase.
    /// Returns the entry index and the distance to its routing object.
    fn choose_subtree(
        &self,
        entries: &[DirectoryEntry],
        object_id: ObjectId,
    ) -> MTreeResult<(usize, f64)> {
        let mut covering: Option<(usize, f64)> = None;
        let mut enlarging: Option<(usize, f64, f64)> = None;

        for (i, entry) in entries.iter().enumerate() {
            let d = self.distance.distance(entry.routing_object, object_id);
            if d <= entry.covering_radius {
                if covering.map_or(true, |(_, best)| d < best) {
                    covering = Some((i, d));
                }
            } else {
                let enlargement = d - entry.covering_radius;
                if enlarging.map_or(true, |(_, best, _)| enlargement < best) {
                    enlarging = Some((i, enlargement, d));
                }
            }
        }

        covering
            .or(enlarging.map(|(i, _, d)| (i, d)))
            .ok_or_else(|| MTreeError::Structural("Directory node without entries".into()))
    }

    /// Writes `node` to `page_id`, splitting it and its ancestors along
    /// `path` while they overflow.
    fn store_with_splits(
        &self,
        mut page_id: PageId,
        mut node: Node,
        mut path: Vec<PathStep>,
    ) -> MTreeResult<()> {
        let k_max = self.k_max();

        loop {
            let capacity = if node.is_leaf() {
                self.leaf_capacity()
            } else {
                self.directory_capacity()
            };
            if node.len() <= capacity {
                return self.write_node(page_id, node);
            }

            let level = node.level();
            let members = node.split_members();
            let split = self.split_strategy.split(&members, &self.distance);
            check_split(&split, members.len())?;
            let first_id = members[split.first_promotion].object_id;
            let second_id = members[split.second_promotion].object_id;

            let (first_node, second_node) = partition_node(node, &split);
            let new_page = self.allocate_page();

            // The new routing entries live in the parent, so their parent
            // distances refer to the parent's routing object.
            let parent = path.pop();
            let parent_routing = parent.and_then(|step| step.routing_object);
            let parent_distance =
                |id: ObjectId| parent_routing.map_or(0.0, |r| self.distance.distance(r, id));

            let first_entry = DirectoryEntry::new(
                first_id,
                parent_distance(first_id),
                page_id,
                split.first_covering_radius,
                k_max as u32,
                first_node.aggregate_conservative(k_max),
            );
            let second_entry = DirectoryEntry::new(
                second_id,
                parent_distance(second_id),
                new_page,
                split.second_covering_radius,
                k_max as u32,
                second_node.aggregate_conservative(k_max),
            );

            log::trace!(
                "split page {} at level {}: {} entries stay, {} move to page {}",
                page_id,
                level,
                first_node.len(),
                second_node.len(),
                new_page
            );
            self.write_node(page_id, first_node)?;
            self.write_node(new_page, second_node)?;

            match parent {
                Some(step) => {
                    let mut parent_node = self.read_node(step.page_id)?;
                    match &mut parent_node {
                        Node::Directory { entries, .. } => {
                            let slot = entries.get_mut(step.index).ok_or_else(|| {
                                MTreeError::Structural(format!(
                                    "Page {} has no entry {}",
                                    step.page_id, step.index
                                ))
                            })?;
                            *slot = first_entry;
                            entries.push(second_entry);
                        }
                        Node::Leaf { .. } => {
                            return Err(MTreeError::Structural(format!(
                                "Leaf page {} on an insertion path",
                                step.page_id
                            )));
                        }
                    }
                    page_id = step.page_id;
                    node = parent_node;
                }
                None => {
                    let root_page = self.allocate_page();
                    self.write_node(
                        root_page,
                        Node::Directory {
                            entries: vec![first_entry, second_entry],
                            level: level + 1,
                        },
                    )?;
                    let mut header = self.header.write();
                    header.root_page = root_page;
                    header.height += 1;
                    log::debug!("root split, height is now {}", header.height);
                    return Ok(());
                }
            }
        }
    }

    /// Fits the lines of every leaf entry below `page_id` from the exact
    /// kNN distances in `knn_distances` and sets each directory entry's
    /// conservative line to its child's aggregate.
    fn adjust_approximations(
        &self,
        page_id: PageId,
        knn_distances: &HashMap<ObjectId, Vec<f64>>,
    ) -> MTreeResult<SubtreeBounds> {
        let k_max = self.k_max();

        match self.read_node(page_id)? {
            Node::Leaf { mut entries } => {
                for entry in entries.iter_mut() {
                    let distances = knn_distances.get(&entry.object_id).ok_or_else(|| {
                        MTreeError::Structural(format!(
                            "Object {} on page {} has no kNN distances",
                            entry.object_id, page_id
                        ))
                    })?;
                    let (conservative, progressive) = fit_approximations(distances, k_max);
                    log::trace!(
                        "object {}: conservative {}, progressive {}",
                        entry.object_id,
                        conservative,
                        progressive
                    );
                    entry.set_approximations(conservative, progressive);
                }

                let node = Node::Leaf { entries };
                let bounds = SubtreeBounds {
                    conservative: node.aggregate_conservative(k_max),
                    progressive: node
                        .aggregate_progressive(k_max)
                        .unwrap_or_else(ApproximationLine::upper_sentinel),
                };
                self.write_node(page_id, node)?;
                Ok(bounds)
            }
            Node::Directory { mut entries, level } => {
                let mut progressive = Vec::with_capacity(entries.len());
                for entry in entries.iter_mut() {
                    let child = self.adjust_approximations(entry.child_page, knn_distances)?;
                    entry.conservative = child.conservative;
                    progressive.push(child.progressive);
                }

                let node = Node::Directory { entries, level };
                let bounds = SubtreeBounds {
                    conservative: node.aggregate_conservative(k_max),
                    progressive: lower_envelope(progressive.iter(), k_max),
                };
                self.write_node(page_id, node)?;
                Ok(bounds)
            }
        }
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    /// All leaf entries in depth-first order.
    pub fn leaf_entries(&self) -> MTreeResult<Vec<LeafEntry>> {
        self.check_closed()?;
        let mut result = Vec::new();
        let root = self.root_page();
        if root == 0 {
            return Ok(result);
        }

        let mut stack = vec![root];
        while let Some(page_id) = stack.pop() {
            match self.read_node(page_id)? {
                Node::Leaf { entries } => result.extend(entries),
                Node::Directory { entries, .. } => {
                    stack.extend(entries.iter().rev().map(|e| e.child_page));
                }
            }
        }
        Ok(result)
    }

    /// Shape of the tree and I/O counters of its page file.
    ///
    /// The page file counters are taken before the node census below adds
    /// its own reads.
    pub fn tree_stats(&self) -> MTreeResult<TreeStats> {
        self.check_closed()?;
        let page_file = self.page_file.stats();

        let (mut directory_nodes, mut leaf_nodes) = (0u64, 0u64);
        let root = self.root_page();
        if root != 0 {
            let mut stack = vec![root];
            while let Some(page_id) = stack.pop() {
                match self.read_node(page_id)? {
                    Node::Leaf { .. } => leaf_nodes += 1,
                    Node::Directory { entries, .. } => {
                        directory_nodes += 1;
                        stack.extend(entries.iter().map(|e| e.child_page));
                    }
                }
            }
        }

        let header = self.header.read();
        Ok(TreeStats {
            object_count: header.object_count,
            height: header.height,
            directory_nodes,
            leaf_nodes,
            directory_capacity: header.directory_capacity as usize,
            leaf_capacity: header.leaf_capacity as usize,
            page_file,
        })
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Write dirty pages and the header to the page file.
    pub fn flush(&self) -> MTreeResult<()> {
        self.check_closed()?;
        let header = self.header.read().clone();
        self.page_file.flush(&header)
    }

    /// Flush and refuse any further operation.
    pub fn close(&self) -> MTreeResult<()> {
        if *self.closed.read() {
            return Ok(());
        }
        self.flush()?;
        *self.closed.write() = true;
        Ok(())
    }
}

/// Rejects strategy output that would lose entries or leave a node empty.
fn check_split(split: &Split, members: usize) -> MTreeResult<()> {
    let first = split
        .assignment
        .iter()
        .filter(|side| **side == SplitSide::First)
        .count();
    let valid = split.assignment.len() == members
        && split.promotion_distances.len() == members
        && split.first_promotion < members
        && split.second_promotion < members
        && split.assignment[split.first_promotion] == SplitSide::First
        && split.assignment[split.second_promotion] == SplitSide::Second
        && first > 0
        && first < members;
    if valid {
        Ok(())
    } else {
        Err(MTreeError::Structural(format!(
            "Split strategy produced an invalid partition of {} members",
            members
        )))
    }
}

fn partition_node(node: Node, split: &Split) -> (Node, Node) {
    match node {
        Node::Leaf { entries } => {
            let (first, second) = partition(entries, split);
            (Node::Leaf { entries: first }, Node::Leaf { entries: second })
        }
        Node::Directory { entries, level } => {
            let (first, second) = partition(entries, split);
            (
                Node::Directory {
                    entries: first,
                    level,
                },
                Node::Directory {
                    entries: second,
                    level,
                },
            )
        }
    }
}

/// Distributes entries by side, re-parenting each to its side's promotion.
fn partition<E: MTreeEntry>(entries: Vec<E>, split: &Split) -> (Vec<E>, Vec<E>) {
    let mut first = Vec::new();
    let mut second = Vec::new();
    for ((mut entry, side), distance) in entries
        .into_iter()
        .zip(&split.assignment)
        .zip(&split.promotion_distances)
    {
        entry.set_parent_distance(*distance);
        match side {
            SplitSide::First => first.push(entry),
            SplitSide::Second => second.push(entry),
        }
    }
    (first, second)
}

impl<D: DistanceFunction> Drop for MkCoPTree<D> {
    fn drop(&mut self) {
        if !*self.closed.read() {
            if let Err(e) = self.flush() {
                log::warn!("failed to flush tree on drop: {}", e);
            }
        }
    }
}
