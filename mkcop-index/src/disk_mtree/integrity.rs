//! Structural integrity checking.

use super::mtree_impl::MkCoPTree;
use super::mtree_types::{MTreeResult, Node, PageId};
use crate::approximation::ApproximationLine;
use crate::distance::{DistanceFunction, ObjectId};

/// Absolute slack for distance comparisons
const TOLERANCE: f64 = 1e-9;

/// Result of an integrity check
#[derive(Debug, Clone)]
pub struct IntegrityReport {
    /// Pages read during the check
    pub pages_checked: u64,
    /// Objects found in leaves
    pub objects_checked: u64,
    /// Pages that could not be read
    pub unreadable_pages: Vec<PageId>,
    /// Summary of findings
    pub is_valid: bool,
    /// Detailed error messages
    pub errors: Vec<String>,
}

impl IntegrityReport {
    pub fn new() -> Self {
        Self {
            pages_checked: 0,
            objects_checked: 0,
            unreadable_pages: Vec::new(),
            is_valid: true,
            errors: Vec::new(),
        }
    }

    fn fail(&mut self, message: String) {
        self.is_valid = false;
        self.errors.push(message);
    }
}

impl Default for IntegrityReport {
    fn default() -> Self {
        Self::new()
    }
}

/// What a parent expects of a child page
struct Expectation {
    level: u32,
    routing_object: Option<ObjectId>,
    covering_radius: f64,
    conservative: Option<ApproximationLine>,
}

impl<D: DistanceFunction> MkCoPTree<D> {
    /// Walks the whole tree and reports every broken invariant.
    ///
    /// Checked: node levels and capacities, parent distances, covering
    /// radii (against every object of the subtree), directory conservative
    /// lines dominating their child's aggregate, fitted leaf entries and
    /// the object count. Unreadable pages are reported, not returned as errors.
    pub fn check_integrity(&self) -> MTreeResult<IntegrityReport> {
        self.check_closed()?;
        let mut report = IntegrityReport::new();

        let (root, height, object_count) = {
            let header = self.header.read();
            if let Err(e) = header.validate() {
                report.fail(format!("Invalid header: {}", e));
                return Ok(report);
            }
            (header.root_page, header.height, header.object_count)
        };

        if root == 0 {
            if object_count != 0 {
                report.fail(format!(
                    "Header counts {} objects but the tree has no root",
                    object_count
                ));
            }
            return Ok(report);
        }

        let root_expectation = Expectation {
            level: height.saturating_sub(1),
            routing_object: None,
            covering_radius: f64::INFINITY,
            conservative: None,
        };
        self.check_subtree(root, &root_expectation, &mut report);

        if report.objects_checked != object_count {
            report.fail(format!(
                "Header counts {} objects, leaves hold {}",
                object_count, report.objects_checked
            ));
        }
        Ok(report)
    }

    /// Checks the subtree at `page_id` and returns its objects.
    fn check_subtree(
        &self,
        page_id: PageId,
        expected: &Expectation,
        report: &mut IntegrityReport,
    ) -> Vec<ObjectId> {
        let node = match self.read_node(page_id) {
            Ok(node) => node,
            Err(e) => {
                report.unreadable_pages.push(page_id);
                report.fail(format!("Page {}: {}", page_id, e));
                return Vec::new();
            }
        };
        report.pages_checked += 1;

        let k_max = self.k_max();
        let approximated = self.is_approximated();

        if node.level() != expected.level {
            report.fail(format!(
                "Page {} is at level {}, expected {}",
                page_id,
                node.level(),
                expected.level
            ));
        }
        let capacity = if node.is_leaf() {
            self.leaf_capacity()
        } else {
            self.directory_capacity()
        };
        if node.is_empty() || node.len() > capacity {
            report.fail(format!(
                "Page {} holds {} entries (capacity {})",
                page_id,
                node.len(),
                capacity
            ));
        }

        if approximated {
            if let Some(line) = expected.conservative {
                let aggregate = node.aggregate_conservative(k_max);
                let k0 = aggregate.k0() as usize;
                for k in [k0, k_max] {
                    if line.value_at(k) < aggregate.value_at(k) - TOLERANCE {
                        report.fail(format!(
                            "Conservative line of page {} is below its aggregate at k = {}",
                            page_id, k
                        ));
                    }
                }
            }
        }

        let parent_distance_of = |id: ObjectId| {
            expected
                .routing_object
                .map_or(0.0, |r| self.distance.distance(r, id))
        };

        let mut objects = Vec::new();
        match node {
            Node::Leaf { entries } => {
                for entry in &entries {
                    report.objects_checked += 1;
                    let d = parent_distance_of(entry.object_id);
                    if (entry.parent_distance - d).abs() > TOLERANCE {
                        report.fail(format!(
                            "Object {} on page {} has parent distance {}, actual {}",
                            entry.object_id, page_id, entry.parent_distance, d
                        ));
                    }
                    if approximated && !entry.is_fitted() {
                        report.fail(format!(
                            "Object {} on page {} has no fitted approximation",
                            entry.object_id, page_id
                        ));
                    }
                    objects.push(entry.object_id);
                }
            }
            Node::Directory { entries, level } => {
                for entry in &entries {
                    let d = parent_distance_of(entry.routing_object);
                    if (entry.parent_distance - d).abs() > TOLERANCE {
                        report.fail(format!(
                            "Routing object {} on page {} has parent distance {}, actual {}",
                            entry.routing_object, page_id, entry.parent_distance, d
                        ));
                    }
                    if entry.k_max as usize != k_max {
                        report.fail(format!(
                            "Entry for page {} was built for k_max {}",
                            entry.child_page, entry.k_max
                        ));
                    }

                    let child = Expectation {
                        level: level.saturating_sub(1),
                        routing_object: Some(entry.routing_object),
                        covering_radius: entry.covering_radius,
                        conservative: Some(entry.conservative),
                    };
                    let members = self.check_subtree(entry.child_page, &child, report);
                    for member in &members {
                        let d = self.distance.distance(entry.routing_object, *member);
                        if d > child.covering_radius + TOLERANCE {
                            report.fail(format!(
                                "Object {} lies {} from routing object {}, beyond radius {}",
                                member, d, entry.routing_object, child.covering_radius
                            ));
                        }
                    }
                    objects.extend(members);
                }
            }
        }
        objects
    }
}
