//! Node split strategies.
//!
//! When a node overflows it is divided into two nodes, each represented in
//! the parent by a promoted routing object. A [`SplitStrategy`] decides which
//! two members are promoted and how the rest are distributed.

use crate::distance::{DistanceFunction, ObjectId};

/// What a split strategy needs to know about one member of an overflowing node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitMember {
    pub object_id: ObjectId,
    /// Covering radius of the member's subtree, `0.0` for leaf entries.
    pub covering_radius: f64,
}

/// Side of a split a member is assigned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitSide {
    First,
    Second,
}

/// Outcome of splitting an overflowing node.
#[derive(Debug, Clone, PartialEq)]
pub struct Split {
    /// Index of the member promoted as routing object of the first node.
    pub first_promotion: usize,
    /// Index of the member promoted as routing object of the second node.
    pub second_promotion: usize,
    /// Side of every member, parallel to the input.
    pub assignment: Vec<SplitSide>,
    /// Distance of every member to the promotion of its side.
    pub promotion_distances: Vec<f64>,
    pub first_covering_radius: f64,
    pub second_covering_radius: f64,
}

/// Chooses promotion objects and partitions an overflowing node.
///
/// Implementations must put each promotion on its own side and leave both
/// sides non-empty.
pub trait SplitStrategy: Send + Sync {
    fn split(&self, members: &[SplitMember], distance: &dyn DistanceFunction) -> Split;
}

/// Promotes an approximately farthest pair and assigns every other member to
/// the nearer promotion (generalized hyperplane partition). Ties go to the
/// smaller side.
#[derive(Debug, Clone, Copy, Default)]
pub struct FarthestPointsSplit;

impl FarthestPointsSplit {
    fn farthest_from(
        members: &[SplitMember],
        from: usize,
        distance: &dyn DistanceFunction,
    ) -> usize {
        let mut best = if from == 0 { 1 } else { 0 };
        let mut best_distance = f64::NEG_INFINITY;
        for (i, member) in members.iter().enumerate() {
            if i == from {
                continue;
            }
            let d = distance.distance(members[from].object_id, member.object_id);
            if d > best_distance {
                best_distance = d;
                best = i;
            }
        }
        best
    }
}

impl SplitStrategy for FarthestPointsSplit {
    fn split(&self, members: &[SplitMember], distance: &dyn DistanceFunction) -> Split {
        debug_assert!(members.len() >= 2, "cannot split fewer than two members");

        let first = Self::farthest_from(members, 0, distance);
        let second = Self::farthest_from(members, first, distance);
        let first_id = members[first].object_id;
        let second_id = members[second].object_id;

        let mut assignment = Vec::with_capacity(members.len());
        let mut promotion_distances = Vec::with_capacity(members.len());
        let (mut first_count, mut second_count) = (0usize, 0usize);
        let (mut first_radius, mut second_radius) = (0.0f64, 0.0f64);

        for (i, member) in members.iter().enumerate() {
            let d1 = if i == first { 0.0 } else { distance.distance(first_id, member.object_id) };
            let d2 = if i == second { 0.0 } else { distance.distance(second_id, member.object_id) };

            let side = if i == first {
                SplitSide::First
            } else if i == second {
                SplitSide::Second
            } else if d1 < d2 {
                SplitSide::First
            } else if d2 < d1 {
                SplitSide::Second
            } else if first_count <= second_count {
                SplitSide::First
            } else {
                SplitSide::Second
            };

            match side {
                SplitSide::First => {
                    first_count += 1;
                    first_radius = first_radius.max(d1 + member.covering_radius);
                    promotion_distances.push(d1);
                }
                SplitSide::Second => {
                    second_count += 1;
                    second_radius = second_radius.max(d2 + member.covering_radius);
                    promotion_distances.push(d2);
                }
            }
            assignment.push(side);
        }

        log::trace!(
            "split {} members: promoted {} ({} members, r={}) and {} ({} members, r={})",
            members.len(),
            first_id,
            first_count,
            first_radius,
            second_id,
            second_count,
            second_radius
        );

        Split {
            first_promotion: first,
            second_promotion: second,
            assignment,
            promotion_distances,
            first_covering_radius: first_radius,
            second_covering_radius: second_radius,
        }
    }
}
