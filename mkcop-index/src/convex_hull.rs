//! Lower and upper convex hulls of an x-sorted point sequence.
//!
//! The hulls are computed with a single monotone-chain scan: points are
//! appended left to right and trailing vertices are popped while the last
//! three points turn the wrong way. Collinear points are dropped, so every
//! hull edge joins two points that are strictly convex corners or endpoints.

/// Vertex indices of the lower and upper hull of a point sequence.
///
/// Both hulls start at the first point and end at the last point. Indices
/// refer to positions in the `x`/`y` slices passed to [`ConvexHull::new`].
#[derive(Debug, Clone, PartialEq)]
pub struct ConvexHull {
    lower: Vec<usize>,
    upper: Vec<usize>,
}

impl ConvexHull {
    /// Computes both hulls. `x` must be sorted ascending and `x.len() == y.len()`.
    pub fn new(x: &[f64], y: &[f64]) -> Self {
        debug_assert_eq!(x.len(), y.len(), "coordinate slices must have equal length");
        debug_assert!(x.windows(2).all(|w| w[0] <= w[1]), "x must be sorted");

        let n = x.len().min(y.len());
        let mut lower: Vec<usize> = Vec::with_capacity(n);
        let mut upper: Vec<usize> = Vec::with_capacity(n);

        for i in 0..n {
            // lower hull keeps only counter-clockwise turns
            while lower.len() >= 2
                && cross(x, y, lower[lower.len() - 2], lower[lower.len() - 1], i) <= 0.0
            {
                lower.pop();
            }
            lower.push(i);

            // upper hull keeps only clockwise turns
            while upper.len() >= 2
                && cross(x, y, upper[upper.len() - 2], upper[upper.len() - 1], i) >= 0.0
            {
                upper.pop();
            }
            upper.push(i);
        }

        Self { lower, upper }
    }

    /// Indices of the lower hull, ascending in x.
    pub fn lower_hull(&self) -> &[usize] {
        &self.lower
    }

    /// Indices of the upper hull, ascending in x.
    pub fn upper_hull(&self) -> &[usize] {
        &self.upper
    }

    pub fn lower_len(&self) -> usize {
        self.lower.len()
    }

    pub fn upper_len(&self) -> usize {
        self.upper.len()
    }
}

/// Z component of (a - o) x (b - o). Positive for a counter-clockwise turn.
fn cross(x: &[f64], y: &[f64], o: usize, a: usize, b: usize) -> f64 {
    (x[a] - x[o]) * (y[b] - y[o]) - (y[a] - y[o]) * (x[b] - x[o])
}
