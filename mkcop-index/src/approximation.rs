//! Log-log approximations of k-nearest-neighbor distance functions.
//!
//! Every indexed object carries two lines in `(ln k, ln kdist)` space: a
//! conservative line lying on or above all exact samples and a progressive
//! line lying on or below them. Both are fitted against the convex hull of
//! the samples so that the bound holds by construction, and among the lines
//! that support the hull the one with the smallest squared error wins.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::convex_hull::ConvexHull;

/// Relative slack applied when a distance is compared against a bound.
///
/// `exp(ln d)` does not always round-trip exactly, so a sample lying on a
/// fitted line may evaluate a few ulps off the line.
pub const BOUND_EPSILON: f64 = 1e-10;

/// Maximum residual tolerated on the wrong side of a fitted line before the
/// fit is reported.
const FIT_TOLERANCE: f64 = 1e-9;

/// A line `m * ln(k) + t` valid for `k >= k0`.
///
/// Below `k0` the line is held constant at its value for `k0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ApproximationLine {
    k0: u32,
    m: f64,
    t: f64,
}

impl ApproximationLine {
    pub fn new(k0: u32, m: f64, t: f64) -> Self {
        Self { k0: k0.max(1), m, t }
    }

    /// A horizontal line with log-space value `y`.
    pub fn constant(k0: u32, y: f64) -> Self {
        Self::new(k0, 0.0, y)
    }

    /// Line whose approximated distance is zero for every k.
    ///
    /// Used as the conservative placeholder of a freshly inserted entry.
    pub fn lower_sentinel() -> Self {
        Self::constant(1, f64::NEG_INFINITY)
    }

    /// Line whose approximated distance is infinite for every k.
    ///
    /// Used as the progressive placeholder of a freshly inserted entry and as
    /// the conservative line of objects with fewer than `k_max` neighbors.
    pub fn upper_sentinel() -> Self {
        Self::constant(1, f64::INFINITY)
    }

    /// Line through `(ln k0, y0)` and `(ln k_max, y_kmax)`.
    pub fn through(k0: u32, y0: f64, k_max: u32, y_kmax: f64) -> Self {
        if k0 >= k_max || y0 == y_kmax {
            return Self::constant(k0.min(k_max), y_kmax);
        }
        let ln_k0 = (k0 as f64).ln();
        let m = (y_kmax - y0) / ((k_max as f64).ln() - ln_k0);
        let t = y0 - m * ln_k0;
        Self::new(k0, m, t)
    }

    pub fn k0(&self) -> u32 {
        self.k0
    }

    pub fn m(&self) -> f64 {
        self.m
    }

    pub fn t(&self) -> f64 {
        self.t
    }

    /// Log-space value at `k`.
    pub fn value_at(&self, k: usize) -> f64 {
        if self.m == 0.0 {
            return self.t;
        }
        let k = k.max(self.k0 as usize) as f64;
        self.m * k.ln() + self.t
    }

    /// Approximated k-nearest-neighbor distance at `k`.
    pub fn approximated_distance(&self, k: usize) -> f64 {
        self.value_at(k).exp()
    }

    /// True when both coefficients are finite.
    pub fn is_finite(&self) -> bool {
        self.m.is_finite() && self.t.is_finite()
    }
}

impl fmt::Display for ApproximationLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ApproximationLine(k0={}, m={}, t={})", self.k0, self.m, self.t)
    }
}

/// Smallest line dominating every input line at `k0` and `k_max`.
///
/// `k0` is the largest input `k0`. Since kNN distances never decrease with k,
/// dominating both end points bounds every member from above on the whole
/// domain. An empty input yields [`ApproximationLine::lower_sentinel`].
pub fn upper_envelope<'a, I>(lines: I, k_max: usize) -> ApproximationLine
where
    I: IntoIterator<Item = &'a ApproximationLine>,
{
    let lines: Vec<&ApproximationLine> = lines.into_iter().collect();
    let Some(k0) = lines.iter().map(|l| l.k0).max() else {
        return ApproximationLine::lower_sentinel();
    };
    let k0 = k0.min(k_max as u32);

    let y1 = lines
        .iter()
        .map(|l| l.value_at(k0 as usize))
        .fold(f64::NEG_INFINITY, f64::max);
    let y_kmax = lines
        .iter()
        .map(|l| l.value_at(k_max))
        .fold(f64::NEG_INFINITY, f64::max);

    if !y1.is_finite() || !y_kmax.is_finite() {
        return ApproximationLine::constant(k0, y1.max(y_kmax));
    }
    ApproximationLine::through(k0, y1, k_max as u32, y_kmax)
}

/// Largest line dominated by every input line at `k0` and `k_max`.
///
/// Mirror image of [`upper_envelope`]: `k0` is the smallest input `k0` and
/// the end points are minima. An empty input yields
/// [`ApproximationLine::upper_sentinel`].
pub fn lower_envelope<'a, I>(lines: I, k_max: usize) -> ApproximationLine
where
    I: IntoIterator<Item = &'a ApproximationLine>,
{
    let lines: Vec<&ApproximationLine> = lines.into_iter().collect();
    let Some(k0) = lines.iter().map(|l| l.k0).min() else {
        return ApproximationLine::upper_sentinel();
    };
    let k0 = k0.min(k_max as u32);

    let y1 = lines
        .iter()
        .map(|l| l.value_at(k0 as usize))
        .fold(f64::INFINITY, f64::min);
    let y_kmax = lines
        .iter()
        .map(|l| l.value_at(k_max))
        .fold(f64::INFINITY, f64::min);

    if !y1.is_finite() || !y_kmax.is_finite() {
        return ApproximationLine::constant(k0, y1.min(y_kmax));
    }
    ApproximationLine::through(k0, y1, k_max as u32, y_kmax)
}

/// Which side of the samples a fitted line must stay on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BoundSide {
    Upper,
    Lower,
}

impl BoundSide {
    fn holds(self, sample: f64, line: f64) -> bool {
        match self {
            BoundSide::Upper => sample <= line,
            BoundSide::Lower => sample >= line,
        }
    }
}

/// Positive log-space samples of one object's kNN distances.
struct LogSamples {
    k0: u32,
    x: Vec<f64>,
    y: Vec<f64>,
    sum_x: f64,
    sum_x2: f64,
    sum_y: f64,
    sum_xy: f64,
}

impl LogSamples {
    fn new(k0: u32, distances: &[f64]) -> Self {
        let x: Vec<f64> = (0..distances.len())
            .map(|i| ((k0 as usize + i) as f64).ln())
            .collect();
        let y: Vec<f64> = distances.iter().map(|d| d.ln()).collect();

        let sum_x = x.iter().sum();
        let sum_x2 = x.iter().map(|v| v * v).sum();
        let sum_y = y.iter().sum();
        let sum_xy = x.iter().zip(&y).map(|(a, b)| a * b).sum();

        Self {
            k0,
            x,
            y,
            sum_x,
            sum_x2,
            sum_y,
            sum_xy,
        }
    }

    fn len(&self) -> usize {
        self.x.len()
    }

    fn ssq_error(&self, m: f64, t: f64) -> f64 {
        self.x
            .iter()
            .zip(&self.y)
            .map(|(x, y)| {
                let h = y - m * x - t;
                h * h
            })
            .sum()
    }

    /// Least-squares slope of a line forced through `(xp, yp)`.
    fn optimal_slope(&self, xp: f64, yp: f64) -> f64 {
        let n = self.len() as f64;
        let denominator = self.sum_x2 - 2.0 * xp * self.sum_x + n * xp * xp;
        if denominator.abs() <= f64::EPSILON {
            return 0.0;
        }
        (self.sum_xy - xp * self.sum_y - yp * self.sum_x + n * xp * yp) / denominator
    }

    /// Largest residual on the wrong side of `line`.
    fn max_violation(&self, side: BoundSide, line: &ApproximationLine) -> f64 {
        self.x
            .iter()
            .zip(&self.y)
            .map(|(x, y)| {
                let value = line.m() * x + line.t();
                match side {
                    BoundSide::Upper => y - value,
                    BoundSide::Lower => value - y,
                }
            })
            .fold(0.0, f64::max)
    }

    /// Minimum-error line supporting the given hull from `side`.
    fn fit_bound(&self, hull: &[usize], side: BoundSide) -> ApproximationLine {
        let (x, y) = (&self.x, &self.y);
        let mut best = ApproximationLine::constant(self.k0, y[hull[0]]);
        let mut best_error = f64::INFINITY;

        let mut consider = |m: f64, t: f64| {
            let error = self.ssq_error(m, t);
            if error < best_error {
                best_error = error;
                best = ApproximationLine::new(self.k0, m, t);
            }
        };

        // lines through hull edges
        for w in hull.windows(2) {
            let (a, b) = (w[0], w[1]);
            let m = (y[b] - y[a]) / (x[b] - x[a]);
            consider(m, y[a] - m * x[a]);
        }

        // optimal lines anchored at a hull vertex
        for (i, &v) in hull.iter().enumerate() {
            let m = self.optimal_slope(x[v], y[v]);
            let t = y[v] - m * x[v];
            let before_ok = i == 0 || side.holds(y[hull[i - 1]], m * x[hull[i - 1]] + t);
            let after_ok =
                i + 1 == hull.len() || side.holds(y[hull[i + 1]], m * x[hull[i + 1]] + t);
            if before_ok && after_ok {
                consider(m, t);
            }
        }

        let violation = self.max_violation(side, &best);
        if violation > FIT_TOLERANCE {
            log::warn!(
                "{:?} approximation {} misses a sample by {:e} in log space",
                side,
                best,
                violation
            );
        }
        best
    }
}

/// Fits the conservative and progressive lines of one object.
///
/// `knn_distances` holds the exact ascending distances to the object's
/// nearest neighbors, `knn_distances[i]` being the distance for `k = i + 1`.
/// Leading zeros (duplicates of the object) are skipped and shift `k0`. When
/// fewer than `k_max` distances are available the conservative line is
/// unbounded, since the kNN distance for larger k is infinite.
pub fn fit_approximations(
    knn_distances: &[f64],
    k_max: usize,
) -> (ApproximationLine, ApproximationLine) {
    let k_max = k_max.max(1);
    let available = knn_distances.len().min(k_max);
    let samples = &knn_distances[..available];
    let zeros = samples.iter().take_while(|d| **d <= 0.0).count();

    if zeros == available {
        let zero = ApproximationLine::constant(k_max as u32, f64::NEG_INFINITY);
        let conservative = if available == k_max {
            zero
        } else {
            ApproximationLine::upper_sentinel()
        };
        return (conservative, zero);
    }

    let samples = LogSamples::new(zeros as u32 + 1, &samples[zeros..]);
    let hull = ConvexHull::new(&samples.x, &samples.y);

    let conservative = if available == k_max {
        samples.fit_bound(hull.upper_hull(), BoundSide::Upper)
    } else {
        ApproximationLine::upper_sentinel()
    };
    let progressive = samples.fit_bound(hull.lower_hull(), BoundSide::Lower);

    (conservative, progressive)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_knn_distances(rng: &mut StdRng, k_max: usize) -> Vec<f64> {
        let mut d = 0.0;
        (0..k_max)
            .map(|_| {
                d += rng.gen_range(0.0..1.0);
                d
            })
            .collect()
    }

    #[test]
    fn test_value_at_clamps_below_k0() {
        let line = ApproximationLine::new(3, 0.5, 1.0);
        assert_eq!(line.value_at(1), line.value_at(3));
        assert!(line.value_at(4) > line.value_at(3));
        assert!((line.approximated_distance(3) - line.value_at(3).exp()).abs() < 1e-12);
    }

    #[test]
    fn test_new_clamps_k0_to_one() {
        assert_eq!(ApproximationLine::new(0, 1.0, 0.0).k0(), 1);
    }

    #[test]
    fn test_sentinels() {
        assert_eq!(ApproximationLine::lower_sentinel().approximated_distance(5), 0.0);
        assert_eq!(
            ApproximationLine::upper_sentinel().approximated_distance(5),
            f64::INFINITY
        );
    }

    #[test]
    fn test_through_end_points() {
        let line = ApproximationLine::through(2, 0.5, 10, 2.0);
        assert!((line.value_at(2) - 0.5).abs() < 1e-12);
        assert!((line.value_at(10) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_through_degenerate_domain() {
        let line = ApproximationLine::through(5, 1.0, 5, 1.0);
        assert_eq!(line.m(), 0.0);
        assert_eq!(line.value_at(1), 1.0);
    }

    #[test]
    fn test_power_law_is_fitted_exactly() {
        // kdist = 2 * sqrt(k) is a straight line in log-log space
        let d: Vec<f64> = (1..=10).map(|k| 2.0 * (k as f64).sqrt()).collect();
        let (cons, prog) = fit_approximations(&d, 10);
        for k in 1..=10 {
            assert!((cons.approximated_distance(k) - d[k - 1]).abs() < 1e-9);
            assert!((prog.approximated_distance(k) - d[k - 1]).abs() < 1e-9);
        }
        assert!((cons.m() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_leading_zeros_shift_k0() {
        let d = [0.0, 0.0, 1.0, 2.0, 2.5];
        let (cons, prog) = fit_approximations(&d, 5);
        assert_eq!(cons.k0(), 3);
        assert_eq!(prog.k0(), 3);
        for k in 3..=5 {
            assert!(cons.approximated_distance(k) >= d[k - 1] * (1.0 - 1e-9));
            assert!(prog.approximated_distance(k) <= d[k - 1] * (1.0 + 1e-9));
        }
    }

    #[test]
    fn test_all_zero_distances() {
        let (cons, prog) = fit_approximations(&[0.0, 0.0, 0.0], 3);
        assert_eq!(cons.k0(), 3);
        assert_eq!(cons.approximated_distance(1), 0.0);
        assert_eq!(cons.approximated_distance(3), 0.0);
        assert_eq!(prog.approximated_distance(3), 0.0);
    }

    #[test]
    fn test_single_positive_sample_gives_constant_line() {
        let (cons, prog) = fit_approximations(&[0.0, 0.0, 4.0], 3);
        assert_eq!(cons.k0(), 3);
        assert_eq!(cons.m(), 0.0);
        assert!((cons.approximated_distance(3) - 4.0).abs() < 1e-12);
        assert!((prog.approximated_distance(3) - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_short_neighborhood_is_unbounded_above() {
        let (cons, prog) = fit_approximations(&[1.0, 2.0], 5);
        assert_eq!(cons.approximated_distance(5), f64::INFINITY);
        assert!(prog.approximated_distance(1) <= 1.0 + 1e-9);
        assert!(prog.approximated_distance(2) <= 2.0 + 1e-9);
    }

    #[test]
    fn test_random_fits_bound_samples() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..500 {
            let k_max = rng.gen_range(1..30);
            let d = random_knn_distances(&mut rng, k_max);
            let (cons, prog) = fit_approximations(&d, k_max);
            for k in 1..=k_max {
                if k < cons.k0() as usize {
                    continue;
                }
                assert!(
                    cons.approximated_distance(k) >= d[k - 1] * (1.0 - 1e-9),
                    "conservative {} below sample {} at k={}",
                    cons,
                    d[k - 1],
                    k
                );
                assert!(
                    prog.approximated_distance(k) <= d[k - 1] * (1.0 + 1e-9),
                    "progressive {} above sample {} at k={}",
                    prog,
                    d[k - 1],
                    k
                );
            }
        }
    }

    #[test]
    fn test_fit_is_deterministic() {
        let d = [0.3, 0.7, 0.9, 1.4, 1.5, 2.2];
        assert_eq!(fit_approximations(&d, 6), fit_approximations(&d, 6));
    }

    #[test]
    fn test_fit_prefers_low_error_over_edge() {
        // the best supporting line beats the worst hull edge
        let d = [1.0, 1.9, 2.0, 2.05, 2.1, 4.0];
        let (cons, _) = fit_approximations(&d, 6);
        let samples = LogSamples::new(1, &d);
        let hull = ConvexHull::new(&samples.x, &samples.y);
        for w in hull.upper_hull().windows(2) {
            let (a, b) = (w[0], w[1]);
            let m = (samples.y[b] - samples.y[a]) / (samples.x[b] - samples.x[a]);
            let t = samples.y[a] - m * samples.x[a];
            assert!(samples.ssq_error(cons.m(), cons.t()) <= samples.ssq_error(m, t) + 1e-12);
        }
    }

    #[test]
    fn test_optimal_slope_guards_single_point() {
        let samples = LogSamples::new(4, &[3.0]);
        assert_eq!(samples.optimal_slope(samples.x[0], samples.y[0]), 0.0);
    }

    #[test]
    fn test_upper_envelope_dominates_children() {
        let mut rng = StdRng::seed_from_u64(3);
        let k_max = 12;
        let lines: Vec<ApproximationLine> = (0..8)
            .map(|_| fit_approximations(&random_knn_distances(&mut rng, k_max), k_max).0)
            .collect();
        let env = upper_envelope(&lines, k_max);
        for line in &lines {
            let k0 = env.k0() as usize;
            assert!(env.value_at(k0) >= line.value_at(k0) - 1e-12);
            assert!(env.value_at(k_max) >= line.value_at(k_max) - 1e-12);
        }
    }

    #[test]
    fn test_lower_envelope_is_dominated_by_children() {
        let mut rng = StdRng::seed_from_u64(4);
        let k_max = 12;
        let lines: Vec<ApproximationLine> = (0..8)
            .map(|_| fit_approximations(&random_knn_distances(&mut rng, k_max), k_max).1)
            .collect();
        let env = lower_envelope(&lines, k_max);
        for line in &lines {
            let k0 = env.k0() as usize;
            assert!(env.value_at(k0) <= line.value_at(k0) + 1e-12);
            assert!(env.value_at(k_max) <= line.value_at(k_max) + 1e-12);
        }
    }

    #[test]
    fn test_envelopes_of_nothing() {
        let none: Vec<ApproximationLine> = Vec::new();
        assert_eq!(upper_envelope(&none, 5), ApproximationLine::lower_sentinel());
        assert_eq!(lower_envelope(&none, 5), ApproximationLine::upper_sentinel());
    }

    #[test]
    fn test_upper_envelope_with_unbounded_child() {
        let lines = [
            ApproximationLine::new(1, 0.5, 0.0),
            ApproximationLine::upper_sentinel(),
        ];
        let env = upper_envelope(&lines, 10);
        assert_eq!(env.approximated_distance(1), f64::INFINITY);
        assert_eq!(env.approximated_distance(10), f64::INFINITY);
    }

    #[test]
    fn test_upper_envelope_of_sentinels_stays_zero() {
        let lines = [ApproximationLine::lower_sentinel(); 3];
        assert_eq!(upper_envelope(&lines, 4).approximated_distance(2), 0.0);
    }
}
