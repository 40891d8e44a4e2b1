use anyhow::{bail, Result};
use nalgebra::{DMatrix, DVector, Vector2};
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

/// Rectangular bounding box in state space.
///
/// Used for default sampling grids and initial-condition generation only;
/// integration never clips trajectories to the domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Domain {
    lower: DVector<f64>,
    upper: DVector<f64>,
}

impl Domain {
    pub fn new(lower: DVector<f64>, upper: DVector<f64>) -> Result<Self> {
        if lower.len() != upper.len() {
            bail!(
                "Domain bounds have mismatched dimensions ({} vs {}).",
                lower.len(),
                upper.len()
            );
        }
        if lower.is_empty() {
            bail!("Domain must have positive dimension.");
        }
        for i in 0..lower.len() {
            if !lower[i].is_finite() || !upper[i].is_finite() {
                bail!("Domain bounds must be finite (axis {}).", i);
            }
            if lower[i] > upper[i] {
                bail!(
                    "Domain lower bound exceeds upper bound on axis {} ({} > {}).",
                    i,
                    lower[i],
                    upper[i]
                );
            }
        }
        Ok(Self { lower, upper })
    }

    /// 2D convenience constructor from per-axis (lower, upper) pairs.
    pub fn rect2(x: (f64, f64), y: (f64, f64)) -> Result<Self> {
        Self::new(
            DVector::from_vec(vec![x.0, y.0]),
            DVector::from_vec(vec![x.1, y.1]),
        )
    }

    pub fn dimension(&self) -> usize {
        self.lower.len()
    }

    pub fn lower(&self) -> &DVector<f64> {
        &self.lower
    }

    pub fn upper(&self) -> &DVector<f64> {
        &self.upper
    }

    pub fn contains(&self, x: &DVector<f64>) -> bool {
        x.len() == self.dimension()
            && (0..x.len()).all(|i| self.lower[i] <= x[i] && x[i] <= self.upper[i])
    }

    /// Uniform lattice over the box with `n` points per axis, both bounds
    /// included. Returns exactly `n^dim` points as matrix columns.
    /// With `n == 1` the single lattice point per axis sits at the midpoint.
    pub fn sample_grid(&self, n: usize) -> Result<DMatrix<f64>> {
        if n == 0 {
            bail!("Grid sampling requires at least one point per axis.");
        }
        let dim = self.dimension();
        let total = n.pow(dim as u32);
        let mut points = DMatrix::zeros(dim, total);

        for col in 0..total {
            // Decode the column index as a mixed-radix (base n) multi-index.
            let mut rest = col;
            for axis in 0..dim {
                let digit = rest % n;
                rest /= n;
                let coord = if n == 1 {
                    0.5 * (self.lower[axis] + self.upper[axis])
                } else {
                    let frac = digit as f64 / (n - 1) as f64;
                    self.lower[axis] + frac * (self.upper[axis] - self.lower[axis])
                };
                points[(axis, col)] = coord;
            }
        }
        Ok(points)
    }

    /// `n` i.i.d. uniform points in the box.
    pub fn sample_uniform(&self, n: usize, rng: &mut impl Rng) -> DMatrix<f64> {
        let dim = self.dimension();
        let mut points = DMatrix::zeros(dim, n);
        for col in 0..n {
            for axis in 0..dim {
                let u: f64 = rng.gen();
                points[(axis, col)] =
                    self.lower[axis] + u * (self.upper[axis] - self.lower[axis]);
            }
        }
        points
    }

    /// `n` points drawn from a Gaussian mixture.
    ///
    /// `means` and `spreads` are dim-by-K matrices: column k holds the mean
    /// and per-axis standard deviation of component k, weighted by
    /// `weights[k]`. Samples are not clipped to the box; the domain fixes the
    /// expected dimensionality.
    pub fn sample_gaussian_mixture(
        &self,
        weights: &[f64],
        means: &DMatrix<f64>,
        spreads: &DMatrix<f64>,
        n: usize,
        rng: &mut impl Rng,
    ) -> Result<DMatrix<f64>> {
        let dim = self.dimension();
        if weights.is_empty() {
            bail!("Gaussian mixture requires at least one component.");
        }
        if means.nrows() != dim || spreads.nrows() != dim {
            bail!(
                "Mixture parameters have dimension {} but the domain has dimension {}.",
                means.nrows(),
                dim
            );
        }
        if means.ncols() != weights.len() || spreads.ncols() != weights.len() {
            bail!(
                "Mixture has {} weights but {} mean columns and {} spread columns.",
                weights.len(),
                means.ncols(),
                spreads.ncols()
            );
        }
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            bail!("Mixture weights must be finite and non-negative.");
        }
        let total_weight: f64 = weights.iter().sum();
        if total_weight <= 0.0 {
            bail!("Mixture weights must sum to a positive value.");
        }
        if spreads.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            bail!("Mixture spreads must be finite and positive.");
        }

        let mut points = DMatrix::zeros(dim, n);
        for col in 0..n {
            let mut pick = rng.gen::<f64>() * total_weight;
            let mut component = weights.len() - 1;
            for (k, w) in weights.iter().enumerate() {
                if pick < *w {
                    component = k;
                    break;
                }
                pick -= w;
            }
            for axis in 0..dim {
                let z: f64 = StandardNormal.sample(rng);
                points[(axis, col)] =
                    means[(axis, component)] + spreads[(axis, component)] * z;
            }
        }
        Ok(points)
    }
}

/// Closed 2D polygon given by its vertices in order. The last vertex
/// connects back to the first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Polygon {
    vertices: Vec<Vector2<f64>>,
}

impl Polygon {
    pub fn new(vertices: Vec<Vector2<f64>>) -> Result<Self> {
        if vertices.len() < 3 {
            bail!(
                "A polygon needs at least 3 vertices, got {}.",
                vertices.len()
            );
        }
        if vertices.iter().any(|v| !v.x.is_finite() || !v.y.is_finite()) {
            bail!("Polygon vertices must be finite.");
        }
        // Shoelace sum; a zero-area vertex set (all collinear) has no
        // interior, so rejection sampling against it would never accept.
        let mut twice_area = 0.0;
        let mut twice_area_abs = 0.0;
        for i in 0..vertices.len() {
            let a = vertices[i];
            let b = vertices[(i + 1) % vertices.len()];
            let cross = a.x * b.y - b.x * a.y;
            twice_area += cross;
            twice_area_abs += cross.abs();
        }
        if twice_area.abs() <= f64::EPSILON * twice_area_abs {
            bail!("Polygon has zero area; its vertices are collinear.");
        }
        Ok(Self { vertices })
    }

    pub fn num_sides(&self) -> usize {
        self.vertices.len()
    }

    pub fn vertices(&self) -> &[Vector2<f64>] {
        &self.vertices
    }

    fn side(&self, i: usize) -> (Vector2<f64>, Vector2<f64>) {
        let a = self.vertices[i];
        let b = self.vertices[(i + 1) % self.vertices.len()];
        (a, b)
    }

    fn side_lengths(&self) -> Vec<f64> {
        (0..self.num_sides())
            .map(|i| {
                let (a, b) = self.side(i);
                (b - a).norm()
            })
            .collect()
    }

    /// Splits `n` boundary points across the sides proportionally to side
    /// length (largest-remainder rounding, so each side is within one point
    /// of its exact quota). Exposed for testing the allocation.
    pub fn boundary_allocation(&self, n: usize) -> Result<Vec<usize>> {
        let sides = self.num_sides();
        if n < sides {
            bail!(
                "Boundary sampling needs at least one point per side ({} points for {} sides).",
                n,
                sides
            );
        }
        let lengths = self.side_lengths();
        let total: f64 = lengths.iter().sum();
        if total <= 0.0 {
            bail!("Polygon has zero perimeter.");
        }

        let quotas: Vec<f64> = lengths.iter().map(|l| n as f64 * l / total).collect();
        let mut counts: Vec<usize> = quotas.iter().map(|q| q.floor() as usize).collect();
        let assigned: usize = counts.iter().sum();

        // Hand the remaining points to the sides with the largest fractional
        // quotas.
        let mut order: Vec<usize> = (0..sides).collect();
        order.sort_by(|&i, &j| {
            let fi = quotas[i] - quotas[i].floor();
            let fj = quotas[j] - quotas[j].floor();
            fj.partial_cmp(&fi).unwrap().then(i.cmp(&j))
        });
        for &i in order.iter().take(n - assigned) {
            counts[i] += 1;
        }
        Ok(counts)
    }

    /// Exactly `n` points on the polygon boundary, uniformly placed along
    /// each side, with per-side counts proportional to side length.
    pub fn sample_boundary(&self, n: usize, rng: &mut impl Rng) -> Result<DMatrix<f64>> {
        let counts = self.boundary_allocation(n)?;
        let mut points = DMatrix::zeros(2, n);
        let mut col = 0;
        for (i, &count) in counts.iter().enumerate() {
            let (a, b) = self.side(i);
            for _ in 0..count {
                let u: f64 = rng.gen();
                let p = a + u * (b - a);
                points[(0, col)] = p.x;
                points[(1, col)] = p.y;
                col += 1;
            }
        }
        Ok(points)
    }

    /// Exactly `n` points in the polygon interior via rejection sampling
    /// from the bounding box. The constructor guarantees positive area, so
    /// the acceptance probability is bounded away from zero.
    pub fn sample_interior(&self, n: usize, rng: &mut impl Rng) -> DMatrix<f64> {
        let (lo, hi) = self.bounding_box();
        let mut points = DMatrix::zeros(2, n);
        let mut col = 0;
        while col < n {
            let p = Vector2::new(
                lo.x + rng.gen::<f64>() * (hi.x - lo.x),
                lo.y + rng.gen::<f64>() * (hi.y - lo.y),
            );
            if self.contains(&p) {
                points[(0, col)] = p.x;
                points[(1, col)] = p.y;
                col += 1;
            }
        }
        points
    }

    /// Even-odd crossing test.
    pub fn contains(&self, p: &Vector2<f64>) -> bool {
        let mut inside = false;
        for i in 0..self.num_sides() {
            let (a, b) = self.side(i);
            if (a.y > p.y) != (b.y > p.y) {
                let x_cross = a.x + (p.y - a.y) / (b.y - a.y) * (b.x - a.x);
                if p.x < x_cross {
                    inside = !inside;
                }
            }
        }
        inside
    }

    fn bounding_box(&self) -> (Vector2<f64>, Vector2<f64>) {
        let mut lo = self.vertices[0];
        let mut hi = self.vertices[0];
        for v in &self.vertices[1..] {
            lo.x = lo.x.min(v.x);
            lo.y = lo.y.min(v.y);
            hi.x = hi.x.max(v.x);
            hi.y = hi.y.max(v.y);
        }
        (lo, hi)
    }
}

#[cfg(test)]
mod tests {
    use super::{Domain, Polygon};
    use nalgebra::{DMatrix, DVector, Vector2};
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn assert_err_contains<T: std::fmt::Debug>(result: anyhow::Result<T>, needle: &str) {
        let err = result.expect_err("expected error");
        let message = format!("{err}");
        assert!(
            message.contains(needle),
            "expected error to contain \"{needle}\", got \"{message}\""
        );
    }

    fn unit_square() -> Domain {
        Domain::rect2((0.0, 1.0), (0.0, 1.0)).unwrap()
    }

    #[test]
    fn domain_rejects_bad_bounds() {
        assert_err_contains(
            Domain::new(DVector::from_vec(vec![0.0]), DVector::from_vec(vec![1.0, 2.0])),
            "mismatched dimensions",
        );
        assert_err_contains(Domain::rect2((1.0, 0.0), (0.0, 1.0)), "exceeds upper bound");
        assert_err_contains(Domain::rect2((f64::NAN, 0.0), (0.0, 1.0)), "finite");
    }

    #[test]
    fn grid_has_exact_cardinality_and_stays_in_bounds() {
        let domain = unit_square();
        let grid = domain.sample_grid(4).unwrap();
        assert_eq!(grid.ncols(), 16);
        for col in grid.column_iter() {
            assert!(domain.contains(&col.into_owned()));
        }
        // Both bounds are present on each axis.
        assert!(grid.row(0).iter().any(|&v| v == 0.0));
        assert!(grid.row(0).iter().any(|&v| v == 1.0));
    }

    #[test]
    fn grid_rejects_zero_points() {
        assert_err_contains(unit_square().sample_grid(0), "at least one point");
    }

    proptest! {
        #[test]
        fn grid_cardinality_is_n_pow_dim(n in 1usize..6) {
            let domain = Domain::new(
                DVector::from_vec(vec![-1.0, 0.0, 2.0]),
                DVector::from_vec(vec![1.0, 3.0, 5.0]),
            ).unwrap();
            let grid = domain.sample_grid(n).unwrap();
            prop_assert_eq!(grid.ncols(), n.pow(3));
            for col in grid.column_iter() {
                prop_assert!(domain.contains(&col.into_owned()));
            }
        }
    }

    #[test]
    fn uniform_samples_stay_in_bounds() {
        let domain = unit_square();
        let mut rng = StdRng::seed_from_u64(7);
        let points = domain.sample_uniform(200, &mut rng);
        assert_eq!(points.ncols(), 200);
        for col in points.column_iter() {
            assert!(domain.contains(&col.into_owned()));
        }
    }

    #[test]
    fn gaussian_mixture_validates_shapes() {
        let domain = unit_square();
        let mut rng = StdRng::seed_from_u64(7);
        let means = DMatrix::from_column_slice(3, 1, &[0.5, 0.5, 0.5]);
        let spreads = DMatrix::from_column_slice(3, 1, &[0.1, 0.1, 0.1]);
        assert_err_contains(
            domain.sample_gaussian_mixture(&[1.0], &means, &spreads, 10, &mut rng),
            "dimension",
        );

        let means = DMatrix::from_column_slice(2, 1, &[0.5, 0.5]);
        let spreads = DMatrix::from_column_slice(2, 1, &[0.1, 0.1]);
        assert_err_contains(
            domain.sample_gaussian_mixture(&[], &means, &spreads, 10, &mut rng),
            "at least one component",
        );
        assert_err_contains(
            domain.sample_gaussian_mixture(&[-1.0], &means, &spreads, 10, &mut rng),
            "non-negative",
        );
    }

    #[test]
    fn gaussian_mixture_concentrates_near_means() {
        let domain = unit_square();
        let mut rng = StdRng::seed_from_u64(42);
        let means = DMatrix::from_column_slice(2, 1, &[0.5, 0.5]);
        let spreads = DMatrix::from_column_slice(2, 1, &[0.01, 0.01]);
        let points = domain
            .sample_gaussian_mixture(&[1.0], &means, &spreads, 100, &mut rng)
            .unwrap();
        for col in points.column_iter() {
            assert!((col[0] - 0.5).abs() < 0.1);
            assert!((col[1] - 0.5).abs() < 0.1);
        }
    }

    fn rectangle_3_by_1() -> Polygon {
        Polygon::new(vec![
            Vector2::new(0.0, 0.0),
            Vector2::new(3.0, 0.0),
            Vector2::new(3.0, 1.0),
            Vector2::new(0.0, 1.0),
        ])
        .unwrap()
    }

    #[test]
    fn polygon_rejects_too_few_vertices() {
        assert_err_contains(
            Polygon::new(vec![Vector2::new(0.0, 0.0), Vector2::new(1.0, 0.0)]),
            "at least 3 vertices",
        );
    }

    #[test]
    fn polygon_rejects_collinear_vertices() {
        // Zero-area input must fail at construction; interior rejection
        // sampling could never accept a point from it.
        assert_err_contains(
            Polygon::new(vec![
                Vector2::new(0.0, 0.0),
                Vector2::new(1.0, 1.0),
                Vector2::new(2.0, 2.0),
            ]),
            "zero area",
        );
        assert_err_contains(
            Polygon::new(vec![
                Vector2::new(0.0, 0.5),
                Vector2::new(1.0, 0.5),
                Vector2::new(2.0, 0.5),
                Vector2::new(1.0, 0.5),
            ]),
            "zero area",
        );
    }

    #[test]
    fn boundary_allocation_is_proportional_to_side_length() {
        // Perimeter 8 split as 3 + 1 + 3 + 1; with n = 8 the quota is exact.
        let poly = rectangle_3_by_1();
        let counts = poly.boundary_allocation(8).unwrap();
        assert_eq!(counts, vec![3, 1, 3, 1]);

        // Non-exact quotas stay within one point of proportional.
        let counts = poly.boundary_allocation(10).unwrap();
        assert_eq!(counts.iter().sum::<usize>(), 10);
        let lengths = [3.0, 1.0, 3.0, 1.0];
        for (count, len) in counts.iter().zip(lengths) {
            let quota = 10.0 * len / 8.0;
            assert!((*count as f64 - quota).abs() <= 1.0);
        }
    }

    #[test]
    fn boundary_sampling_returns_exactly_n_points_on_the_boundary() {
        let poly = rectangle_3_by_1();
        let mut rng = StdRng::seed_from_u64(3);
        let points = poly.sample_boundary(17, &mut rng).unwrap();
        assert_eq!(points.ncols(), 17);
        for col in points.column_iter() {
            let on_horizontal = (col[1].abs() < 1e-12 || (col[1] - 1.0).abs() < 1e-12)
                && (0.0..=3.0).contains(&col[0]);
            let on_vertical = (col[0].abs() < 1e-12 || (col[0] - 3.0).abs() < 1e-12)
                && (0.0..=1.0).contains(&col[1]);
            assert!(on_horizontal || on_vertical, "point off boundary: {col:?}");
        }
    }

    #[test]
    fn boundary_sampling_rejects_undersized_requests() {
        let poly = rectangle_3_by_1();
        let mut rng = StdRng::seed_from_u64(3);
        assert_err_contains(
            poly.sample_boundary(3, &mut rng),
            "at least one point per side",
        );
    }

    #[test]
    fn interior_sampling_lands_inside() {
        let poly = Polygon::new(vec![
            Vector2::new(0.0, 0.0),
            Vector2::new(2.0, 0.0),
            Vector2::new(1.0, 2.0),
        ])
        .unwrap();
        let mut rng = StdRng::seed_from_u64(11);
        let points = poly.sample_interior(50, &mut rng);
        assert_eq!(points.ncols(), 50);
        for col in points.column_iter() {
            assert!(poly.contains(&Vector2::new(col[0], col[1])));
        }
    }
}
