use crate::domain::Domain;
use crate::traits::Flow;
use anyhow::{bail, Result};
use nalgebra::{DMatrix, DVector, Vector2, Vector3};
use serde::{Deserialize, Serialize};

/// Derivative order selector for stream-function evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PsiOrder {
    /// The stream function value itself.
    Value,
    /// First partials `[∂x, ∂y]`.
    Gradient,
    /// Second partials `[∂xx, ∂xy, ∂yy]`.
    Hessian,
}

impl PsiOrder {
    /// Row count of a batched evaluation at this order.
    pub fn rows(self) -> usize {
        match self {
            PsiOrder::Value => 1,
            PsiOrder::Gradient => 2,
            PsiOrder::Hessian => 3,
        }
    }
}

/// A 2D scalar stream function with analytic derivatives through 2nd order.
///
/// Implementors supply the function value, gradient, and Hessian at a single
/// point; batched order-selected evaluation comes for free. The gradient and
/// Hessian must be exact; [`crate::check::check_psi`] cross-checks each
/// order against central differences of the order below.
pub trait StreamFunction {
    fn psi(&self, t: f64, x: &Vector2<f64>) -> f64;

    /// `[∂Psi/∂x, ∂Psi/∂y]`.
    fn psi_grad(&self, t: f64, x: &Vector2<f64>) -> Vector2<f64>;

    /// `[∂xx, ∂xy, ∂yy]`.
    fn psi_hess(&self, t: f64, x: &Vector2<f64>) -> Vector3<f64>;

    /// Evaluates the order-selected derivatives at a batch of points.
    ///
    /// Columns of `x` are 2D points; `t` holds one time (broadcast) or one
    /// per column. The result has `order.rows()` rows (1, 2, or 3) and one
    /// column per input point.
    fn psi_batch(&self, order: PsiOrder, t: &[f64], x: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        if x.nrows() != 2 {
            bail!(
                "Stream functions are 2D; point batch has {} rows.",
                x.nrows()
            );
        }
        if t.len() != 1 && t.len() != x.ncols() {
            bail!(
                "Got {} times for {} points; pass one time or one per point.",
                t.len(),
                x.ncols()
            );
        }
        let broadcast = t.len() == 1;
        let mut out = DMatrix::zeros(order.rows(), x.ncols());
        for col in 0..x.ncols() {
            let tc = if broadcast { t[0] } else { t[col] };
            let p = Vector2::new(x[(0, col)], x[(1, col)]);
            match order {
                PsiOrder::Value => out[(0, col)] = self.psi(tc, &p),
                PsiOrder::Gradient => {
                    let g = self.psi_grad(tc, &p);
                    out[(0, col)] = g.x;
                    out[(1, col)] = g.y;
                }
                PsiOrder::Hessian => {
                    let h = self.psi_hess(tc, &p);
                    out[(0, col)] = h.x;
                    out[(1, col)] = h.y;
                    out[(2, col)] = h.z;
                }
            }
        }
        Ok(out)
    }
}

/// A 2D incompressible flow derived from a stream function.
///
/// Orientation convention (the only one this library carries):
///
/// ```text
/// vf = [ ∂Psi/∂y, -∂Psi/∂x ]
/// ```
///
/// so the velocity is the 90°-rotated gradient with `u = ψ_y`, `v = -ψ_x`,
/// and the Jacobian follows by differentiating once more:
///
/// ```text
/// J = [  ψ_xy   ψ_yy ]
///     [ -ψ_xx  -ψ_xy ]
/// ```
///
/// The trace of `J` vanishes identically, as it must for an incompressible
/// flow.
#[derive(Debug, Clone)]
pub struct Hamiltonian2d<S> {
    stream: S,
    domain: Domain,
    dt: f64,
    label: String,
}

impl<S: StreamFunction> Hamiltonian2d<S> {
    pub fn new(stream: S, domain: Domain, dt: f64, label: impl Into<String>) -> Result<Self> {
        if domain.dimension() != 2 {
            bail!(
                "Hamiltonian flows are 2D; the domain has dimension {}.",
                domain.dimension()
            );
        }
        if !(dt.is_finite() && dt > 0.0) {
            bail!("Output spacing dt must be positive, got {}.", dt);
        }
        Ok(Self {
            stream,
            domain,
            dt,
            label: label.into(),
        })
    }

    pub fn stream(&self) -> &S {
        &self.stream
    }

    /// Vorticity `∂xx Psi + ∂yy Psi` (the Laplacian of the stream function;
    /// independent of the orientation convention).
    pub fn vorticity(&self, t: f64, x: &Vector2<f64>) -> f64 {
        let h = self.stream.psi_hess(t, x);
        h.x + h.z
    }

    /// Vorticity at a batch of points, one value per column of `x`.
    pub fn vorticity_batch(&self, t: &[f64], x: &DMatrix<f64>) -> Result<DVector<f64>> {
        let hess = self.stream.psi_batch(PsiOrder::Hessian, t, x)?;
        Ok(DVector::from_iterator(
            hess.ncols(),
            (0..hess.ncols()).map(|col| hess[(0, col)] + hess[(2, col)]),
        ))
    }
}

impl<S: StreamFunction> Flow for Hamiltonian2d<S> {
    fn dimension(&self) -> usize {
        2
    }

    fn vf(&self, t: f64, x: &DVector<f64>) -> DVector<f64> {
        let p = Vector2::new(x[0], x[1]);
        let g = self.stream.psi_grad(t, &p);
        DVector::from_vec(vec![g.y, -g.x])
    }

    fn jacobian(&self, t: f64, x: &DVector<f64>) -> DMatrix<f64> {
        let p = Vector2::new(x[0], x[1]);
        let h = self.stream.psi_hess(t, &p);
        DMatrix::from_row_slice(2, 2, &[h.y, h.z, -h.x, -h.y])
    }

    fn domain(&self) -> &Domain {
        &self.domain
    }

    fn dt(&self) -> f64 {
        self.dt
    }

    fn label(&self) -> &str {
        &self.label
    }
}

#[cfg(test)]
mod tests {
    use super::{Hamiltonian2d, PsiOrder, StreamFunction};
    use crate::domain::Domain;
    use crate::traits::Flow;
    use approx::assert_relative_eq;
    use nalgebra::{DMatrix, DVector, Vector2, Vector3};

    fn assert_err_contains<T: std::fmt::Debug>(result: anyhow::Result<T>, needle: &str) {
        let err = result.expect_err("expected error");
        let message = format!("{err}");
        assert!(
            message.contains(needle),
            "expected error to contain \"{needle}\", got \"{message}\""
        );
    }

    /// ψ = x² y + 3y², with simple closed-form derivatives.
    #[derive(Debug)]
    struct Quadratic;

    impl StreamFunction for Quadratic {
        fn psi(&self, _t: f64, x: &Vector2<f64>) -> f64 {
            x.x * x.x * x.y + 3.0 * x.y * x.y
        }

        fn psi_grad(&self, _t: f64, x: &Vector2<f64>) -> Vector2<f64> {
            Vector2::new(2.0 * x.x * x.y, x.x * x.x + 6.0 * x.y)
        }

        fn psi_hess(&self, _t: f64, x: &Vector2<f64>) -> Vector3<f64> {
            Vector3::new(2.0 * x.y, 2.0 * x.x, 6.0)
        }
    }

    fn quadratic_flow() -> Hamiltonian2d<Quadratic> {
        Hamiltonian2d::new(
            Quadratic,
            Domain::rect2((-1.0, 1.0), (-1.0, 1.0)).unwrap(),
            0.1,
            "quadratic",
        )
        .unwrap()
    }

    #[test]
    fn velocity_is_the_rotated_gradient() {
        let flow = quadratic_flow();
        let x = DVector::from_vec(vec![2.0, -1.0]);
        // grad ψ = [-4, -2], so vf = [ψ_y, -ψ_x] = [-2, 4].
        let f = flow.vf(0.0, &x);
        assert_relative_eq!(f[0], -2.0);
        assert_relative_eq!(f[1], 4.0);
    }

    #[test]
    fn jacobian_signs_follow_the_convention_and_trace_vanishes() {
        let flow = quadratic_flow();
        let x = DVector::from_vec(vec![2.0, -1.0]);
        // hess ψ = [ψ_xx, ψ_xy, ψ_yy] = [-2, 4, 6].
        let j = flow.jacobian(0.0, &x);
        assert_relative_eq!(j[(0, 0)], 4.0);
        assert_relative_eq!(j[(0, 1)], 6.0);
        assert_relative_eq!(j[(1, 0)], 2.0);
        assert_relative_eq!(j[(1, 1)], -4.0);
        assert_relative_eq!(j.trace(), 0.0);
    }

    #[test]
    fn vorticity_is_the_laplacian_of_psi() {
        let flow = quadratic_flow();
        let p = Vector2::new(0.5, 0.25);
        let h = flow.stream().psi_hess(0.0, &p);
        assert_relative_eq!(flow.vorticity(0.0, &p), h.x + h.z);

        let x = DMatrix::from_column_slice(2, 2, &[0.5, 0.25, -0.3, 0.8]);
        let w = flow.vorticity_batch(&[0.0], &x).unwrap();
        assert_relative_eq!(w[0], 2.0 * 0.25 + 6.0);
        assert_relative_eq!(w[1], 2.0 * 0.8 + 6.0);
    }

    #[test]
    fn psi_batch_row_count_tracks_the_order() {
        let sf = Quadratic;
        let x = DMatrix::from_column_slice(2, 3, &[0.0, 0.0, 1.0, 1.0, -1.0, 2.0]);
        assert_eq!(sf.psi_batch(PsiOrder::Value, &[0.0], &x).unwrap().nrows(), 1);
        assert_eq!(
            sf.psi_batch(PsiOrder::Gradient, &[0.0], &x).unwrap().nrows(),
            2
        );
        let hess = sf.psi_batch(PsiOrder::Hessian, &[0.0], &x).unwrap();
        assert_eq!(hess.nrows(), 3);
        assert_eq!(hess.ncols(), 3);
        assert_relative_eq!(hess[(0, 1)], 2.0); // ψ_xx at (1, 1)
    }

    #[test]
    fn psi_batch_rejects_bad_shapes() {
        let sf = Quadratic;
        let bad = DMatrix::from_column_slice(3, 1, &[0.0, 0.0, 0.0]);
        assert_err_contains(sf.psi_batch(PsiOrder::Value, &[0.0], &bad), "2D");

        let x = DMatrix::from_column_slice(2, 3, &[0.0; 6]);
        assert_err_contains(sf.psi_batch(PsiOrder::Value, &[0.0, 1.0], &x), "points");
    }

    #[test]
    fn adapter_formats_for_debugging() {
        // `Ok` values reaching `assert_err_contains` are rendered with
        // `{:?}`, so the adapter has to be debug-formattable.
        let rendered = format!("{:?}", quadratic_flow());
        assert!(rendered.contains("quadratic"), "rendered = {rendered}");
    }

    #[test]
    fn constructor_rejects_bad_domains() {
        let domain = Domain::new(
            DVector::from_vec(vec![0.0, 0.0, 0.0]),
            DVector::from_vec(vec![1.0, 1.0, 1.0]),
        )
        .unwrap();
        assert_err_contains(
            Hamiltonian2d::new(Quadratic, domain, 0.1, "bad"),
            "2D",
        );
        assert_err_contains(
            Hamiltonian2d::new(
                Quadratic,
                Domain::rect2((0.0, 1.0), (0.0, 1.0)).unwrap(),
                0.0,
                "bad",
            ),
            "positive",
        );
    }
}
