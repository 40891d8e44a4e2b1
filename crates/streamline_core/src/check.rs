//! Finite-difference cross-checks for analytic derivatives.
//!
//! A flow's `jacobian` must be the exact state-derivative of its `vf`, and a
//! stream function's derivatives must be consistent order to order. Both are
//! modeling contracts rather than runtime conditions, so these helpers
//! return the raw residual (analytic minus central-difference numeric) and
//! leave the judgement of "small enough" to the caller. For a smooth system
//! the residual shrinks like `delta²`.

use crate::hamiltonian::{PsiOrder, StreamFunction};
use crate::traits::Flow;
use anyhow::{bail, Result};
use nalgebra::{DMatrix, DVector, Vector2};

/// Default perturbation size for the central differences.
pub const DEFAULT_DELTA: f64 = 1e-6;

fn validate_delta(delta: f64) -> Result<()> {
    if !(delta.is_finite() && delta > 0.0) {
        bail!("Perturbation delta must be finite and positive, got {delta}.");
    }
    Ok(())
}

/// Analytic Jacobian minus the central-difference Jacobian of `vf` at a
/// single (time, state) point: column j of the numeric estimate is
/// `(vf(x + δ eⱼ) − vf(x − δ eⱼ)) / 2δ`.
pub fn check_jacobian<F: Flow + ?Sized>(
    flow: &F,
    t: f64,
    x: &DVector<f64>,
    delta: f64,
) -> Result<DMatrix<f64>> {
    validate_delta(delta)?;
    let dim = flow.dimension();
    if x.len() != dim {
        bail!(
            "Test point has dimension {} but the flow has dimension {}.",
            x.len(),
            dim
        );
    }

    let analytic = flow.jacobian(t, x);
    let mut numeric = DMatrix::zeros(dim, dim);
    for j in 0..dim {
        let mut plus = x.clone();
        let mut minus = x.clone();
        plus[j] += delta;
        minus[j] -= delta;
        let column = (flow.vf(t, &plus) - flow.vf(t, &minus)) / (2.0 * delta);
        numeric.set_column(j, &column);
    }
    Ok(analytic - numeric)
}

/// Analytic stream-function derivatives minus central differences of the
/// order below, at a single (time, point) pair.
///
/// - `PsiOrder::Gradient`: compares `psi_grad` against differences of `psi`;
///   returns a 2×1 residual.
/// - `PsiOrder::Hessian`: compares `psi_hess` against differences of
///   `psi_grad`; returns a 2×2 residual whose column j comes from perturbing
///   coordinate j. The two off-diagonal `∂xy` estimates (via the x- and
///   y-perturbation) legitimately differ at finite `delta`, so they are kept
///   as separate entries rather than averaged.
/// - `PsiOrder::Value` has no order below and is rejected.
pub fn check_psi<S: StreamFunction + ?Sized>(
    sf: &S,
    t: f64,
    x: &Vector2<f64>,
    order: PsiOrder,
    delta: f64,
) -> Result<DMatrix<f64>> {
    validate_delta(delta)?;

    let axes = [Vector2::new(delta, 0.0), Vector2::new(0.0, delta)];
    match order {
        PsiOrder::Value => {
            bail!("check_psi needs a derivative order (Gradient or Hessian).")
        }
        PsiOrder::Gradient => {
            let analytic = sf.psi_grad(t, x);
            let mut residual = DMatrix::zeros(2, 1);
            for (j, e) in axes.iter().enumerate() {
                let numeric = (sf.psi(t, &(x + e)) - sf.psi(t, &(x - e))) / (2.0 * delta);
                residual[(j, 0)] = analytic[j] - numeric;
            }
            Ok(residual)
        }
        PsiOrder::Hessian => {
            let h = sf.psi_hess(t, x);
            // Column j of the analytic Hessian under the [xx, xy, yy]
            // packing: [xx, xy] for j = 0, [xy, yy] for j = 1.
            let analytic = [Vector2::new(h.x, h.y), Vector2::new(h.y, h.z)];
            let mut residual = DMatrix::zeros(2, 2);
            for (j, e) in axes.iter().enumerate() {
                let numeric =
                    (sf.psi_grad(t, &(x + e)) - sf.psi_grad(t, &(x - e))) / (2.0 * delta);
                residual[(0, j)] = analytic[j].x - numeric.x;
                residual[(1, j)] = analytic[j].y - numeric.y;
            }
            Ok(residual)
        }
    }
}
