use crate::domain::Domain;
use anyhow::{bail, Result};
use nalgebra::{DMatrix, DVector};

/// Represents a continuous-time dynamical system (flow).
///
/// A flow carries fixed parameters only: the vector field, its exact
/// Jacobian, a rectangular domain used for default sampling, and the output
/// grid spacing `dt`. Nothing here mutates during integration; advancing a
/// trajectory is a pure function of the initial condition, duration, and
/// start time (see [`crate::integrate`]).
///
/// `jacobian` must be the exact state-derivative of `vf`. A mismatch is a
/// modeling bug; [`crate::check::check_jacobian`] cross-checks the pair with
/// central finite differences.
pub trait Flow {
    /// Returns the dimension of the state space.
    fn dimension(&self) -> usize;

    /// Evaluates the vector field at one (time, state) pair. Must be
    /// evaluable at arbitrary points, on or off any grid.
    fn vf(&self, t: f64, x: &DVector<f64>) -> DVector<f64>;

    /// Evaluates the Jacobian of the vector field with respect to state at
    /// one (time, state) pair.
    fn jacobian(&self, t: f64, x: &DVector<f64>) -> DMatrix<f64>;

    /// Rectangular bounds used for default sampling grids.
    fn domain(&self) -> &Domain;

    /// Spacing of the uniform time grid in full-trajectory output.
    fn dt(&self) -> f64;

    /// Display label.
    fn label(&self) -> &str;

    /// Evaluates the vector field at a batch of points. Columns of `x` are
    /// state vectors; `t` holds either a single time (broadcast over all
    /// columns) or one time per column. Returns a matrix with the same
    /// column count as `x`.
    fn vf_batch(&self, t: &[f64], x: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        let times = broadcast_times(self, t, x)?;
        let dim = self.dimension();
        let mut out = DMatrix::zeros(dim, x.ncols());
        for (col, x_col) in x.column_iter().enumerate() {
            let f = self.vf(times(col), &x_col.into_owned());
            out.set_column(col, &f);
        }
        Ok(out)
    }

    /// Evaluates the Jacobian at a batch of points, one square matrix per
    /// column of `x`. Time broadcasting follows [`Flow::vf_batch`].
    fn jacobian_batch(&self, t: &[f64], x: &DMatrix<f64>) -> Result<Vec<DMatrix<f64>>> {
        let times = broadcast_times(self, t, x)?;
        let mut out = Vec::with_capacity(x.ncols());
        for (col, x_col) in x.column_iter().enumerate() {
            out.push(self.jacobian(times(col), &x_col.into_owned()));
        }
        Ok(out)
    }
}

/// Validates batch shapes and returns a per-column time lookup.
fn broadcast_times<'a, F: Flow + ?Sized>(
    flow: &F,
    t: &'a [f64],
    x: &DMatrix<f64>,
) -> Result<impl Fn(usize) -> f64 + 'a> {
    if x.nrows() != flow.dimension() {
        bail!(
            "State batch has {} rows but the flow has dimension {}.",
            x.nrows(),
            flow.dimension()
        );
    }
    if t.len() != 1 && t.len() != x.ncols() {
        bail!(
            "Got {} times for {} state columns; pass one time or one per column.",
            t.len(),
            x.ncols()
        );
    }
    let broadcast = t.len() == 1;
    Ok(move |col: usize| if broadcast { t[0] } else { t[col] })
}

#[cfg(test)]
mod tests {
    use super::Flow;
    use crate::domain::Domain;
    use nalgebra::{DMatrix, DVector};

    fn assert_err_contains<T: std::fmt::Debug>(result: anyhow::Result<T>, needle: &str) {
        let err = result.expect_err("expected error");
        let message = format!("{err}");
        assert!(
            message.contains(needle),
            "expected error to contain \"{needle}\", got \"{message}\""
        );
    }

    /// f(t, x) = t * x, so batches expose the time actually used per column.
    struct ScaledIdentity {
        domain: Domain,
    }

    impl ScaledIdentity {
        fn new() -> Self {
            Self {
                domain: Domain::rect2((-1.0, 1.0), (-1.0, 1.0)).unwrap(),
            }
        }
    }

    impl Flow for ScaledIdentity {
        fn dimension(&self) -> usize {
            2
        }

        fn vf(&self, t: f64, x: &DVector<f64>) -> DVector<f64> {
            x * t
        }

        fn jacobian(&self, t: f64, _x: &DVector<f64>) -> DMatrix<f64> {
            DMatrix::identity(2, 2) * t
        }

        fn domain(&self) -> &Domain {
            &self.domain
        }

        fn dt(&self) -> f64 {
            0.1
        }

        fn label(&self) -> &str {
            "scaled identity"
        }
    }

    #[test]
    fn vf_batch_broadcasts_a_scalar_time() {
        let flow = ScaledIdentity::new();
        let x = DMatrix::from_column_slice(2, 3, &[1.0, 0.0, 0.0, 1.0, 2.0, -1.0]);
        let out = flow.vf_batch(&[2.0], &x).unwrap();
        assert_eq!(out, x * 2.0);
    }

    #[test]
    fn vf_batch_applies_per_column_times() {
        let flow = ScaledIdentity::new();
        let x = DMatrix::from_column_slice(2, 2, &[1.0, 1.0, 1.0, 1.0]);
        let out = flow.vf_batch(&[0.0, 3.0], &x).unwrap();
        assert_eq!(out.column(0), DVector::from_vec(vec![0.0, 0.0]).column(0));
        assert_eq!(out.column(1), DVector::from_vec(vec![3.0, 3.0]).column(0));
    }

    #[test]
    fn vf_batch_rejects_shape_mismatches() {
        let flow = ScaledIdentity::new();
        let bad_rows = DMatrix::from_column_slice(3, 1, &[1.0, 2.0, 3.0]);
        assert_err_contains(flow.vf_batch(&[0.0], &bad_rows), "dimension");

        let x = DMatrix::from_column_slice(2, 3, &[0.0; 6]);
        assert_err_contains(flow.vf_batch(&[0.0, 1.0], &x), "state columns");
    }

    #[test]
    fn jacobian_batch_returns_one_matrix_per_column() {
        let flow = ScaledIdentity::new();
        let x = DMatrix::from_column_slice(2, 2, &[0.0; 4]);
        let jacs = flow.jacobian_batch(&[1.0, 4.0], &x).unwrap();
        assert_eq!(jacs.len(), 2);
        assert_eq!(jacs[0], DMatrix::identity(2, 2));
        assert_eq!(jacs[1], DMatrix::identity(2, 2) * 4.0);
    }
}
