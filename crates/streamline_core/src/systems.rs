//! Concrete flows shipped with the library: the steady 3D ABC flow, the
//! time-periodic double gyre (as a stream function), the forced Duffing
//! oscillator, and a harmonic oscillator with a closed-form solution.

use crate::domain::Domain;
use crate::hamiltonian::StreamFunction;
use crate::traits::Flow;
use nalgebra::{DMatrix, DVector, Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Arnold-Beltrami-Childress flow on the 3-torus:
///
/// ```text
/// dx/dt = a sin z + c cos y
/// dy/dt = b sin x + a cos z
/// dz/dt = c sin y + b cos x
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbcFlow {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    domain: Domain,
    dt: f64,
    label: String,
}

impl AbcFlow {
    pub fn new(a: f64, b: f64, c: f64, dt: f64) -> Self {
        let two_pi = 2.0 * PI;
        let domain = Domain::new(
            DVector::zeros(3),
            DVector::from_vec(vec![two_pi, two_pi, two_pi]),
        )
        .expect("fixed bounds are valid");
        Self {
            a,
            b,
            c,
            domain,
            dt,
            label: "ABC flow".to_string(),
        }
    }
}

impl Default for AbcFlow {
    /// The classic chaotic parameter set `a = √3, b = √2, c = 1`.
    fn default() -> Self {
        Self::new(3.0_f64.sqrt(), 2.0_f64.sqrt(), 1.0, 0.1)
    }
}

impl Flow for AbcFlow {
    fn dimension(&self) -> usize {
        3
    }

    fn vf(&self, _t: f64, x: &DVector<f64>) -> DVector<f64> {
        DVector::from_vec(vec![
            self.a * x[2].sin() + self.c * x[1].cos(),
            self.b * x[0].sin() + self.a * x[2].cos(),
            self.c * x[1].sin() + self.b * x[0].cos(),
        ])
    }

    fn jacobian(&self, _t: f64, x: &DVector<f64>) -> DMatrix<f64> {
        DMatrix::from_row_slice(
            3,
            3,
            &[
                0.0,
                -self.c * x[1].sin(),
                self.a * x[2].cos(),
                self.b * x[0].cos(),
                0.0,
                -self.a * x[2].sin(),
                -self.b * x[0].sin(),
                self.c * x[1].cos(),
                0.0,
            ],
        )
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

/// Time-periodic double-gyre stream function on `[0, 2] × [0, 1]`:
///
/// ```text
/// ψ(t, x, y) = amplitude · sin(π f(t, x)) · sin(π y)
/// f(t, x)    = ε sin(ω t) x² + (1 − 2 ε sin(ω t)) x
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoubleGyre {
    pub amplitude: f64,
    pub epsilon: f64,
    pub omega: f64,
}

impl Default for DoubleGyre {
    /// The canonical parameter set `A = 0.1, ε = 0.25, ω = 2π/10`.
    fn default() -> Self {
        Self {
            amplitude: 0.1,
            epsilon: 0.25,
            omega: 2.0 * PI / 10.0,
        }
    }
}

impl DoubleGyre {
    /// Wraps the stream function in a [`Flow`] over the canonical
    /// `[0, 2] × [0, 1]` box.
    pub fn into_flow(self, dt: f64) -> anyhow::Result<crate::hamiltonian::Hamiltonian2d<Self>> {
        crate::hamiltonian::Hamiltonian2d::new(
            self,
            Domain::rect2((0.0, 2.0), (0.0, 1.0))?,
            dt,
            "double gyre",
        )
    }

    /// `(f, ∂f/∂x, ∂²f/∂x²)` at `(t, x)`.
    fn warp(&self, t: f64, x: f64) -> (f64, f64, f64) {
        let s = self.epsilon * (self.omega * t).sin();
        let f = s * x * x + (1.0 - 2.0 * s) * x;
        let fx = 2.0 * s * x + 1.0 - 2.0 * s;
        let fxx = 2.0 * s;
        (f, fx, fxx)
    }
}

impl StreamFunction for DoubleGyre {
    fn psi(&self, t: f64, x: &Vector2<f64>) -> f64 {
        let (f, _, _) = self.warp(t, x.x);
        self.amplitude * (PI * f).sin() * (PI * x.y).sin()
    }

    fn psi_grad(&self, t: f64, x: &Vector2<f64>) -> Vector2<f64> {
        let (f, fx, _) = self.warp(t, x.x);
        let a = self.amplitude;
        Vector2::new(
            a * PI * (PI * f).cos() * fx * (PI * x.y).sin(),
            a * PI * (PI * f).sin() * (PI * x.y).cos(),
        )
    }

    fn psi_hess(&self, t: f64, x: &Vector2<f64>) -> Vector3<f64> {
        let (f, fx, fxx) = self.warp(t, x.x);
        let a = self.amplitude;
        let sin_f = (PI * f).sin();
        let cos_f = (PI * f).cos();
        let sin_y = (PI * x.y).sin();
        let cos_y = (PI * x.y).cos();
        Vector3::new(
            a * PI * (cos_f * fxx - PI * sin_f * fx * fx) * sin_y,
            a * PI * PI * cos_f * fx * cos_y,
            -a * PI * PI * sin_f * sin_y,
        )
    }
}

/// Forced, damped Duffing oscillator:
///
/// ```text
/// dx/dt = y
/// dy/dt = forcing cos(ω t) − damping y − alpha x − beta x³
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Duffing {
    pub alpha: f64,
    pub beta: f64,
    pub damping: f64,
    pub forcing: f64,
    pub omega: f64,
    domain: Domain,
    dt: f64,
    label: String,
}

impl Duffing {
    pub fn new(alpha: f64, beta: f64, damping: f64, forcing: f64, omega: f64, dt: f64) -> Self {
        let domain = Domain::rect2((-2.0, 2.0), (-2.0, 2.0)).expect("fixed bounds are valid");
        Self {
            alpha,
            beta,
            damping,
            forcing,
            omega,
            domain,
            dt,
            label: "Duffing oscillator".to_string(),
        }
    }
}

impl Default for Duffing {
    /// Double-well potential with weak damping and forcing.
    fn default() -> Self {
        Self::new(-1.0, 1.0, 0.25, 0.3, 1.0, 0.05)
    }
}

impl Flow for Duffing {
    fn dimension(&self) -> usize {
        2
    }

    fn vf(&self, t: f64, x: &DVector<f64>) -> DVector<f64> {
        DVector::from_vec(vec![
            x[1],
            self.forcing * (self.omega * t).cos()
                - self.damping * x[1]
                - self.alpha * x[0]
                - self.beta * x[0] * x[0] * x[0],
        ])
    }

    fn jacobian(&self, _t: f64, x: &DVector<f64>) -> DMatrix<f64> {
        DMatrix::from_row_slice(
            2,
            2,
            &[
                0.0,
                1.0,
                -self.alpha - 3.0 * self.beta * x[0] * x[0],
                -self.damping,
            ],
        )
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

/// Undamped harmonic oscillator `dx/dt = y, dy/dt = −ω² x`, with solution
/// `x(t) = x₀ cos(ωt) + (y₀/ω) sin(ωt)`. Useful as a closed-form anchor for
/// integration tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarmonicOscillator {
    omega: f64,
    domain: Domain,
    dt: f64,
    label: String,
}

impl HarmonicOscillator {
    pub fn new(omega: f64, dt: f64) -> Self {
        let domain = Domain::rect2((-2.0, 2.0), (-2.0, 2.0)).expect("fixed bounds are valid");
        Self {
            omega,
            domain,
            dt,
            label: "harmonic oscillator".to_string(),
        }
    }

    pub fn omega(&self) -> f64 {
        self.omega
    }
}

impl Default for HarmonicOscillator {
    fn default() -> Self {
        Self::new(2.0 * PI, 0.05)
    }
}

impl Flow for HarmonicOscillator {
    fn dimension(&self) -> usize {
        2
    }

    fn vf(&self, _t: f64, x: &DVector<f64>) -> DVector<f64> {
        DVector::from_vec(vec![x[1], -self.omega * self.omega * x[0]])
    }

    fn jacobian(&self, _t: f64, _x: &DVector<f64>) -> DMatrix<f64> {
        DMatrix::from_row_slice(2, 2, &[0.0, 1.0, -self.omega * self.omega, 0.0])
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
