use crate::traits::Flow;
use nalgebra::DVector;

/// Classic Runge-Kutta 4th Order Solver (fixed step).
pub struct Rk4 {
    k1: DVector<f64>,
    k2: DVector<f64>,
    k3: DVector<f64>,
    tmp: DVector<f64>,
}

impl Rk4 {
    pub fn new(dim: usize) -> Self {
        Self {
            k1: DVector::zeros(dim),
            k2: DVector::zeros(dim),
            k3: DVector::zeros(dim),
            tmp: DVector::zeros(dim),
        }
    }

    /// Performs one step of size `dt`, advancing `t` and `state` in place.
    pub fn step<F: Flow + ?Sized>(&mut self, flow: &F, t: &mut f64, state: &mut DVector<f64>, dt: f64) {
        let t0 = *t;
        let half = 0.5 * dt;

        // k1 = f(t, y)
        self.k1 = flow.vf(t0, state);

        // k2 = f(t + dt/2, y + dt*k1/2)
        self.tmp = &*state + &self.k1 * half;
        self.k2 = flow.vf(t0 + half, &self.tmp);

        // k3 = f(t + dt/2, y + dt*k2/2)
        self.tmp = &*state + &self.k2 * half;
        self.k3 = flow.vf(t0 + half, &self.tmp);

        // k4 = f(t + dt, y + dt*k3)
        self.tmp = &*state + &self.k3 * dt;
        let k4 = flow.vf(t0 + dt, &self.tmp);

        // y_next = y + dt/6 * (k1 + 2k2 + 2k3 + k4)
        *state += (&self.k1 + &self.k2 * 2.0 + &self.k3 * 2.0 + k4) * (dt / 6.0);
        *t = t0 + dt;
    }
}

/// Dormand-Prince 5(4) embedded pair with 4th-degree dense output.
///
/// The driver calls [`Dopri5::try_step`] to obtain a candidate state and a
/// scaled error norm, then either retries with a smaller step or calls
/// [`Dopri5::accept`], which builds the dense-output coefficients for the
/// step just taken and recycles the FSAL stage.
pub struct Dopri5 {
    k1: DVector<f64>,
    k2: DVector<f64>,
    k3: DVector<f64>,
    k4: DVector<f64>,
    k5: DVector<f64>,
    k6: DVector<f64>,
    k7: DVector<f64>,
    tmp: DVector<f64>,
    rcont1: DVector<f64>,
    rcont2: DVector<f64>,
    rcont3: DVector<f64>,
    rcont4: DVector<f64>,
    rcont5: DVector<f64>,
    k1_valid: bool,
}

// Dormand-Prince coefficients.
const C2: f64 = 1.0 / 5.0;
const C3: f64 = 3.0 / 10.0;
const C4: f64 = 4.0 / 5.0;
const C5: f64 = 8.0 / 9.0;

const A21: f64 = 1.0 / 5.0;
const A31: f64 = 3.0 / 40.0;
const A32: f64 = 9.0 / 40.0;
const A41: f64 = 44.0 / 45.0;
const A42: f64 = -56.0 / 15.0;
const A43: f64 = 32.0 / 9.0;
const A51: f64 = 19372.0 / 6561.0;
const A52: f64 = -25360.0 / 2187.0;
const A53: f64 = 64448.0 / 6561.0;
const A54: f64 = -212.0 / 729.0;
const A61: f64 = 9017.0 / 3168.0;
const A62: f64 = -355.0 / 33.0;
const A63: f64 = 46732.0 / 5247.0;
const A64: f64 = 49.0 / 176.0;
const A65: f64 = -5103.0 / 18656.0;

// 5th-order weights (row 7 of the tableau; also the FSAL stage position).
const B1: f64 = 35.0 / 384.0;
const B3: f64 = 500.0 / 1113.0;
const B4: f64 = 125.0 / 192.0;
const B5: f64 = -2187.0 / 6784.0;
const B6: f64 = 11.0 / 84.0;

// Embedded error weights (5th order minus 4th order).
const E1: f64 = 71.0 / 57600.0;
const E3: f64 = -71.0 / 16695.0;
const E4: f64 = 71.0 / 1920.0;
const E5: f64 = -17253.0 / 339200.0;
const E6: f64 = 22.0 / 525.0;
const E7: f64 = -1.0 / 40.0;

// Dense-output weights.
const D1: f64 = -12715105075.0 / 11282082432.0;
const D3: f64 = 87487479700.0 / 32700410799.0;
const D4: f64 = -10690763975.0 / 1880347072.0;
const D5: f64 = 701980252875.0 / 199316789632.0;
const D6: f64 = -1453857185.0 / 822651844.0;
const D7: f64 = 69997945.0 / 29380423.0;

impl Dopri5 {
    pub fn new(dim: usize) -> Self {
        let z = DVector::zeros(dim);
        Self {
            k1: z.clone(),
            k2: z.clone(),
            k3: z.clone(),
            k4: z.clone(),
            k5: z.clone(),
            k6: z.clone(),
            k7: z.clone(),
            tmp: z.clone(),
            rcont1: z.clone(),
            rcont2: z.clone(),
            rcont3: z.clone(),
            rcont4: z.clone(),
            rcont5: z,
            k1_valid: false,
        }
    }

    /// Attempts one step of size `h` from `(t, y)` without committing it.
    ///
    /// Returns the 5th-order candidate state and the scaled RMS error norm
    /// of the embedded 4(5) difference; a norm of at most 1 means the step
    /// satisfies the tolerances. `k1` is reused across rejected retries at
    /// the same `(t, y)` (FSAL on accepted steps).
    pub fn try_step<F: Flow + ?Sized>(
        &mut self,
        flow: &F,
        t: f64,
        y: &DVector<f64>,
        h: f64,
        abs_tol: f64,
        rel_tol: f64,
    ) -> (DVector<f64>, f64) {
        if !self.k1_valid {
            self.k1 = flow.vf(t, y);
            self.k1_valid = true;
        }

        self.tmp = y + &self.k1 * (A21 * h);
        self.k2 = flow.vf(t + C2 * h, &self.tmp);

        self.tmp = y + &self.k1 * (A31 * h) + &self.k2 * (A32 * h);
        self.k3 = flow.vf(t + C3 * h, &self.tmp);

        self.tmp = y + &self.k1 * (A41 * h) + &self.k2 * (A42 * h) + &self.k3 * (A43 * h);
        self.k4 = flow.vf(t + C4 * h, &self.tmp);

        self.tmp = y
            + &self.k1 * (A51 * h)
            + &self.k2 * (A52 * h)
            + &self.k3 * (A53 * h)
            + &self.k4 * (A54 * h);
        self.k5 = flow.vf(t + C5 * h, &self.tmp);

        self.tmp = y
            + &self.k1 * (A61 * h)
            + &self.k2 * (A62 * h)
            + &self.k3 * (A63 * h)
            + &self.k4 * (A64 * h)
            + &self.k5 * (A65 * h);
        self.k6 = flow.vf(t + h, &self.tmp);

        let y_new = y
            + &self.k1 * (B1 * h)
            + &self.k3 * (B3 * h)
            + &self.k4 * (B4 * h)
            + &self.k5 * (B5 * h)
            + &self.k6 * (B6 * h);
        self.k7 = flow.vf(t + h, &y_new);

        let err_vec = &self.k1 * (E1 * h)
            + &self.k3 * (E3 * h)
            + &self.k4 * (E4 * h)
            + &self.k5 * (E5 * h)
            + &self.k6 * (E6 * h)
            + &self.k7 * (E7 * h);

        let n = y.len();
        let mut sum = 0.0;
        for i in 0..n {
            let scale = abs_tol + rel_tol * y[i].abs().max(y_new[i].abs());
            let ratio = err_vec[i] / scale;
            sum += ratio * ratio;
        }
        let err = (sum / n as f64).sqrt();

        (y_new, err)
    }

    /// Commits the last attempted step over `[t, t+h]`: builds dense-output
    /// coefficients from its stages and shifts the FSAL stage.
    pub fn accept(&mut self, y: &DVector<f64>, y_new: &DVector<f64>, h: f64) {
        let ydiff = y_new - y;
        let bspl = &self.k1 * h - &ydiff;

        self.rcont1 = y.clone();
        self.rcont3 = bspl.clone();
        self.rcont4 = &ydiff - &self.k7 * h - bspl;
        self.rcont2 = ydiff;
        self.rcont5 = (&self.k1 * D1
            + &self.k3 * D3
            + &self.k4 * D4
            + &self.k5 * D5
            + &self.k6 * D6
            + &self.k7 * D7)
            * h;

        // FSAL: the last stage of the accepted step is k1 of the next.
        std::mem::swap(&mut self.k1, &mut self.k7);
        self.k1_valid = true;
    }

    /// Evaluates the dense interpolant of the last accepted step at fraction
    /// `theta` in [0, 1] of the step interval.
    pub fn interpolate(&self, theta: f64) -> DVector<f64> {
        let theta1 = 1.0 - theta;
        &self.rcont1
            + (&self.rcont2
                + (&self.rcont3 + (&self.rcont4 + &self.rcont5 * theta1) * theta) * theta1)
                * theta
    }
}
