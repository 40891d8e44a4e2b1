use crate::solvers::{Dopri5, Rk4};
use crate::traits::Flow;
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, trace};

/// Integration scheme driving a trajectory.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum Method {
    /// Fixed-step classic Runge-Kutta with the given step size.
    Rk4 { dt: f64 },
    /// Adaptive Dormand-Prince 5(4) with dense output.
    Dopri5,
}

/// Solver configuration shared by every trajectory of a batch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SolverConfig {
    pub method: Method,
    /// Absolute error tolerance (adaptive methods).
    pub abs_tol: f64,
    /// Relative error tolerance (adaptive methods).
    pub rel_tol: f64,
    /// Upper bound on the adaptive step size.
    pub max_step: f64,
    /// Upper bound on accepted plus rejected steps per trajectory.
    pub max_steps: usize,
    /// Optional wall-clock budget per trajectory; checked once per step so
    /// runaway stiff solves terminate with [`IntegrationError::DeadlineExceeded`].
    pub deadline: Option<Duration>,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            method: Method::Dopri5,
            abs_tol: 1e-9,
            rel_tol: 1e-6,
            max_step: f64::INFINITY,
            max_steps: 100_000,
            deadline: None,
        }
    }
}

/// Why an integration call failed. The batch is fail-fast: the first
/// trajectory error aborts the whole call.
#[derive(Debug, Clone, Error)]
pub enum IntegrationError {
    #[error("initial state of trajectory {trajectory} has a non-finite component at index {component}")]
    InvalidInitialState { trajectory: usize, component: usize },

    #[error("state of trajectory {trajectory} became non-finite at t = {t}")]
    NonFiniteState { trajectory: usize, t: f64 },

    #[error("step size underflow in trajectory {trajectory} at t = {t}; system too stiff for the requested tolerances")]
    StepSizeUnderflow { trajectory: usize, t: f64 },

    #[error("trajectory {trajectory} exceeded {max_steps} steps at t = {t}")]
    MaxStepsExceeded {
        trajectory: usize,
        t: f64,
        max_steps: usize,
    },

    #[error("trajectory {trajectory} exceeded its deadline of {deadline:?} at t = {t}")]
    DeadlineExceeded {
        trajectory: usize,
        t: f64,
        deadline: Duration,
    },

    #[error("initial-condition matrix has {got} rows but the flow has dimension {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("invalid solver configuration: {reason}")]
    BadConfig { reason: String },
}

/// Full-trajectory output: a uniform time grid and, per initial condition,
/// a dim-by-`times.len()` matrix of states sampled on that grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrajectoryBatch {
    pub times: Vec<f64>,
    pub states: Vec<DMatrix<f64>>,
}

/// Integrates every column of `x0` forward by `duration` from `t0` and
/// returns the terminal states, shaped like `x0`.
///
/// Trajectories are independent and run as a parallel map over the columns;
/// the flow is shared read-only. `duration == 0` returns `x0` unchanged.
pub fn flow_endpoints<F>(
    flow: &F,
    x0: &DMatrix<f64>,
    duration: f64,
    t0: f64,
    config: &SolverConfig,
) -> Result<DMatrix<f64>, IntegrationError>
where
    F: Flow + Sync + ?Sized,
{
    validate(flow, x0, duration, config)?;
    debug!(
        label = flow.label(),
        trajectories = x0.ncols(),
        duration,
        "integrating batch to endpoints"
    );

    let t_end = t0 + duration;
    let columns = split_columns(x0);
    let finals: Vec<DVector<f64>> = columns
        .into_par_iter()
        .enumerate()
        .map(|(index, x)| integrate_one(flow, x, t0, t_end, config, None, index).map(|r| r.state))
        .collect::<Result<_, _>>()?;

    let mut out = DMatrix::zeros(x0.nrows(), x0.ncols());
    for (col, state) in finals.iter().enumerate() {
        out.set_column(col, state);
    }
    Ok(out)
}

/// Integrates every column of `x0` and samples each trajectory on the
/// uniform grid `t0, t0 + dt, …` with `floor(duration / dt) + 1` points,
/// where `dt` is the flow's output spacing. The last grid point falls short
/// of `t0 + duration` when the duration is not a multiple of `dt`.
pub fn flow_trajectories<F>(
    flow: &F,
    x0: &DMatrix<f64>,
    duration: f64,
    t0: f64,
    config: &SolverConfig,
) -> Result<TrajectoryBatch, IntegrationError>
where
    F: Flow + Sync + ?Sized,
{
    validate(flow, x0, duration, config)?;
    if !(flow.dt().is_finite() && flow.dt() > 0.0) {
        return Err(IntegrationError::BadConfig {
            reason: format!("flow output spacing dt must be positive, got {}", flow.dt()),
        });
    }

    let times = time_grid(t0, duration, flow.dt());
    debug!(
        label = flow.label(),
        trajectories = x0.ncols(),
        samples = times.len(),
        duration,
        "integrating batch to full trajectories"
    );

    let t_end = *times.last().expect("grid has at least one point");
    let columns = split_columns(x0);
    let states: Vec<DMatrix<f64>> = columns
        .into_par_iter()
        .enumerate()
        .map(|(index, x)| {
            integrate_one(flow, x, t0, t_end, config, Some(&times), index)
                .map(|r| r.samples.expect("samples requested"))
        })
        .collect::<Result<_, _>>()?;

    Ok(TrajectoryBatch { times, states })
}

/// Uniform grid `t0, t0 + dt, …` covering `[t0, t0 + duration]` with
/// `floor(duration / dt) + 1` points. A small relative slack absorbs
/// round-off when the duration is an exact multiple of `dt`.
pub fn time_grid(t0: f64, duration: f64, dt: f64) -> Vec<f64> {
    let ratio = duration / dt;
    let count = (ratio * (1.0 + 4.0 * f64::EPSILON)).floor() as usize + 1;
    (0..count).map(|i| t0 + i as f64 * dt).collect()
}

struct OneResult {
    state: DVector<f64>,
    samples: Option<DMatrix<f64>>,
}

fn validate<F: Flow + ?Sized>(
    flow: &F,
    x0: &DMatrix<f64>,
    duration: f64,
    config: &SolverConfig,
) -> Result<(), IntegrationError> {
    if x0.nrows() != flow.dimension() {
        return Err(IntegrationError::DimensionMismatch {
            expected: flow.dimension(),
            got: x0.nrows(),
        });
    }
    if !(duration.is_finite() && duration >= 0.0) {
        return Err(IntegrationError::BadConfig {
            reason: format!("duration must be finite and non-negative, got {duration}"),
        });
    }
    if !(config.abs_tol > 0.0) || !(config.rel_tol > 0.0) {
        return Err(IntegrationError::BadConfig {
            reason: format!(
                "tolerances must be positive, got abs_tol = {}, rel_tol = {}",
                config.abs_tol, config.rel_tol
            ),
        });
    }
    if !(config.max_step > 0.0) {
        return Err(IntegrationError::BadConfig {
            reason: format!("max_step must be positive, got {}", config.max_step),
        });
    }
    if config.max_steps == 0 {
        return Err(IntegrationError::BadConfig {
            reason: "max_steps must be at least 1".to_string(),
        });
    }
    if let Method::Rk4 { dt } = config.method {
        if !(dt.is_finite() && dt > 0.0) {
            return Err(IntegrationError::BadConfig {
                reason: format!("fixed step size must be positive, got {dt}"),
            });
        }
    }
    for (col, column) in x0.column_iter().enumerate() {
        for (row, value) in column.iter().enumerate() {
            if !value.is_finite() {
                return Err(IntegrationError::InvalidInitialState {
                    trajectory: col,
                    component: row,
                });
            }
        }
    }
    Ok(())
}

fn split_columns(x0: &DMatrix<f64>) -> Vec<DVector<f64>> {
    x0.column_iter().map(|c| c.into_owned()).collect()
}

/// Integrates a single trajectory from `t0` to `t_end`. When `sample_times`
/// is given, the state is recorded at each grid time (dense output for
/// Dopri5, exact landing for fixed-step RK4) and returned as a matrix with
/// one column per grid time.
fn integrate_one<F: Flow + ?Sized>(
    flow: &F,
    x0: DVector<f64>,
    t0: f64,
    t_end: f64,
    config: &SolverConfig,
    sample_times: Option<&[f64]>,
    trajectory: usize,
) -> Result<OneResult, IntegrationError> {
    let mut samples = sample_times.map(|times| DMatrix::zeros(x0.len(), times.len()));
    if let (Some(out), Some(times)) = (samples.as_mut(), sample_times) {
        if !times.is_empty() {
            out.set_column(0, &x0);
        }
    }

    if t_end <= t0 {
        // Zero-duration integration is the identity.
        return Ok(OneResult { state: x0, samples });
    }

    let started = Instant::now();
    let outcome = match config.method {
        Method::Rk4 { dt } => integrate_fixed(
            flow,
            x0,
            t0,
            t_end,
            dt,
            config,
            sample_times,
            samples.as_mut(),
            trajectory,
            started,
        ),
        Method::Dopri5 => integrate_adaptive(
            flow,
            x0,
            t0,
            t_end,
            config,
            sample_times,
            samples.as_mut(),
            trajectory,
            started,
        ),
    }?;

    Ok(OneResult {
        state: outcome,
        samples,
    })
}

fn check_budgets(
    config: &SolverConfig,
    started: Instant,
    steps: usize,
    t: f64,
    trajectory: usize,
) -> Result<(), IntegrationError> {
    if steps >= config.max_steps {
        return Err(IntegrationError::MaxStepsExceeded {
            trajectory,
            t,
            max_steps: config.max_steps,
        });
    }
    if let Some(deadline) = config.deadline {
        if started.elapsed() > deadline {
            return Err(IntegrationError::DeadlineExceeded {
                trajectory,
                t,
                deadline,
            });
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn integrate_fixed<F: Flow + ?Sized>(
    flow: &F,
    mut state: DVector<f64>,
    t0: f64,
    t_end: f64,
    dt: f64,
    config: &SolverConfig,
    sample_times: Option<&[f64]>,
    mut samples: Option<&mut DMatrix<f64>>,
    trajectory: usize,
    started: Instant,
) -> Result<DVector<f64>, IntegrationError> {
    let mut stepper = Rk4::new(state.len());
    let mut t = t0;
    let mut steps = 0usize;
    // Index of the next grid time still to be recorded (index 0 holds x0).
    let mut next_sample = 1usize;

    let eps = |t: f64| 4.0 * f64::EPSILON * t.abs().max(1.0);

    while t < t_end - eps(t_end) {
        check_budgets(config, started, steps, t, trajectory)?;

        // March with the configured step, but land exactly on the next
        // requested grid time and on the end of the span.
        let mut target = t_end;
        if let (Some(times), Some(_)) = (sample_times, samples.as_ref()) {
            if next_sample < times.len() {
                target = times[next_sample];
            }
        }
        let h = dt.min(target - t).min(t_end - t);
        stepper.step(flow, &mut t, &mut state, h);
        steps += 1;

        if state.iter().any(|v| !v.is_finite()) {
            return Err(IntegrationError::NonFiniteState { trajectory, t });
        }

        if let (Some(times), Some(out)) = (sample_times, samples.as_mut()) {
            if next_sample < times.len() && t >= times[next_sample] - eps(times[next_sample]) {
                out.set_column(next_sample, &state);
                next_sample += 1;
            }
        }
    }

    trace!(trajectory, steps, "fixed-step trajectory complete");
    Ok(state)
}

#[allow(clippy::too_many_arguments)]
fn integrate_adaptive<F: Flow + ?Sized>(
    flow: &F,
    mut state: DVector<f64>,
    t0: f64,
    t_end: f64,
    config: &SolverConfig,
    sample_times: Option<&[f64]>,
    mut samples: Option<&mut DMatrix<f64>>,
    trajectory: usize,
    started: Instant,
) -> Result<DVector<f64>, IntegrationError> {
    const SAFETY: f64 = 0.9;
    const MIN_FACTOR: f64 = 0.2;
    const MAX_FACTOR: f64 = 5.0;
    // Error exponent for a 4th-order error estimator.
    const EXPONENT: f64 = 0.2;

    let mut stepper = Dopri5::new(state.len());
    let mut t = t0;
    let mut steps = 0usize;
    let mut accepted = 0usize;
    let mut rejected = 0usize;
    let mut next_sample = 1usize;

    let span = t_end - t0;
    let mut h = (span / 100.0).min(config.max_step).min(span);

    let eps = |t: f64| 4.0 * f64::EPSILON * t.abs().max(1.0);

    while t < t_end - eps(t_end) {
        check_budgets(config, started, steps, t, trajectory)?;

        h = h.min(config.max_step).min(t_end - t);
        if h < eps(t) {
            return Err(IntegrationError::StepSizeUnderflow { trajectory, t });
        }

        let (y_new, err) = stepper.try_step(flow, t, &state, h, config.abs_tol, config.rel_tol);
        steps += 1;

        if !err.is_finite() {
            // The right-hand side blew up inside the step; retry smaller
            // until the step-size floor reports stiffness.
            rejected += 1;
            h *= 0.1;
            continue;
        }

        if err <= 1.0 {
            stepper.accept(&state, &y_new, h);

            if let (Some(times), Some(out)) = (sample_times, samples.as_mut()) {
                while next_sample < times.len()
                    && times[next_sample] <= t + h + eps(times[next_sample])
                {
                    let theta = ((times[next_sample] - t) / h).clamp(0.0, 1.0);
                    out.set_column(next_sample, &stepper.interpolate(theta));
                    next_sample += 1;
                }
            }

            t += h;
            state = y_new;
            accepted += 1;

            if state.iter().any(|v| !v.is_finite()) {
                return Err(IntegrationError::NonFiniteState { trajectory, t });
            }

            let factor = if err == 0.0 {
                MAX_FACTOR
            } else {
                (SAFETY * err.powf(-EXPONENT)).clamp(MIN_FACTOR, MAX_FACTOR)
            };
            h *= factor;
        } else {
            rejected += 1;
            h *= (SAFETY * err.powf(-EXPONENT)).clamp(MIN_FACTOR, 1.0);
        }
    }

    trace!(
        trajectory,
        accepted,
        rejected,
        "adaptive trajectory complete"
    );
    Ok(state)
}
