/// The `streamline_core` crate is the computational engine for Streamline:
/// defining continuous-time dynamical systems (flows) and integrating
/// batches of trajectories through them.
///
/// Key components:
/// - **Traits**: `Flow` (vector field + exact Jacobian + domain/dt), with
///   batched evaluation over column-major point sets.
/// - **Solvers**: fixed-step RK4 and adaptive Dormand-Prince 5(4) with
///   dense output.
/// - **Integrate**: `flow_endpoints` / `flow_trajectories` drive a solver
///   over an initial-condition batch in parallel, with typed failures.
/// - **Hamiltonian**: `StreamFunction` and the `Hamiltonian2d` adapter
///   deriving velocity, Jacobian, and vorticity from a 2D stream function.
/// - **Check**: central finite-difference verification of analytic
///   derivatives.
/// - **Domain**: rectangular bounds plus grid/uniform/Gaussian-mixture and
///   polygon sampling of initial conditions.
/// - **Systems**: ABC flow, double gyre, Duffing, harmonic oscillator.
pub mod traits;

pub mod check;
pub mod domain;
pub mod hamiltonian;
pub mod integrate;
pub mod solvers;
pub mod systems;

pub use check::{check_jacobian, check_psi, DEFAULT_DELTA};
pub use domain::{Domain, Polygon};
pub use hamiltonian::{Hamiltonian2d, PsiOrder, StreamFunction};
pub use integrate::{
    flow_endpoints, flow_trajectories, IntegrationError, Method, SolverConfig, TrajectoryBatch,
};
pub use traits::Flow;
