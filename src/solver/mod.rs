//! Optimization methods driven by [`TaoContext`](crate::context::TaoContext).
//!
//! A method owns its work vectors and advances the solution held by a [`TaoCore`] by one
//! iteration per [`SolverMethod::step`]. The control loop around it evaluates the starting
//! point, runs the monitor after every step and stops on the first terminal reason.

use crate::context::TaoCore;
use crate::error::GtError;
use crate::utils::convergence::{SolverState, TerminationReason};

/// Broad family a method belongs to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MethodKind {
    LineSearch,
    TrustRegion,
    QuasiNewton,
}

/// Values a step reports to the monitor.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Iterate {
    pub objective: f64,
    pub residual: f64,
    pub cnorm: f64,
    /// Step length, or trust-region radius for trust-region methods.
    pub step: f64,
}

/// Convergence predicate installed on a solver.
pub type ConvergenceTest = Box<dyn FnMut(&SolverState) -> TerminationReason>;

pub trait SolverMethod {
    fn name(&self) -> &'static str;
    fn kind(&self) -> MethodKind;

    /// Allocate work space for the problem held by `core`.
    fn set_up(&mut self, core: &mut TaoCore) -> Result<(), GtError>;

    /// Advance `core`'s solution by one iteration.
    fn step(&mut self, core: &mut TaoCore) -> Result<Iterate, GtError>;

    /// Decide whether to stop after the current iteration.
    fn compute_convergence(
        &mut self,
        state: &SolverState,
        test: &mut ConvergenceTest,
    ) -> TerminationReason {
        test(state)
    }

    /// Release work space. The method may be set up again afterwards.
    fn destroy(&mut self) {}
}

pub mod gradient_descent;
pub mod line_search;
pub mod newton_ls;

pub use gradient_descent::GradientDescent;
pub use line_search::{ArmijoLineSearch, LineSearchOutcome};
pub use newton_ls::NewtonLineSearch;
