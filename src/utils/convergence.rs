//! Convergence tracking & tolerance checks for the solver control loop.
//!
//! [`SolverState`] is the per-solve record the monitor updates every iteration;
//! [`default_convergence_test`] turns it into a [`TerminationReason`].

use std::fmt;

use tracing::info;

/// Stopping criteria.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Tolerances {
    /// Absolute bound on the squared residual norm.
    pub fatol: f64,
    /// Bound on the squared residual norm relative to the objective.
    pub frtol: f64,
    /// Absolute bound on the residual norm.
    pub gatol: f64,
    /// Bound on the residual norm relative to the objective.
    pub grtol: f64,
    /// Bound on the residual norm relative to its value at iteration 0.
    pub gttol: f64,
    pub catol: f64,
    pub crtol: f64,
    /// Objective value below which the solve is considered finished.
    pub fmin: f64,
    /// Smallest admissible step length or trust-region radius.
    pub steptol: f64,
    pub max_its: usize,
    pub max_funcs: usize,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            fatol: 1e-8,
            frtol: 1e-8,
            gatol: 1e-8,
            grtol: 1e-8,
            gttol: 0.0,
            catol: 0.0,
            crtol: 0.0,
            fmin: -1e100,
            steptol: 0.0,
            max_its: 10_000,
            max_funcs: 10_000,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConvergedReason {
    AbsoluteTolerance,
    RelativeTolerance,
    StepTooSmall,
    MinimumFunctionValue,
    User,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DivergedReason {
    MaxIterations,
    NumericalFault,
    MaxFunctionEvaluations,
    LineSearchFailure,
    TrustRegionReduction,
    User,
}

/// Outcome of a convergence test.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TerminationReason {
    #[default]
    Continue,
    Converged(ConvergedReason),
    Diverged(DivergedReason),
}

impl TerminationReason {
    /// Integer code: positive when converged, negative when diverged, zero otherwise.
    pub fn code(self) -> i32 {
        use ConvergedReason as C;
        use DivergedReason as D;
        match self {
            TerminationReason::Continue => 0,
            TerminationReason::Converged(c) => match c {
                C::AbsoluteTolerance => 2,
                C::RelativeTolerance => 3,
                C::StepTooSmall => 4,
                C::MinimumFunctionValue => 5,
                C::User => 6,
            },
            TerminationReason::Diverged(d) => match d {
                D::MaxIterations => -2,
                D::NumericalFault => -4,
                D::MaxFunctionEvaluations => -5,
                D::LineSearchFailure => -6,
                D::TrustRegionReduction => -7,
                D::User => -8,
            },
        }
    }

    pub fn is_converged(self) -> bool {
        matches!(self, TerminationReason::Converged(_))
    }

    pub fn is_diverged(self) -> bool {
        matches!(self, TerminationReason::Diverged(_))
    }

    pub fn is_terminal(self) -> bool {
        self != TerminationReason::Continue
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ConvergedReason as C;
        use DivergedReason as D;
        let name = match self {
            TerminationReason::Continue => "CONTINUE_ITERATING",
            TerminationReason::Converged(C::AbsoluteTolerance) => "CONVERGED_ATOL",
            TerminationReason::Converged(C::RelativeTolerance) => "CONVERGED_RTOL",
            TerminationReason::Converged(C::StepTooSmall) => "CONVERGED_TRTOL",
            TerminationReason::Converged(C::MinimumFunctionValue) => "CONVERGED_MINF",
            TerminationReason::Converged(C::User) => "CONVERGED_USER",
            TerminationReason::Diverged(D::MaxIterations) => "DIVERGED_MAXITS",
            TerminationReason::Diverged(D::NumericalFault) => "DIVERGED_NAN",
            TerminationReason::Diverged(D::MaxFunctionEvaluations) => "DIVERGED_MAXFCN",
            TerminationReason::Diverged(D::LineSearchFailure) => "DIVERGED_LS_FAILURE",
            TerminationReason::Diverged(D::TrustRegionReduction) => "DIVERGED_TR_REDUCTION",
            TerminationReason::Diverged(D::User) => "DIVERGED_USER",
        };
        f.write_str(name)
    }
}

/// Everything the convergence test and the monitors see.
#[derive(Clone, Debug, Default)]
pub struct SolverState {
    pub iteration: usize,
    pub objective: f64,
    pub residual: f64,
    pub cnorm: f64,
    pub step: f64,
    /// Residual norm recorded at iteration 0.
    pub gnorm0: f64,
    /// Constraint norm recorded at iteration 0.
    pub cnorm0: f64,
    pub nfuncs: usize,
    pub ngrads: usize,
    pub nfuncgrads: usize,
    pub nhess: usize,
    pub nconstraints: usize,
    pub njac: usize,
    pub line_search_failed: bool,
    pub reason: TerminationReason,
    pub tolerances: Tolerances,
}

impl SolverState {
    /// Objective evaluations, counting combined objective/gradient calls.
    pub fn function_evaluations(&self) -> usize {
        self.nfuncs + self.nfuncgrads
    }

    /// Zero the counters and per-iteration values; tolerances are kept.
    pub fn reset_statistics(&mut self) {
        *self = SolverState { tolerances: self.tolerances, ..SolverState::default() };
    }
}

/// What a new solve does to recorded history.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HistoryReset {
    #[default]
    Reset,
    Continue,
}

/// Bounded per-iteration record of objective, residual and constraint norms.
///
/// Once `capacity` entries are stored further iterations are not recorded; existing
/// entries are never overwritten.
#[derive(Clone, Debug)]
pub struct History {
    objective: Vec<f64>,
    residual: Vec<f64>,
    cnorm: Vec<f64>,
    capacity: usize,
    reset: HistoryReset,
}

impl History {
    pub fn new(capacity: usize, reset: HistoryReset) -> Self {
        Self {
            objective: Vec::with_capacity(capacity),
            residual: Vec::with_capacity(capacity),
            cnorm: Vec::with_capacity(capacity),
            capacity,
            reset,
        }
    }

    /// Append one iteration; returns `false` once the buffers are full.
    pub fn record(&mut self, objective: f64, residual: f64, cnorm: f64) -> bool {
        if self.objective.len() >= self.capacity {
            return false;
        }
        self.objective.push(objective);
        self.residual.push(residual);
        self.cnorm.push(cnorm);
        true
    }

    pub fn len(&self) -> usize {
        self.objective.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objective.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn reset_policy(&self) -> HistoryReset {
        self.reset
    }

    pub fn objective(&self) -> &[f64] {
        &self.objective
    }

    pub fn residual(&self) -> &[f64] {
        &self.residual
    }

    pub fn cnorm(&self) -> &[f64] {
        &self.cnorm
    }

    pub fn clear(&mut self) {
        self.objective.clear();
        self.residual.clear();
        self.cnorm.clear();
    }

    pub(crate) fn start_solve(&mut self) {
        if self.reset == HistoryReset::Reset {
            self.clear();
        }
    }
}

/// Standard stopping test. The first rule that matches decides.
pub fn default_convergence_test(state: &SolverState) -> TerminationReason {
    use ConvergedReason as C;
    use DivergedReason as D;
    use TerminationReason::{Continue, Converged, Diverged};

    let t = &state.tolerances;
    let f = state.objective;
    let gnorm = state.residual;
    let gnorm2 = gnorm * gnorm;
    let cnorm = state.cnorm;

    if !f.is_finite() {
        info!("failed to converge, function value is Inf or NaN");
        Diverged(D::NumericalFault)
    } else if f <= t.fmin && cnorm <= t.catol {
        info!("converged due to function value {f:e} < minimum function value {:e}", t.fmin);
        Converged(C::MinimumFunctionValue)
    } else if gnorm2 <= t.fatol && cnorm <= t.catol {
        info!("converged due to residual norm {gnorm2:e} < {:e}", t.fatol);
        Converged(C::AbsoluteTolerance)
    } else if gnorm2 / (f + 1.0e-10).abs() <= t.frtol && cnorm / state.cnorm0.max(1.0) <= t.crtol {
        info!(
            "converged due to relative residual norm {:e} < {:e}",
            gnorm2 / (f + 1.0e-10).abs(),
            t.frtol
        );
        Converged(C::RelativeTolerance)
    } else if gnorm <= t.gatol && cnorm <= t.catol {
        info!("converged due to residual norm {gnorm:e} < {:e}", t.gatol);
        Converged(C::AbsoluteTolerance)
    } else if f != 0.0 && (gnorm / f).abs() <= t.grtol && cnorm <= t.crtol {
        info!("converged due to residual norm {gnorm:e} < |{f:e}| {:e}", t.grtol);
        Converged(C::AbsoluteTolerance)
    } else if gnorm / state.gnorm0 <= t.gttol && cnorm <= t.crtol {
        info!("converged due to relative residual norm {:e} < {:e}", gnorm / state.gnorm0, t.gttol);
        Converged(C::RelativeTolerance)
    } else if state.function_evaluations() > t.max_funcs {
        info!(
            "exceeded maximum number of function evaluations: {} > {}",
            state.function_evaluations(),
            t.max_funcs
        );
        Diverged(D::MaxFunctionEvaluations)
    } else if state.line_search_failed {
        info!("line search failure");
        Diverged(D::LineSearchFailure)
    } else if state.step < t.steptol && state.iteration > 0 {
        info!("trust region/step size too small: {:e} < {:e}", state.step, t.steptol);
        Converged(C::StepTooSmall)
    } else if state.iteration > t.max_its {
        info!("exceeded maximum number of iterations: {} > {}", state.iteration, t.max_its);
        Diverged(D::MaxIterations)
    } else {
        Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // a state that trips none of the default rules
    fn idle() -> SolverState {
        let mut s = SolverState {
            objective: 1.0,
            residual: 1.0,
            gnorm0: 1.0,
            step: 1.0,
            ..Default::default()
        };
        s.tolerances.fatol = 0.0;
        s.tolerances.frtol = 0.0;
        s.tolerances.gatol = 0.0;
        s.tolerances.grtol = 0.0;
        s
    }

    #[test]
    fn idle_state_continues() {
        assert_eq!(default_convergence_test(&idle()), TerminationReason::Continue);
    }

    #[test]
    fn nan_objective_wins_over_everything() {
        let mut s = idle();
        s.objective = f64::NAN;
        s.residual = 0.0;
        s.iteration = 0;
        s.line_search_failed = true;
        assert_eq!(
            default_convergence_test(&s),
            TerminationReason::Diverged(DivergedReason::NumericalFault)
        );
    }

    #[test]
    fn squared_residual_against_fatol() {
        let mut s = idle();
        s.tolerances.fatol = 1e-8;
        s.residual = 1e-5;
        assert_eq!(
            default_convergence_test(&s),
            TerminationReason::Converged(ConvergedReason::AbsoluteTolerance)
        );
    }

    #[test]
    fn iteration_cap() {
        let mut s = idle();
        s.tolerances.max_its = 10;
        s.iteration = 11;
        assert_eq!(
            default_convergence_test(&s),
            TerminationReason::Diverged(DivergedReason::MaxIterations)
        );
        s.iteration = 10;
        assert_eq!(default_convergence_test(&s), TerminationReason::Continue);
    }

    #[test]
    fn minimum_function_value_precedes_tolerances() {
        let mut s = idle();
        s.tolerances.fmin = 2.0;
        s.tolerances.fatol = 10.0;
        assert_eq!(
            default_convergence_test(&s),
            TerminationReason::Converged(ConvergedReason::MinimumFunctionValue)
        );
    }

    #[test]
    fn relative_rules_use_initial_norms() {
        let mut s = idle();
        s.tolerances.gttol = 1e-3;
        s.gnorm0 = 1e4;
        s.residual = 5.0;
        s.objective = 1e9;
        assert_eq!(
            default_convergence_test(&s),
            TerminationReason::Converged(ConvergedReason::RelativeTolerance)
        );
        // constraint violation blocks it
        s.cnorm = 1.0;
        assert_eq!(default_convergence_test(&s), TerminationReason::Continue);
    }

    #[test]
    fn evaluation_budget_then_line_search_then_step() {
        let mut s = idle();
        s.tolerances.max_funcs = 3;
        s.nfuncs = 2;
        s.nfuncgrads = 2;
        s.line_search_failed = true;
        assert_eq!(s.reason, TerminationReason::Continue);
        assert_eq!(
            default_convergence_test(&s),
            TerminationReason::Diverged(DivergedReason::MaxFunctionEvaluations)
        );
        s.nfuncgrads = 0;
        assert_eq!(
            default_convergence_test(&s),
            TerminationReason::Diverged(DivergedReason::LineSearchFailure)
        );
        s.line_search_failed = false;
        s.tolerances.steptol = 2.0;
        assert_eq!(default_convergence_test(&s), TerminationReason::Continue);
        s.iteration = 1;
        assert_eq!(
            default_convergence_test(&s),
            TerminationReason::Converged(ConvergedReason::StepTooSmall)
        );
    }

    #[test]
    fn codes_and_names() {
        let r = TerminationReason::Diverged(DivergedReason::LineSearchFailure);
        assert_eq!(r.code(), -6);
        assert!(r.is_diverged() && !r.is_converged());
        assert_eq!(r.to_string(), "DIVERGED_LS_FAILURE");
        assert_eq!(TerminationReason::Continue.code(), 0);
        assert_eq!(TerminationReason::Converged(ConvergedReason::StepTooSmall).code(), 4);
    }

    #[test]
    fn history_stops_at_capacity() {
        let mut h = History::new(5, HistoryReset::Continue);
        for i in 0..8 {
            h.record(i as f64, 0.0, 0.0);
        }
        assert_eq!(h.len(), 5);
        assert_eq!(h.objective(), &[0.0, 1.0, 2.0, 3.0, 4.0]);
        h.start_solve();
        assert_eq!(h.len(), 5);
        let mut r = History::new(5, HistoryReset::Reset);
        r.record(1.0, 1.0, 1.0);
        r.start_solve();
        assert!(r.is_empty());
    }

    #[test]
    fn reset_keeps_tolerances() {
        let mut s = idle();
        s.tolerances.max_its = 7;
        s.nfuncs = 4;
        s.reason = TerminationReason::Converged(ConvergedReason::User);
        s.reset_statistics();
        assert_eq!(s.nfuncs, 0);
        assert_eq!(s.reason, TerminationReason::Continue);
        assert_eq!(s.tolerances.max_its, 7);
    }
}
