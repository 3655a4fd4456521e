//! Solver control loop.
//!
//! [`TaoContext`] owns the problem description (a [`TaoCore`]), the selected
//! [`SolverMethod`], the convergence test, the monitors and the optional history. A solve
//! moves through the stages of [`SolverStage`]:
//!
//! ```text
//! Created -> SolutionSet -> SetUp -> Iterating -> Converged | Diverged
//! ```
//!
//! Iteration 0 evaluates the starting point; every later iteration is one
//! [`SolverMethod::step`]. Each iteration ends in [`TaoContext::monitor`], and the loop
//! stops on the first reason other than `Continue`.

use std::sync::Arc;

use faer::Mat;
use tracing::{debug, info, warn};

use super::registry::MethodRegistry;
use crate::config::OptionsDb;
use crate::core::traits::InnerProduct;
use crate::core::wrappers::DistributedInnerProduct;
use crate::error::GtError;
use crate::parallel::Comm;
use crate::solver::{ConvergenceTest, GradientDescent, MethodKind, SolverMethod};
use crate::utils::convergence::{
    default_convergence_test, DivergedReason, History, HistoryReset, SolverState,
    TerminationReason, Tolerances,
};
use crate::utils::monitor::{constraint_monitor, default_monitor, short_monitor};

pub type ObjectiveFn = Box<dyn FnMut(&[f64]) -> Result<f64, GtError>>;
pub type GradientFn = Box<dyn FnMut(&[f64], &mut [f64]) -> Result<(), GtError>>;
pub type ObjectiveGradientFn = Box<dyn FnMut(&[f64], &mut [f64]) -> Result<f64, GtError>>;
/// Fills a dense matrix (Hessian or constraint Jacobian) at a point.
pub type MatrixFn = Box<dyn FnMut(&[f64], &mut Mat<f64>) -> Result<(), GtError>>;
pub type ConstraintsFn = Box<dyn FnMut(&[f64], &mut [f64]) -> Result<(), GtError>>;

const DEFAULT_MAX_MONITORS: usize = 10;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SolverStage {
    Created,
    SolutionSet,
    SetUp,
    Iterating,
    Converged,
    Diverged,
}

/// Tolerances to change in [`TaoContext::set_tolerances`]; `None` leaves a value as is.
#[derive(Clone, Copy, Debug, Default)]
pub struct ToleranceUpdate {
    pub fatol: Option<f64>,
    pub frtol: Option<f64>,
    pub gatol: Option<f64>,
    pub grtol: Option<f64>,
    pub gttol: Option<f64>,
    pub catol: Option<f64>,
    pub crtol: Option<f64>,
}

/// Problem data and counters that methods work on.
pub struct TaoCore {
    n: usize,
    solution: Option<Vec<f64>>,
    gradient: Vec<f64>,
    objective: f64,
    objective_fn: Option<ObjectiveFn>,
    gradient_fn: Option<GradientFn>,
    objective_gradient_fn: Option<ObjectiveGradientFn>,
    hessian_fn: Option<MatrixFn>,
    constraints_fn: Option<ConstraintsFn>,
    constraint_values: Vec<f64>,
    jacobian_fn: Option<MatrixFn>,
    scratch: Vec<f64>,
    comm: Option<Arc<dyn Comm>>,
    state: SolverState,
}

impl TaoCore {
    fn new() -> Self {
        Self {
            n: 0,
            solution: None,
            gradient: Vec::new(),
            objective: 0.0,
            objective_fn: None,
            gradient_fn: None,
            objective_gradient_fn: None,
            hessian_fn: None,
            constraints_fn: None,
            constraint_values: Vec::new(),
            jacobian_fn: None,
            scratch: Vec::new(),
            comm: None,
            state: SolverState::default(),
        }
    }

    /// Local length of the solution vector.
    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    pub fn solution(&self) -> &[f64] {
        self.solution.as_deref().unwrap_or(&[])
    }

    /// Gradient at the current solution.
    pub fn gradient(&self) -> &[f64] {
        &self.gradient
    }

    /// Objective at the current solution.
    pub fn objective(&self) -> f64 {
        self.objective
    }

    pub fn state(&self) -> &SolverState {
        &self.state
    }

    pub fn has_objective(&self) -> bool {
        self.objective_fn.is_some() || self.objective_gradient_fn.is_some()
    }

    pub fn has_hessian(&self) -> bool {
        self.hessian_fn.is_some()
    }

    pub fn set_line_search_failed(&mut self, failed: bool) {
        self.state.line_search_failed = failed;
    }

    /// Make `x` the current solution with objective `f` and gradient `g`.
    pub fn accept(&mut self, x: &[f64], f: f64, g: &[f64]) {
        if let Some(sol) = self.solution.as_mut() {
            sol.copy_from_slice(x);
        }
        self.gradient.copy_from_slice(g);
        self.objective = f;
    }

    pub fn compute_objective(&mut self, x: &[f64]) -> Result<f64, GtError> {
        GtError::check_len("point", self.n, x.len())?;
        if let Some(f) = self.objective_fn.as_mut() {
            self.state.nfuncs += 1;
            return f(x);
        }
        if let Some(fg) = self.objective_gradient_fn.as_mut() {
            self.scratch.resize(self.n, 0.0);
            self.state.nfuncgrads += 1;
            return fg(x, &mut self.scratch);
        }
        Err(GtError::MissingObjective)
    }

    pub fn compute_gradient(&mut self, x: &[f64], g: &mut [f64]) -> Result<(), GtError> {
        GtError::check_len("point", self.n, x.len())?;
        GtError::check_len("gradient", self.n, g.len())?;
        if let Some(grad) = self.gradient_fn.as_mut() {
            self.state.ngrads += 1;
            return grad(x, g);
        }
        if let Some(fg) = self.objective_gradient_fn.as_mut() {
            self.state.nfuncgrads += 1;
            return fg(x, g).map(|_| ());
        }
        Err(GtError::Unsupported("no gradient routine set"))
    }

    pub fn compute_objective_and_gradient(
        &mut self,
        x: &[f64],
        g: &mut [f64],
    ) -> Result<f64, GtError> {
        GtError::check_len("point", self.n, x.len())?;
        GtError::check_len("gradient", self.n, g.len())?;
        if let Some(fg) = self.objective_gradient_fn.as_mut() {
            self.state.nfuncgrads += 1;
            return fg(x, g);
        }
        match (self.objective_fn.as_mut(), self.gradient_fn.as_mut()) {
            (Some(f), Some(grad)) => {
                self.state.nfuncs += 1;
                self.state.ngrads += 1;
                let value = f(x)?;
                grad(x, g)?;
                Ok(value)
            }
            (None, _) => Err(GtError::MissingObjective),
            (Some(_), None) => Err(GtError::Unsupported("no gradient routine set")),
        }
    }

    pub fn compute_hessian(&mut self, x: &[f64], h: &mut Mat<f64>) -> Result<(), GtError> {
        GtError::check_len("point", self.n, x.len())?;
        let hess = self
            .hessian_fn
            .as_mut()
            .ok_or(GtError::Unsupported("no Hessian routine set"))?;
        self.state.nhess += 1;
        hess(x, h)
    }

    pub fn compute_constraints(&mut self, x: &[f64], c: &mut [f64]) -> Result<(), GtError> {
        GtError::check_len("point", self.n, x.len())?;
        GtError::check_len("constraint vector", self.constraint_values.len(), c.len())?;
        let cons = self
            .constraints_fn
            .as_mut()
            .ok_or(GtError::Unsupported("no constraint routine set"))?;
        self.state.nconstraints += 1;
        cons(x, c)
    }

    pub fn compute_jacobian(&mut self, x: &[f64], j: &mut Mat<f64>) -> Result<(), GtError> {
        GtError::check_len("point", self.n, x.len())?;
        let jac = self
            .jacobian_fn
            .as_mut()
            .ok_or(GtError::Unsupported("no Jacobian routine set"))?;
        self.state.njac += 1;
        jac(x, j)
    }

    /// 2-norm of the constraints at the current solution; zero without constraints.
    pub fn constraint_norm(&mut self) -> Result<f64, GtError> {
        let Some(cons) = self.constraints_fn.as_mut() else {
            return Ok(0.0);
        };
        let x = self.solution.as_deref().unwrap_or(&[]);
        self.state.nconstraints += 1;
        cons(x, &mut self.constraint_values)?;
        self.norm(&self.constraint_values)
    }

    /// Inner product, summed over all ranks when a communicator is attached.
    pub fn dot(&self, a: &[f64], b: &[f64]) -> Result<f64, GtError> {
        GtError::check_len("dot operand", a.len(), b.len())?;
        match &self.comm {
            Some(comm) => DistributedInnerProduct::new(comm.as_ref()).dot(a, b),
            None => Ok(().dot(a, b)),
        }
    }

    pub fn norm(&self, v: &[f64]) -> Result<f64, GtError> {
        match &self.comm {
            Some(comm) => DistributedInnerProduct::new(comm.as_ref()).norm(v),
            None => Ok(().norm(v)),
        }
    }

    // Objective and gradient at the current solution.
    fn evaluate_start(&mut self) -> Result<f64, GtError> {
        let x = self.solution.take().ok_or(GtError::MissingInitialVector)?;
        let mut g = std::mem::take(&mut self.gradient);
        let result = self.compute_objective_and_gradient(&x, &mut g);
        self.solution = Some(x);
        self.gradient = g;
        self.objective = result?;
        Ok(self.objective)
    }
}

/// Optimization solver: problem callbacks, method, tolerances, monitors and history.
///
/// ```
/// use gridtao::TaoContext;
///
/// let mut tao = TaoContext::new();
/// tao.set_initial_vector(vec![3.0, -4.0]);
/// tao.set_objective_and_gradient(|x, g| {
///     g.copy_from_slice(x);
///     Ok(0.5 * x.iter().map(|v| v * v).sum::<f64>())
/// });
/// let reason = tao.solve().unwrap();
/// assert!(reason.is_converged());
/// assert!(tao.solution().iter().all(|v| v.abs() < 1e-6));
/// ```
pub struct TaoContext {
    core: TaoCore,
    method: Option<Box<dyn SolverMethod>>,
    stage: SolverStage,
    set_up_done: bool,
    convergence_test: ConvergenceTest,
    monitors: Vec<crate::utils::monitor::Monitor>,
    max_monitors: usize,
    history: Option<History>,
    prefix: Option<String>,
    view_after_solve: bool,
}

impl Default for TaoContext {
    fn default() -> Self {
        Self::new()
    }
}

impl TaoContext {
    /// A solver using steepest descent until another method is selected.
    pub fn new() -> Self {
        Self {
            core: TaoCore::new(),
            method: Some(Box::new(GradientDescent::new())),
            stage: SolverStage::Created,
            set_up_done: false,
            convergence_test: Box::new(default_convergence_test),
            monitors: Vec::new(),
            max_monitors: DEFAULT_MAX_MONITORS,
            history: None,
            prefix: None,
            view_after_solve: false,
        }
    }

    pub fn stage(&self) -> SolverStage {
        self.stage
    }

    pub fn core(&self) -> &TaoCore {
        &self.core
    }

    pub fn state(&self) -> &SolverState {
        &self.core.state
    }

    pub fn solution(&self) -> &[f64] {
        self.core.solution()
    }

    pub fn method_name(&self) -> Option<&'static str> {
        self.method.as_ref().map(|m| m.name())
    }

    pub fn method_kind(&self) -> Option<MethodKind> {
        self.method.as_ref().map(|m| m.kind())
    }

    /// Attach the communicator over which the solution vector is distributed; norms and
    /// inner products are then summed over all of its ranks.
    pub fn set_comm(&mut self, comm: Arc<dyn Comm>) {
        self.core.comm = Some(comm);
    }

    /// Prefix for option lookups, without the leading dash (e.g. `"sys1_"`).
    pub fn set_options_prefix(&mut self, prefix: &str) {
        self.prefix = Some(prefix.to_string());
    }

    /// Replace the method by the one registered as `name`. The old method is destroyed
    /// and the solver must be set up again.
    pub fn set_type(&mut self, registry: &MethodRegistry, name: &str) -> Result<(), GtError> {
        let method = registry.create(name)?;
        self.set_method(method);
        Ok(())
    }

    pub fn set_method(&mut self, method: Box<dyn SolverMethod>) {
        if let Some(mut old) = self.method.replace(method) {
            old.destroy();
        }
        self.invalidate_set_up();
    }

    fn invalidate_set_up(&mut self) {
        self.set_up_done = false;
        if self.stage != SolverStage::Created {
            self.stage = SolverStage::SolutionSet;
        }
    }

    /// Starting point of the next solve; it is updated in place by the solve.
    pub fn set_initial_vector(&mut self, x: Vec<f64>) {
        if x.len() != self.core.n {
            self.set_up_done = false;
        }
        self.core.n = x.len();
        self.core.gradient = vec![0.0; x.len()];
        self.core.solution = Some(x);
        self.stage = if self.set_up_done { SolverStage::SetUp } else { SolverStage::SolutionSet };
    }

    pub fn set_objective<F>(&mut self, f: F)
    where
        F: FnMut(&[f64]) -> Result<f64, GtError> + 'static,
    {
        self.core.objective_fn = Some(Box::new(f));
    }

    pub fn set_gradient<F>(&mut self, f: F)
    where
        F: FnMut(&[f64], &mut [f64]) -> Result<(), GtError> + 'static,
    {
        self.core.gradient_fn = Some(Box::new(f));
    }

    /// Routine returning the objective and writing the gradient in one pass. Preferred
    /// over separate routines when both are set.
    pub fn set_objective_and_gradient<F>(&mut self, f: F)
    where
        F: FnMut(&[f64], &mut [f64]) -> Result<f64, GtError> + 'static,
    {
        self.core.objective_gradient_fn = Some(Box::new(f));
    }

    pub fn set_hessian<F>(&mut self, f: F)
    where
        F: FnMut(&[f64], &mut Mat<f64>) -> Result<(), GtError> + 'static,
    {
        self.core.hessian_fn = Some(Box::new(f));
        self.invalidate_set_up();
    }

    /// `m` constraint functions; their 2-norm is reported as the constraint norm.
    pub fn set_constraints<F>(&mut self, m: usize, f: F)
    where
        F: FnMut(&[f64], &mut [f64]) -> Result<(), GtError> + 'static,
    {
        self.core.constraints_fn = Some(Box::new(f));
        self.core.constraint_values = vec![0.0; m];
    }

    pub fn set_jacobian<F>(&mut self, f: F)
    where
        F: FnMut(&[f64], &mut Mat<f64>) -> Result<(), GtError> + 'static,
    {
        self.core.jacobian_fn = Some(Box::new(f));
    }

    /// Change any subset of the tolerances. Negative values are ignored with a warning.
    pub fn set_tolerances(&mut self, update: ToleranceUpdate) {
        let t = &mut self.core.state.tolerances;
        let fields = [
            ("fatol", update.fatol, &mut t.fatol),
            ("frtol", update.frtol, &mut t.frtol),
            ("gatol", update.gatol, &mut t.gatol),
            ("grtol", update.grtol, &mut t.grtol),
            ("gttol", update.gttol, &mut t.gttol),
            ("catol", update.catol, &mut t.catol),
            ("crtol", update.crtol, &mut t.crtol),
        ];
        for (name, value, slot) in fields {
            match value {
                Some(v) if v < 0.0 => warn!(tolerance = name, value = v, "ignoring negative tolerance"),
                Some(v) => *slot = v,
                None => {}
            }
        }
    }

    pub fn tolerances(&self) -> Tolerances {
        self.core.state.tolerances
    }

    pub fn set_fmin(&mut self, fmin: f64) {
        self.core.state.tolerances.fmin = fmin;
    }

    pub fn set_steptol(&mut self, steptol: f64) {
        if steptol < 0.0 {
            warn!(value = steptol, "ignoring negative step tolerance");
        } else {
            self.core.state.tolerances.steptol = steptol;
        }
    }

    pub fn set_max_iterations(&mut self, max_its: usize) {
        self.core.state.tolerances.max_its = max_its;
    }

    pub fn set_max_function_evaluations(&mut self, max_funcs: usize) {
        self.core.state.tolerances.max_funcs = max_funcs;
    }

    /// Append an observer, run after the convergence test of every iteration.
    pub fn set_monitor<F>(&mut self, monitor: F) -> Result<(), GtError>
    where
        F: FnMut(&SolverState) -> Result<(), GtError> + 'static,
    {
        if self.monitors.len() >= self.max_monitors {
            return Err(GtError::TooManyMonitors { max: self.max_monitors });
        }
        self.monitors.push(Box::new(monitor));
        Ok(())
    }

    pub fn set_max_monitors(&mut self, max: usize) {
        self.max_monitors = max;
    }

    pub fn clear_monitors(&mut self) {
        self.monitors.clear();
    }

    pub fn set_convergence_test<F>(&mut self, test: F)
    where
        F: FnMut(&SolverState) -> TerminationReason + 'static,
    {
        self.convergence_test = Box::new(test);
    }

    pub fn set_default_convergence_test(&mut self) {
        self.convergence_test = Box::new(default_convergence_test);
    }

    /// Record up to `capacity` iterations of objective, residual and constraint norm.
    pub fn set_history(&mut self, capacity: usize, reset: HistoryReset) {
        self.history = Some(History::new(capacity, reset));
    }

    pub fn history(&self) -> Option<&History> {
        self.history.as_ref()
    }

    /// Reason the last solve stopped; `Continue` before any solve.
    pub fn converged_reason(&self) -> TerminationReason {
        self.core.state.reason
    }

    pub fn reset_statistics(&mut self) {
        self.core.state.reset_statistics();
    }

    /// Log [`view`](Self::view) at the end of every solve.
    pub fn set_view_after_solve(&mut self, enabled: bool) {
        self.view_after_solve = enabled;
    }

    /// Summary of the method, tolerances and the outcome of the last solve.
    ///
    /// Constraint tolerances are listed only when constraints are active or a constraint
    /// tolerance is set, the step tolerance only when positive, and evaluation counts only
    /// for routines that were called.
    pub fn view(&self) -> String {
        let s = &self.core.state;
        let t = &s.tolerances;
        let mut lines = Vec::new();
        lines.push(match &self.prefix {
            Some(p) => format!("TaoContext ({p}):"),
            None => "TaoContext:".to_string(),
        });
        lines.push(format!("  type: {}", self.method_name().unwrap_or("not set yet")));
        lines.push(format!("  convergence tolerances: fatol={:e}, frtol={:e}", t.fatol, t.frtol));
        lines.push(format!("  convergence tolerances: gatol={:e}, gttol={:e}", t.gatol, t.gttol));
        lines.push(format!("  residual in function/gradient: {:e}", s.residual));
        if s.cnorm > 0.0 || t.catol > 0.0 || t.crtol > 0.0 {
            lines.push(format!("  convergence tolerances: catol={:e}, crtol={:e}", t.catol, t.crtol));
            lines.push(format!("  residual in constraints: {:e}", s.cnorm));
        }
        if t.steptol > 0.0 {
            lines.push(format!("  convergence tolerances: steptol={:e}", t.steptol));
            lines.push(format!("  final step size/trust region radius: {:e}", s.step));
        }
        if t.fmin > -1e25 {
            lines.push(format!("  convergence tolerances: function minimum={:e}", t.fmin));
        }
        lines.push(format!("  objective value: {:e}", s.objective));
        lines.push(format!("  total number of iterations: {} (max: {})", s.iteration, t.max_its));
        let counts = [
            ("function", s.nfuncs, Some(t.max_funcs)),
            ("gradient", s.ngrads, Some(t.max_funcs)),
            ("function/gradient", s.nfuncgrads, Some(t.max_funcs)),
            ("Hessian", s.nhess, None),
            ("constraint function", s.nconstraints, None),
            ("Jacobian", s.njac, None),
        ];
        for (what, count, max) in counts.into_iter().filter(|c| c.1 > 0) {
            lines.push(match max {
                Some(max) => format!("  total number of {what} evaluations: {count} (max: {max})"),
                None => format!("  total number of {what} evaluations: {count}"),
            });
        }
        let reason = s.reason;
        lines.push(if reason.is_converged() {
            format!("  solution found: {reason}")
        } else {
            format!("  solver terminated: {reason} ({})", reason.code())
        });
        lines.join("\n")
    }

    /// Check the problem and prepare the method. Called by `solve` when needed.
    pub fn set_up(&mut self) -> Result<(), GtError> {
        if self.core.solution.is_none() {
            return Err(GtError::MissingInitialVector);
        }
        if !self.core.has_objective() {
            return Err(GtError::MissingObjective);
        }
        let method = self
            .method
            .as_mut()
            .ok_or(GtError::Unsupported("no solver method selected"))?;
        method.set_up(&mut self.core)?;
        self.set_up_done = true;
        self.stage = SolverStage::SetUp;
        Ok(())
    }

    /// Run the method from the current solution until the convergence test stops it.
    pub fn solve(&mut self) -> Result<TerminationReason, GtError> {
        if !self.set_up_done {
            self.set_up()?;
        }
        self.reset_statistics();
        if let Some(h) = self.history.as_mut() {
            h.start_solve();
        }
        let mut method = self
            .method
            .take()
            .ok_or(GtError::Unsupported("no solver method selected"))?;
        debug!(method = method.name(), n = self.core.n, "solve start");
        self.stage = SolverStage::Iterating;
        let result = self.run(&mut method);
        self.method = Some(method);
        let reason = result?;
        if reason.is_converged() {
            self.stage = SolverStage::Converged;
            info!("solve converged due to {reason}");
        } else {
            self.stage = SolverStage::Diverged;
            info!("solve did not converge due to {reason}");
        }
        if self.view_after_solve {
            info!("{}", self.view());
        }
        Ok(reason)
    }

    fn run(&mut self, method: &mut Box<dyn SolverMethod>) -> Result<TerminationReason, GtError> {
        let f = self.core.evaluate_start()?;
        let residual = self.core.norm(&self.core.gradient)?;
        let cnorm = self.core.constraint_norm()?;
        let mut reason = self.monitor_with(Some(&mut *method), 0, f, residual, cnorm, 0.0)?;
        let mut iteration = 0;
        while !reason.is_terminal() {
            let it = method.step(&mut self.core)?;
            iteration += 1;
            reason = self.monitor_with(
                Some(&mut *method),
                iteration,
                it.objective,
                it.residual,
                it.cnorm,
                it.step,
            )?;
        }
        Ok(reason)
    }

    /// Record one iteration and decide whether to stop.
    ///
    /// Stores the values in the solver state, appends them to the history, fails with
    /// [`GtError::NumericalFault`] if the objective or residual is not finite, runs the
    /// convergence test, then every monitor in registration order.
    pub fn monitor(
        &mut self,
        iteration: usize,
        objective: f64,
        residual: f64,
        cnorm: f64,
        step: f64,
    ) -> Result<TerminationReason, GtError> {
        let mut method = self.method.take();
        let result =
            self.monitor_with(method.as_mut(), iteration, objective, residual, cnorm, step);
        self.method = method;
        result
    }

    fn monitor_with(
        &mut self,
        method: Option<&mut Box<dyn SolverMethod>>,
        iteration: usize,
        objective: f64,
        residual: f64,
        cnorm: f64,
        step: f64,
    ) -> Result<TerminationReason, GtError> {
        let state = &mut self.core.state;
        state.iteration = iteration;
        state.objective = objective;
        state.residual = residual;
        state.cnorm = cnorm;
        state.step = step;
        if iteration == 0 {
            state.gnorm0 = residual;
            state.cnorm0 = cnorm;
        }
        if let Some(h) = self.history.as_mut() {
            h.record(objective, residual, cnorm);
        }
        if !objective.is_finite() || !residual.is_finite() {
            self.core.state.reason = TerminationReason::Diverged(DivergedReason::NumericalFault);
            self.stage = SolverStage::Diverged;
            return Err(GtError::NumericalFault {
                iteration,
                detail: format!("objective {objective}, residual {residual}"),
            });
        }
        let reason = match method {
            Some(m) => m.compute_convergence(&self.core.state, &mut self.convergence_test),
            None => (self.convergence_test)(&self.core.state),
        };
        self.core.state.reason = reason;
        for monitor in self.monitors.iter_mut() {
            monitor(&self.core.state)?;
        }
        Ok(reason)
    }

    /// Apply `-tao_*` options (under this solver's prefix).
    pub fn set_from_options(
        &mut self,
        db: &OptionsDb,
        registry: &MethodRegistry,
    ) -> Result<(), GtError> {
        let prefix = self.prefix.clone();
        let p = prefix.as_deref();
        if let Some(name) = db
            .get_option(p, "-tao_type")
            .or_else(|| db.get_option(p, "-tao_method"))
        {
            self.set_type(registry, name)?;
        }
        self.set_tolerances(ToleranceUpdate {
            fatol: db.get_real(p, "-tao_fatol")?,
            frtol: db.get_real(p, "-tao_frtol")?,
            gatol: db.get_real(p, "-tao_gatol")?,
            grtol: db.get_real(p, "-tao_grtol")?,
            gttol: db.get_real(p, "-tao_gttol")?,
            catol: db.get_real(p, "-tao_catol")?,
            crtol: db.get_real(p, "-tao_crtol")?,
        });
        if let Some(fmin) = db.get_real(p, "-tao_fmin")? {
            self.set_fmin(fmin);
        }
        if let Some(steptol) = db.get_real(p, "-tao_steptol")? {
            self.set_steptol(steptol);
        }
        if let Some(max_its) = db.get_usize(p, "-tao_max_its")? {
            self.set_max_iterations(max_its);
        }
        if let Some(max_funcs) = db.get_usize(p, "-tao_max_funcs")? {
            self.set_max_function_evaluations(max_funcs);
        }
        if db.has_name(p, "-tao_monitor") {
            self.set_monitor(default_monitor())?;
        }
        if db.has_name(p, "-tao_smonitor") {
            self.set_monitor(short_monitor())?;
        }
        if db.has_name(p, "-tao_cmonitor") {
            self.set_monitor(constraint_monitor())?;
        }
        if db.has_name(p, "-tao_view") {
            self.set_view_after_solve(true);
        }
        Ok(())
    }
}

impl Drop for TaoContext {
    fn drop(&mut self) {
        if let Some(method) = self.method.as_mut() {
            method.destroy();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn quadratic() -> TaoContext {
        let mut tao = TaoContext::new();
        tao.set_initial_vector(vec![1.0, 2.0]);
        tao.set_objective_and_gradient(|x, g| {
            g[0] = 2.0 * x[0];
            g[1] = 4.0 * x[1];
            Ok(x[0] * x[0] + 2.0 * x[1] * x[1])
        });
        tao
    }

    #[test]
    fn stages_follow_the_lifecycle() {
        let mut tao = TaoContext::new();
        assert_eq!(tao.stage(), SolverStage::Created);
        assert!(matches!(tao.solve(), Err(GtError::MissingInitialVector)));
        tao.set_initial_vector(vec![1.0]);
        assert_eq!(tao.stage(), SolverStage::SolutionSet);
        assert!(matches!(tao.set_up(), Err(GtError::MissingObjective)));
        tao.set_objective_and_gradient(|x, g| {
            g[0] = x[0];
            Ok(0.5 * x[0] * x[0])
        });
        tao.set_up().unwrap();
        assert_eq!(tao.stage(), SolverStage::SetUp);
        tao.solve().unwrap();
        assert_eq!(tao.stage(), SolverStage::Converged);
    }

    #[test]
    fn negative_tolerances_are_ignored() {
        let mut tao = TaoContext::new();
        tao.set_tolerances(ToleranceUpdate {
            fatol: Some(-1.0),
            gatol: Some(1e-3),
            ..Default::default()
        });
        let t = tao.tolerances();
        assert_eq!(t.fatol, 1e-8);
        assert_eq!(t.gatol, 1e-3);
        assert_eq!(t.frtol, 1e-8);
    }

    #[test]
    fn monitor_cap_is_enforced() {
        let mut tao = TaoContext::new();
        tao.set_max_monitors(2);
        tao.set_monitor(|_| Ok(())).unwrap();
        tao.set_monitor(|_| Ok(())).unwrap();
        assert!(matches!(
            tao.set_monitor(|_| Ok(())),
            Err(GtError::TooManyMonitors { max: 2 })
        ));
        tao.clear_monitors();
        tao.set_monitor(|_| Ok(())).unwrap();
    }

    #[test]
    fn monitors_see_the_reason_in_registration_order() {
        let mut tao = quadratic();
        let log = Rc::new(RefCell::new(Vec::new()));
        for id in 0..2 {
            let log = Rc::clone(&log);
            tao.set_monitor(move |s| {
                log.borrow_mut().push((id, s.iteration, s.reason));
                Ok(())
            })
            .unwrap();
        }
        let reason = tao.solve().unwrap();
        let log = log.borrow();
        assert_eq!(log[0].0, 0);
        assert_eq!(log[1].0, 1);
        assert_eq!(log[0].1, 0);
        assert_eq!(log.last().map(|e| e.2), Some(reason));
        assert_eq!(log.len() % 2, 0);
    }

    #[test]
    fn non_finite_values_abort() {
        let mut tao = quadratic();
        let err = tao.monitor(3, 1.0, f64::INFINITY, 0.0, 1.0).unwrap_err();
        assert!(matches!(err, GtError::NumericalFault { iteration: 3, .. }));
        assert_eq!(
            tao.converged_reason(),
            TerminationReason::Diverged(DivergedReason::NumericalFault)
        );
    }

    #[test]
    fn custom_test_replaces_default() {
        let mut tao = quadratic();
        tao.set_convergence_test(|s| {
            if s.iteration >= 2 {
                TerminationReason::Converged(crate::utils::convergence::ConvergedReason::User)
            } else {
                TerminationReason::Continue
            }
        });
        let reason = tao.solve().unwrap();
        assert_eq!(reason.code(), 6);
        assert_eq!(tao.state().iteration, 2);
    }

    #[test]
    fn view_reports_the_last_solve() {
        let mut tao = quadratic();
        tao.set_max_iterations(0);
        let reason = tao.solve().unwrap();
        assert_eq!(reason.code(), -2);
        let view = tao.view();
        let lines: Vec<&str> = view.lines().collect();
        assert_eq!(lines[0], "TaoContext:");
        assert_eq!(lines[1], "  type: gd");
        assert_eq!(lines[2], "  convergence tolerances: fatol=1e-8, frtol=1e-8");
        assert_eq!(lines[3], "  convergence tolerances: gatol=1e-8, gttol=0e0");
        assert!(!view.contains("catol"));
        assert!(!view.contains("steptol"));
        assert!(!view.contains("function minimum"));
        assert!(view.contains("  total number of iterations: 1 (max: 0)"));
        let nfg = tao.state().nfuncgrads;
        assert!(view.contains(&format!(
            "  total number of function/gradient evaluations: {nfg} (max: 10000)"
        )));
        assert!(!view.contains("Hessian"));
        assert_eq!(lines.last(), Some(&"  solver terminated: DIVERGED_MAXITS (-2)"));
    }

    #[test]
    fn view_lists_active_constraints_and_optional_tolerances() {
        let mut tao = quadratic();
        tao.set_options_prefix("opt_");
        tao.set_constraints(1, |x, c| {
            c[0] = x[0] - 1.0;
            Ok(())
        });
        tao.set_fmin(-5.0);
        tao.set_steptol(1e-3);
        tao.solve().unwrap();
        let view = tao.view();
        assert!(view.starts_with("TaoContext (opt_):"));
        assert!(view.contains("  convergence tolerances: catol=0e0, crtol=0e0"));
        assert!(view.contains("  residual in constraints:"));
        assert!(view.contains("  convergence tolerances: steptol=1e-3"));
        assert!(view.contains("  convergence tolerances: function minimum=-5e0"));
        assert!(view.contains("  total number of constraint function evaluations:"));
    }

    #[test]
    fn options_select_method_and_tolerances() {
        let db = OptionsDb::from_args([
            "-opt_tao_type", "nls", "-opt_tao_gatol", "1e-4", "-opt_tao_max_its", "5", "-opt_tao_smonitor",
            "-opt_tao_view",
        ]);
        let mut tao = TaoContext::new();
        tao.set_options_prefix("opt_");
        tao.set_from_options(&db, &MethodRegistry::with_defaults()).unwrap();
        assert_eq!(tao.method_name(), Some("nls"));
        assert_eq!(tao.tolerances().gatol, 1e-4);
        assert_eq!(tao.tolerances().max_its, 5);
        assert_eq!(tao.monitors.len(), 1);
        assert!(tao.view_after_solve);

        let bad = OptionsDb::from_args(["-tao_type", "bogus"]);
        assert!(matches!(
            TaoContext::new().set_from_options(&bad, &MethodRegistry::with_defaults()),
            Err(GtError::UnknownType(_))
        ));
    }
}
