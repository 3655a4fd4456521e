//! Newton's method with a backtracking line search (`"nls"`).
//!
//! Each step solves `H d = -g` with a dense fully pivoted LU factorization. When the
//! Hessian is singular or the Newton direction does not descend, the step falls back to
//! the steepest-descent direction `-g`.

use faer::linalg::solvers::{FullPivLu, SolveCore};
use faer::{Conj, Mat, MatMut};
use tracing::{debug, warn};

use super::line_search::{ArmijoLineSearch, LineSearchOutcome};
use super::{Iterate, MethodKind, SolverMethod};
use crate::context::TaoCore;
use crate::error::GtError;

pub struct NewtonLineSearch {
    pub line_search: ArmijoLineSearch,
    hessian: Mat<f64>,
    x: Vec<f64>,
    g: Vec<f64>,
    d: Vec<f64>,
    trial: Vec<f64>,
    trial_gradient: Vec<f64>,
    /// Steps that had to use the gradient direction.
    pub gradient_steps: usize,
}

impl Default for NewtonLineSearch {
    fn default() -> Self {
        Self {
            line_search: ArmijoLineSearch::default(),
            hessian: Mat::zeros(0, 0),
            x: Vec::new(),
            g: Vec::new(),
            d: Vec::new(),
            trial: Vec::new(),
            trial_gradient: Vec::new(),
            gradient_steps: 0,
        }
    }
}

impl NewtonLineSearch {
    pub fn new() -> Self {
        Self::default()
    }

    // Newton direction into `self.d`; false if it is unusable on any rank.
    fn newton_direction(&mut self, core: &TaoCore) -> Result<bool, GtError> {
        let n = self.g.len();
        for (d, g) in self.d.iter_mut().zip(&self.g) {
            *d = -g;
        }
        let lu = FullPivLu::new(self.hessian.as_ref());
        let rhs = MatMut::from_column_major_slice_mut(&mut self.d, n, 1);
        lu.solve_in_place_with_conj(Conj::No, rhs);
        // a non-finite entry anywhere makes the summed slope non-finite on every rank
        let descent = core.dot(&self.d, &self.g)?;
        Ok(descent.is_finite() && descent < 0.0)
    }
}

impl SolverMethod for NewtonLineSearch {
    fn name(&self) -> &'static str {
        "nls"
    }

    fn kind(&self) -> MethodKind {
        MethodKind::LineSearch
    }

    fn set_up(&mut self, core: &mut TaoCore) -> Result<(), GtError> {
        if !core.has_hessian() {
            return Err(GtError::Unsupported("nls requires a Hessian routine"));
        }
        let n = core.len();
        self.hessian = Mat::zeros(n, n);
        for v in [&mut self.x, &mut self.g, &mut self.d, &mut self.trial, &mut self.trial_gradient] {
            v.clear();
            v.resize(n, 0.0);
        }
        self.gradient_steps = 0;
        Ok(())
    }

    fn step(&mut self, core: &mut TaoCore) -> Result<Iterate, GtError> {
        self.x.copy_from_slice(core.solution());
        self.g.copy_from_slice(core.gradient());
        core.compute_hessian(&self.x, &mut self.hessian)?;
        if !self.newton_direction(core)? {
            debug!("nls: Newton direction unusable, using the negative gradient");
            self.gradient_steps += 1;
            for (d, g) in self.d.iter_mut().zip(&self.g) {
                *d = -g;
            }
        }
        let f = core.objective();
        let outcome = self.line_search.search(
            core,
            &self.x,
            f,
            &self.g,
            &self.d,
            &mut self.trial,
            &mut self.trial_gradient,
        )?;
        match outcome {
            LineSearchOutcome::Accepted { step, objective } => {
                core.accept(&self.trial, objective, &self.trial_gradient);
                let residual = core.norm(&self.trial_gradient)?;
                let cnorm = core.constraint_norm()?;
                Ok(Iterate { objective, residual, cnorm, step })
            }
            LineSearchOutcome::Failed { step } => {
                warn!(step, "nls: line search failed");
                core.set_line_search_failed(true);
                let residual = core.norm(&self.g)?;
                let cnorm = core.constraint_norm()?;
                Ok(Iterate { objective: f, residual, cnorm, step: 0.0 })
            }
        }
    }

    fn destroy(&mut self) {
        *self = Self { line_search: self.line_search, ..Self::default() };
    }
}
