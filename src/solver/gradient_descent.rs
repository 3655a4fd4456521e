//! Steepest descent with a backtracking line search (`"gd"`).

use tracing::warn;

use super::line_search::{ArmijoLineSearch, LineSearchOutcome};
use super::{Iterate, MethodKind, SolverMethod};
use crate::context::TaoCore;
use crate::error::GtError;

#[derive(Debug, Default)]
pub struct GradientDescent {
    pub line_search: ArmijoLineSearch,
    x: Vec<f64>,
    g: Vec<f64>,
    d: Vec<f64>,
    trial: Vec<f64>,
    trial_gradient: Vec<f64>,
}

impl GradientDescent {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SolverMethod for GradientDescent {
    fn name(&self) -> &'static str {
        "gd"
    }

    fn kind(&self) -> MethodKind {
        MethodKind::LineSearch
    }

    fn set_up(&mut self, core: &mut TaoCore) -> Result<(), GtError> {
        let n = core.len();
        for v in [&mut self.x, &mut self.g, &mut self.d, &mut self.trial, &mut self.trial_gradient] {
            v.clear();
            v.resize(n, 0.0);
        }
        Ok(())
    }

    fn step(&mut self, core: &mut TaoCore) -> Result<Iterate, GtError> {
        self.x.copy_from_slice(core.solution());
        self.g.copy_from_slice(core.gradient());
        for (d, g) in self.d.iter_mut().zip(&self.g) {
            *d = -g;
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
                warn!(step, "gd: line search failed");
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
