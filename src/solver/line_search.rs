//! Backtracking line search with the Armijo sufficient-decrease condition.

use tracing::trace;

use crate::context::TaoCore;
use crate::core::traits::Axpy;
use crate::error::GtError;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LineSearchOutcome {
    /// `trial` holds the accepted point, `trial_gradient` its gradient.
    Accepted { step: f64, objective: f64 },
    /// No acceptable step was found; `trial` is unspecified.
    Failed { step: f64 },
}

#[derive(Clone, Copy, Debug)]
pub struct ArmijoLineSearch {
    pub initial_step: f64,
    /// Factor applied to the step after each rejected trial.
    pub shrink: f64,
    pub sufficient_decrease: f64,
    pub max_trials: usize,
}

impl Default for ArmijoLineSearch {
    fn default() -> Self {
        Self {
            initial_step: 1.0,
            shrink: 0.5,
            sufficient_decrease: 1e-4,
            max_trials: 30,
        }
    }
}

impl ArmijoLineSearch {
    /// Search along `d` from `x`, where `f` and `g` are the objective and gradient at `x`.
    ///
    /// Every trial evaluates objective and gradient together, so the gradient at the
    /// accepted point is available without another call.
    #[allow(clippy::too_many_arguments)]
    pub fn search(
        &self,
        core: &mut TaoCore,
        x: &[f64],
        f: f64,
        g: &[f64],
        d: &[f64],
        trial: &mut [f64],
        trial_gradient: &mut [f64],
    ) -> Result<LineSearchOutcome, GtError> {
        let slope = core.dot(g, d)?;
        if slope >= 0.0 || slope.is_nan() {
            trace!(slope, "search direction is not a descent direction");
            return Ok(LineSearchOutcome::Failed { step: 0.0 });
        }
        let mut step = self.initial_step;
        for attempt in 0..self.max_trials {
            trial.copy_from_slice(x);
            ().axpy(step, d, trial);
            let f_trial = core.compute_objective_and_gradient(trial, trial_gradient)?;
            trace!(attempt, step, f_trial, "line search trial");
            if f_trial.is_finite() && f_trial <= f + self.sufficient_decrease * step * slope {
                return Ok(LineSearchOutcome::Accepted { step, objective: f_trial });
            }
            step *= self.shrink;
        }
        Ok(LineSearchOutcome::Failed { step })
    }
}
