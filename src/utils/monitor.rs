//! Per-iteration observers.
//!
//! A monitor sees the solver state after the convergence test has run. The built-in ones
//! format one line per iteration and emit it at `info` level.

use tracing::info;

use super::convergence::SolverState;
use crate::error::GtError;

/// Observer invoked once per iteration. Returning an error aborts the solve.
pub type Monitor = Box<dyn FnMut(&SolverState) -> Result<(), GtError>>;

pub fn format_default(s: &SolverState) -> String {
    format!(
        "iter = {}, Function value: {:.10e},  Residual: {:.10e}",
        s.iteration, s.objective, s.residual
    )
}

/// Like [`format_default`], with small residuals bucketed instead of printed.
pub fn format_short(s: &SolverState) -> String {
    let residual = if s.residual > 1.0e-6 {
        format!("{:.6}", s.residual)
    } else if s.residual > 1.0e-11 {
        "< 1.0e-6".to_string()
    } else {
        "< 1.0e-11".to_string()
    };
    format!("iter = {}, Function value {}, Residual: {residual}", s.iteration, s.objective)
}

pub fn format_constraint(s: &SolverState) -> String {
    format!("{},  Constraint: {:.10e}", format_default(s), s.cnorm)
}

pub fn default_monitor() -> Monitor {
    Box::new(|s| {
        info!("{}", format_default(s));
        Ok(())
    })
}

pub fn short_monitor() -> Monitor {
    Box::new(|s| {
        info!("{}", format_short(s));
        Ok(())
    })
}

pub fn constraint_monitor() -> Monitor {
    Box::new(|s| {
        info!("{}", format_constraint(s));
        Ok(())
    })
}
