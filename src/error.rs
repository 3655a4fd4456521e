use thiserror::Error;

// Unified error type for gridtao

#[derive(Error, Debug)]
pub enum GtError {
    #[error("layout error: {0}")]
    Layout(String),
    #[error("invalid processor layout: {0}")]
    InvalidLayout(String),
    #[error("no initial vector set; call set_initial_vector before solving")]
    MissingInitialVector,
    #[error("no objective routine set; call set_objective or set_objective_and_gradient")]
    MissingObjective,
    #[error("numerical fault at iteration {iteration}: {detail}")]
    NumericalFault { iteration: usize, detail: String },
    #[error("communication error: {0}")]
    Communication(String),
    #[error("cannot attach another monitor (max = {max})")]
    TooManyMonitors { max: usize },
    #[error("{what} has length {got}, expected {expected}")]
    VectorSize {
        what: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("unknown solver type: {0}")]
    UnknownType(String),
    #[error("invalid value {value:?} for option {name}")]
    InvalidOption { name: String, value: String },
    #[error("user routine failed: {0}")]
    Evaluation(String),
    #[error("solve error: {0}")]
    SolveError(String),
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
}

impl GtError {
    /// Length check shared by the grid and solver entry points.
    pub(crate) fn check_len(what: &'static str, expected: usize, got: usize) -> Result<(), GtError> {
        if expected == got {
            Ok(())
        } else {
            Err(GtError::VectorSize { what, expected, got })
        }
    }
}
