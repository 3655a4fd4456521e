//! gridtao: distributed structured grids and optimization solver control
//!
//! This crate partitions logically structured 1-, 2- and 3-D grids across processes,
//! keeps global (owned-only) and local (ghosted) views consistent through reusable
//! scatter plans, and drives iterative methods through a pluggable
//! convergence/monitor/history framework.

pub mod parallel;

pub mod config;
pub mod context;
pub mod core;
pub mod da;
pub mod error;
pub mod solver;
pub mod utils;

// Re-exports for convenience
pub use parallel::{Comm, SerialComm, ThreadComm};
pub use config::*;
pub use context::*;
pub use self::core::*;
pub use da::*;
pub use error::*;
pub use solver::*;
pub use utils::*;

// Re-export the solver state at the crate root for convenience
pub use utils::convergence::{SolverState, TerminationReason};
