//! Solver contexts.
//!
//! - [`tao_context`]: the optimization control loop ([`TaoContext`]) and the problem data
//!   methods operate on ([`TaoCore`]).
//! - [`registry`]: the application-owned table of selectable methods.

pub mod registry;
pub mod tao_context;

pub use registry::{MethodFactory, MethodRegistry};
pub use tao_context::{SolverStage, TaoContext, TaoCore, ToleranceUpdate};
