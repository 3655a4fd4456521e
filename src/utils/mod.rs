pub mod convergence;
pub mod monitor;

pub use convergence::{
    default_convergence_test, ConvergedReason, DivergedReason, History, HistoryReset,
    Tolerances,
};
pub use monitor::{constraint_monitor, default_monitor, short_monitor, Monitor};
