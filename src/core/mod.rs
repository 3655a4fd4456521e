//! Vector kernels consumed by the grid and solver layers.

pub mod traits;
pub mod wrappers;

pub use traits::{Axpy, InnerProduct};
pub use wrappers::DistributedInnerProduct;
