//! Vector kernels over slices.
//!
//! This module provides implementations of the core vector traits for `[T]`, enabling their use
//! by the solver control loop and the grid helpers. Reductions run in parallel when the `rayon`
//! feature is enabled. A communicator-backed inner product sums the local contributions across
//! every rank that owns a piece of a distributed vector.
//!
//! # References
//! - [num-traits crate documentation](https://docs.rs/num-traits)
//! - [rayon crate documentation](https://docs.rs/rayon)

use crate::core::traits::{Axpy, InnerProduct};
use crate::error::GtError;
use crate::parallel::Comm;
use num_traits::Float;

/// Implements inner product and norm for slices, with optional Rayon parallelism.
impl<T: Float + From<f64> + Send + Sync> InnerProduct<[T]> for () {
    type Scalar = T;
    /// Computes the dot product of two slices: `x^T y`.
    fn dot(&self, x: &[T], y: &[T]) -> T {
        assert_eq!(x.len(), y.len(), "Vectors must have the same length");
        #[cfg(feature = "rayon")]
        {
            use rayon::prelude::*;
            x.par_iter()
                .zip(y.par_iter())
                .map(|(xi, yi)| *xi * *yi)
                .reduce(|| T::zero(), |acc, v| acc + v)
        }
        #[cfg(not(feature = "rayon"))]
        {
            x.iter()
                .zip(y.iter())
                .map(|(xi, yi)| *xi * *yi)
                .fold(T::zero(), |acc, v| acc + v)
        }
    }
    /// Computes the Euclidean norm of a slice: `||x||_2`.
    fn norm(&self, x: &[T]) -> T {
        #[cfg(feature = "rayon")]
        {
            use rayon::prelude::*;
            x.par_iter()
                .map(|xi| *xi * *xi)
                .reduce(|| T::zero(), |acc, v| acc + v)
                .sqrt()
        }
        #[cfg(not(feature = "rayon"))]
        {
            x.iter()
                .map(|xi| *xi * *xi)
                .fold(T::zero(), |acc, v| acc + v)
                .sqrt()
        }
    }
}

impl<T: Float + Send + Sync> Axpy<[T]> for () {
    type Scalar = T;
    fn axpy(&self, alpha: T, x: &[T], y: &mut [T]) {
        assert_eq!(x.len(), y.len(), "Vectors must have the same length");
        for (yi, xi) in y.iter_mut().zip(x) {
            *yi = *yi + alpha * *xi;
        }
    }
}

/// Distributed inner product and norm.
///
/// Wraps a communicator and provides collective dot product and norm operations over vectors
/// whose entries are partitioned across ranks (for example the global vectors of a
/// distributed array). Every rank must call these together.
pub struct DistributedInnerProduct<'a> {
    /// Reference to the communicator implementing the `Comm` trait.
    pub comm: &'a dyn Comm,
}

impl<'a> DistributedInnerProduct<'a> {
    pub fn new(comm: &'a dyn Comm) -> Self {
        Self { comm }
    }

    /// Computes the distributed dot product of two slices, reducing across all processes.
    pub fn dot(&self, x: &[f64], y: &[f64]) -> Result<f64, GtError> {
        let local = ().dot(x, y);
        self.comm.all_reduce(local)
    }
    /// Computes the distributed Euclidean norm of a slice, reducing across all processes.
    pub fn norm(&self, x: &[f64]) -> Result<f64, GtError> {
        let local = ().dot(x, x);
        Ok(self.comm.all_reduce(local)?.sqrt())
    }
}
