//! Core vector-kernel traits for gridtao.

/// Inner products & norms.
pub trait InnerProduct<V: ?Sized> {
    /// Associated scalar type.
    type Scalar: Copy + PartialOrd + From<f64>;
    /// Compute dot(x, y).
    fn dot(&self, x: &V, y: &V) -> Self::Scalar;
    /// Compute ‖x‖₂.
    fn norm(&self, x: &V) -> Self::Scalar;
}

/// Scaled vector update: y ← α x + y.
pub trait Axpy<V: ?Sized> {
    /// Associated scalar type.
    type Scalar: Copy;
    /// Compute y = α · x + y.
    fn axpy(&self, alpha: Self::Scalar, x: &V, y: &mut V);
}
