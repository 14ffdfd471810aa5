//! State-space abstraction with manifold-style integrate/difference updates.

use nalgebra::{DMatrix, DVector};
use rand::Rng;

/// A differentiable state space.
///
/// Points live in an `nx`-dimensional representation; tangent (update)
/// vectors have dimension `ndx`. Implementations must satisfy the round-trip
/// invariant `difference(x, integrate(x, d)) == d` to floating tolerance.
///
/// All core operations write into caller-provided storage so solver hot loops
/// stay allocation-free.
pub trait Manifold: Send + Sync {
    /// Nominal (representation) dimension.
    fn nx(&self) -> usize;

    /// Tangent dimension.
    fn ndx(&self) -> usize;

    /// Neutral element of the space.
    fn neutral(&self) -> DVector<f64>;

    /// Sample a random point.
    fn rand(&self, rng: &mut dyn rand::RngCore) -> DVector<f64>;

    /// `out = x ⊕ dx`.
    fn integrate(&self, x: &DVector<f64>, dx: &DVector<f64>, out: &mut DVector<f64>);

    /// `out = y ⊖ x`, the tangent taking `x` to `y`.
    fn difference(&self, x: &DVector<f64>, y: &DVector<f64>, out: &mut DVector<f64>);

    /// Jacobians of `integrate(x, dx)` with respect to `x` and `dx`
    /// (each `ndx × ndx`).
    fn jintegrate(
        &self,
        x: &DVector<f64>,
        dx: &DVector<f64>,
        jx: &mut DMatrix<f64>,
        jdx: &mut DMatrix<f64>,
    );

    /// Jacobians of `difference(x, y)` with respect to `x` and `y`
    /// (each `ndx × ndx`).
    fn jdifference(
        &self,
        x: &DVector<f64>,
        y: &DVector<f64>,
        jx: &mut DMatrix<f64>,
        jy: &mut DMatrix<f64>,
    );

    /// Convenience allocating wrapper around [`Manifold::integrate`].
    fn integrate_new(&self, x: &DVector<f64>, dx: &DVector<f64>) -> DVector<f64> {
        let mut out = DVector::zeros(self.nx());
        self.integrate(x, dx, &mut out);
        out
    }

    /// Convenience allocating wrapper around [`Manifold::difference`].
    fn difference_new(&self, x: &DVector<f64>, y: &DVector<f64>) -> DVector<f64> {
        let mut out = DVector::zeros(self.ndx());
        self.difference(x, y, &mut out);
        out
    }
}

/// Euclidean vector space of dimension `n`: `integrate` is addition and
/// `difference` is subtraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorSpace {
    n: usize,
}

impl VectorSpace {
    pub fn new(n: usize) -> Self {
        Self { n }
    }
}

impl Manifold for VectorSpace {
    fn nx(&self) -> usize {
        self.n
    }

    fn ndx(&self) -> usize {
        self.n
    }

    fn neutral(&self) -> DVector<f64> {
        DVector::zeros(self.n)
    }

    fn rand(&self, rng: &mut dyn rand::RngCore) -> DVector<f64> {
        DVector::from_fn(self.n, |_, _| rng.gen_range(-1.0..1.0))
    }

    fn integrate(&self, x: &DVector<f64>, dx: &DVector<f64>, out: &mut DVector<f64>) {
        debug_assert_eq!(x.len(), self.n);
        debug_assert_eq!(dx.len(), self.n);
        out.copy_from(x);
        *out += dx;
    }

    fn difference(&self, x: &DVector<f64>, y: &DVector<f64>, out: &mut DVector<f64>) {
        debug_assert_eq!(x.len(), self.n);
        debug_assert_eq!(y.len(), self.n);
        out.copy_from(y);
        *out -= x;
    }

    fn jintegrate(
        &self,
        _x: &DVector<f64>,
        _dx: &DVector<f64>,
        jx: &mut DMatrix<f64>,
        jdx: &mut DMatrix<f64>,
    ) {
        jx.fill_with_identity();
        jdx.fill_with_identity();
    }

    fn jdifference(
        &self,
        _x: &DVector<f64>,
        _y: &DVector<f64>,
        jx: &mut DMatrix<f64>,
        jy: &mut DMatrix<f64>,
    ) {
        jx.fill_with_identity();
        *jx *= -1.0;
        jy.fill_with_identity();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn round_trip() {
        let space = VectorSpace::new(4);
        let mut rng = StdRng::seed_from_u64(7);
        let x = space.rand(&mut rng);
        let d = space.rand(&mut rng);
        let y = space.integrate_new(&x, &d);
        let d2 = space.difference_new(&x, &y);
        assert!((d - d2).amax() < 1e-14);
    }
}
