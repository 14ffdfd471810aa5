//! Affine residual functions used as constraints.

use nalgebra::{DMatrix, DVector};

use crate::funcs::{FunctionData, StageFunction, UnaryFunction};
use crate::manifold::{Manifold, VectorSpace};

/// Affine stage residual `r(x, u) = C x + D u + d`.
///
/// With `C = 0, D = I, d = 0` this is the control-selection residual used for
/// control bounds.
#[derive(Debug, Clone)]
pub struct LinearFunction {
    pub c: DMatrix<f64>,
    pub d: DMatrix<f64>,
    pub e: DVector<f64>,
}

impl LinearFunction {
    pub fn new(c: DMatrix<f64>, d: DMatrix<f64>, e: DVector<f64>) -> Self {
        assert_eq!(c.nrows(), d.nrows(), "row count mismatch between C and D");
        assert_eq!(c.nrows(), e.len(), "offset length mismatch");
        Self { c, d, e }
    }

    /// The residual `r(x, u) = u`, selecting the control vector.
    pub fn control_identity(ndx: usize, nu: usize) -> Self {
        Self {
            c: DMatrix::zeros(nu, ndx),
            d: DMatrix::identity(nu, nu),
            e: DVector::zeros(nu),
        }
    }
}

impl StageFunction for LinearFunction {
    fn nr(&self) -> usize {
        self.e.len()
    }

    fn ndx1(&self) -> usize {
        self.c.ncols()
    }

    fn nu(&self) -> usize {
        self.d.ncols()
    }

    fn evaluate(
        &self,
        x: &DVector<f64>,
        u: &DVector<f64>,
        _y: &DVector<f64>,
        data: &mut FunctionData,
    ) {
        data.value.copy_from(&self.e);
        data.value.gemv(1.0, &self.c, x, 1.0);
        data.value.gemv(1.0, &self.d, u, 1.0);
    }

    fn compute_jacobians(
        &self,
        _x: &DVector<f64>,
        _u: &DVector<f64>,
        _y: &DVector<f64>,
        data: &mut FunctionData,
    ) {
        data.jx.copy_from(&self.c);
        data.ju.copy_from(&self.d);
    }
}

/// State-error residual `r(x) = x ⊖ target` on a manifold.
///
/// Serves as the initial-condition constraint (target = x₀) and as terminal
/// equality constraints (target = goal state).
#[derive(Debug, Clone)]
pub struct StateErrorResidual {
    pub space: VectorSpace,
    pub target: DVector<f64>,
}

impl StateErrorResidual {
    pub fn new(space: VectorSpace, target: DVector<f64>) -> Self {
        assert_eq!(target.len(), space.nx(), "target dimension mismatch");
        Self { space, target }
    }
}

impl UnaryFunction for StateErrorResidual {
    fn nr(&self) -> usize {
        self.space.ndx()
    }

    fn ndx(&self) -> usize {
        self.space.ndx()
    }

    fn evaluate(&self, x: &DVector<f64>, data: &mut FunctionData) {
        self.space.difference(&self.target, x, &mut data.value);
    }

    fn compute_jacobians(&self, _x: &DVector<f64>, data: &mut FunctionData) {
        // d/dx (x ⊖ target) is the identity on a vector space.
        data.jx.fill_with_identity();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::dvector;

    #[test]
    fn state_error_at_target_is_zero() {
        let res = StateErrorResidual::new(VectorSpace::new(2), dvector![1.0, -0.5]);
        let mut data = res.create_data();
        res.evaluate(&dvector![1.0, -0.5], &mut data);
        assert_eq!(data.value.amax(), 0.0);
    }
}
