//! Linear discrete-time dynamics.

use nalgebra::{DMatrix, DVector};

use crate::funcs::{FunctionData, StageFunction};

/// Explicit linear dynamics `x' = A x + B u + c`, expressed as the implicit
/// residual `φ(x, u, x') = A x + B u + c − x'`.
#[derive(Debug, Clone)]
pub struct LinearDiscreteDynamics {
    pub a: DMatrix<f64>,
    pub b: DMatrix<f64>,
    pub c: DVector<f64>,
}

impl LinearDiscreteDynamics {
    pub fn new(a: DMatrix<f64>, b: DMatrix<f64>, c: DVector<f64>) -> Self {
        assert_eq!(a.nrows(), a.ncols(), "state matrix must be square");
        assert_eq!(b.nrows(), a.nrows(), "control matrix row mismatch");
        assert_eq!(c.len(), a.nrows(), "drift vector length mismatch");
        Self { a, b, c }
    }

    pub fn nx(&self) -> usize {
        self.a.nrows()
    }
}

impl StageFunction for LinearDiscreteDynamics {
    fn nr(&self) -> usize {
        self.a.nrows()
    }

    fn ndx1(&self) -> usize {
        self.a.ncols()
    }

    fn nu(&self) -> usize {
        self.b.ncols()
    }

    fn ndx2(&self) -> usize {
        self.a.nrows()
    }

    fn evaluate(
        &self,
        x: &DVector<f64>,
        u: &DVector<f64>,
        y: &DVector<f64>,
        data: &mut FunctionData,
    ) {
        data.value.copy_from(&self.c);
        data.value.gemv(1.0, &self.a, x, 1.0);
        data.value.gemv(1.0, &self.b, u, 1.0);
        data.value -= y;
    }

    fn compute_jacobians(
        &self,
        _x: &DVector<f64>,
        _u: &DVector<f64>,
        _y: &DVector<f64>,
        data: &mut FunctionData,
    ) {
        data.jx.copy_from(&self.a);
        data.ju.copy_from(&self.b);
        data.jy.fill_with_identity();
        data.jy *= -1.0;
    }

    fn forward(&self, x: &DVector<f64>, u: &DVector<f64>, out: &mut DVector<f64>) -> bool {
        out.copy_from(&self.c);
        out.gemv(1.0, &self.a, x, 1.0);
        out.gemv(1.0, &self.b, u, 1.0);
        true
    }
}
