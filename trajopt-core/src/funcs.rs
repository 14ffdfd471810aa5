//! Modelling contracts: stage functions, unary functions and costs.
//!
//! The solver core consumes these traits; concrete models live in
//! [`crate::modelling`]. Every model hands out per-evaluation scratch through
//! a `create_data` factory so the solver workspace owns all storage and the
//! hot loops never allocate.

use nalgebra::{DMatrix, DVector, DVectorView};

/// Scratch and outputs for one stage-function evaluation.
///
/// Dimensions: `nr` residual rows, `ndx1` tangent dimension of the current
/// state, `nu` controls, `ndx2` tangent dimension of the next state (zero for
/// functions that do not depend on it).
#[derive(Debug, Clone)]
pub struct FunctionData {
    /// Residual value (size `nr`).
    pub value: DVector<f64>,
    /// Jacobian w.r.t. the current state tangent (`nr × ndx1`).
    pub jx: DMatrix<f64>,
    /// Jacobian w.r.t. the control (`nr × nu`).
    pub ju: DMatrix<f64>,
    /// Jacobian w.r.t. the next-state tangent (`nr × ndx2`).
    pub jy: DMatrix<f64>,
    /// Multiplier-contracted second derivative over `(x, u)`
    /// (`(ndx1+nu) × (ndx1+nu)`), used by the exact-Hessian mode.
    pub vhp: DMatrix<f64>,
}

impl FunctionData {
    pub fn new(nr: usize, ndx1: usize, nu: usize, ndx2: usize) -> Self {
        Self {
            value: DVector::zeros(nr),
            jx: DMatrix::zeros(nr, ndx1),
            ju: DMatrix::zeros(nr, nu),
            jy: DMatrix::zeros(nr, ndx2),
            vhp: DMatrix::zeros(ndx1 + nu, ndx1 + nu),
        }
    }
}

/// A function of one stage's `(x, u, y)` triple, where `y` is the next state.
///
/// Dynamics are stage functions with `nr == ndx2`, with the convention that
/// the residual vanishes along feasible transitions.
pub trait StageFunction: Send + Sync {
    /// Residual dimension.
    fn nr(&self) -> usize;
    /// Current-state tangent dimension.
    fn ndx1(&self) -> usize;
    /// Control dimension.
    fn nu(&self) -> usize;
    /// Next-state tangent dimension (zero when the function ignores `y`).
    fn ndx2(&self) -> usize {
        0
    }

    /// Evaluate the residual into `data.value`.
    fn evaluate(&self, x: &DVector<f64>, u: &DVector<f64>, y: &DVector<f64>, data: &mut FunctionData);

    /// Evaluate the Jacobians into `data.jx/ju/jy`.
    fn compute_jacobians(
        &self,
        x: &DVector<f64>,
        u: &DVector<f64>,
        y: &DVector<f64>,
        data: &mut FunctionData,
    );

    /// Contract the second derivative tensor with `lam` into `data.vhp`.
    /// Functions with zero curvature keep the default.
    fn compute_vector_hessian_products(
        &self,
        _x: &DVector<f64>,
        _u: &DVector<f64>,
        _y: &DVector<f64>,
        _lam: DVectorView<f64>,
        data: &mut FunctionData,
    ) {
        data.vhp.fill(0.0);
    }

    /// For explicit dynamics, write `f(x, u)` into `out` and return `true`.
    /// Non-dynamics functions (and implicit dynamics that cannot be solved in
    /// closed form) return `false`.
    fn forward(&self, _x: &DVector<f64>, _u: &DVector<f64>, _out: &mut DVector<f64>) -> bool {
        false
    }

    /// Allocate evaluation scratch sized to this function.
    fn create_data(&self) -> FunctionData {
        FunctionData::new(self.nr(), self.ndx1(), self.nu(), self.ndx2())
    }
}

/// A function of the state only. Used for the initial condition and for
/// terminal constraints.
pub trait UnaryFunction: Send + Sync {
    fn nr(&self) -> usize;
    fn ndx(&self) -> usize;

    fn evaluate(&self, x: &DVector<f64>, data: &mut FunctionData);
    fn compute_jacobians(&self, x: &DVector<f64>, data: &mut FunctionData);

    fn create_data(&self) -> FunctionData {
        FunctionData::new(self.nr(), self.ndx(), 0, 0)
    }
}

/// Scratch and outputs for one cost evaluation.
#[derive(Debug, Clone)]
pub struct CostData {
    pub value: f64,
    /// Gradient w.r.t. the state tangent (size `ndx`).
    pub lx: DVector<f64>,
    /// Gradient w.r.t. the control (size `nu`).
    pub lu: DVector<f64>,
    /// Hessian block `ndx × ndx`.
    pub lxx: DMatrix<f64>,
    /// Cross block `nu × ndx`.
    pub lux: DMatrix<f64>,
    /// Hessian block `nu × nu`.
    pub luu: DMatrix<f64>,
}

impl CostData {
    pub fn new(ndx: usize, nu: usize) -> Self {
        Self {
            value: 0.0,
            lx: DVector::zeros(ndx),
            lu: DVector::zeros(nu),
            lxx: DMatrix::zeros(ndx, ndx),
            lux: DMatrix::zeros(nu, ndx),
            luu: DMatrix::zeros(nu, nu),
        }
    }
}

/// A stage or terminal cost term.
///
/// Terminal costs are evaluated with an empty control vector.
pub trait Cost: Send + Sync {
    fn ndx(&self) -> usize;
    fn nu(&self) -> usize;

    fn evaluate(&self, x: &DVector<f64>, u: &DVector<f64>, data: &mut CostData);
    fn compute_gradients(&self, x: &DVector<f64>, u: &DVector<f64>, data: &mut CostData);
    fn compute_hessians(&self, x: &DVector<f64>, u: &DVector<f64>, data: &mut CostData);

    fn create_data(&self) -> CostData {
        CostData::new(self.ndx(), self.nu())
    }
}
