//! Quadratic cost terms and weighted cost stacks.

use nalgebra::{DMatrix, DVector};

use crate::funcs::{Cost, CostData};

/// Quadratic cost `ℓ(x, u) = ½ xᵀ Wx x + ½ uᵀ Wu u + wxᵀ x + wuᵀ u`.
///
/// Usable both as a running cost and (evaluated at the neutral control) as a
/// terminal cost.
#[derive(Debug, Clone)]
pub struct QuadraticCost {
    pub w_x: DMatrix<f64>,
    pub w_u: DMatrix<f64>,
    pub interp_x: DVector<f64>,
    pub interp_u: DVector<f64>,
}

impl QuadraticCost {
    /// Purely quadratic cost with the given weight matrices.
    pub fn new(w_x: DMatrix<f64>, w_u: DMatrix<f64>) -> Self {
        assert!(w_x.is_square(), "state weight matrix must be square");
        assert!(w_u.is_square(), "control weight matrix must be square");
        let nx = w_x.nrows();
        let nu = w_u.nrows();
        Self {
            w_x,
            w_u,
            interp_x: DVector::zeros(nx),
            interp_u: DVector::zeros(nu),
        }
    }

    /// Quadratic cost with linear interpolation terms.
    pub fn with_linear(
        w_x: DMatrix<f64>,
        w_u: DMatrix<f64>,
        interp_x: DVector<f64>,
        interp_u: DVector<f64>,
    ) -> Self {
        let mut out = Self::new(w_x, w_u);
        assert_eq!(interp_x.len(), out.interp_x.len());
        assert_eq!(interp_u.len(), out.interp_u.len());
        out.interp_x = interp_x;
        out.interp_u = interp_u;
        out
    }
}

impl Cost for QuadraticCost {
    fn ndx(&self) -> usize {
        self.w_x.nrows()
    }

    fn nu(&self) -> usize {
        self.w_u.nrows()
    }

    fn evaluate(&self, x: &DVector<f64>, u: &DVector<f64>, data: &mut CostData) {
        let quad_x = 0.5 * (&self.w_x * x).dot(x) + self.interp_x.dot(x);
        let quad_u = if u.len() == 0 {
            0.0
        } else {
            0.5 * (&self.w_u * u).dot(u) + self.interp_u.dot(u)
        };
        data.value = quad_x + quad_u;
    }

    fn compute_gradients(&self, x: &DVector<f64>, u: &DVector<f64>, data: &mut CostData) {
        data.lx.gemv(1.0, &self.w_x, x, 0.0);
        data.lx += &self.interp_x;
        if u.len() > 0 {
            data.lu.gemv(1.0, &self.w_u, u, 0.0);
            data.lu += &self.interp_u;
        }
    }

    fn compute_hessians(&self, _x: &DVector<f64>, _u: &DVector<f64>, data: &mut CostData) {
        data.lxx.copy_from(&self.w_x);
        data.luu.copy_from(&self.w_u);
        data.lux.fill(0.0);
    }
}

/// Weighted sum of cost components: `ℓ(x, u) = Σ_k w_k ℓ^(k)(x, u)`.
pub struct CostStack {
    ndx: usize,
    nu: usize,
    components: Vec<Box<dyn Cost>>,
    weights: Vec<f64>,
}

impl CostStack {
    pub fn new(ndx: usize, nu: usize) -> Self {
        Self {
            ndx,
            nu,
            components: Vec::new(),
            weights: Vec::new(),
        }
    }

    /// Append a component with the given weight. Dimension mismatch with the
    /// stack is a programming error and panics.
    pub fn add_cost(&mut self, cost: Box<dyn Cost>, weight: f64) {
        assert_eq!(cost.ndx(), self.ndx, "cost component ndx mismatch");
        assert_eq!(cost.nu(), self.nu, "cost component nu mismatch");
        self.components.push(cost);
        self.weights.push(weight);
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

impl Cost for CostStack {
    fn ndx(&self) -> usize {
        self.ndx
    }

    fn nu(&self) -> usize {
        self.nu
    }

    fn evaluate(&self, x: &DVector<f64>, u: &DVector<f64>, data: &mut CostData) {
        data.value = 0.0;
        for (k, comp) in self.components.iter().enumerate() {
            let mut cd = comp.create_data();
            comp.evaluate(x, u, &mut cd);
            data.value += self.weights[k] * cd.value;
        }
    }

    fn compute_gradients(&self, x: &DVector<f64>, u: &DVector<f64>, data: &mut CostData) {
        data.lx.fill(0.0);
        data.lu.fill(0.0);
        for (k, comp) in self.components.iter().enumerate() {
            let mut cd = comp.create_data();
            comp.compute_gradients(x, u, &mut cd);
            data.lx.axpy(self.weights[k], &cd.lx, 1.0);
            data.lu.axpy(self.weights[k], &cd.lu, 1.0);
        }
    }

    fn compute_hessians(&self, x: &DVector<f64>, u: &DVector<f64>, data: &mut CostData) {
        data.lxx.fill(0.0);
        data.lux.fill(0.0);
        data.luu.fill(0.0);
        for (k, comp) in self.components.iter().enumerate() {
            let mut cd = comp.create_data();
            comp.compute_hessians(x, u, &mut cd);
            data.lxx += &cd.lxx * self.weights[k];
            data.lux += &cd.lux * self.weights[k];
            data.luu += &cd.luu * self.weights[k];
        }
    }
}
