//! Per-stage linear-quadratic data and the LQ problem container.

#![allow(non_snake_case)] // Q, R, S, A, B, E ... are standard LQ notation

use nalgebra::{DMatrix, DVector};

use crate::utils::inf_norm;

/// One time-step's worth of LQ data.
///
/// Cost: `½ xᵀQx + ½ uᵀRu + uᵀSx + qᵀx + rᵀu`.
/// Dynamics: `A x + B u + E x' + f = 0` (relaxed by `μ_dyn` in the solver).
/// Constraints: `C x + D u + d = 0` (relaxed by `μ_eq`).
/// Optional parameterization links the knot to a vector parameter `θ` of
/// dimension `nth` through `xᵀGx θ + uᵀGu θ + ½ θᵀGth θ + γᵀθ`.
#[derive(Debug, Clone, PartialEq)]
pub struct LqKnot {
    pub nx: usize,
    pub nu: usize,
    pub nc: usize,
    /// Next-state dimension (zero on a terminal knot).
    pub nx2: usize,
    /// Parameter dimension (zero unless parameterized).
    pub nth: usize,

    pub Q: DMatrix<f64>,
    pub S: DMatrix<f64>,
    pub R: DMatrix<f64>,
    pub q: DVector<f64>,
    pub r: DVector<f64>,

    pub A: DMatrix<f64>,
    pub B: DMatrix<f64>,
    pub E: DMatrix<f64>,
    pub f: DVector<f64>,

    pub C: DMatrix<f64>,
    pub D: DMatrix<f64>,
    pub d: DVector<f64>,

    pub Gx: DMatrix<f64>,
    pub Gu: DMatrix<f64>,
    pub Gth: DMatrix<f64>,
    pub gamma: DVector<f64>,
}

impl LqKnot {
    /// Knot with next-state dimension equal to `nx` and no parameterization.
    pub fn new(nx: usize, nu: usize, nc: usize) -> Self {
        Self::with_dims(nx, nu, nc, nx)
    }

    /// Knot with explicit next-state dimension (`nx2 = 0` for a terminal
    /// knot).
    pub fn with_dims(nx: usize, nu: usize, nc: usize, nx2: usize) -> Self {
        Self {
            nx,
            nu,
            nc,
            nx2,
            nth: 0,
            Q: DMatrix::zeros(nx, nx),
            S: DMatrix::zeros(nu, nx),
            R: DMatrix::zeros(nu, nu),
            q: DVector::zeros(nx),
            r: DVector::zeros(nu),
            A: DMatrix::zeros(nx2, nx),
            B: DMatrix::zeros(nx2, nu),
            E: DMatrix::zeros(nx2, nx2),
            f: DVector::zeros(nx2),
            C: DMatrix::zeros(nc, nx),
            D: DMatrix::zeros(nc, nu),
            d: DVector::zeros(nc),
            Gx: DMatrix::zeros(nx, 0),
            Gu: DMatrix::zeros(nu, 0),
            Gth: DMatrix::zeros(0, 0),
            gamma: DVector::zeros(0),
        }
    }

    /// Resize the parameterization blocks to dimension `nth`, zeroed. All
    /// other blocks are left untouched.
    pub fn add_parameterization(&mut self, nth: usize) {
        self.nth = nth;
        self.Gx = DMatrix::zeros(self.nx, nth);
        self.Gu = DMatrix::zeros(self.nu, nth);
        self.Gth = DMatrix::zeros(nth, nth);
        self.gamma = DVector::zeros(nth);
    }
}

/// An LQ problem over a horizon of `N` steps: knots `0..=N` (knot `N` is
/// terminal) plus the initial-state constraint `(G0, g0)`.
#[derive(Debug, Clone, PartialEq)]
pub struct LqrProblem {
    pub stages: Vec<LqKnot>,
    pub G0: DMatrix<f64>,
    pub g0: DVector<f64>,
}

impl LqrProblem {
    /// Build a problem from its knots and the initial-constraint row count.
    pub fn new(stages: Vec<LqKnot>, nc0: usize) -> Self {
        assert!(!stages.is_empty(), "LQ problem needs at least one knot");
        let nx0 = stages[0].nx;
        Self {
            stages,
            G0: DMatrix::zeros(nc0, nx0),
            g0: DVector::zeros(nc0),
        }
    }

    /// Horizon length `N` (the number of non-terminal knots).
    pub fn horizon(&self) -> usize {
        self.stages.len() - 1
    }

    /// Rows of the initial-state constraint.
    pub fn nc0(&self) -> usize {
        self.g0.len()
    }

    /// Parameterize every knot with dimension `nth`.
    pub fn add_parameterization(&mut self, nth: usize) {
        for knot in &mut self.stages {
            knot.add_parameterization(nth);
        }
    }

    /// Check that knot dimensions chain consistently along the horizon.
    pub fn is_well_formed(&self) -> bool {
        if self.G0.ncols() != self.stages[0].nx {
            return false;
        }
        let N = self.horizon();
        for t in 0..N {
            if self.stages[t].nx2 != self.stages[t + 1].nx {
                return false;
            }
        }
        self.stages[N].nx2 == 0
    }
}

/// Write the KKT residuals of an LQ solution into the right-hand-side
/// vectors of `out` (whose matrix blocks must mirror `problem`'s), returning
/// their infinity norm. Feeding the residuals back through a solve yields an
/// iterative-refinement correction.
///
/// `dxs, dus` have `N+1` entries (`dus[N]` empty on a terminal knot with no
/// controls), `dvs` one entry per knot, `dlams[0]` the initial-constraint
/// multiplier and `dlams[t+1]` the dynamics multiplier into state `t+1`.
pub fn lqr_fill_residual_rhs(
    problem: &LqrProblem,
    dxs: &[DVector<f64>],
    dus: &[DVector<f64>],
    dvs: &[DVector<f64>],
    dlams: &[DVector<f64>],
    mudyn: f64,
    mueq: f64,
    out: &mut LqrProblem,
) -> f64 {
    let N = problem.horizon();
    let mut err = 0.0_f64;

    // Initial constraint: G0 x0 + g0 − μ λ0.
    {
        let rinit = &mut out.g0;
        rinit.copy_from(&problem.g0);
        rinit.gemv(1.0, &problem.G0, &dxs[0], 1.0);
        rinit.axpy(-mudyn, &dlams[0], 1.0);
        err = err.max(inf_norm(rinit));
    }

    for t in 0..=N {
        let knot = &problem.stages[t];
        let oknot = &mut out.stages[t];

        // Stationarity w.r.t. x_t.
        {
            let rx = &mut oknot.q;
            rx.copy_from(&knot.q);
            rx.gemv(1.0, &knot.Q, &dxs[t], 1.0);
            rx.gemv_tr(1.0, &knot.S, &dus[t], 1.0);
            rx.gemv_tr(1.0, &knot.C, &dvs[t], 1.0);
            if t < N {
                rx.gemv_tr(1.0, &knot.A, &dlams[t + 1], 1.0);
            }
            if t == 0 {
                rx.gemv_tr(1.0, &problem.G0, &dlams[0], 1.0);
            } else {
                let prev = &problem.stages[t - 1];
                rx.gemv_tr(1.0, &prev.E, &dlams[t], 1.0);
            }
            err = err.max(inf_norm(rx));
        }

        // Stationarity w.r.t. u_t.
        if knot.nu > 0 {
            let ru = &mut oknot.r;
            ru.copy_from(&knot.r);
            ru.gemv(1.0, &knot.S, &dxs[t], 1.0);
            ru.gemv(1.0, &knot.R, &dus[t], 1.0);
            ru.gemv_tr(1.0, &knot.D, &dvs[t], 1.0);
            if t < N {
                ru.gemv_tr(1.0, &knot.B, &dlams[t + 1], 1.0);
            }
            err = err.max(inf_norm(ru));
        }

        // Relaxed path constraints.
        if knot.nc > 0 {
            let rc = &mut oknot.d;
            rc.copy_from(&knot.d);
            rc.gemv(1.0, &knot.C, &dxs[t], 1.0);
            rc.gemv(1.0, &knot.D, &dus[t], 1.0);
            rc.axpy(-mueq, &dvs[t], 1.0);
            err = err.max(inf_norm(rc));
        }

        // Relaxed dynamics.
        if t < N {
            let rd = &mut oknot.f;
            rd.copy_from(&knot.f);
            rd.gemv(1.0, &knot.A, &dxs[t], 1.0);
            rd.gemv(1.0, &knot.B, &dus[t], 1.0);
            rd.gemv(1.0, &knot.E, &dxs[t + 1], 1.0);
            rd.axpy(-mudyn, &dlams[t + 1], 1.0);
            err = err.max(inf_norm(rd));
        }
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_knot(rng: &mut StdRng, nx: usize, nu: usize, nc: usize) -> LqKnot {
        let mut knot = LqKnot::new(nx, nu, nc);
        let mut fill_mat = |m: &mut DMatrix<f64>| {
            for v in m.iter_mut() {
                *v = rng.gen_range(-1.0..1.0);
            }
        };
        fill_mat(&mut knot.Q);
        fill_mat(&mut knot.R);
        for v in knot.q.iter_mut() {
            *v = rng.gen_range(-1.0..1.0);
        }
        for v in knot.r.iter_mut() {
            *v = rng.gen_range(-1.0..1.0);
        }
        knot
    }

    #[test]
    fn knot_copy_is_equal() {
        let mut rng = StdRng::seed_from_u64(42);
        let knot = random_knot(&mut rng, 2, 2, 0);
        let copy = knot.clone();
        assert_eq!(knot, copy);
    }

    #[test]
    fn knot_move_preserves_value() {
        let mut rng = StdRng::seed_from_u64(43);
        let knot = random_knot(&mut rng, 2, 2, 0);
        let q = knot.Q.clone();
        let r = knot.R.clone();
        let moved = knot;
        assert_eq!(moved.nx, 2);
        assert_eq!(moved.Q, q);
        assert_eq!(moved.R, r);
    }

    #[test]
    fn knot_swap_exchanges_contents() {
        let mut rng = StdRng::seed_from_u64(44);
        let mut a = random_knot(&mut rng, 2, 2, 0);
        let mut b = a.clone();
        b.Q.fill_with_identity();
        let (a0, b0) = (a.clone(), b.clone());
        std::mem::swap(&mut a, &mut b);
        assert_eq!(a, b0);
        assert_eq!(b, a0);
    }

    #[test]
    fn parameterization_leaves_base_blocks_unchanged() {
        let mut rng = StdRng::seed_from_u64(45);
        let knot = random_knot(&mut rng, 3, 2, 1);
        let mut param = knot.clone();
        param.add_parameterization(3);
        assert_eq!(param.nth, 3);
        assert_eq!(param.Q, knot.Q);
        assert_eq!(param.R, knot.R);
        assert_eq!(param.q, knot.q);
        assert_eq!(param.r, knot.r);
        assert_eq!(param.A, knot.A);
        assert_eq!(param.B, knot.B);
        assert_eq!(param.E, knot.E);
        assert_eq!(param.f, knot.f);
        assert_eq!(param.Gx.ncols(), 3);
    }

    #[test]
    fn problem_equality_is_stagewise() {
        let mut rng = StdRng::seed_from_u64(46);
        let mut stages: Vec<LqKnot> = (0..5).map(|_| random_knot(&mut rng, 2, 1, 0)).collect();
        let last = stages.last_mut().unwrap();
        *last = LqKnot::with_dims(2, 0, 0, 0);
        let prob = LqrProblem::new(stages, 2);
        let copy = prob.clone();
        assert_eq!(prob, copy);
        assert!(prob.is_well_formed());

        let mut other = prob.clone();
        other.stages[1].q[0] += 1.0;
        assert_ne!(prob, other);
    }
}
