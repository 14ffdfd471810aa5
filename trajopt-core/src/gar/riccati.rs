//! Serial proximal Riccati factorization of the LQ KKT band.
//!
//! Stage elimination works on the saddle coupling of the next state and its
//! dynamics multiplier,
//!
//! ```text
//! [ P'  Eᵀ    ] [x']   [ -p' - Vxt'θ ]
//! [ E   -μd I ] [λ ] = [ -f - A x - B u ]
//! ```
//!
//! whose solution is affine in `(x, u, θ)`. Substituting it into the
//! cost-to-go yields the condensed control Hamiltonian; its `(u,u)` block
//! must be SPD (otherwise the backward pass reports failure so the driver
//! can inflate regularization), and eliminating `u` gives the feedback gains
//! and the value-function update `P, p, Vxt, Vtt, vt`.

use nalgebra::{DMatrix, DVector};

use super::ldl::DenseLdlt;
use super::lqr_problem::{LqKnot, LqrProblem};

/// Make a matrix exactly symmetric by averaging with its transpose.
fn symmetrize(m: &mut DMatrix<f64>) {
    let n = m.nrows();
    debug_assert_eq!(n, m.ncols());
    for i in 0..n {
        for j in 0..i {
            let v = 0.5 * (m[(i, j)] + m[(j, i)]);
            m[(i, j)] = v;
            m[(j, i)] = v;
        }
    }
}

/// Per-knot Riccati workspace: value-function blocks, feedback gains for the
/// four solution groups `(u, v, λ, x')`, and factorization scratch.
///
/// Feedback convention: `z = ff + fb · x + fth · θ` for each group `z`.
#[derive(Debug, Clone)]
pub struct StageFactor {
    /// Value-function Hessian (`nx × nx`).
    pub pmat: DMatrix<f64>,
    /// Value-function gradient (`nx`).
    pub pvec: DVector<f64>,
    /// State-parameter cross block (`nx × nth`).
    pub vxt: DMatrix<f64>,
    /// Parameter block (`nth × nth`).
    pub vtt: DMatrix<f64>,
    /// Parameter gradient (`nth`).
    pub vt: DVector<f64>,

    pub ffu: DVector<f64>,
    pub fbu: DMatrix<f64>,
    pub fthu: DMatrix<f64>,

    pub ffv: DVector<f64>,
    pub fbv: DMatrix<f64>,
    pub fthv: DMatrix<f64>,

    pub fflam: DVector<f64>,
    pub fblam: DMatrix<f64>,
    pub fthlam: DMatrix<f64>,

    pub ffx: DVector<f64>,
    pub fbx: DMatrix<f64>,
    pub fthx: DMatrix<f64>,

    // Stage KKT scratch: factor of the (x', λ) coupling and its multi-column
    // right-hand side [base | x-sens | u-sens | θ-sens].
    kkt: DenseLdlt,
    kkt_rhs: DMatrix<f64>,
    // Condensed Hamiltonian scratch.
    huu: DenseLdlt,
    hux: DMatrix<f64>,
    hut: DMatrix<f64>,
    hu: DVector<f64>,
}

impl StageFactor {
    pub fn new(nx: usize, nu: usize, nc: usize, nx2: usize, nth: usize) -> Self {
        Self {
            pmat: DMatrix::zeros(nx, nx),
            pvec: DVector::zeros(nx),
            vxt: DMatrix::zeros(nx, nth),
            vtt: DMatrix::zeros(nth, nth),
            vt: DVector::zeros(nth),
            ffu: DVector::zeros(nu),
            fbu: DMatrix::zeros(nu, nx),
            fthu: DMatrix::zeros(nu, nth),
            ffv: DVector::zeros(nc),
            fbv: DMatrix::zeros(nc, nx),
            fthv: DMatrix::zeros(nc, nth),
            fflam: DVector::zeros(nx2),
            fblam: DMatrix::zeros(nx2, nx),
            fthlam: DMatrix::zeros(nx2, nth),
            ffx: DVector::zeros(nx2),
            fbx: DMatrix::zeros(nx2, nx),
            fthx: DMatrix::zeros(nx2, nth),
            kkt: DenseLdlt::new(2 * nx2),
            kkt_rhs: DMatrix::zeros(2 * nx2, 1 + nx + nu + nth),
            huu: DenseLdlt::new(nu),
            hux: DMatrix::zeros(nu, nx),
            hut: DMatrix::zeros(nu, nth),
            hu: DVector::zeros(nu),
        }
    }

    pub fn from_knot(knot: &LqKnot) -> Self {
        Self::new(knot.nx, knot.nu, knot.nc, knot.nx2, knot.nth)
    }
}

/// Eliminate the control of a knot given its condensed Hamiltonian pieces
/// already assembled in the factor (`huu` matrix, `hux`, `hut`, `hu`) and the
/// `(x,x)`/θ blocks accumulated in `pmat/pvec/vxt/vtt/vt`. Returns `false`
/// when the `(u,u)` block is not numerically SPD.
fn eliminate_control(fac: &mut StageFactor) -> bool {
    if !fac.huu.factor_spd() {
        return false;
    }

    fac.ffu.copy_from(&fac.hu);
    fac.ffu.neg_mut();
    fac.huu.solve_in_place(&mut fac.ffu);

    fac.fbu.copy_from(&fac.hux);
    fac.fbu.neg_mut();
    fac.huu.solve_mat_in_place(&mut fac.fbu);

    fac.fthu.copy_from(&fac.hut);
    fac.fthu.neg_mut();
    fac.huu.solve_mat_in_place(&mut fac.fthu);

    // Value-function updates from the control elimination.
    fac.pmat.gemm_tr(1.0, &fac.hux, &fac.fbu, 1.0);
    symmetrize(&mut fac.pmat);
    fac.pvec.gemm_tr(1.0, &fac.hux, &fac.ffu, 1.0);
    fac.vxt.gemm_tr(1.0, &fac.hux, &fac.fthu, 1.0);
    fac.vtt.gemm_tr(1.0, &fac.hut, &fac.fthu, 1.0);
    symmetrize(&mut fac.vtt);
    fac.vt.gemm_tr(1.0, &fac.hut, &fac.ffu, 1.0);
    true
}

/// Multiplier feedback for the relaxed path constraints:
/// `v = (C x + D u + d) / μ_eq` at the optimal control.
fn constraint_feedback(knot: &LqKnot, fac: &mut StageFactor, mueq: f64) {
    if knot.nc == 0 {
        return;
    }
    let inv = 1.0 / mueq;
    fac.ffv.copy_from(&knot.d);
    fac.ffv.gemm(1.0, &knot.D, &fac.ffu, 1.0);
    fac.ffv *= inv;
    fac.fbv.copy_from(&knot.C);
    fac.fbv.gemm(1.0, &knot.D, &fac.fbu, 1.0);
    fac.fbv *= inv;
    fac.fthv.gemm(inv, &knot.D, &fac.fthu, 0.0);
}

/// Terminal-style solve: no next value function, no dynamics elimination.
/// Used for the last knot of the horizon and for the (parameterized) tail
/// knot of a non-final leg.
fn terminal_solve(knot: &LqKnot, fac: &mut StageFactor, mueq: f64, reg: f64) -> bool {
    let inv = 1.0 / mueq;

    fac.pmat.copy_from(&knot.Q);
    for i in 0..knot.nx {
        fac.pmat[(i, i)] += reg;
    }
    fac.pmat.gemm_tr(inv, &knot.C, &knot.C, 1.0);
    fac.pvec.copy_from(&knot.q);
    fac.pvec.gemm_tr(inv, &knot.C, &knot.d, 1.0);
    fac.vxt.copy_from(&knot.Gx);
    fac.vtt.copy_from(&knot.Gth);
    fac.vt.copy_from(&knot.gamma);

    let huu = fac.huu.matrix_mut();
    huu.copy_from(&knot.R);
    huu.gemm_tr(inv, &knot.D, &knot.D, 1.0);
    symmetrize(huu);
    fac.hux.copy_from(&knot.S);
    fac.hux.gemm_tr(inv, &knot.D, &knot.C, 1.0);
    fac.hut.copy_from(&knot.Gu);
    fac.hu.copy_from(&knot.r);
    fac.hu.gemm_tr(inv, &knot.D, &knot.d, 1.0);

    if !eliminate_control(fac) {
        return false;
    }
    constraint_feedback(knot, fac, mueq);
    true
}

/// Stage solve for a knot with a successor: factor the `(x', λ)` coupling,
/// condense, eliminate the control, update the value function and all
/// feedback maps.
fn stage_solve(
    knot: &LqKnot,
    fac: &mut StageFactor,
    next: &StageFactor,
    mudyn: f64,
    mueq: f64,
    reg: f64,
) -> bool {
    let (nx, nu, nx2, nth) = (knot.nx, knot.nu, knot.nx2, knot.nth);
    let inv = 1.0 / mueq;

    // Dynamics-dual coupling [[P', Eᵀ], [E, -μd I]].
    {
        let kkt = fac.kkt.matrix_mut();
        kkt.fill(0.0);
        kkt.view_mut((0, 0), (nx2, nx2)).copy_from(&next.pmat);
        kkt.view_mut((0, nx2), (nx2, nx2)).tr_copy_from(&knot.E);
        kkt.view_mut((nx2, 0), (nx2, nx2)).copy_from(&knot.E);
        for i in 0..nx2 {
            kkt[(nx2 + i, nx2 + i)] = -mudyn;
        }
    }
    if !fac.kkt.factor() {
        return false;
    }

    // Right-hand sides: base column, then sensitivities in x, u, θ.
    {
        let rhs = &mut fac.kkt_rhs;
        rhs.fill(0.0);
        let mut top = rhs.view_mut((0, 0), (nx2, 1));
        top.copy_from(&next.pvec);
        top.neg_mut();
        let mut top_th = rhs.view_mut((0, 1 + nx + nu), (nx2, nth));
        top_th.copy_from(&next.vxt);
        top_th.neg_mut();
        let mut bot = rhs.view_mut((nx2, 0), (nx2, 1));
        bot.copy_from(&knot.f);
        bot.neg_mut();
        let mut bot_x = rhs.view_mut((nx2, 1), (nx2, nx));
        bot_x.copy_from(&knot.A);
        bot_x.neg_mut();
        let mut bot_u = rhs.view_mut((nx2, 1 + nx), (nx2, nu));
        bot_u.copy_from(&knot.B);
        bot_u.neg_mut();
    }
    fac.kkt.solve_mat_in_place(&mut fac.kkt_rhs);

    // Condensed Hamiltonian from the solved sensitivity blocks (x' rows on
    // top, λ rows below): (x,x) and θ blocks straight into the value
    // storage, (u,·) blocks into scratch.
    {
        let xn0 = fac.kkt_rhs.view((0, 0), (nx2, 1));
        let xt = fac.kkt_rhs.view((0, 1 + nx + nu), (nx2, nth));
        let lam0 = fac.kkt_rhs.view((nx2, 0), (nx2, 1));
        let la = fac.kkt_rhs.view((nx2, 1), (nx2, nx));
        let lb = fac.kkt_rhs.view((nx2, 1 + nx), (nx2, nu));
        let lt = fac.kkt_rhs.view((nx2, 1 + nx + nu), (nx2, nth));

        fac.pmat.copy_from(&knot.Q);
        for i in 0..nx {
            fac.pmat[(i, i)] += reg;
        }
        fac.pmat.gemm_tr(inv, &knot.C, &knot.C, 1.0);
        fac.pmat.gemm_tr(1.0, &knot.A, &la, 1.0);
        symmetrize(&mut fac.pmat);

        fac.pvec.copy_from(&knot.q);
        fac.pvec.gemm_tr(inv, &knot.C, &knot.d, 1.0);
        fac.pvec.gemm_tr(1.0, &knot.A, &lam0, 1.0);

        fac.vxt.copy_from(&knot.Gx);
        fac.vxt.gemm_tr(1.0, &knot.A, &lt, 1.0);

        fac.vtt.copy_from(&knot.Gth);
        fac.vtt += &next.vtt;
        fac.vtt.gemm_tr(1.0, &next.vxt, &xt, 1.0);

        fac.vt.copy_from(&knot.gamma);
        fac.vt += &next.vt;
        fac.vt.gemm_tr(1.0, &next.vxt, &xn0, 1.0);

        let huu = fac.huu.matrix_mut();
        huu.copy_from(&knot.R);
        huu.gemm_tr(inv, &knot.D, &knot.D, 1.0);
        huu.gemm_tr(1.0, &knot.B, &lb, 1.0);
        symmetrize(huu);
        fac.hux.copy_from(&knot.S);
        fac.hux.gemm_tr(inv, &knot.D, &knot.C, 1.0);
        fac.hux.gemm_tr(1.0, &knot.B, &la, 1.0);
        fac.hut.copy_from(&knot.Gu);
        fac.hut.gemm_tr(1.0, &knot.B, &lt, 1.0);
        fac.hu.copy_from(&knot.r);
        fac.hu.gemm_tr(inv, &knot.D, &knot.d, 1.0);
        fac.hu.gemm_tr(1.0, &knot.B, &lam0, 1.0);
    }

    if !eliminate_control(fac) {
        return false;
    }

    // Primal-dual propagation maps at the optimal control.
    {
        let xn0 = fac.kkt_rhs.view((0, 0), (nx2, 1));
        let xa = fac.kkt_rhs.view((0, 1), (nx2, nx));
        let xb = fac.kkt_rhs.view((0, 1 + nx), (nx2, nu));
        let xt = fac.kkt_rhs.view((0, 1 + nx + nu), (nx2, nth));
        let lam0 = fac.kkt_rhs.view((nx2, 0), (nx2, 1));
        let la = fac.kkt_rhs.view((nx2, 1), (nx2, nx));
        let lb = fac.kkt_rhs.view((nx2, 1 + nx), (nx2, nu));
        let lt = fac.kkt_rhs.view((nx2, 1 + nx + nu), (nx2, nth));

        fac.fblam.copy_from(&la);
        fac.fblam.gemm(1.0, &lb, &fac.fbu, 1.0);
        fac.fflam.copy_from(&lam0);
        fac.fflam.gemm(1.0, &lb, &fac.ffu, 1.0);
        fac.fthlam.copy_from(&lt);
        fac.fthlam.gemm(1.0, &lb, &fac.fthu, 1.0);

        fac.fbx.copy_from(&xa);
        fac.fbx.gemm(1.0, &xb, &fac.fbu, 1.0);
        fac.ffx.copy_from(&xn0);
        fac.ffx.gemm(1.0, &xb, &fac.ffu, 1.0);
        fac.fthx.copy_from(&xt);
        fac.fthx.gemm(1.0, &xb, &fac.fthu, 1.0);
    }

    constraint_feedback(knot, fac, mueq);
    true
}

/// Backward sweep over a contiguous span of knots. The last knot of the span
/// is solved terminal-style (its parameterization carries any coupling to a
/// successor leg).
pub(crate) fn backward_impl(
    stages: &[LqKnot],
    mudyn: f64,
    mueq: f64,
    reg: f64,
    datas: &mut [StageFactor],
) -> bool {
    debug_assert_eq!(stages.len(), datas.len());
    let n = stages.len();
    if n == 0 {
        return true;
    }
    if !terminal_solve(&stages[n - 1], &mut datas[n - 1], mueq, reg) {
        return false;
    }
    for t in (0..n - 1).rev() {
        let (head, tail) = datas.split_at_mut(t + 1);
        let fac = &mut head[t];
        let next = &tail[0];
        if !stage_solve(&stages[t], fac, next, mudyn, mueq, reg) {
            return false;
        }
    }
    true
}

/// Forward sweep over a span: `xs[0]` and `lams[0]` hold the span's boundary
/// values; controls, constraint multipliers, dynamics multipliers and states
/// propagate through the stored affine maps, with `theta` the costate gluing
/// this span to its successor (if any).
pub(crate) fn forward_impl(
    stages: &[LqKnot],
    datas: &[StageFactor],
    xs: &mut [DVector<f64>],
    us: &mut [DVector<f64>],
    vs: &mut [DVector<f64>],
    lams: &mut [DVector<f64>],
    theta: Option<&DVector<f64>>,
) {
    let n = stages.len();
    for t in 0..n {
        let knot = &stages[t];
        let fac = &datas[t];
        if knot.nu > 0 {
            us[t].copy_from(&fac.ffu);
            us[t].gemv(1.0, &fac.fbu, &xs[t], 1.0);
            if let Some(th) = theta {
                us[t].gemv(1.0, &fac.fthu, th, 1.0);
            }
        }
        if knot.nc > 0 {
            vs[t].copy_from(&fac.ffv);
            vs[t].gemv(1.0, &fac.fbv, &xs[t], 1.0);
            if let Some(th) = theta {
                vs[t].gemv(1.0, &fac.fthv, th, 1.0);
            }
        }
        if t + 1 < n {
            let (xcur, xnext) = {
                let (a, b) = xs.split_at_mut(t + 1);
                (&a[t], &mut b[0])
            };
            lams[t + 1].copy_from(&fac.fflam);
            lams[t + 1].gemv(1.0, &fac.fblam, xcur, 1.0);
            xnext.copy_from(&fac.ffx);
            xnext.gemv(1.0, &fac.fbx, xcur, 1.0);
            if let Some(th) = theta {
                lams[t + 1].gemv(1.0, &fac.fthlam, th, 1.0);
                xnext.gemv(1.0, &fac.fthx, th, 1.0);
            }
        }
    }
}

/// Serial proximal Riccati solver over the whole horizon.
pub struct ProximalRiccati {
    pub datas: Vec<StageFactor>,
    kkt0: DenseLdlt,
    rhs0: DVector<f64>,
}

impl ProximalRiccati {
    pub fn new(problem: &LqrProblem) -> Self {
        let nc0 = problem.nc0();
        let nx0 = problem.stages[0].nx;
        Self {
            datas: problem.stages.iter().map(StageFactor::from_knot).collect(),
            kkt0: DenseLdlt::new(nc0 + nx0),
            rhs0: DVector::zeros(nc0 + nx0),
        }
    }

    /// Factorize the KKT band. Returns `false` on numerical breakdown so the
    /// caller can inflate `reg` and retry.
    pub fn backward(&mut self, problem: &LqrProblem, mudyn: f64, mueq: f64, reg: f64) -> bool {
        if !backward_impl(&problem.stages, mudyn, mueq, reg, &mut self.datas) {
            return false;
        }
        // Initial-stage saddle system [[-μd I, G0], [G0ᵀ, P0]].
        let nc0 = problem.nc0();
        let nx0 = problem.stages[0].nx;
        let kkt = self.kkt0.matrix_mut();
        kkt.fill(0.0);
        for i in 0..nc0 {
            kkt[(i, i)] = -mudyn;
        }
        kkt.view_mut((0, nc0), (nc0, nx0)).copy_from(&problem.G0);
        kkt.view_mut((nc0, 0), (nx0, nc0))
            .tr_copy_from(&problem.G0);
        kkt.view_mut((nc0, nc0), (nx0, nx0))
            .copy_from(&self.datas[0].pmat);
        self.kkt0.factor()
    }

    /// Solve for the primal-dual trajectory. `xs` has `N+1` entries, `us`,
    /// `vs` one per knot (empty where a knot has no controls/constraints),
    /// `lams[0]` the initial-constraint multiplier and `lams[t+1]` the
    /// dynamics multiplier into state `t+1`.
    pub fn forward(
        &mut self,
        problem: &LqrProblem,
        xs: &mut [DVector<f64>],
        us: &mut [DVector<f64>],
        vs: &mut [DVector<f64>],
        lams: &mut [DVector<f64>],
        theta: Option<&DVector<f64>>,
    ) {
        let nc0 = problem.nc0();
        let nx0 = problem.stages[0].nx;
        {
            let mut top = self.rhs0.rows_mut(0, nc0);
            top.copy_from(&problem.g0);
            top.neg_mut();
        }
        {
            let mut bot = self.rhs0.rows_mut(nc0, nx0);
            bot.copy_from(&self.datas[0].pvec);
            if let Some(th) = theta {
                bot.gemv(1.0, &self.datas[0].vxt, th, 1.0);
            }
            bot.neg_mut();
        }
        self.kkt0.solve_in_place(&mut self.rhs0);
        lams[0].copy_from(&self.rhs0.rows(0, nc0));
        xs[0].copy_from(&self.rhs0.rows(nc0, nx0));

        forward_impl(&problem.stages, &self.datas, xs, us, vs, lams, theta);
    }
}
