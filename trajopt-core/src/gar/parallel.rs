//! Parallel-condensing Riccati solver.
//!
//! The horizon is split into `J` contiguous legs. Every leg is factorized
//! independently (the tail knot of a non-final leg is parameterized on the
//! costate gluing it to the next leg), then a condensed symmetric
//! block-tridiagonal saddle-point system of size `2J` in the leg-boundary
//! costates and states is solved, and the per-leg forward passes expand the
//! solution — again in parallel.

use std::sync::atomic::{AtomicBool, Ordering};

use nalgebra::{DMatrix, DVector};

use super::block_tridiag::symmetric_block_tridiagonal_solve;
use super::ldl::DenseLdlt;
use super::lqr_problem::{LqKnot, LqrProblem};
use super::riccati::{backward_impl, forward_impl, StageFactor};
use crate::threads::ThreadPool;

pub struct ParallelRiccati {
    pub datas: Vec<StageFactor>,
    num_legs: usize,
    /// Splitting indices: `split_idx[0] = 0`, `split_idx[J] = N+1`, strictly
    /// increasing.
    split_idx: Vec<usize>,

    // Condensed saddle system, pre-sized at construction so assembly stays
    // allocation-free.
    subdiagonal: Vec<DMatrix<f64>>,
    diagonal: Vec<DMatrix<f64>>,
    superdiagonal: Vec<DMatrix<f64>>,
    rhs: Vec<DVector<f64>>,
    facs: Vec<DenseLdlt>,
    /// Boundary costates copied out before the parallel forward so legs only
    /// touch their own slices.
    theta_buf: Vec<DVector<f64>>,
}

impl ParallelRiccati {
    /// Build the solver for `problem`, splitting into `num_legs` legs.
    /// Non-final legs get their knots parameterized on the gluing costate;
    /// this resizes the parameterization blocks of `problem`'s knots.
    pub fn new(problem: &mut LqrProblem, num_legs: usize) -> Self {
        let n_knots = problem.stages.len();
        let num_legs = num_legs.clamp(1, n_knots);

        let mut split_idx = vec![0usize; num_legs + 1];
        for (i, s) in split_idx.iter_mut().enumerate() {
            *s = i * n_knots / num_legs;
        }
        split_idx[num_legs] = n_knots;

        for i in 0..num_legs {
            let (i0, i1) = (split_idx[i], split_idx[i + 1]);
            let last_leg = i == num_legs - 1;
            if !last_leg {
                let nth = problem.stages[i1 - 1].nx2;
                for t in i0..i1 {
                    problem.stages[t].add_parameterization(nth);
                }
            }
        }
        // Tail-knot parameterization is refreshed from the dynamics blocks at
        // every backward call; buffers just need their final shapes here.

        let datas: Vec<StageFactor> = problem.stages.iter().map(StageFactor::from_knot).collect();

        // Condensed block dimensions: (λ0, x0), then (θ_i, x at split i).
        let mut dims = Vec::with_capacity(2 * num_legs);
        dims.push(problem.nc0());
        dims.push(problem.stages[0].nx);
        for i in 1..num_legs {
            dims.push(problem.stages[split_idx[i] - 1].nth);
            dims.push(problem.stages[split_idx[i]].nx);
        }

        let nblk = dims.len();
        let diagonal: Vec<DMatrix<f64>> =
            dims.iter().map(|&d| DMatrix::zeros(d, d)).collect();
        let superdiagonal: Vec<DMatrix<f64>> = (0..nblk - 1)
            .map(|k| DMatrix::zeros(dims[k], dims[k + 1]))
            .collect();
        let subdiagonal: Vec<DMatrix<f64>> = (0..nblk - 1)
            .map(|k| DMatrix::zeros(dims[k + 1], dims[k]))
            .collect();
        let rhs: Vec<DVector<f64>> = dims.iter().map(|&d| DVector::zeros(d)).collect();
        let facs: Vec<DenseLdlt> = dims.iter().map(|&d| DenseLdlt::new(d)).collect();
        let theta_buf: Vec<DVector<f64>> = (1..num_legs)
            .map(|i| DVector::zeros(problem.stages[split_idx[i]].nx))
            .collect();

        Self {
            datas,
            num_legs,
            split_idx,
            subdiagonal,
            diagonal,
            superdiagonal,
            rhs,
            facs,
            theta_buf,
        }
    }

    pub fn num_legs(&self) -> usize {
        self.num_legs
    }

    /// Splitting-index sanity: starts at zero, strictly increasing, covers
    /// the knot array.
    pub fn check_indices(&self) -> bool {
        if self.split_idx[0] != 0 {
            return false;
        }
        for i in 0..self.num_legs {
            if self.split_idx[i] >= self.split_idx[i + 1] {
                return false;
            }
        }
        self.split_idx[self.num_legs] == self.datas.len()
    }

    /// Per-leg parallel backward passes, then the condensed saddle solve.
    /// A failed leg aborts before the condensed solve so the driver can
    /// inflate regularization.
    pub fn backward(
        &mut self,
        problem: &mut LqrProblem,
        mudyn: f64,
        mueq: f64,
        reg: f64,
        pool: &ThreadPool,
    ) -> bool {
        debug_assert!(self.check_indices());

        // Refresh the tail-knot parameterization from the current dynamics
        // blocks: the gluing costate enters the leg through Gx = Aᵀ,
        // Gu = Bᵀ, γ = f.
        for i in 0..self.num_legs - 1 {
            let tail = &mut problem.stages[self.split_idx[i + 1] - 1];
            tail.Gx.tr_copy_from(&tail.A);
            tail.Gu.tr_copy_from(&tail.B);
            tail.gamma.copy_from(&tail.f);
        }

        let ok = AtomicBool::new(true);
        let split_idx = &self.split_idx;
        let num_legs = self.num_legs;
        {
            let mut datas_rest: &mut [StageFactor] = &mut self.datas;
            let mut stages_rest: &[LqKnot] = &problem.stages;
            pool.install(|| {
                rayon::scope(|s| {
                    for i in 0..num_legs {
                        let len = split_idx[i + 1] - split_idx[i];
                        let (dleg, drest) = std::mem::take(&mut datas_rest).split_at_mut(len);
                        datas_rest = drest;
                        let (sleg, srest) = stages_rest.split_at(len);
                        stages_rest = srest;
                        let ok = &ok;
                        s.spawn(move |_| {
                            if !backward_impl(sleg, mudyn, mueq, reg, dleg) {
                                ok.store(false, Ordering::Relaxed);
                            }
                        });
                    }
                });
            });
        }
        if !ok.load(Ordering::Relaxed) {
            return false;
        }

        self.assemble_condensed_system(problem, mudyn);
        symmetric_block_tridiagonal_solve(
            &mut self.subdiagonal,
            &mut self.diagonal,
            &mut self.superdiagonal,
            &mut self.rhs,
            &mut self.facs,
        )
    }

    /// Write the condensed saddle system into the pre-sized block storage.
    fn assemble_condensed_system(&mut self, problem: &LqrProblem, mudyn: f64) {
        let nc0 = problem.nc0();
        let j = self.num_legs;

        self.diagonal[0].fill(0.0);
        for i in 0..nc0 {
            self.diagonal[0][(i, i)] = -mudyn;
        }
        self.superdiagonal[0].copy_from(&problem.G0);
        self.diagonal[1].copy_from(&self.datas[0].pmat);
        if j > 1 {
            self.superdiagonal[1].copy_from(&self.datas[0].vxt);
        }

        self.rhs[0].copy_from(&problem.g0);
        self.rhs[1].copy_from(&self.datas[0].pvec);

        for i in 0..j - 1 {
            let i0 = self.split_idx[i];
            let i1 = self.split_idx[i + 1];
            let k = 2 * (i + 1);

            // θ_{i+1} row: the leg's parameter curvature plus the proximal
            // relaxation of the boundary dynamics constraint.
            self.diagonal[k].copy_from(&self.datas[i0].vtt);
            let nth = self.diagonal[k].nrows();
            for jj in 0..nth {
                self.diagonal[k][(jj, jj)] -= mudyn;
            }
            self.diagonal[k + 1].copy_from(&self.datas[i1].pmat);
            // Stitching matrix of the boundary dynamics (tail knot).
            self.superdiagonal[k].copy_from(&problem.stages[i1 - 1].E);
            if i + 2 < j {
                self.superdiagonal[k + 1].copy_from(&self.datas[i1].vxt);
            }

            self.rhs[k].copy_from(&self.datas[i0].vt);
            self.rhs[k + 1].copy_from(&self.datas[i1].pvec);
        }

        for k in 0..2 * j - 1 {
            self.subdiagonal[k].tr_copy_from(&self.superdiagonal[k]);
        }
        for b in &mut self.rhs {
            b.neg_mut();
        }
    }

    /// Scatter the condensed solution to the leg boundaries, then run the
    /// per-leg forward passes in parallel.
    pub fn forward(
        &mut self,
        problem: &LqrProblem,
        xs: &mut [DVector<f64>],
        us: &mut [DVector<f64>],
        vs: &mut [DVector<f64>],
        lams: &mut [DVector<f64>],
        pool: &ThreadPool,
    ) {
        let j = self.num_legs;
        for i in 0..j {
            let i0 = self.split_idx[i];
            lams[i0].copy_from(&self.rhs[2 * i]);
            xs[i0].copy_from(&self.rhs[2 * i + 1]);
        }
        for i in 0..j - 1 {
            self.theta_buf[i].copy_from(&lams[self.split_idx[i + 1]]);
        }

        let split_idx = &self.split_idx;
        let theta_buf = &self.theta_buf;
        let mut xs_rest = xs;
        let mut us_rest = us;
        let mut vs_rest = vs;
        let mut lams_rest = lams;
        let mut stages_rest: &[LqKnot] = &problem.stages;
        let mut datas_rest: &[StageFactor] = &self.datas;
        pool.install(|| {
            rayon::scope(|s| {
                for i in 0..j {
                    let len = split_idx[i + 1] - split_idx[i];
                    let (xleg, xrest) = std::mem::take(&mut xs_rest).split_at_mut(len);
                    xs_rest = xrest;
                    let (uleg, urest) = std::mem::take(&mut us_rest).split_at_mut(len);
                    us_rest = urest;
                    let (vleg, vrest) = std::mem::take(&mut vs_rest).split_at_mut(len);
                    vs_rest = vrest;
                    let (lleg, lrest) = std::mem::take(&mut lams_rest).split_at_mut(len);
                    lams_rest = lrest;
                    let (sleg, srest) = stages_rest.split_at(len);
                    stages_rest = srest;
                    let (dleg, drest) = datas_rest.split_at(len);
                    datas_rest = drest;
                    let theta = if i + 1 < j {
                        Some(&theta_buf[i])
                    } else {
                        None
                    };
                    s.spawn(move |_| {
                        forward_impl(sleg, dleg, xleg, uleg, vleg, lleg, theta);
                    });
                }
            });
        });
    }
}
