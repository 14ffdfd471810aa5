//! Solver outputs and diagnostics.

use std::fmt;

use nalgebra::DVector;

use crate::problem::TrajOptProblem;

/// Terminal state of a solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverStatus {
    /// Primal and dual infeasibility both below tolerance.
    Converged,

    /// Iteration budget (`max_iters` or `max_al_iters`) exhausted.
    MaxItersReached,

    /// The Riccati backward pass kept failing at maximal regularization.
    RiccatiFailure,

    /// Line search exhausted its backtracking budget without sufficient
    /// decrease; the last iterate was kept.
    LineSearchFailure,
}

impl fmt::Display for SolverStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolverStatus::Converged => write!(f, "Converged"),
            SolverStatus::MaxItersReached => write!(f, "MaxItersReached"),
            SolverStatus::RiccatiFailure => write!(f, "RiccatiFailure"),
            SolverStatus::LineSearchFailure => write!(f, "LineSearchFailure"),
        }
    }
}

/// Solve results: primal-dual trajectory, counters and achieved accuracy.
#[derive(Debug, Clone)]
pub struct Results {
    /// State trajectory (`N+1` entries).
    pub xs: Vec<DVector<f64>>,
    /// Control trajectory (`N` entries).
    pub us: Vec<DVector<f64>>,
    /// Initial-constraint and dynamics multipliers (`N+1` entries).
    pub lams: Vec<DVector<f64>>,
    /// Path/terminal constraint multipliers, stacked per stage (`N+1`
    /// entries).
    pub vs: Vec<DVector<f64>>,

    pub status: SolverStatus,
    pub converged: bool,

    /// Outer (augmented-Lagrangian) iterations.
    pub al_iter: usize,
    /// Total inner (Newton) iterations.
    pub num_iters: usize,
    /// Regularization increases performed across the solve.
    pub num_reg_bumps: usize,

    pub prim_infeas: f64,
    pub dual_infeas: f64,
    /// Trajectory cost at the final iterate.
    pub traj_cost: f64,
    /// Merit-function value at the final iterate.
    pub merit_value: f64,

    /// Wall-clock solve time in milliseconds.
    pub solve_time_ms: u64,
}

impl Results {
    pub fn new(problem: &TrajOptProblem) -> Self {
        let nsteps = problem.num_steps();
        let xs: Vec<DVector<f64>> = (0..=nsteps)
            .map(|t| {
                if t < nsteps {
                    DVector::zeros(problem.stages[t].nx())
                } else {
                    DVector::zeros(problem.stages[nsteps - 1].xspace_next.nx())
                }
            })
            .collect();
        let us: Vec<DVector<f64>> = (0..nsteps)
            .map(|t| DVector::zeros(problem.stages[t].nu()))
            .collect();
        let mut lams = Vec::with_capacity(nsteps + 1);
        lams.push(DVector::zeros(problem.init_constraint.nr()));
        for t in 0..nsteps {
            lams.push(DVector::zeros(problem.stages[t].ndx2()));
        }
        let mut vs: Vec<DVector<f64>> = (0..nsteps)
            .map(|t| DVector::zeros(problem.stages[t].nc()))
            .collect();
        vs.push(DVector::zeros(
            problem.term_constraints.iter().map(|c| c.func.nr()).sum(),
        ));

        Self {
            xs,
            us,
            lams,
            vs,
            status: SolverStatus::MaxItersReached,
            converged: false,
            al_iter: 0,
            num_iters: 0,
            num_reg_bumps: 0,
            prim_infeas: f64::INFINITY,
            dual_infeas: f64::INFINITY,
            traj_cost: 0.0,
            merit_value: 0.0,
            solve_time_ms: 0,
        }
    }
}

impl fmt::Display for Results {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Results {{ status: {}, iters: {} (outer {}), prim: {:.3e}, dual: {:.3e}, cost: {:.6e} }}",
            self.status, self.num_iters, self.al_iter, self.prim_infeas, self.dual_infeas, self.traj_cost
        )
    }
}
