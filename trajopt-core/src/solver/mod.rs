//! ProxDDP: proximal augmented-Lagrangian DDP solver.
//!
//! The outer loop runs a BCL (Bertsekas constrained-Lagrangian) penalty
//! schedule on `(μ, ε, η)`; the inner loop performs primal-dual Newton steps
//! whose search directions come from the structured Riccati solvers in
//! [`crate::gar`], globalized by a line search on the primal-dual
//! augmented-Lagrangian merit function.

mod linesearch;
mod merit;
mod results;
mod scaler;
mod workspace;

pub use linesearch::{LinesearchOptions, LsInterpolation, LsMode, LsResult};
pub use results::{Results, SolverStatus};
pub use scaler::{apply_default_scaling_strategy, ConstraintProxScaler, ScalerError};
pub use workspace::Workspace;

use std::time::Instant;

use nalgebra::DVector;
use thiserror::Error;

use crate::gar::{
    lqr_fill_residual_rhs, LqrProblem, ParallelRiccati, ProximalRiccati, StageFactor,
};
use crate::problem::TrajOptProblem;
use crate::threads::{ThreadPool, ThreadPoolError};
use crate::utils::inf_norm;
use merit::{directional_derivative, evaluate_merit, MeritParams};

/// Text-telemetry verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum VerboseLevel {
    Quiet,
    Verbose,
    VeryVerbose,
}

/// How multipliers are refreshed after an accepted outer iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiplierUpdateMode {
    /// Keep the multipliers produced by the Newton system.
    Newton,
    /// First-order update `λ⁺ = λ̂ + c/μ` (with normal-cone projection).
    Primal,
    /// Primal-dual combination of the two.
    PrimalDual,
}

/// Hessian model of the Lagrangian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HessianApprox {
    /// Drop second-order constraint terms.
    GaussNewton,
    /// Include caller-supplied vector-Hessian products.
    Exact,
}

/// Trial-point generation during the line search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RolloutType {
    /// Apply the Riccati step on the linearized dynamics.
    Linear,
    /// Integrate the true dynamics under the feedback policy; falls back to
    /// the linear rollout on divergence.
    Nonlinear,
}

/// BCL outer-loop schedule parameters.
#[derive(Debug, Clone, Copy)]
pub struct BclParams {
    /// Tolerance exponent applied on multiplier rejection.
    pub prim_alpha: f64,
    /// Tolerance exponent applied on multiplier acceptance.
    pub prim_beta: f64,
    /// Inner-tolerance exponent on rejection.
    pub dual_alpha: f64,
    /// Inner-tolerance exponent on acceptance.
    pub dual_beta: f64,
    /// Factor applied to μ on rejection.
    pub mu_update_factor: f64,
    /// Base primal tolerance.
    pub prim_tol0: f64,
    /// Base inner (stationarity) tolerance.
    pub inner_tol0: f64,
}

impl Default for BclParams {
    fn default() -> Self {
        Self {
            prim_alpha: 0.1,
            prim_beta: 0.9,
            dual_alpha: 1.0,
            dual_beta: 1.0,
            mu_update_factor: 0.01,
            prim_tol0: 1.0,
            inner_tol0: 1.0,
        }
    }
}

/// Construction- and `setup`-time failures.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("problem integrity check failed: {0}")]
    Problem(String),

    #[error("warm start for {what} has length {got}, expected {expected}")]
    WarmStart {
        what: &'static str,
        got: usize,
        expected: usize,
    },

    #[error("solver has not been set up; call setup() first")]
    NotSetup,

    #[error(transparent)]
    ThreadPool(#[from] ThreadPoolError),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Proximal augmented-Lagrangian DDP solver.
///
/// Construct, tune the public fields, `setup` against a problem, then `run`.
pub struct SolverProxDdp {
    /// Target tolerance on primal and dual infeasibility.
    pub tol: f64,
    /// Initial AL penalty parameter.
    pub mu_init: f64,
    /// Initial proximal parameter.
    pub rho_init: f64,
    /// Total inner-iteration budget.
    pub max_iters: usize,
    pub verbose: VerboseLevel,
    pub hess_approx: HessianApprox,

    pub bcl_params: BclParams,
    /// Lower bound on the AL penalty parameter.
    pub mu_min: f64,
    /// Sub-iteration budget for implicit-dynamics rollouts.
    pub rollout_max_iters: usize,
    /// Outer-iteration budget.
    pub max_al_iters: usize,
    /// Line-search configuration (mode, interpolation, Armijo constant).
    pub ls_options: LinesearchOptions,
    pub rollout_type: RolloutType,
    /// Weight of the primal-dual coupling in the merit function.
    pub dual_weight: f64,
    /// Regularization floor.
    pub reg_min: f64,
    /// Regularization ceiling; breaching it aborts with `RiccatiFailure`.
    pub reg_max: f64,
    pub multiplier_update_mode: MultiplierUpdateMode,
    /// Residual-correction passes after each KKT solve.
    pub max_refinement_steps: usize,
    /// KKT residual norm above which refinement triggers.
    pub refinement_threshold: f64,
    /// Worker threads for problem evaluation and the parallel Riccati
    /// solver; 1 selects the serial path everywhere.
    pub num_threads: usize,

    // Post-run observables for the introspection hooks.
    mu: f64,
    rho: f64,

    workspace: Option<Workspace>,
    results: Option<Results>,
    pool: Option<ThreadPool>,
    serial: Option<ProximalRiccati>,
    parallel: Option<ParallelRiccati>,
}

impl SolverProxDdp {
    pub fn new(tol: f64) -> Self {
        Self::with_params(
            tol,
            1e-2,
            0.0,
            1000,
            VerboseLevel::Quiet,
            HessianApprox::GaussNewton,
        )
    }

    pub fn with_params(
        tol: f64,
        mu_init: f64,
        rho_init: f64,
        max_iters: usize,
        verbose: VerboseLevel,
        hess_approx: HessianApprox,
    ) -> Self {
        Self {
            tol,
            mu_init,
            rho_init,
            max_iters,
            verbose,
            hess_approx,
            bcl_params: BclParams::default(),
            mu_min: 1e-8,
            rollout_max_iters: 1,
            max_al_iters: 100,
            ls_options: LinesearchOptions::default(),
            rollout_type: RolloutType::Linear,
            dual_weight: 1.0,
            reg_min: 1e-9,
            reg_max: 1e9,
            multiplier_update_mode: MultiplierUpdateMode::Newton,
            max_refinement_steps: 1,
            refinement_threshold: 1e-13,
            num_threads: 1,
            mu: mu_init,
            rho: rho_init,
            workspace: None,
            results: None,
            pool: None,
            serial: None,
            parallel: None,
        }
    }

    /// Allocate workspace, results and the Riccati solvers for `problem`.
    pub fn setup(&mut self, problem: &TrajOptProblem) -> Result<(), SetupError> {
        self.validate_params()?;
        problem.check_integrity().map_err(SetupError::Problem)?;

        let mut ws = Workspace::new(problem);
        let results = Results::new(problem);
        let pool = ThreadPool::new(self.num_threads)?;

        let parallel = if pool.num_threads() > 1 {
            let legs = pool.num_threads().min(problem.num_steps() + 1);
            Some(ParallelRiccati::new(&mut ws.lqr_problem, legs))
        } else {
            None
        };
        // The refinement system (and the serial solver operating on it) is
        // never parameterized: residual corrections solve the whole horizon
        // in one sweep.
        ws.lqr_refine = ws.lqr_problem.clone();
        ws.lqr_refine.add_parameterization(0);
        let serial = ProximalRiccati::new(&ws.lqr_refine);

        self.workspace = Some(ws);
        self.results = Some(results);
        self.pool = Some(pool);
        self.serial = Some(serial);
        self.parallel = parallel;
        Ok(())
    }

    fn validate_params(&self) -> Result<(), SetupError> {
        if !(self.tol > 0.0) {
            return Err(SetupError::InvalidParameter("tol must be positive".into()));
        }
        if !(self.mu_init > 0.0) {
            return Err(SetupError::InvalidParameter(
                "mu_init must be positive".into(),
            ));
        }
        if self.rho_init < 0.0 {
            return Err(SetupError::InvalidParameter(
                "rho_init must be non-negative".into(),
            ));
        }
        if !(self.mu_min > 0.0) {
            return Err(SetupError::InvalidParameter("mu_min must be positive".into()));
        }
        if !(self.reg_min > 0.0 && self.reg_max >= self.reg_min) {
            return Err(SetupError::InvalidParameter(
                "require 0 < reg_min <= reg_max".into(),
            ));
        }
        Ok(())
    }

    pub fn results(&self) -> Option<&Results> {
        self.results.as_ref()
    }

    pub fn workspace(&self) -> Option<&Workspace> {
        self.workspace.as_ref()
    }

    /// Run the solver from the given initial trajectory (empty slices select
    /// the neutral initialization). Returns the convergence flag.
    pub fn run(
        &mut self,
        problem: &TrajOptProblem,
        xs_init: &[DVector<f64>],
        us_init: &[DVector<f64>],
    ) -> Result<bool, SetupError> {
        self.run_with_multipliers(problem, xs_init, us_init, &[], &[])
    }

    /// [`SolverProxDdp::run`] with warm-started multipliers.
    pub fn run_with_multipliers(
        &mut self,
        problem: &TrajOptProblem,
        xs_init: &[DVector<f64>],
        us_init: &[DVector<f64>],
        lams_init: &[DVector<f64>],
        vs_init: &[DVector<f64>],
    ) -> Result<bool, SetupError> {
        let mut ws = self.workspace.take().ok_or(SetupError::NotSetup)?;
        let mut results = self.results.take().ok_or(SetupError::NotSetup)?;
        let pool = self.pool.take().ok_or(SetupError::NotSetup)?;
        let mut serial = self.serial.take().ok_or(SetupError::NotSetup)?;
        let mut parallel = self.parallel.take();

        let out = self.run_inner(
            problem,
            &mut ws,
            &mut results,
            &pool,
            &mut serial,
            parallel.as_mut(),
            xs_init,
            us_init,
            lams_init,
            vs_init,
        );

        self.workspace = Some(ws);
        self.results = Some(results);
        self.pool = Some(pool);
        self.serial = Some(serial);
        self.parallel = parallel;
        out
    }

    /// Rebuild the LQ subproblem at the workspace's current iterate.
    pub fn update_lq_subproblem(&mut self, problem: &TrajOptProblem) -> Result<(), SetupError> {
        let mu = self.mu;
        let rho = self.rho;
        let hess = self.hess_approx;
        let dw = self.dual_weight;
        let pool = self.pool.as_ref().ok_or(SetupError::NotSetup)?;
        let ws = self.workspace.as_mut().ok_or(SetupError::NotSetup)?;
        problem.evaluate(&ws.xs, &ws.us, &mut ws.prob_data, pool);
        problem.compute_derivatives(
            &ws.xs,
            &ws.us,
            &mut ws.prob_data,
            pool,
            matches!(hess, HessianApprox::Exact),
        );
        compute_multipliers(problem, ws, mu, dw);
        update_lq(problem, ws, mu, rho, hess);
        Ok(())
    }

    /// Stationarity criterion of the inner loop at the current iterate.
    pub fn compute_criterion(&mut self, problem: &TrajOptProblem) -> Result<f64, SetupError> {
        let mu = self.mu;
        let rho = self.rho;
        let dw = self.dual_weight;
        let pool = self.pool.as_ref().ok_or(SetupError::NotSetup)?;
        let ws = self.workspace.as_mut().ok_or(SetupError::NotSetup)?;
        problem.evaluate(&ws.xs, &ws.us, &mut ws.prob_data, pool);
        problem.compute_derivatives(&ws.xs, &ws.us, &mut ws.prob_data, pool, true);
        compute_multipliers(problem, ws, mu, dw);
        let (crit, _dual) = compute_gradients(problem, ws, rho);
        Ok(crit)
    }

    /// Primal infeasibility at the current iterate.
    pub fn compute_infeasibilities(&mut self, problem: &TrajOptProblem) -> Result<f64, SetupError> {
        let mu = self.mu;
        let pool = self.pool.as_ref().ok_or(SetupError::NotSetup)?;
        let ws = self.workspace.as_mut().ok_or(SetupError::NotSetup)?;
        problem.evaluate(&ws.xs, &ws.us, &mut ws.prob_data, pool);
        Ok(compute_prim_infeas(problem, ws, mu))
    }

    fn run_inner(
        &mut self,
        problem: &TrajOptProblem,
        ws: &mut Workspace,
        results: &mut Results,
        pool: &ThreadPool,
        serial: &mut ProximalRiccati,
        mut parallel: Option<&mut ParallelRiccati>,
        xs_init: &[DVector<f64>],
        us_init: &[DVector<f64>],
        lams_init: &[DVector<f64>],
        vs_init: &[DVector<f64>],
    ) -> Result<bool, SetupError> {
        let start = Instant::now();
        init_trajectory(problem, ws, xs_init, us_init, lams_init, vs_init)?;

        let nsteps = ws.nsteps;
        let bcl = self.bcl_params;
        let mut mu = self.mu_init.max(self.mu_min);
        let rho = self.rho_init;
        let mut reg = self.reg_min;
        let mut prim_tol = (bcl.prim_tol0 * mu.powf(bcl.prim_alpha)).max(self.tol);
        let mut inner_tol = (bcl.inner_tol0 * mu.powf(bcl.dual_alpha)).max(self.tol);

        let mut iter = 0usize;
        let mut al_iter = 0usize;
        let mut num_reg_bumps = 0usize;
        let mut status = SolverStatus::MaxItersReached;
        let mut converged = false;
        let mut merit_cur = 0.0;

        'outer: while al_iter < self.max_al_iters {
            if self.verbose >= VerboseLevel::Verbose {
                eprintln!(
                    "[AL {:>3}] mu={:.3e}  eps={:.3e}  eta={:.3e}",
                    al_iter, mu, prim_tol, inner_tol
                );
            }

            // Inner primal-dual Newton loop.
            loop {
                if iter >= self.max_iters {
                    status = SolverStatus::MaxItersReached;
                    break 'outer;
                }

                problem.evaluate(&ws.xs, &ws.us, &mut ws.prob_data, pool);
                problem.compute_derivatives(
                    &ws.xs,
                    &ws.us,
                    &mut ws.prob_data,
                    pool,
                    true,
                );
                compute_multipliers(problem, ws, mu, self.dual_weight);
                let (criterion, dual_infeas) = compute_gradients(problem, ws, rho);
                let prim_infeas = compute_prim_infeas(problem, ws, mu);

                if prim_infeas <= self.tol && dual_infeas <= self.tol {
                    converged = true;
                    status = SolverStatus::Converged;
                    break 'outer;
                }
                if criterion <= inner_tol {
                    break;
                }

                update_lq(problem, ws, mu, rho, self.hess_approx);

                // Riccati factorization with regularization retries.
                loop {
                    let ok = match parallel.as_mut() {
                        Some(par) => par.backward(&mut ws.lqr_problem, mu, mu, reg, pool),
                        None => serial.backward(&ws.lqr_problem, mu, mu, reg),
                    };
                    if ok {
                        break;
                    }
                    if reg >= self.reg_max {
                        status = SolverStatus::RiccatiFailure;
                        break 'outer;
                    }
                    reg = (reg * 10.0).min(self.reg_max);
                    num_reg_bumps += 1;
                    if self.verbose >= VerboseLevel::VeryVerbose {
                        eprintln!("  riccati breakdown, reg -> {:.3e}", reg);
                    }
                }

                match parallel.as_mut() {
                    Some(par) => par.forward(
                        &ws.lqr_problem,
                        &mut ws.dxs,
                        &mut ws.dus,
                        &mut ws.dvs,
                        &mut ws.dlams,
                        pool,
                    ),
                    None => serial.forward(
                        &ws.lqr_problem,
                        &mut ws.dxs,
                        &mut ws.dus,
                        &mut ws.dvs,
                        &mut ws.dlams,
                        None,
                    ),
                }

                // Iterative refinement on the LQ KKT system.
                if self.max_refinement_steps > 0 {
                    sync_refine_matrices(&ws.lqr_problem, &mut ws.lqr_refine);
                    let mut err = lqr_fill_residual_rhs(
                        &ws.lqr_problem,
                        &ws.dxs,
                        &ws.dus,
                        &ws.dvs,
                        &ws.dlams,
                        mu,
                        mu,
                        &mut ws.lqr_refine,
                    );
                    let mut steps = 0;
                    while err > self.refinement_threshold && steps < self.max_refinement_steps
                    {
                        if !serial.backward(&ws.lqr_refine, mu, mu, reg) {
                            break;
                        }
                        serial.forward(
                            &ws.lqr_refine,
                            &mut ws.ref_xs,
                            &mut ws.ref_us,
                            &mut ws.ref_vs,
                            &mut ws.ref_lams,
                            None,
                        );
                        for t in 0..=nsteps {
                            ws.dxs[t] += &ws.ref_xs[t];
                            ws.dus[t] += &ws.ref_us[t];
                            ws.dvs[t] += &ws.ref_vs[t];
                            ws.dlams[t] += &ws.ref_lams[t];
                        }
                        err = lqr_fill_residual_rhs(
                            &ws.lqr_problem,
                            &ws.dxs,
                            &ws.dus,
                            &ws.dvs,
                            &ws.dlams,
                            mu,
                            mu,
                            &mut ws.lqr_refine,
                        );
                        steps += 1;
                    }
                }

                // Turn raw LQ multipliers into deltas (and undo the scaler
                // row-weighting on the constraint multipliers).
                for t in 0..=nsteps {
                    let scaler = &ws.cstr_scalers[t];
                    let mut offset = 0usize;
                    for j in 0..scaler.size() {
                        let nr = scaler.rows_of(j);
                        let s = scaler.weight_of(j).sqrt();
                        ws.dvs[t].rows_mut(offset, nr).scale_mut(s);
                        offset += nr;
                    }
                    ws.dvs[t].axpy(-1.0, &ws.vs[t], 1.0);
                    ws.dlams[t].axpy(-1.0, &ws.lams[t], 1.0);
                }

                let params = MeritParams {
                    mu,
                    rho,
                    dual_weight: self.dual_weight,
                };
                let phi0 = evaluate_merit(
                    problem,
                    &ws.prob_data,
                    &ws.xs,
                    &ws.lams,
                    &ws.vs,
                    &ws.prev_xs,
                    &ws.prev_lams,
                    &ws.prev_vs,
                    &ws.cstr_scalers,
                    &params,
                    &mut ws.diff_scratch,
                    &mut ws.dyn_scratch,
                    &mut ws.cstr_scratch,
                    &mut ws.cstr_scratch2,
                    &mut ws.init_scratch,
                );
                let dphi0 = directional_derivative(ws, &params);

                let gains: &[StageFactor] = match parallel.as_ref() {
                    Some(par) => &par.datas,
                    None => &serial.datas,
                };
                let mut eval = |alpha: f64| -> f64 {
                    let nonlinear = matches!(self.rollout_type, RolloutType::Nonlinear);
                    let mut ok = false;
                    if nonlinear {
                        ok = rollout_nonlinear(problem, ws, alpha, gains);
                    }
                    if !ok {
                        rollout_linear(problem, ws, alpha);
                    }
                    for t in 0..=nsteps {
                        ws.trial_lams[t].copy_from(&ws.lams[t]);
                        ws.trial_lams[t].axpy(alpha, &ws.dlams[t], 1.0);
                        ws.trial_vs[t].copy_from(&ws.vs[t]);
                        ws.trial_vs[t].axpy(alpha, &ws.dvs[t], 1.0);
                    }
                    problem.evaluate(&ws.trial_xs, &ws.trial_us, &mut ws.trial_data, pool);
                    evaluate_merit(
                        problem,
                        &ws.trial_data,
                        &ws.trial_xs,
                        &ws.trial_lams,
                        &ws.trial_vs,
                        &ws.prev_xs,
                        &ws.prev_lams,
                        &ws.prev_vs,
                        &ws.cstr_scalers,
                        &params,
                        &mut ws.diff_scratch,
                        &mut ws.dyn_scratch,
                        &mut ws.cstr_scratch,
                        &mut ws.cstr_scratch2,
                        &mut ws.init_scratch,
                    )
                };
                let ls = linesearch::search(phi0, dphi0, &self.ls_options, &mut eval);

                if self.verbose >= VerboseLevel::Verbose {
                    eprintln!(
                        "  it {:>4} | merit={:+.8e} | dphi0={:+.3e} | crit={:.3e} | prim={:.3e} | dual={:.3e} | alpha={:.3} | reg={:.1e}",
                        iter, phi0, dphi0, criterion, prim_infeas, dual_infeas, ls.alpha, reg
                    );
                }

                if !ls.accepted {
                    status = SolverStatus::LineSearchFailure;
                    break;
                }

                // Accept the trial point; the prox center follows the
                // iterate.
                for t in 0..=nsteps {
                    ws.xs[t].copy_from(&ws.trial_xs[t]);
                    ws.prev_xs[t].copy_from(&ws.trial_xs[t]);
                    ws.lams[t].copy_from(&ws.trial_lams[t]);
                    ws.vs[t].copy_from(&ws.trial_vs[t]);
                }
                for t in 0..nsteps {
                    ws.us[t].copy_from(&ws.trial_us[t]);
                    ws.prev_us[t].copy_from(&ws.trial_us[t]);
                }
                merit_cur = ls.value;
                iter += 1;
                reg = (reg * 0.1).max(self.reg_min);
            }

            // BCL update on the outer state.
            if ws.prim_infeas <= prim_tol {
                match self.multiplier_update_mode {
                    MultiplierUpdateMode::Newton => {}
                    MultiplierUpdateMode::Primal => {
                        for t in 0..=nsteps {
                            ws.lams[t].copy_from(&ws.lams_plus[t]);
                            ws.vs[t].copy_from(&ws.vs_plus[t]);
                        }
                    }
                    MultiplierUpdateMode::PrimalDual => {
                        for t in 0..=nsteps {
                            ws.lams[t].copy_from(&ws.lams_pdal[t]);
                            ws.vs[t].copy_from(&ws.vs_pdal[t]);
                        }
                    }
                }
                for t in 0..=nsteps {
                    ws.prev_lams[t].copy_from(&ws.lams[t]);
                    ws.prev_vs[t].copy_from(&ws.vs[t]);
                }
                prim_tol *= mu.powf(bcl.prim_beta);
                inner_tol *= mu.powf(bcl.dual_beta);
                if self.verbose >= VerboseLevel::VeryVerbose {
                    eprintln!("  [bcl] accept: multipliers updated");
                }
            } else {
                for t in 0..=nsteps {
                    ws.lams[t].copy_from(&ws.prev_lams[t]);
                    ws.vs[t].copy_from(&ws.prev_vs[t]);
                }
                mu = (mu * bcl.mu_update_factor).max(self.mu_min);
                prim_tol = bcl.prim_tol0 * mu.powf(bcl.prim_alpha);
                inner_tol = bcl.inner_tol0 * mu.powf(bcl.dual_alpha);
                if self.verbose >= VerboseLevel::VeryVerbose {
                    eprintln!("  [bcl] reject: mu -> {:.3e}", mu);
                }
            }
            prim_tol = prim_tol.max(self.tol);
            inner_tol = inner_tol.max(self.tol);
            al_iter += 1;
        }

        // Populate results.
        for t in 0..=nsteps {
            results.xs[t].copy_from(&ws.xs[t]);
            results.lams[t].copy_from(&ws.lams[t]);
            results.vs[t].copy_from(&ws.vs[t]);
        }
        for t in 0..nsteps {
            results.us[t].copy_from(&ws.us[t]);
        }
        results.status = status;
        results.converged = converged;
        results.al_iter = al_iter;
        results.num_iters = iter;
        results.num_reg_bumps = num_reg_bumps;
        results.prim_infeas = ws.prim_infeas;
        results.dual_infeas = ws.dual_infeas;
        results.traj_cost = ws.prob_data.cost;
        results.merit_value = merit_cur;
        results.solve_time_ms = start.elapsed().as_millis() as u64;

        if self.verbose >= VerboseLevel::Verbose {
            eprintln!("{}", results);
        }

        // Hooks observe the final penalty state.
        self.mu = mu;
        self.rho = rho;

        Ok(converged)
    }
}

/// Initialize the workspace trajectory from caller data or defaults.
fn init_trajectory(
    problem: &TrajOptProblem,
    ws: &mut Workspace,
    xs_init: &[DVector<f64>],
    us_init: &[DVector<f64>],
    lams_init: &[DVector<f64>],
    vs_init: &[DVector<f64>],
) -> Result<(), SetupError> {
    let nsteps = ws.nsteps;

    if xs_init.is_empty() {
        for t in 0..=nsteps {
            let space = if t < nsteps {
                problem.stages[t].xspace.as_ref()
            } else {
                problem.stages[nsteps - 1].xspace_next.as_ref()
            };
            ws.xs[t].copy_from(&space.neutral());
        }
    } else {
        if xs_init.len() != nsteps + 1 {
            return Err(SetupError::WarmStart {
                what: "xs",
                got: xs_init.len(),
                expected: nsteps + 1,
            });
        }
        for t in 0..=nsteps {
            if xs_init[t].len() != ws.xs[t].len() {
                return Err(SetupError::WarmStart {
                    what: "xs entry",
                    got: xs_init[t].len(),
                    expected: ws.xs[t].len(),
                });
            }
            ws.xs[t].copy_from(&xs_init[t]);
        }
    }

    if us_init.is_empty() {
        for u in ws.us.iter_mut() {
            u.fill(0.0);
        }
    } else {
        if us_init.len() != nsteps {
            return Err(SetupError::WarmStart {
                what: "us",
                got: us_init.len(),
                expected: nsteps,
            });
        }
        for t in 0..nsteps {
            if us_init[t].len() != ws.us[t].len() {
                return Err(SetupError::WarmStart {
                    what: "us entry",
                    got: us_init[t].len(),
                    expected: ws.us[t].len(),
                });
            }
            ws.us[t].copy_from(&us_init[t]);
        }
    }

    if lams_init.is_empty() {
        for l in ws.lams.iter_mut() {
            l.fill(0.0);
        }
    } else {
        if lams_init.len() != nsteps + 1 {
            return Err(SetupError::WarmStart {
                what: "lams",
                got: lams_init.len(),
                expected: nsteps + 1,
            });
        }
        for t in 0..=nsteps {
            ws.lams[t].copy_from(&lams_init[t]);
        }
    }

    if vs_init.is_empty() {
        for v in ws.vs.iter_mut() {
            v.fill(0.0);
        }
    } else {
        if vs_init.len() != nsteps + 1 {
            return Err(SetupError::WarmStart {
                what: "vs",
                got: vs_init.len(),
                expected: nsteps + 1,
            });
        }
        for t in 0..=nsteps {
            ws.vs[t].copy_from(&vs_init[t]);
        }
    }

    for t in 0..=nsteps {
        ws.prev_xs[t].copy_from(&ws.xs[t]);
        ws.prev_lams[t].copy_from(&ws.lams[t]);
        ws.prev_vs[t].copy_from(&ws.vs[t]);
    }
    for t in 0..nsteps {
        ws.prev_us[t].copy_from(&ws.us[t]);
    }
    Ok(())
}

/// Shifted constraint values, first-order multiplier estimates and AL active
/// sets at the current iterate (problem residuals must be fresh).
fn compute_multipliers(problem: &TrajOptProblem, ws: &mut Workspace, mu: f64, dual_weight: f64) {
    let nsteps = ws.nsteps;

    // Initial condition.
    ws.lams_plus[0].copy_from(&ws.prev_lams[0]);
    ws.lams_plus[0].axpy(1.0 / mu, &ws.prob_data.init_data.value, 1.0);
    ws.lams_pdal[0].copy_from(&ws.lams_plus[0]);
    ws.lams_pdal[0].scale_mut(1.0 + dual_weight);
    ws.lams_pdal[0].axpy(-dual_weight, &ws.lams[0], 1.0);

    // Dynamics.
    for t in 0..nsteps {
        ws.lams_plus[t + 1].copy_from(&ws.prev_lams[t + 1]);
        ws.lams_plus[t + 1].axpy(
            1.0 / mu,
            &ws.prob_data.stage_data[t].dyn_data.value,
            1.0,
        );
        ws.lams_pdal[t + 1].copy_from(&ws.lams_plus[t + 1]);
        ws.lams_pdal[t + 1].scale_mut(1.0 + dual_weight);
        ws.lams_pdal[t + 1].axpy(-dual_weight, &ws.lams[t + 1], 1.0);
    }

    // Path and terminal constraints.
    for t in 0..=nsteps {
        let scaler = &ws.cstr_scalers[t];
        let mut offset = 0usize;
        for j in 0..scaler.size() {
            let nr = scaler.rows_of(j);
            let mu_j = mu / scaler.weight_of(j);
            let set = if t < nsteps {
                problem.stages[t].constraints[j].set.as_ref()
            } else {
                problem.term_constraints[j].set.as_ref()
            };
            let cval = if t < nsteps {
                &ws.prob_data.stage_data[t].constraint_data[j].value
            } else {
                &ws.prob_data.term_cstr_data[j].value
            };

            {
                let mut z = ws.shifted_constraints[t].rows_mut(offset, nr);
                z.copy_from(cval);
                z.axpy(mu_j, &ws.prev_vs[t].rows(offset, nr), 1.0);
            }
            set.active_set(
                ws.shifted_constraints[t].rows(offset, nr),
                &mut ws.active_constraints[t][offset..offset + nr],
            );
            set.normal_cone_projection(
                ws.shifted_constraints[t].rows(offset, nr),
                ws.cstr_scratch[t].rows_mut(offset, nr),
            );
            {
                let mut vp = ws.vs_plus[t].rows_mut(offset, nr);
                vp.copy_from(&ws.cstr_scratch[t].rows(offset, nr));
                vp.scale_mut(1.0 / mu_j);
            }
            {
                let mut vpd = ws.vs_pdal[t].rows_mut(offset, nr);
                vpd.copy_from(&ws.vs_plus[t].rows(offset, nr));
                vpd.scale_mut(1.0 + dual_weight);
                vpd.axpy(-dual_weight, &ws.vs[t].rows(offset, nr), 1.0);
                for i in 0..nr {
                    if !ws.active_constraints[t][offset + i] {
                        vpd[i] = 0.0;
                    }
                }
            }
            offset += nr;
        }
    }
}

/// Gradients of the primal-dual AL function. `lxs`/`lus` receive the PDAL
/// gradients (with the proximal term); the plain-multiplier gradients land
/// in the refinement scratch and yield the dual infeasibility. Returns
/// `(inner criterion, dual infeasibility)`.
fn compute_gradients(problem: &TrajOptProblem, ws: &mut Workspace, rho: f64) -> (f64, f64) {
    let nsteps = ws.nsteps;
    for t in 0..=nsteps {
        let cd = if t < nsteps {
            &ws.prob_data.stage_data[t].cost_data
        } else {
            &ws.prob_data.term_cost_data
        };
        ws.lxs[t].copy_from(&cd.lx);
        ws.ref_xs[t].copy_from(&cd.lx);
        if t < nsteps {
            ws.lus[t].copy_from(&cd.lu);
            ws.ref_us[t].copy_from(&cd.lu);
        }

        if rho > 0.0 {
            let space = if t < nsteps {
                problem.stages[t].xspace.as_ref()
            } else {
                problem.stages[nsteps - 1].xspace_next.as_ref()
            };
            space.difference(&ws.prev_xs[t], &ws.xs[t], &mut ws.diff_scratch[t]);
            ws.lxs[t].axpy(rho, &ws.diff_scratch[t], 1.0);
        }

        // Initial condition contributes to x0.
        if t == 0 {
            ws.lxs[0].gemv_tr(1.0, &ws.prob_data.init_data.jx, &ws.lams_pdal[0], 1.0);
            ws.ref_xs[0].gemv_tr(1.0, &ws.prob_data.init_data.jx, &ws.lams[0], 1.0);
        }

        // Dynamics t: multiplies (x_t, u_t); dynamics t-1 multiplies x_t
        // through its next-state Jacobian.
        if t < nsteps {
            let fd = &ws.prob_data.stage_data[t].dyn_data;
            ws.lxs[t].gemv_tr(1.0, &fd.jx, &ws.lams_pdal[t + 1], 1.0);
            ws.lus[t].gemv_tr(1.0, &fd.ju, &ws.lams_pdal[t + 1], 1.0);
            ws.ref_xs[t].gemv_tr(1.0, &fd.jx, &ws.lams[t + 1], 1.0);
            ws.ref_us[t].gemv_tr(1.0, &fd.ju, &ws.lams[t + 1], 1.0);
        }
        if t > 0 {
            let fd = &ws.prob_data.stage_data[t - 1].dyn_data;
            ws.lxs[t].gemv_tr(1.0, &fd.jy, &ws.lams_pdal[t], 1.0);
            ws.ref_xs[t].gemv_tr(1.0, &fd.jy, &ws.lams[t], 1.0);
        }

        // Constraint blocks.
        let scaler = &ws.cstr_scalers[t];
        let mut offset = 0usize;
        for j in 0..scaler.size() {
            let nr = scaler.rows_of(j);
            let fd = if t < nsteps {
                &ws.prob_data.stage_data[t].constraint_data[j]
            } else {
                &ws.prob_data.term_cstr_data[j]
            };
            ws.lxs[t].gemv_tr(1.0, &fd.jx, &ws.vs_pdal[t].rows(offset, nr), 1.0);
            ws.ref_xs[t].gemv_tr(1.0, &fd.jx, &ws.vs[t].rows(offset, nr), 1.0);
            if t < nsteps {
                ws.lus[t].gemv_tr(1.0, &fd.ju, &ws.vs_pdal[t].rows(offset, nr), 1.0);
                ws.ref_us[t].gemv_tr(1.0, &fd.ju, &ws.vs[t].rows(offset, nr), 1.0);
            }
            offset += nr;
        }
    }

    let mut crit = 0.0_f64;
    let mut dual = 0.0_f64;
    for t in 0..=nsteps {
        crit = crit.max(inf_norm(&ws.lxs[t]));
        dual = dual.max(inf_norm(&ws.ref_xs[t]));
        if t < nsteps {
            crit = crit.max(inf_norm(&ws.lus[t]));
            dual = dual.max(inf_norm(&ws.ref_us[t]));
        }
    }
    ws.inner_criterion = crit;
    ws.dual_infeas = dual;
    (crit, dual)
}

/// Primal infeasibility `max_j ‖c − Π_C(c + μ_j v)‖_∞` over all constraints,
/// dynamics and the initial condition.
fn compute_prim_infeas(problem: &TrajOptProblem, ws: &mut Workspace, mu: f64) -> f64 {
    let nsteps = ws.nsteps;
    let mut prim = inf_norm(&ws.prob_data.init_data.value);

    for t in 0..=nsteps {
        let mut stage_err = 0.0_f64;
        if t < nsteps {
            stage_err = stage_err.max(inf_norm(&ws.prob_data.stage_data[t].dyn_data.value));
        }

        let scaler = &ws.cstr_scalers[t];
        let mut offset = 0usize;
        for j in 0..scaler.size() {
            let nr = scaler.rows_of(j);
            let mu_j = mu / scaler.weight_of(j);
            let set = if t < nsteps {
                problem.stages[t].constraints[j].set.as_ref()
            } else {
                problem.term_constraints[j].set.as_ref()
            };
            let cval = if t < nsteps {
                &ws.prob_data.stage_data[t].constraint_data[j].value
            } else {
                &ws.prob_data.term_cstr_data[j].value
            };
            {
                let mut z = ws.cstr_scratch[t].rows_mut(offset, nr);
                z.copy_from(cval);
                z.axpy(mu_j, &ws.vs[t].rows(offset, nr), 1.0);
            }
            set.projection(
                ws.cstr_scratch[t].rows(offset, nr),
                ws.cstr_scratch2[t].rows_mut(offset, nr),
            );
            for i in 0..nr {
                stage_err = stage_err.max((cval[i] - ws.cstr_scratch2[t][offset + i]).abs());
            }
            offset += nr;
        }
        ws.stage_infeasibilities[t] = stage_err;
        prim = prim.max(stage_err);
    }
    ws.prim_infeas = prim;
    prim
}

/// Rebuild the LQ knots from the current derivatives, shifts and active
/// sets.
fn update_lq(
    problem: &TrajOptProblem,
    ws: &mut Workspace,
    mu: f64,
    rho: f64,
    hess_approx: HessianApprox,
) {
    let nsteps = ws.nsteps;

    for t in 0..=nsteps {
        // Second-order constraint terms for the exact-Hessian mode are
        // contracted before the knot borrows start.
        if matches!(hess_approx, HessianApprox::Exact) && t < nsteps {
            let stage = &problem.stages[t];
            let lam = &ws.lams_pdal[t + 1];
            stage.dynamics.compute_vector_hessian_products(
                &ws.xs[t],
                &ws.us[t],
                &ws.xs[t + 1],
                lam.rows(0, lam.len()),
                &mut ws.prob_data.stage_data[t].dyn_data,
            );
            let scaler = &ws.cstr_scalers[t];
            let mut offset = 0usize;
            for j in 0..scaler.size() {
                let nr = scaler.rows_of(j);
                stage.constraints[j].func.compute_vector_hessian_products(
                    &ws.xs[t],
                    &ws.us[t],
                    &ws.xs[t + 1],
                    ws.vs_pdal[t].rows(offset, nr),
                    &mut ws.prob_data.stage_data[t].constraint_data[j],
                );
                offset += nr;
            }
        }

        let knot = &mut ws.lqr_problem.stages[t];
        let ndx = knot.nx;
        let nu = knot.nu;
        let cd = if t < nsteps {
            &ws.prob_data.stage_data[t].cost_data
        } else {
            &ws.prob_data.term_cost_data
        };

        knot.Q.copy_from(&cd.lxx);
        knot.q.copy_from(&cd.lx);
        if rho > 0.0 {
            for i in 0..ndx {
                knot.Q[(i, i)] += rho;
            }
            let space = if t < nsteps {
                problem.stages[t].xspace.as_ref()
            } else {
                problem.stages[nsteps - 1].xspace_next.as_ref()
            };
            space.difference(&ws.prev_xs[t], &ws.xs[t], &mut ws.diff_scratch[t]);
            knot.q.axpy(rho, &ws.diff_scratch[t], 1.0);
        }
        if nu > 0 {
            knot.S.copy_from(&cd.lux);
            knot.R.copy_from(&cd.luu);
            knot.r.copy_from(&cd.lu);
        }

        // Dynamics blocks (shifted residual as the knot offset).
        if t < nsteps {
            let fd = &ws.prob_data.stage_data[t].dyn_data;
            knot.A.copy_from(&fd.jx);
            knot.B.copy_from(&fd.ju);
            knot.E.copy_from(&fd.jy);
            knot.f.copy_from(&fd.value);
            knot.f.axpy(mu, &ws.prev_lams[t + 1], 1.0);
            if matches!(hess_approx, HessianApprox::Exact) {
                let vhp = &fd.vhp;
                knot.Q += vhp.view((0, 0), (ndx, ndx));
                knot.S += vhp.view((ndx, 0), (nu, ndx));
                knot.R += vhp.view((ndx, ndx), (nu, nu));
            }
        }

        // Constraint rows: active-set-projected, weighted by the scaler.
        let scaler = &ws.cstr_scalers[t];
        let mut offset = 0usize;
        for j in 0..scaler.size() {
            let nr = scaler.rows_of(j);
            let s = scaler.weight_of(j).sqrt();
            let fd = if t < nsteps {
                &ws.prob_data.stage_data[t].constraint_data[j]
            } else {
                &ws.prob_data.term_cstr_data[j]
            };
            {
                let mut crows = knot.C.view_mut((offset, 0), (nr, ndx));
                crows.copy_from(&fd.jx);
                for i in 0..nr {
                    if !ws.active_constraints[t][offset + i] {
                        crows.row_mut(i).fill(0.0);
                    }
                }
                crows.scale_mut(s);
            }
            if nu > 0 {
                let mut drows = knot.D.view_mut((offset, 0), (nr, nu));
                drows.copy_from(&fd.ju);
                for i in 0..nr {
                    if !ws.active_constraints[t][offset + i] {
                        drows.row_mut(i).fill(0.0);
                    }
                }
                drows.scale_mut(s);
            }
            for i in 0..nr {
                knot.d[offset + i] = if ws.active_constraints[t][offset + i] {
                    s * ws.shifted_constraints[t][offset + i]
                } else {
                    0.0
                };
            }
            if matches!(hess_approx, HessianApprox::Exact) && t < nsteps {
                let vhp = &fd.vhp;
                knot.Q += vhp.view((0, 0), (ndx, ndx));
                knot.S += vhp.view((ndx, 0), (nu, ndx));
                knot.R += vhp.view((ndx, ndx), (nu, nu));
            }
            offset += nr;
        }
    }

    // Initial-condition block.
    ws.lqr_problem.G0.copy_from(&ws.prob_data.init_data.jx);
    ws.lqr_problem.g0.copy_from(&ws.prob_data.init_data.value);
    ws.lqr_problem.g0.axpy(mu, &ws.prev_lams[0], 1.0);
}

/// Copy the (iteration-invariant within the refinement loop) matrix blocks
/// of the LQ problem into the residual system.
fn sync_refine_matrices(src: &LqrProblem, dst: &mut LqrProblem) {
    for (ks, kd) in src.stages.iter().zip(dst.stages.iter_mut()) {
        kd.Q.copy_from(&ks.Q);
        kd.S.copy_from(&ks.S);
        kd.R.copy_from(&ks.R);
        kd.A.copy_from(&ks.A);
        kd.B.copy_from(&ks.B);
        kd.E.copy_from(&ks.E);
        kd.C.copy_from(&ks.C);
        kd.D.copy_from(&ks.D);
    }
    dst.G0.copy_from(&src.G0);
}

/// Linear trial point: `x ⊕ α δx`, `u + α δu`.
fn rollout_linear(problem: &TrajOptProblem, ws: &mut Workspace, alpha: f64) {
    let nsteps = ws.nsteps;
    for t in 0..=nsteps {
        let space = if t < nsteps {
            problem.stages[t].xspace.as_ref()
        } else {
            problem.stages[nsteps - 1].xspace_next.as_ref()
        };
        ws.tan_scratch[t].copy_from(&ws.dxs[t]);
        ws.tan_scratch[t].scale_mut(alpha);
        space.integrate(&ws.xs[t], &ws.tan_scratch[t], &mut ws.trial_xs[t]);
    }
    for t in 0..nsteps {
        ws.trial_us[t].copy_from(&ws.us[t]);
        ws.trial_us[t].axpy(alpha, &ws.dus[t], 1.0);
    }
}

/// Nonlinear trial point: integrate the true dynamics under the Riccati
/// feedback policy. Returns `false` on divergence or when a stage's dynamics
/// expose no closed-form forward map.
fn rollout_nonlinear(
    problem: &TrajOptProblem,
    ws: &mut Workspace,
    alpha: f64,
    gains: &[StageFactor],
) -> bool {
    let nsteps = ws.nsteps;
    {
        let space = problem.stages[0].xspace.as_ref();
        ws.tan_scratch[0].copy_from(&ws.dxs[0]);
        ws.tan_scratch[0].scale_mut(alpha);
        space.integrate(&ws.xs[0], &ws.tan_scratch[0], &mut ws.trial_xs[0]);
    }
    for t in 0..nsteps {
        let stage = &problem.stages[t];
        let space = stage.xspace.as_ref();

        // Predicted state on the linearized path, and the feedback on the
        // deviation from it.
        ws.tan_scratch[t].copy_from(&ws.dxs[t]);
        ws.tan_scratch[t].scale_mut(alpha);
        space.integrate(&ws.xs[t], &ws.tan_scratch[t], &mut ws.pred_scratch[t]);
        space.difference(&ws.pred_scratch[t], &ws.trial_xs[t], &mut ws.diff_scratch[t]);

        ws.trial_us[t].copy_from(&ws.us[t]);
        ws.trial_us[t].axpy(alpha, &ws.dus[t], 1.0);
        ws.trial_us[t].gemv(1.0, &gains[t].fbu, &ws.diff_scratch[t], 1.0);

        let (cur, next) = {
            let (a, b) = ws.trial_xs.split_at_mut(t + 1);
            (&a[t], &mut b[0])
        };
        if !stage.dynamics.forward(cur, &ws.trial_us[t], next) {
            return false;
        }
        if !next.iter().all(|v| v.is_finite()) {
            return false;
        }
    }
    true
}
