//! Pre-allocated iteration storage for the ProxDDP solver.
//!
//! Constructed once per problem in `setup`; every solver hot loop operates
//! exclusively on these buffers.

use nalgebra::DVector;

use crate::gar::{LqKnot, LqrProblem};
use crate::problem::{TrajOptData, TrajOptProblem};
use crate::sets::ConstraintSet;
use crate::solver::scaler::{apply_default_scaling_strategy, ConstraintProxScaler};

/// All iteration buffers, sized to one problem.
///
/// Trajectory arrays have `N+1` entries; `us`-like arrays indexed by knot
/// keep an empty terminal entry so they align with the LQ knot array.
/// `lams[0]` is the initial-constraint multiplier, `lams[t+1]` the dynamics
/// multiplier into state `t+1`; `vs[t]` stacks the constraint blocks of knot
/// `t` (index `N` holds the terminal stack).
pub struct Workspace {
    pub nsteps: usize,

    /// Evaluation scratch at the current iterate.
    pub prob_data: TrajOptData,
    /// Evaluation scratch at line-search trial points.
    pub trial_data: TrajOptData,

    // Current primal-dual iterate.
    pub xs: Vec<DVector<f64>>,
    pub us: Vec<DVector<f64>>,
    pub lams: Vec<DVector<f64>>,
    pub vs: Vec<DVector<f64>>,

    // Trial iterate for the line search.
    pub trial_xs: Vec<DVector<f64>>,
    pub trial_us: Vec<DVector<f64>>,
    pub trial_lams: Vec<DVector<f64>>,
    pub trial_vs: Vec<DVector<f64>>,

    // Proximal centers (previous inner iterate).
    pub prev_xs: Vec<DVector<f64>>,
    pub prev_us: Vec<DVector<f64>>,
    // Outer AL multiplier shifts.
    pub prev_lams: Vec<DVector<f64>>,
    pub prev_vs: Vec<DVector<f64>>,

    // First-order multiplier estimates.
    pub lams_plus: Vec<DVector<f64>>,
    pub lams_pdal: Vec<DVector<f64>>,
    pub vs_plus: Vec<DVector<f64>>,
    pub vs_pdal: Vec<DVector<f64>>,

    /// Shifted constraint values `c + μ_j v̂`, stacked per knot.
    pub shifted_constraints: Vec<DVector<f64>>,
    /// AL-active rows of the shifted constraints.
    pub active_constraints: Vec<Vec<bool>>,

    // Gradients of the primal-dual AL function.
    pub lxs: Vec<DVector<f64>>,
    pub lus: Vec<DVector<f64>>,

    // Search direction (LQ solution). `dvs`/`dlams` hold the raw LQ
    // multipliers until the driver turns them into deltas.
    pub dxs: Vec<DVector<f64>>,
    pub dus: Vec<DVector<f64>>,
    pub dvs: Vec<DVector<f64>>,
    pub dlams: Vec<DVector<f64>>,

    // Iterative-refinement correction.
    pub ref_xs: Vec<DVector<f64>>,
    pub ref_us: Vec<DVector<f64>>,
    pub ref_vs: Vec<DVector<f64>>,
    pub ref_lams: Vec<DVector<f64>>,

    /// LQ approximation rebuilt every inner iteration.
    pub lqr_problem: LqrProblem,
    /// Residual system for iterative refinement (same shapes).
    pub lqr_refine: LqrProblem,

    /// One scaler per knot (entry `N` covers the terminal stack).
    pub cstr_scalers: Vec<ConstraintProxScaler>,

    // Scratch.
    pub cstr_scratch: Vec<DVector<f64>>,
    pub cstr_scratch2: Vec<DVector<f64>>,
    pub dyn_scratch: Vec<DVector<f64>>,
    pub diff_scratch: Vec<DVector<f64>>,
    pub tan_scratch: Vec<DVector<f64>>,
    pub pred_scratch: Vec<DVector<f64>>,
    pub init_scratch: DVector<f64>,

    // Telemetry of the last inner iteration.
    pub inner_criterion: f64,
    pub prim_infeas: f64,
    pub dual_infeas: f64,
    pub stage_infeasibilities: Vec<f64>,
}

impl Workspace {
    pub fn new(problem: &TrajOptProblem) -> Self {
        let nsteps = problem.num_steps();

        let ndx = |t: usize| -> usize {
            if t < nsteps {
                problem.stages[t].ndx1()
            } else {
                problem.ndx_terminal()
            }
        };
        let nx = |t: usize| -> usize {
            if t < nsteps {
                problem.stages[t].nx()
            } else {
                problem.stages[nsteps - 1].xspace_next.nx()
            }
        };
        let nu = |t: usize| -> usize {
            if t < nsteps {
                problem.stages[t].nu()
            } else {
                0
            }
        };
        let nc = |t: usize| -> usize {
            if t < nsteps {
                problem.stages[t].nc()
            } else {
                problem.term_constraints.iter().map(|c| c.func.nr()).sum()
            }
        };
        let nc0 = problem.init_constraint.nr();

        let vec_x: Vec<DVector<f64>> = (0..=nsteps).map(|t| DVector::zeros(nx(t))).collect();
        let vec_dx: Vec<DVector<f64>> = (0..=nsteps).map(|t| DVector::zeros(ndx(t))).collect();
        let vec_u: Vec<DVector<f64>> = (0..nsteps).map(|t| DVector::zeros(nu(t))).collect();
        let vec_u_knot: Vec<DVector<f64>> = (0..=nsteps).map(|t| DVector::zeros(nu(t))).collect();
        let vec_c: Vec<DVector<f64>> = (0..=nsteps).map(|t| DVector::zeros(nc(t))).collect();
        let mut vec_lam: Vec<DVector<f64>> = Vec::with_capacity(nsteps + 1);
        vec_lam.push(DVector::zeros(nc0));
        for t in 0..nsteps {
            vec_lam.push(DVector::zeros(problem.stages[t].ndx2()));
        }

        // LQ knots: one per stage plus the terminal knot (no controls, no
        // successor).
        let mut knots = Vec::with_capacity(nsteps + 1);
        for t in 0..nsteps {
            let stage = &problem.stages[t];
            knots.push(LqKnot::with_dims(
                stage.ndx1(),
                stage.nu(),
                stage.nc(),
                stage.ndx2(),
            ));
        }
        knots.push(LqKnot::with_dims(ndx(nsteps), 0, nc(nsteps), 0));
        let lqr_problem = LqrProblem::new(knots, nc0);
        let lqr_refine = lqr_problem.clone();

        // Scalers follow each knot's constraint-block structure, with the
        // default strategy applied.
        let mut cstr_scalers = Vec::with_capacity(nsteps + 1);
        for t in 0..=nsteps {
            let (rows, sets): (Vec<usize>, Vec<&dyn ConstraintSet>) = if t < nsteps {
                problem.stages[t]
                    .constraints
                    .iter()
                    .map(|c| (c.func.nr(), c.set.as_ref()))
                    .unzip()
            } else {
                problem
                    .term_constraints
                    .iter()
                    .map(|c| (c.func.nr(), c.set.as_ref()))
                    .unzip()
            };
            let mut scaler = ConstraintProxScaler::new(&rows);
            apply_default_scaling_strategy(&mut scaler, &sets);
            cstr_scalers.push(scaler);
        }

        Self {
            nsteps,
            prob_data: problem.create_data(),
            trial_data: problem.create_data(),
            xs: vec_x.clone(),
            us: vec_u.clone(),
            lams: vec_lam.clone(),
            vs: vec_c.clone(),
            trial_xs: vec_x.clone(),
            trial_us: vec_u.clone(),
            trial_lams: vec_lam.clone(),
            trial_vs: vec_c.clone(),
            prev_xs: vec_x.clone(),
            prev_us: vec_u.clone(),
            prev_lams: vec_lam.clone(),
            prev_vs: vec_c.clone(),
            lams_plus: vec_lam.clone(),
            lams_pdal: vec_lam.clone(),
            vs_plus: vec_c.clone(),
            vs_pdal: vec_c.clone(),
            shifted_constraints: vec_c.clone(),
            active_constraints: (0..=nsteps).map(|t| vec![false; nc(t)]).collect(),
            lxs: vec_dx.clone(),
            lus: vec_u_knot.clone(),
            dxs: vec_dx.clone(),
            dus: vec_u_knot.clone(),
            dvs: vec_c.clone(),
            dlams: vec_lam.clone(),
            ref_xs: vec_dx.clone(),
            ref_us: vec_u_knot,
            ref_vs: vec_c.clone(),
            ref_lams: vec_lam,
            lqr_problem,
            lqr_refine,
            cstr_scalers,
            cstr_scratch: vec_c.clone(),
            cstr_scratch2: vec_c,
            dyn_scratch: (0..nsteps)
                .map(|t| DVector::zeros(problem.stages[t].ndx2()))
                .collect(),
            diff_scratch: vec_dx.clone(),
            tan_scratch: vec_dx,
            pred_scratch: vec_x,
            init_scratch: DVector::zeros(nc0),
            inner_criterion: 0.0,
            prim_infeas: f64::INFINITY,
            dual_infeas: f64::INFINITY,
            stage_infeasibilities: vec![0.0; nsteps + 1],
        }
    }
}
