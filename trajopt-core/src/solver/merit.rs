//! Primal-dual augmented-Lagrangian merit function.
//!
//! ```text
//! M = Σ ℓ_i + ℓ_N
//!   + Σ (1/2μ)   ‖Φ + μ λ̂‖²                    (dynamics, initial condition)
//!   + Σ (1/2μ_j) ‖Π_N(c_j + μ_j v̂_j)‖²          (path/terminal constraints)
//!   + w_dual Σ (μ/2) ‖estimate − multiplier‖²   (primal-dual coupling)
//!   + (ρ/2) Σ ‖x_t ⊖ x̂_t‖²                      (proximal term)
//! ```
//!
//! The hats are the outer-loop shifts (`prev_lams`, `prev_vs`) and the
//! proximal centers (`prev_xs`). `Π_N` is the normal-cone projection of each
//! constraint block's set.

use nalgebra::DVector;

use crate::problem::{TrajOptData, TrajOptProblem};
use crate::solver::scaler::ConstraintProxScaler;
use crate::solver::workspace::Workspace;

#[derive(Debug, Clone, Copy)]
pub(crate) struct MeritParams {
    pub mu: f64,
    pub rho: f64,
    pub dual_weight: f64,
}

/// Evaluate the merit at `(xs, lams, vs)` given residuals in `data`
/// (which must have been produced by `problem.evaluate` at `xs`).
pub(crate) fn evaluate_merit(
    problem: &TrajOptProblem,
    data: &TrajOptData,
    xs: &[DVector<f64>],
    lams: &[DVector<f64>],
    vs: &[DVector<f64>],
    prev_xs: &[DVector<f64>],
    shift_lams: &[DVector<f64>],
    shift_vs: &[DVector<f64>],
    scalers: &[ConstraintProxScaler],
    params: &MeritParams,
    diff_scratch: &mut [DVector<f64>],
    dyn_scratch: &mut [DVector<f64>],
    cstr_scratch: &mut [DVector<f64>],
    cstr_proj: &mut [DVector<f64>],
    init_scratch: &mut DVector<f64>,
) -> f64 {
    let nsteps = problem.num_steps();
    let mu = params.mu;
    let dw = params.dual_weight;
    let mut value = data.cost;

    // Proximal term.
    if params.rho > 0.0 {
        for t in 0..=nsteps {
            let space = if t < nsteps {
                problem.stages[t].xspace.as_ref()
            } else {
                problem.stages[nsteps - 1].xspace_next.as_ref()
            };
            space.difference(&prev_xs[t], &xs[t], &mut diff_scratch[t]);
            value += 0.5 * params.rho * diff_scratch[t].norm_squared();
        }
    }

    // Initial condition (equality, penalty μ).
    init_scratch.copy_from(&data.init_data.value);
    init_scratch.axpy(mu, &shift_lams[0], 1.0);
    value += init_scratch.norm_squared() / (2.0 * mu);
    if dw > 0.0 {
        // estimate = shifted/μ
        let mut dual_sq = 0.0;
        for i in 0..init_scratch.len() {
            let e = init_scratch[i] / mu - lams[0][i];
            dual_sq += e * e;
        }
        value += 0.5 * dw * mu * dual_sq;
    }

    // Dynamics (equality, penalty μ).
    for t in 0..nsteps {
        let buf = &mut dyn_scratch[t];
        buf.copy_from(&data.stage_data[t].dyn_data.value);
        buf.axpy(mu, &shift_lams[t + 1], 1.0);
        value += buf.norm_squared() / (2.0 * mu);
        if dw > 0.0 {
            let mut dual_sq = 0.0;
            for i in 0..buf.len() {
                let e = buf[i] / mu - lams[t + 1][i];
                dual_sq += e * e;
            }
            value += 0.5 * dw * mu * dual_sq;
        }
    }

    // Path and terminal constraint blocks.
    for t in 0..=nsteps {
        let scaler = &scalers[t];
        if scaler.total_rows() == 0 {
            continue;
        }
        let shifted = &mut cstr_scratch[t];
        let proj = &mut cstr_proj[t];

        let mut offset = 0usize;
        for j in 0..scaler.size() {
            let nr = scaler.rows_of(j);
            let w = scaler.weight_of(j);
            let mu_j = mu / w;
            let set = if t < nsteps {
                problem.stages[t].constraints[j].set.as_ref()
            } else {
                problem.term_constraints[j].set.as_ref()
            };
            let cval = if t < nsteps {
                &data.stage_data[t].constraint_data[j].value
            } else {
                &data.term_cstr_data[j].value
            };

            {
                let mut z = shifted.rows_mut(offset, nr);
                z.copy_from(cval);
                z.axpy(mu_j, &shift_vs[t].rows(offset, nr), 1.0);
            }
            set.normal_cone_projection(shifted.rows(offset, nr), proj.rows_mut(offset, nr));

            let mut pen_sq = 0.0;
            let mut dual_sq = 0.0;
            for i in offset..offset + nr {
                pen_sq += proj[i] * proj[i];
                let e = proj[i] / mu_j - vs[t][i];
                dual_sq += e * e;
            }
            value += pen_sq / (2.0 * mu_j);
            if dw > 0.0 {
                value += 0.5 * dw * mu_j * dual_sq;
            }
            offset += nr;
        }
    }

    value
}

/// Exact directional derivative of the merit along the current direction,
/// assembled from the workspace gradients (which use the PDAL multiplier
/// estimates) and the dual distances.
pub(crate) fn directional_derivative(ws: &Workspace, params: &MeritParams) -> f64 {
    let nsteps = ws.nsteps;
    let mu = params.mu;
    let dw = params.dual_weight;

    let mut d = 0.0;
    for t in 0..=nsteps {
        d += ws.lxs[t].dot(&ws.dxs[t]);
        if ws.lus[t].len() > 0 {
            d += ws.lus[t].dot(&ws.dus[t]);
        }
    }
    if dw > 0.0 {
        for t in 0..=nsteps {
            // λ-block: t = 0 is the initial constraint, t ≥ 1 the dynamics.
            let mut acc = 0.0;
            for i in 0..ws.lams[t].len() {
                acc += (ws.lams_plus[t][i] - ws.lams[t][i]) * ws.dlams[t][i];
            }
            d -= dw * mu * acc;

            let scaler = &ws.cstr_scalers[t];
            let mut offset = 0usize;
            for j in 0..scaler.size() {
                let nr = scaler.rows_of(j);
                let w = scaler.weight_of(j);
                let mu_j = mu / w;
                let mut accv = 0.0;
                for i in offset..offset + nr {
                    accv += (ws.vs_plus[t][i] - ws.vs[t][i]) * ws.dvs[t][i];
                }
                d -= dw * mu_j * accv;
                offset += nr;
            }
        }
    }
    d
}
