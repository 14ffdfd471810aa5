//! End-to-end ProxDDP scenarios.

use std::sync::Arc;

use approx::assert_abs_diff_eq;
use nalgebra::{dvector, DMatrix, DVector};

use trajopt_core::modelling::{LinearDiscreteDynamics, QuadraticCost};
use trajopt_core::modelling::{LinearFunction, StateErrorResidual};
use trajopt_core::utils::rollout;
use trajopt_core::{
    BoxSet, EqualitySet, HessianApprox, Manifold, SolverProxDdp, StageModel, TrajOptProblem,
    VectorSpace, VerboseLevel,
};

/// The benchmark regulator: double-input system with drift.
///
/// `A = I`, `B = [[-0.6, 0.3], [0, 1]]`, `c = [0.1, 0]`,
/// cost `½ xᵀ diag(2,1) x + ½ uᵀ (0.01 I) u`, `x₀ = [1, -0.1]`.
fn lqr_dynamics() -> LinearDiscreteDynamics {
    let a = DMatrix::identity(2, 2);
    let b = DMatrix::from_row_slice(2, 2, &[-0.6, 0.3, 0.0, 1.0]);
    let c = dvector![0.1, 0.0];
    LinearDiscreteDynamics::new(a, b, c)
}

fn lqr_cost() -> QuadraticCost {
    let w_x = DMatrix::from_diagonal(&dvector![2.0, 1.0]);
    let w_u = DMatrix::identity(2, 2) * 1e-2;
    QuadraticCost::new(w_x, w_u)
}

fn lqr_problem(nsteps: usize) -> TrajOptProblem {
    let space = VectorSpace::new(2);
    let x0 = dvector![1.0, -0.1];
    let stage = Arc::new(StageModel::new(
        Box::new(space),
        Box::new(space),
        Box::new(lqr_cost()),
        Box::new(lqr_dynamics()),
    ));
    let init = StateErrorResidual::new(space, x0);
    let mut problem = TrajOptProblem::new(Box::new(init), Box::new(lqr_cost()));
    for _ in 0..nsteps {
        problem.add_stage(Arc::clone(&stage));
    }
    problem
}

fn lqr_initial_guess(problem: &TrajOptProblem) -> (Vec<DVector<f64>>, Vec<DVector<f64>>) {
    let nsteps = problem.num_steps();
    let space = VectorSpace::new(2);
    let dynamics = lqr_dynamics();
    let us: Vec<DVector<f64>> = (0..nsteps).map(|_| DVector::zeros(2)).collect();
    let xs = rollout(&dynamics, &space, &dvector![1.0, -0.1], &us);
    (xs, us)
}

#[test]
fn lqr_converges_in_two_al_iterations() {
    let problem = lqr_problem(20);
    let (xs, us) = lqr_initial_guess(&problem);

    let mut solver = SolverProxDdp::with_params(
        1e-7,
        1e-6,
        0.0,
        100,
        VerboseLevel::Quiet,
        HessianApprox::GaussNewton,
    );
    solver.setup(&problem).expect("setup");
    let converged = solver.run(&problem, &xs, &us).expect("run");
    let results = solver.results().expect("results");

    assert!(converged, "solver did not converge: {}", results);
    assert!(results.al_iter <= 2, "al_iter = {}", results.al_iter);
    assert!(results.prim_infeas <= 1e-7);
    assert!(results.dual_infeas <= 1e-7);
    assert!(
        results.xs[20].norm() <= 1e-3,
        "terminal state too large: {}",
        results.xs[20].norm()
    );
}

#[test]
fn lqr_with_terminal_equality() {
    let mut problem = lqr_problem(20);
    let space = VectorSpace::new(2);
    problem.add_terminal_constraint(
        Box::new(StateErrorResidual::new(space, DVector::zeros(2))),
        Box::new(EqualitySet),
    );
    let (xs, us) = lqr_initial_guess(&problem);

    let mut solver = SolverProxDdp::with_params(
        1e-7,
        1e-2,
        0.0,
        200,
        VerboseLevel::Quiet,
        HessianApprox::GaussNewton,
    );
    solver.setup(&problem).expect("setup");
    let converged = solver.run(&problem, &xs, &us).expect("run");
    let results = solver.results().expect("results");

    assert!(converged, "solver did not converge: {}", results);
    assert!(results.al_iter <= 20);
    assert!(results.prim_infeas <= 1e-7);
    // The terminal state is pinned and its multiplier carries the cost
    // gradient there.
    assert!(results.xs[20].norm() <= 1e-6, "x_N = {}", results.xs[20]);
    assert!(results.vs[20].norm() > 1e-8, "terminal multiplier vanished");
}

#[test]
fn lqr_with_control_bounds() {
    let bound = 0.1;
    let mut problem = lqr_problem(20);
    // Rebuild stages with the control-bound constraint attached.
    let space = VectorSpace::new(2);
    let mut stage = StageModel::new(
        Box::new(space),
        Box::new(space),
        Box::new(lqr_cost()),
        Box::new(lqr_dynamics()),
    );
    stage.add_constraint(
        Box::new(LinearFunction::control_identity(2, 2)),
        Box::new(BoxSet::new(
            DVector::from_element(2, -bound),
            DVector::from_element(2, bound),
        )),
    );
    let stage = Arc::new(stage);
    problem.stages.clear();
    for _ in 0..20 {
        problem.add_stage(Arc::clone(&stage));
    }
    let (xs, us) = lqr_initial_guess(&problem);

    let mut solver = SolverProxDdp::with_params(
        1e-7,
        1e-2,
        0.0,
        400,
        VerboseLevel::Quiet,
        HessianApprox::GaussNewton,
    );
    solver.max_al_iters = 40;
    solver.setup(&problem).expect("setup");
    let converged = solver.run(&problem, &xs, &us).expect("run");
    let results = solver.results().expect("results");

    assert!(converged, "solver did not converge: {}", results);
    let max_u = results
        .us
        .iter()
        .map(|u| u.amax())
        .fold(0.0_f64, f64::max);
    assert!(max_u <= bound + 1e-6, "bound violated: {}", max_u);
    // The unconstrained optimum exceeds the bound, so the constraint must be
    // active somewhere.
    assert!(max_u >= bound - 1e-6, "no active bound: {}", max_u);
}

#[test]
fn unstable_system_triggers_regularization() {
    let space = VectorSpace::new(2);
    let a = DMatrix::from_diagonal(&dvector![1.5, 1.2]);
    let b = DMatrix::identity(2, 2);
    let dynamics = LinearDiscreteDynamics::new(a, b, DVector::zeros(2));
    // Indefinite state weight: the condensed control Hessian goes indefinite
    // until regularization kicks in.
    let w_x = DMatrix::from_diagonal(&dvector![-1.0, 1.0]);
    let w_u = DMatrix::identity(2, 2) * 1e-2;
    let cost = QuadraticCost::new(w_x, w_u);

    let stage = Arc::new(StageModel::new(
        Box::new(space),
        Box::new(space),
        Box::new(cost.clone()),
        Box::new(dynamics),
    ));
    let init = StateErrorResidual::new(space, dvector![0.5, -0.5]);
    let mut problem = TrajOptProblem::new(Box::new(init), Box::new(cost));
    for _ in 0..5 {
        problem.add_stage(Arc::clone(&stage));
    }

    let mut solver = SolverProxDdp::with_params(
        1e-6,
        1e-2,
        0.0,
        50,
        VerboseLevel::Quiet,
        HessianApprox::GaussNewton,
    );
    solver.max_al_iters = 10;
    solver.setup(&problem).expect("setup");
    let _ = solver.run(&problem, &[], &[]).expect("run");
    let results = solver.results().expect("results");

    assert!(
        results.num_reg_bumps >= 1,
        "regularization never triggered (bumps = {})",
        results.num_reg_bumps
    );
}

#[test]
fn warm_start_is_idempotent() {
    let problem = lqr_problem(20);
    let (xs, us) = lqr_initial_guess(&problem);

    let mut solver = SolverProxDdp::with_params(
        1e-7,
        1e-6,
        0.0,
        100,
        VerboseLevel::Quiet,
        HessianApprox::GaussNewton,
    );
    solver.setup(&problem).expect("setup");
    assert!(solver.run(&problem, &xs, &us).expect("run"));
    let first = solver.results().expect("results").clone();

    let converged = solver
        .run_with_multipliers(&problem, &first.xs, &first.us, &first.lams, &first.vs)
        .expect("rerun");
    let second = solver.results().expect("results");

    assert!(converged);
    assert!(second.al_iter <= 1, "warm start took {} outer iterations", second.al_iter);
    assert_abs_diff_eq!(second.traj_cost, first.traj_cost, epsilon = 1e-10);
    for t in 0..=20 {
        assert_abs_diff_eq!(second.xs[t], first.xs[t], epsilon = 1e-8);
    }
    for t in 0..20 {
        assert_abs_diff_eq!(second.us[t], first.us[t], epsilon = 1e-8);
    }
}

#[test]
fn parallel_solve_matches_serial() {
    let (xs, us) = {
        let p = lqr_problem(16);
        lqr_initial_guess(&p)
    };

    let mut run_with_threads = |threads: usize| {
        let problem = lqr_problem(16);
        let mut solver = SolverProxDdp::with_params(
            1e-8,
            1e-6,
            0.0,
            100,
            VerboseLevel::Quiet,
            HessianApprox::GaussNewton,
        );
        solver.num_threads = threads;
        solver.setup(&problem).expect("setup");
        assert!(solver.run(&problem, &xs, &us).expect("run"));
        solver.results().expect("results").clone()
    };

    let serial = run_with_threads(1);
    let parallel = run_with_threads(2);

    for t in 0..=16 {
        assert!(
            (&serial.xs[t] - &parallel.xs[t]).amax() < 1e-6,
            "state trajectories diverge at {}",
            t
        );
    }
    for t in 0..16 {
        assert!((&serial.us[t] - &parallel.us[t]).amax() < 1e-6);
    }
}

#[test]
fn default_init_runs_from_neutral() {
    let problem = lqr_problem(10);
    let mut solver = SolverProxDdp::new(1e-7);
    solver.setup(&problem).expect("setup");
    let converged = solver.run(&problem, &[], &[]).expect("run");
    assert!(converged);
}

#[test]
fn bad_warm_start_is_rejected() {
    let problem = lqr_problem(10);
    let mut solver = SolverProxDdp::new(1e-7);
    solver.setup(&problem).expect("setup");
    let xs_bad = vec![DVector::zeros(2); 3];
    assert!(solver.run(&problem, &xs_bad, &[]).is_err());
}

#[test]
fn neutral_init_respects_manifold() {
    // `difference(x, integrate(x, d)) == d` backs the default-init path.
    let space = VectorSpace::new(3);
    let x = dvector![0.2, -0.4, 1.0];
    let d = dvector![0.5, 0.25, -1.5];
    let y = space.integrate_new(&x, &d);
    let d2 = space.difference_new(&x, &y);
    assert!((d - d2).amax() < 1e-14);
}
