//! Riccati solver correctness: agreement with a dense KKT factorization and
//! serial/parallel equivalence.

use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use trajopt_core::gar::{
    lqr_fill_residual_rhs, LqKnot, LqrProblem, ParallelRiccati, ProximalRiccati,
};
use trajopt_core::threads::ThreadPool;

const MU: f64 = 1e-2;

fn random_spd(rng: &mut StdRng, n: usize) -> DMatrix<f64> {
    let m = DMatrix::from_fn(n, n, |_, _| rng.gen_range(-1.0..1.0));
    let mut a = &m * m.transpose();
    a /= n.max(1) as f64;
    for i in 0..n {
        a[(i, i)] += 1.0;
    }
    a
}

fn random_vec(rng: &mut StdRng, n: usize) -> DVector<f64> {
    DVector::from_fn(n, |_, _| rng.gen_range(-1.0..1.0))
}

fn random_mat(rng: &mut StdRng, r: usize, c: usize) -> DMatrix<f64> {
    DMatrix::from_fn(r, c, |_, _| rng.gen_range(-0.5..0.5))
}

/// Random well-posed LQ problem over `horizon` steps, `nc` constraint rows
/// per knot.
fn random_problem(rng: &mut StdRng, nx: usize, nu: usize, nc: usize, horizon: usize) -> LqrProblem {
    let mut stages = Vec::with_capacity(horizon + 1);
    for _ in 0..horizon {
        let mut knot = LqKnot::new(nx, nu, nc);
        knot.Q = random_spd(rng, nx);
        knot.R = random_spd(rng, nu);
        knot.S = random_mat(rng, nu, nx);
        knot.q = random_vec(rng, nx);
        knot.r = random_vec(rng, nu);
        knot.A = random_mat(rng, nx, nx);
        knot.B = random_mat(rng, nx, nu);
        knot.E = -DMatrix::identity(nx, nx);
        knot.f = random_vec(rng, nx);
        knot.C = random_mat(rng, nc, nx);
        knot.D = random_mat(rng, nc, nu);
        knot.d = random_vec(rng, nc);
        stages.push(knot);
    }
    let mut term = LqKnot::with_dims(nx, 0, nc, 0);
    term.Q = random_spd(rng, nx);
    term.q = random_vec(rng, nx);
    term.C = random_mat(rng, nc, nx);
    term.d = random_vec(rng, nc);
    stages.push(term);

    let mut problem = LqrProblem::new(stages, nx);
    problem.G0 = DMatrix::identity(nx, nx);
    problem.g0 = random_vec(rng, nx);
    problem
}

/// Same as [`random_problem`], but with a distinct, non-identity stitching
/// matrix `E` on every knot. Exercises the leg-boundary assembly of the
/// condensed system, which is insensitive to `E` when all knots share one.
fn random_problem_varying_e(
    rng: &mut StdRng,
    nx: usize,
    nu: usize,
    nc: usize,
    horizon: usize,
) -> LqrProblem {
    let mut problem = random_problem(rng, nx, nu, nc, horizon);
    for t in 0..horizon {
        let mut e = random_mat(rng, nx, nx);
        for i in 0..nx {
            e[(i, i)] -= 1.0;
        }
        problem.stages[t].E = e;
    }
    problem
}

fn zeroed_solution(
    problem: &LqrProblem,
) -> (
    Vec<DVector<f64>>,
    Vec<DVector<f64>>,
    Vec<DVector<f64>>,
    Vec<DVector<f64>>,
) {
    let n = problem.stages.len();
    let xs: Vec<DVector<f64>> = problem.stages.iter().map(|k| DVector::zeros(k.nx)).collect();
    let us: Vec<DVector<f64>> = problem.stages.iter().map(|k| DVector::zeros(k.nu)).collect();
    let vs: Vec<DVector<f64>> = problem.stages.iter().map(|k| DVector::zeros(k.nc)).collect();
    let mut lams = Vec::with_capacity(n);
    lams.push(DVector::zeros(problem.nc0()));
    for t in 0..n - 1 {
        lams.push(DVector::zeros(problem.stages[t].nx2));
    }
    (xs, us, vs, lams)
}

/// Dense assembly and LU solve of the relaxed KKT system, as the reference
/// solution.
fn dense_reference(
    problem: &LqrProblem,
    mudyn: f64,
    mueq: f64,
) -> (
    Vec<DVector<f64>>,
    Vec<DVector<f64>>,
    Vec<DVector<f64>>,
    Vec<DVector<f64>>,
) {
    let n = problem.stages.len();
    let nc0 = problem.nc0();

    let mut off_x = vec![0usize; n];
    let mut off_u = vec![0usize; n];
    let mut off_v = vec![0usize; n];
    let mut off_lam = vec![0usize; n];
    let mut dim = nc0;
    for (t, knot) in problem.stages.iter().enumerate() {
        off_x[t] = dim;
        dim += knot.nx;
        off_u[t] = dim;
        dim += knot.nu;
        off_v[t] = dim;
        dim += knot.nc;
        if t + 1 < n {
            off_lam[t + 1] = dim;
            dim += knot.nx2;
        }
    }

    let mut kkt = DMatrix::<f64>::zeros(dim, dim);
    let mut rhs = DVector::<f64>::zeros(dim);

    let mut put = |kkt: &mut DMatrix<f64>, r: usize, c: usize, m: &DMatrix<f64>| {
        kkt.view_mut((r, c), m.shape()).copy_from(m);
        kkt.view_mut((c, r), (m.ncols(), m.nrows()))
            .tr_copy_from(m);
    };

    // Initial constraint block.
    for i in 0..nc0 {
        kkt[(i, i)] = -mudyn;
    }
    put(&mut kkt, 0, off_x[0], &problem.G0);
    rhs.rows_mut(0, nc0).copy_from(&problem.g0);

    for (t, knot) in problem.stages.iter().enumerate() {
        kkt.view_mut((off_x[t], off_x[t]), (knot.nx, knot.nx))
            .copy_from(&knot.Q);
        put(&mut kkt, off_u[t], off_x[t], &knot.S);
        kkt.view_mut((off_u[t], off_u[t]), (knot.nu, knot.nu))
            .copy_from(&knot.R);
        put(&mut kkt, off_v[t], off_x[t], &knot.C);
        put(&mut kkt, off_v[t], off_u[t], &knot.D);
        for i in 0..knot.nc {
            kkt[(off_v[t] + i, off_v[t] + i)] = -mueq;
        }
        if t + 1 < n {
            put(&mut kkt, off_lam[t + 1], off_x[t], &knot.A);
            put(&mut kkt, off_lam[t + 1], off_u[t], &knot.B);
            put(&mut kkt, off_lam[t + 1], off_x[t + 1], &knot.E);
            for i in 0..knot.nx2 {
                kkt[(off_lam[t + 1] + i, off_lam[t + 1] + i)] = -mudyn;
            }
            rhs.rows_mut(off_lam[t + 1], knot.nx2).copy_from(&knot.f);
        }
        rhs.rows_mut(off_x[t], knot.nx).copy_from(&knot.q);
        rhs.rows_mut(off_u[t], knot.nu).copy_from(&knot.r);
        rhs.rows_mut(off_v[t], knot.nc).copy_from(&knot.d);
    }

    let sol = kkt
        .lu()
        .solve(&(-rhs))
        .expect("dense reference KKT must be invertible");

    let (mut xs, mut us, mut vs, mut lams) = zeroed_solution(problem);
    lams[0].copy_from(&sol.rows(0, nc0));
    for (t, knot) in problem.stages.iter().enumerate() {
        xs[t].copy_from(&sol.rows(off_x[t], knot.nx));
        us[t].copy_from(&sol.rows(off_u[t], knot.nu));
        vs[t].copy_from(&sol.rows(off_v[t], knot.nc));
        if t + 1 < n {
            lams[t + 1].copy_from(&sol.rows(off_lam[t + 1], knot.nx2));
        }
    }
    (xs, us, vs, lams)
}

fn max_err(a: &[DVector<f64>], b: &[DVector<f64>]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).amax())
        .fold(0.0, f64::max)
}

#[test]
fn serial_matches_dense_reference_unconstrained() {
    let mut rng = StdRng::seed_from_u64(7);
    let horizon = 20;
    let problem = random_problem(&mut rng, 3, 2, 0, horizon);
    let (rx, ru, _rv, rl) = dense_reference(&problem, MU, MU);

    let mut riccati = ProximalRiccati::new(&problem);
    assert!(riccati.backward(&problem, MU, MU, 0.0));
    let (mut xs, mut us, mut vs, mut lams) = zeroed_solution(&problem);
    riccati.forward(&problem, &mut xs, &mut us, &mut vs, &mut lams, None);

    let tol = 1e-9 * horizon as f64;
    assert!(max_err(&xs, &rx) < tol, "state error {}", max_err(&xs, &rx));
    assert!(max_err(&us, &ru) < tol, "control error {}", max_err(&us, &ru));
    assert!(max_err(&lams, &rl) < tol, "costate error {}", max_err(&lams, &rl));
}

#[test]
fn serial_matches_dense_reference_constrained() {
    let mut rng = StdRng::seed_from_u64(8);
    let problem = random_problem(&mut rng, 2, 2, 1, 12);
    let (rx, ru, rv, rl) = dense_reference(&problem, MU, MU);

    let mut riccati = ProximalRiccati::new(&problem);
    assert!(riccati.backward(&problem, MU, MU, 0.0));
    let (mut xs, mut us, mut vs, mut lams) = zeroed_solution(&problem);
    riccati.forward(&problem, &mut xs, &mut us, &mut vs, &mut lams, None);

    assert!(max_err(&xs, &rx) < 1e-9);
    assert!(max_err(&us, &ru) < 1e-9);
    assert!(max_err(&vs, &rv) < 1e-9);
    assert!(max_err(&lams, &rl) < 1e-9);
}

#[test]
fn serial_kkt_residual_is_roundoff() {
    let mut rng = StdRng::seed_from_u64(9);
    let problem = random_problem(&mut rng, 3, 2, 2, 10);

    let mut riccati = ProximalRiccati::new(&problem);
    assert!(riccati.backward(&problem, MU, MU, 0.0));
    let (mut xs, mut us, mut vs, mut lams) = zeroed_solution(&problem);
    riccati.forward(&problem, &mut xs, &mut us, &mut vs, &mut lams, None);

    let mut residual = problem.clone();
    let err = lqr_fill_residual_rhs(&problem, &xs, &us, &vs, &lams, MU, MU, &mut residual);
    assert!(err < 1e-10, "KKT residual {}", err);
}

#[test]
fn parallel_matches_serial() {
    for &num_legs in &[2usize, 3, 4] {
        let mut rng = StdRng::seed_from_u64(100 + num_legs as u64);
        let horizon = 15;
        let serial_problem = random_problem(&mut rng, 3, 2, 1, horizon);
        let mut par_problem = serial_problem.clone();

        let mut serial = ProximalRiccati::new(&serial_problem);
        assert!(serial.backward(&serial_problem, MU, MU, 0.0));
        let (mut sx, mut su, mut sv, mut sl) = zeroed_solution(&serial_problem);
        serial.forward(&serial_problem, &mut sx, &mut su, &mut sv, &mut sl, None);

        let pool = ThreadPool::new(num_legs).expect("pool");
        let mut parallel = ParallelRiccati::new(&mut par_problem, num_legs);
        assert!(parallel.check_indices());
        assert!(parallel.backward(&mut par_problem, MU, MU, 0.0, &pool));
        let (mut px, mut pu, mut pv, mut pl) = zeroed_solution(&par_problem);
        parallel.forward(&par_problem, &mut px, &mut pu, &mut pv, &mut pl, &pool);

        assert!(
            max_err(&px, &sx) < 1e-8,
            "legs={}: state mismatch {}",
            num_legs,
            max_err(&px, &sx)
        );
        assert!(max_err(&pu, &su) < 1e-8, "legs={}: control mismatch", num_legs);
        assert!(max_err(&pv, &sv) < 1e-8, "legs={}: multiplier mismatch", num_legs);
        assert!(max_err(&pl, &sl) < 1e-8, "legs={}: costate mismatch", num_legs);
    }
}

#[test]
fn parallel_matches_serial_with_varying_stitching() {
    // Per-knot stitching matrices make the leg-boundary blocks of the
    // condensed system distinguishable: the boundary dynamics row must use
    // the owning (tail) knot's `E` and carry the same μ-relaxation as every
    // other dynamics row, or the condensed solve drifts from the band it is
    // condensing. The dense factorization of the full relaxed KKT system is
    // the ground truth for both solvers here.
    for &num_legs in &[2usize, 3, 4] {
        let mut rng = StdRng::seed_from_u64(200 + num_legs as u64);
        let horizon = 15;
        let serial_problem = random_problem_varying_e(&mut rng, 3, 2, 1, horizon);
        let mut par_problem = serial_problem.clone();

        let (rx, ru, rv, rl) = dense_reference(&serial_problem, MU, MU);

        let mut serial = ProximalRiccati::new(&serial_problem);
        assert!(serial.backward(&serial_problem, MU, MU, 0.0));
        let (mut sx, mut su, mut sv, mut sl) = zeroed_solution(&serial_problem);
        serial.forward(&serial_problem, &mut sx, &mut su, &mut sv, &mut sl, None);

        let pool = ThreadPool::new(num_legs).expect("pool");
        let mut parallel = ParallelRiccati::new(&mut par_problem, num_legs);
        assert!(parallel.backward(&mut par_problem, MU, MU, 0.0, &pool));
        let (mut px, mut pu, mut pv, mut pl) = zeroed_solution(&par_problem);
        parallel.forward(&par_problem, &mut px, &mut pu, &mut pv, &mut pl, &pool);

        assert!(
            max_err(&sx, &rx) < 1e-9,
            "legs={}: serial drifts from dense reference by {}",
            num_legs,
            max_err(&sx, &rx)
        );
        assert!(
            max_err(&px, &rx) < 1e-9,
            "legs={}: parallel drifts from dense reference by {}",
            num_legs,
            max_err(&px, &rx)
        );
        assert!(max_err(&pu, &ru) < 1e-9, "legs={}: control drift", num_legs);
        assert!(max_err(&pv, &rv) < 1e-9, "legs={}: multiplier drift", num_legs);
        assert!(max_err(&pl, &rl) < 1e-9, "legs={}: costate drift", num_legs);

        assert!(
            max_err(&px, &sx) < 1e-8,
            "legs={}: state mismatch {}",
            num_legs,
            max_err(&px, &sx)
        );
        assert!(max_err(&pu, &su) < 1e-8, "legs={}: control mismatch", num_legs);
        assert!(max_err(&pv, &sv) < 1e-8, "legs={}: multiplier mismatch", num_legs);
        assert!(max_err(&pl, &sl) < 1e-8, "legs={}: costate mismatch", num_legs);
    }
}

#[test]
fn backward_fails_on_indefinite_control_hessian() {
    let mut rng = StdRng::seed_from_u64(55);
    let mut problem = random_problem(&mut rng, 2, 2, 0, 5);
    // Make one control Hessian negative definite with no dynamics coupling
    // to rescue it.
    problem.stages[2].R = -DMatrix::identity(2, 2);
    problem.stages[2].B.fill(0.0);

    let mut riccati = ProximalRiccati::new(&problem);
    assert!(!riccati.backward(&problem, MU, MU, 0.0));
}
