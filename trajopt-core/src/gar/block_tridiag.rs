//! Symmetric block-tridiagonal LDLᵀ solver for the condensed saddle system.

use nalgebra::{DMatrix, DVector};

use super::ldl::DenseLdlt;

/// Solve a symmetric block-tridiagonal system in place.
///
/// `subdiagonal[i]` couples block row `i+1` to `i` and must equal
/// `superdiagonal[i]ᵀ`. On success `rhs` holds the solution; `diagonal` and
/// `superdiagonal` are overwritten with Schur complements and back-solve
/// factors. `facs` provides one factorization workspace per diagonal block,
/// sized to match. Returns `false` when a diagonal pivot block cannot be
/// factored.
pub fn symmetric_block_tridiagonal_solve(
    subdiagonal: &mut [DMatrix<f64>],
    diagonal: &mut [DMatrix<f64>],
    superdiagonal: &mut [DMatrix<f64>],
    rhs: &mut [DVector<f64>],
    facs: &mut [DenseLdlt],
) -> bool {
    let n = diagonal.len();
    if n == 0 {
        return true;
    }
    debug_assert_eq!(subdiagonal.len(), n - 1);
    debug_assert_eq!(superdiagonal.len(), n - 1);
    debug_assert_eq!(rhs.len(), n);
    debug_assert_eq!(facs.len(), n);

    // Downward sweep: factor each pivot block, form the Schur complement of
    // the next one, and forward-substitute the right-hand side.
    for i in 0..n {
        if i > 0 {
            // W = D_{i-1}^{-1} U_{i-1}, stored over the superdiagonal.
            facs[i - 1].solve_mat_in_place(&mut superdiagonal[i - 1]);
            // D_i ← D_i − L_{i-1} W.
            diagonal[i].gemm(-1.0, &subdiagonal[i - 1], &superdiagonal[i - 1], 1.0);
            // z_{i-1} = D_{i-1}^{-1} b_{i-1}; b_i ← b_i − L_{i-1} z_{i-1}.
            facs[i - 1].solve_in_place(&mut rhs[i - 1]);
            let (rprev, rcur) = {
                let (a, b) = rhs.split_at_mut(i);
                (&a[i - 1], &mut b[0])
            };
            rcur.gemv(-1.0, &subdiagonal[i - 1], rprev, 1.0);
        }
        let fac = &mut facs[i];
        debug_assert_eq!(fac.dim(), diagonal[i].nrows());
        fac.matrix_mut().copy_from(&diagonal[i]);
        if !fac.factor() {
            return false;
        }
    }

    // Backward sweep: x_{n-1} = D_{n-1}^{-1} b_{n-1}, then
    // x_i = z_i − W_i x_{i+1}.
    facs[n - 1].solve_in_place(&mut rhs[n - 1]);
    for i in (0..n - 1).rev() {
        let (rcur, rnext) = {
            let (a, b) = rhs.split_at_mut(i + 1);
            (&mut a[i], &b[0])
        };
        rcur.gemv(-1.0, &superdiagonal[i], rnext, 1.0);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn spd_block(rng: &mut StdRng, n: usize) -> DMatrix<f64> {
        let m = DMatrix::from_fn(n, n, |_, _| rng.gen_range(-1.0..1.0));
        let mut a = &m * m.transpose();
        for i in 0..n {
            a[(i, i)] += n as f64;
        }
        a
    }

    /// Assemble the dense equivalent of the block-tridiagonal system.
    fn dense_assemble(
        sub: &[DMatrix<f64>],
        diag: &[DMatrix<f64>],
        sup: &[DMatrix<f64>],
    ) -> DMatrix<f64> {
        let sizes: Vec<usize> = diag.iter().map(|d| d.nrows()).collect();
        let total: usize = sizes.iter().sum();
        let offsets: Vec<usize> = sizes
            .iter()
            .scan(0, |acc, &s| {
                let o = *acc;
                *acc += s;
                Some(o)
            })
            .collect();
        let mut a = DMatrix::zeros(total, total);
        for (i, d) in diag.iter().enumerate() {
            a.view_mut((offsets[i], offsets[i]), d.shape()).copy_from(d);
        }
        for (i, u) in sup.iter().enumerate() {
            a.view_mut((offsets[i], offsets[i + 1]), u.shape())
                .copy_from(u);
            a.view_mut((offsets[i + 1], offsets[i]), sub[i].shape())
                .copy_from(&sub[i]);
        }
        a
    }

    #[test]
    fn residual_bounded_for_random_spd_blocks() {
        let mut rng = StdRng::seed_from_u64(1234);
        for &(nblocks, bs) in &[(3usize, 2usize), (5, 4), (4, 8)] {
            let diag: Vec<DMatrix<f64>> =
                (0..nblocks).map(|_| spd_block(&mut rng, bs)).collect();
            let sup: Vec<DMatrix<f64>> = (0..nblocks - 1)
                .map(|_| DMatrix::from_fn(bs, bs, |_, _| rng.gen_range(-0.3..0.3)))
                .collect();
            let sub: Vec<DMatrix<f64>> = sup.iter().map(|u| u.transpose()).collect();
            let rhs: Vec<DVector<f64>> = (0..nblocks)
                .map(|_| DVector::from_fn(bs, |_, _| rng.gen_range(-1.0..1.0)))
                .collect();

            let dense = dense_assemble(&sub, &diag, &sup);
            let dense_rhs =
                DVector::from_iterator(nblocks * bs, rhs.iter().flat_map(|b| b.iter().copied()));

            let mut sub_w = sub.clone();
            let mut diag_w = diag.clone();
            let mut sup_w = sup.clone();
            let mut rhs_w = rhs.clone();
            let mut facs: Vec<DenseLdlt> = (0..nblocks).map(|_| DenseLdlt::new(bs)).collect();
            assert!(symmetric_block_tridiagonal_solve(
                &mut sub_w, &mut diag_w, &mut sup_w, &mut rhs_w, &mut facs,
            ));

            let x = DVector::from_iterator(
                nblocks * bs,
                rhs_w.iter().flat_map(|b| b.iter().copied()),
            );
            let resid = &dense * &x - dense_rhs;
            assert!(
                resid.amax() <= 1e-10,
                "residual {} too large for {} blocks of size {}",
                resid.amax(),
                nblocks,
                bs
            );
        }
    }

    #[test]
    fn saddle_shaped_system_solves() {
        // First block negative definite, as in the condensed KKT system.
        let mut rng = StdRng::seed_from_u64(99);
        let mu = 0.05;
        let diag = vec![
            DMatrix::identity(3, 3) * (-mu),
            spd_block(&mut rng, 3),
            spd_block(&mut rng, 3),
        ];
        let sup = vec![
            DMatrix::from_fn(3, 3, |_, _| rng.gen_range(-1.0..1.0)),
            DMatrix::from_fn(3, 3, |_, _| rng.gen_range(-1.0..1.0)),
        ];
        let sub: Vec<DMatrix<f64>> = sup.iter().map(|u| u.transpose()).collect();
        let rhs: Vec<DVector<f64>> = (0..3)
            .map(|_| DVector::from_fn(3, |_, _| rng.gen_range(-1.0..1.0)))
            .collect();

        let dense = dense_assemble(&sub, &diag, &sup);
        let dense_rhs = DVector::from_iterator(9, rhs.iter().flat_map(|b| b.iter().copied()));

        let mut sub_w = sub;
        let mut diag_w = diag;
        let mut sup_w = sup;
        let mut rhs_w = rhs;
        let mut facs: Vec<DenseLdlt> = (0..3).map(|_| DenseLdlt::new(3)).collect();
        assert!(symmetric_block_tridiagonal_solve(
            &mut sub_w, &mut diag_w, &mut sup_w, &mut rhs_w, &mut facs,
        ));
        let x = DVector::from_iterator(9, rhs_w.iter().flat_map(|b| b.iter().copied()));
        assert!((&dense * &x - dense_rhs).amax() <= 1e-9);
    }
}
