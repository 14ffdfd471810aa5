//! Dense LDLᵀ factorization for the stagewise KKT blocks.
//!
//! The Riccati recursion factors two kinds of symmetric blocks: the
//! quasi-definite dynamics-dual coupling (indefinite, saddle-point shaped)
//! and the condensed control Hamiltonian (must be SPD). Both use the same
//! in-place kernel; the SPD mode additionally rejects non-positive pivots so
//! the caller can inflate regularization instead of silently clamping.

use nalgebra::{DMatrix, DVector};

/// In-place dense LDLᵀ factorization with reusable storage.
///
/// Assemble the symmetric matrix through [`DenseLdlt::matrix_mut`], then call
/// [`DenseLdlt::factor`] (quasi-definite) or [`DenseLdlt::factor_spd`]. On
/// success the strict lower triangle holds the unit-diagonal `L` and the
/// diagonal holds `D`; solves run against that storage.
#[derive(Debug, Clone)]
pub struct DenseLdlt {
    mat: DMatrix<f64>,
    min_pivot: f64,
}

impl DenseLdlt {
    /// Pivot-magnitude floor below which a factorization reports breakdown.
    pub const DEFAULT_MIN_PIVOT: f64 = 1e-13;

    pub fn new(n: usize) -> Self {
        Self {
            mat: DMatrix::zeros(n, n),
            min_pivot: Self::DEFAULT_MIN_PIVOT,
        }
    }

    pub fn with_min_pivot(n: usize, min_pivot: f64) -> Self {
        assert!(min_pivot > 0.0, "pivot threshold must be positive");
        Self {
            mat: DMatrix::zeros(n, n),
            min_pivot,
        }
    }

    pub fn dim(&self) -> usize {
        self.mat.nrows()
    }

    /// Storage to assemble the next matrix into (full symmetric layout).
    pub fn matrix_mut(&mut self) -> &mut DMatrix<f64> {
        &mut self.mat
    }

    /// Factor a quasi-definite matrix. Fails when a pivot magnitude falls
    /// below the threshold.
    pub fn factor(&mut self) -> bool {
        self.factor_inner(false)
    }

    /// Factor a matrix required to be SPD. Fails on any pivot `≤` threshold.
    pub fn factor_spd(&mut self) -> bool {
        self.factor_inner(true)
    }

    fn factor_inner(&mut self, require_spd: bool) -> bool {
        let n = self.mat.nrows();
        for j in 0..n {
            let mut d = self.mat[(j, j)];
            for k in 0..j {
                let l = self.mat[(j, k)];
                d -= l * l * self.mat[(k, k)];
            }
            let ok = if require_spd {
                d > self.min_pivot
            } else {
                d.abs() > self.min_pivot
            };
            if !ok {
                return false;
            }
            self.mat[(j, j)] = d;
            for i in (j + 1)..n {
                let mut v = self.mat[(i, j)];
                for k in 0..j {
                    v -= self.mat[(i, k)] * self.mat[(j, k)] * self.mat[(k, k)];
                }
                self.mat[(i, j)] = v / d;
            }
        }
        true
    }

    /// Solve `A x = b` in place using the stored factors.
    pub fn solve_in_place(&self, b: &mut DVector<f64>) {
        let n = self.mat.nrows();
        debug_assert_eq!(b.len(), n);
        // L z = b
        for i in 0..n {
            let mut v = b[i];
            for k in 0..i {
                v -= self.mat[(i, k)] * b[k];
            }
            b[i] = v;
        }
        // D y = z
        for i in 0..n {
            b[i] /= self.mat[(i, i)];
        }
        // Lᵀ x = y
        for i in (0..n).rev() {
            let mut v = b[i];
            for k in (i + 1)..n {
                v -= self.mat[(k, i)] * b[k];
            }
            b[i] = v;
        }
    }

    /// Solve `A X = B` in place, column by column.
    pub fn solve_mat_in_place(&self, b: &mut DMatrix<f64>) {
        let n = self.mat.nrows();
        debug_assert_eq!(b.nrows(), n);
        for c in 0..b.ncols() {
            // Forward, diagonal and backward sweeps on column c.
            for i in 0..n {
                let mut v = b[(i, c)];
                for k in 0..i {
                    v -= self.mat[(i, k)] * b[(k, c)];
                }
                b[(i, c)] = v;
            }
            for i in 0..n {
                b[(i, c)] /= self.mat[(i, i)];
            }
            for i in (0..n).rev() {
                let mut v = b[(i, c)];
                for k in (i + 1)..n {
                    v -= self.mat[(k, i)] * b[(k, c)];
                }
                b[(i, c)] = v;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::dvector;

    #[test]
    fn factor_and_solve_spd() {
        let a = DMatrix::from_row_slice(3, 3, &[4.0, 1.0, 0.5, 1.0, 3.0, 0.2, 0.5, 0.2, 2.0]);
        let x_ref = dvector![1.0, -2.0, 0.5];
        let b = &a * &x_ref;

        let mut ldlt = DenseLdlt::new(3);
        ldlt.matrix_mut().copy_from(&a);
        assert!(ldlt.factor_spd());

        let mut x = b;
        ldlt.solve_in_place(&mut x);
        assert!((x - x_ref).amax() < 1e-12);
    }

    #[test]
    fn spd_mode_rejects_indefinite() {
        let a = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, -1.0]);
        let mut ldlt = DenseLdlt::new(2);
        ldlt.matrix_mut().copy_from(&a);
        assert!(!ldlt.factor_spd());

        // The quasi-definite mode accepts the same matrix.
        ldlt.matrix_mut().copy_from(&a);
        assert!(ldlt.factor());
    }

    #[test]
    fn saddle_point_block() {
        // [[P, I], [I, -mu I]] with P SPD, the shape factored at every stage.
        let mu = 0.01;
        let a = DMatrix::from_row_slice(
            4,
            4,
            &[
                2.0, 0.3, 1.0, 0.0, //
                0.3, 1.5, 0.0, 1.0, //
                1.0, 0.0, -mu, 0.0, //
                0.0, 1.0, 0.0, -mu,
            ],
        );
        let x_ref = dvector![0.1, -0.2, 0.3, 0.4];
        let b = &a * &x_ref;

        let mut ldlt = DenseLdlt::new(4);
        ldlt.matrix_mut().copy_from(&a);
        assert!(ldlt.factor());
        let mut x = b;
        ldlt.solve_in_place(&mut x);
        assert!((x - x_ref).amax() < 1e-10);
    }
}
