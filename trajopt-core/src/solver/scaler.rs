//! Per-block proximal weights for the augmented-Lagrangian penalty.
//!
//! Each stage groups its constraints into blocks; block `j` carries a scalar
//! weight `w_j > 0` that scales the AL penalty strength (`μ_j = μ / w_j`).

use nalgebra::DVector;
use thiserror::Error;

use crate::sets::ConstraintSet;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScalerError {
    #[error("block index {index} out of range (size {size})")]
    OutOfRange { index: usize, size: usize },

    #[error("weight vector has length {got}, expected {expected}")]
    WrongSize { expected: usize, got: usize },

    #[error("weights must be strictly positive")]
    NonPositiveWeight,
}

/// Constraint proximal scaler: one strictly positive weight per constraint
/// block of a stage.
#[derive(Debug, Clone)]
pub struct ConstraintProxScaler {
    weights: Vec<f64>,
    /// Row count of each block.
    block_rows: Vec<usize>,
}

impl ConstraintProxScaler {
    pub fn new(block_rows: &[usize]) -> Self {
        Self {
            weights: vec![1.0; block_rows.len()],
            block_rows: block_rows.to_vec(),
        }
    }

    /// Number of constraint blocks.
    pub fn size(&self) -> usize {
        self.weights.len()
    }

    /// Total constraint rows across blocks.
    pub fn total_rows(&self) -> usize {
        self.block_rows.iter().sum()
    }

    pub fn weight(&self, j: usize) -> Result<f64, ScalerError> {
        self.check_index(j)?;
        Ok(self.weights[j])
    }

    /// Direct weight access; panics on an out-of-range block like slice
    /// indexing.
    pub fn weight_of(&self, j: usize) -> f64 {
        self.weights[j]
    }

    /// Direct block-row access; panics on an out-of-range block.
    pub fn rows_of(&self, j: usize) -> usize {
        self.block_rows[j]
    }

    pub fn block_rows(&self, j: usize) -> Result<usize, ScalerError> {
        self.check_index(j)?;
        Ok(self.block_rows[j])
    }

    pub fn set_weight(&mut self, j: usize, value: f64) -> Result<(), ScalerError> {
        self.check_index(j)?;
        if value <= 0.0 {
            return Err(ScalerError::NonPositiveWeight);
        }
        self.weights[j] = value;
        Ok(())
    }

    pub fn set_weights(&mut self, weights: &[f64]) -> Result<(), ScalerError> {
        if weights.len() != self.weights.len() {
            return Err(ScalerError::WrongSize {
                expected: self.weights.len(),
                got: weights.len(),
            });
        }
        if weights.iter().any(|&w| w <= 0.0) {
            return Err(ScalerError::NonPositiveWeight);
        }
        self.weights.copy_from_slice(weights);
        Ok(())
    }

    /// Diagonal of the row-expanded weight matrix: `w_j` repeated across the
    /// rows of block `j`.
    pub fn diag_matrix(&self) -> DVector<f64> {
        let mut out = DVector::zeros(self.total_rows());
        let mut row = 0;
        for (j, &nr) in self.block_rows.iter().enumerate() {
            for _ in 0..nr {
                out[row] = self.weights[j];
                row += 1;
            }
        }
        out
    }

    fn check_index(&self, j: usize) -> Result<(), ScalerError> {
        if j >= self.weights.len() {
            return Err(ScalerError::OutOfRange {
                index: j,
                size: self.weights.len(),
            });
        }
        Ok(())
    }
}

/// Default weighting: equality-like blocks get a strong weight, cone blocks
/// the baseline.
pub fn apply_default_scaling_strategy(
    scaler: &mut ConstraintProxScaler,
    sets: &[&dyn ConstraintSet],
) {
    const EQUALITY_WEIGHT: f64 = 10.0;
    debug_assert_eq!(scaler.size(), sets.len());
    for (j, set) in sets.iter().enumerate() {
        let w = if set.is_equality() { EQUALITY_WEIGHT } else { 1.0 };
        // Index is in range by construction.
        let _ = scaler.set_weight(j, w);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sets::{EqualitySet, NegativeOrthant};

    #[test]
    fn size_is_constant_and_bounds_checked() {
        let mut scaler = ConstraintProxScaler::new(&[2, 3]);
        assert_eq!(scaler.size(), 2);
        assert_eq!(scaler.total_rows(), 5);
        assert!(scaler.set_weight(0, 4.0).is_ok());
        assert_eq!(scaler.size(), 2);
        assert_eq!(
            scaler.set_weight(2, 1.0),
            Err(ScalerError::OutOfRange { index: 2, size: 2 })
        );
        assert_eq!(scaler.weight(5).unwrap_err(), ScalerError::OutOfRange { index: 5, size: 2 });
    }

    #[test]
    fn set_weights_rejects_wrong_size() {
        let mut scaler = ConstraintProxScaler::new(&[1, 1, 2]);
        assert_eq!(
            scaler.set_weights(&[1.0, 2.0]),
            Err(ScalerError::WrongSize { expected: 3, got: 2 })
        );
        assert!(scaler.set_weights(&[1.0, 2.0, 3.0]).is_ok());
        assert_eq!(scaler.set_weights(&[1.0, -2.0, 3.0]), Err(ScalerError::NonPositiveWeight));
    }

    #[test]
    fn diag_matrix_repeats_block_weights() {
        let mut scaler = ConstraintProxScaler::new(&[2, 1]);
        scaler.set_weights(&[3.0, 7.0]).unwrap();
        let d = scaler.diag_matrix();
        assert_eq!(d.as_slice(), &[3.0, 3.0, 7.0]);
    }

    #[test]
    fn default_strategy_boosts_equalities() {
        let mut scaler = ConstraintProxScaler::new(&[2, 2]);
        let eq = EqualitySet;
        let ineq = NegativeOrthant;
        apply_default_scaling_strategy(&mut scaler, &[&eq, &ineq]);
        assert_eq!(scaler.weight(0).unwrap(), 10.0);
        assert_eq!(scaler.weight(1).unwrap(), 1.0);
    }
}
