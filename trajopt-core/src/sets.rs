//! Closed convex constraint sets with cheap projections.
//!
//! The augmented-Lagrangian scheme only ever touches a set through its
//! projection, the associated normal-cone projection and the active-set mask
//! used to project constraint Jacobians. All operations act on vector views
//! so stage-wise constraint stacks can be processed block by block without
//! copies.

use nalgebra::{DMatrix, DVectorView, DVectorViewMut};

/// A closed convex set `C` used as the target of a path constraint
/// `g(x, u) ∈ C`.
pub trait ConstraintSet: Send + Sync {
    /// `out = Π_C(z)`.
    fn projection(&self, z: DVectorView<f64>, out: DVectorViewMut<f64>);

    /// `out = z − Π_C(z)`, the projection on the normal-cone directions.
    fn normal_cone_projection(&self, z: DVectorView<f64>, out: DVectorViewMut<f64>);

    /// Mark the rows of `z` on which the normal-cone projection is the
    /// identity (the AL-active rows).
    fn active_set(&self, z: DVectorView<f64>, mask: &mut [bool]);

    /// Whether this set is the singleton `{0}` (used by the default
    /// constraint-scaling strategy).
    fn is_equality(&self) -> bool {
        false
    }

    /// Zero out the inactive rows of a constraint Jacobian, in place.
    fn apply_active_set(&self, mask: &[bool], jac: &mut DMatrix<f64>) {
        debug_assert_eq!(mask.len(), jac.nrows());
        for (i, &act) in mask.iter().enumerate() {
            if !act {
                jac.row_mut(i).fill(0.0);
            }
        }
    }
}

/// The singleton `{0}`: equality constraints.
#[derive(Debug, Clone, Copy, Default)]
pub struct EqualitySet;

impl ConstraintSet for EqualitySet {
    fn projection(&self, _z: DVectorView<f64>, mut out: DVectorViewMut<f64>) {
        out.fill(0.0);
    }

    fn normal_cone_projection(&self, z: DVectorView<f64>, mut out: DVectorViewMut<f64>) {
        out.copy_from(&z);
    }

    fn active_set(&self, _z: DVectorView<f64>, mask: &mut [bool]) {
        mask.fill(true);
    }

    fn is_equality(&self) -> bool {
        true
    }
}

/// The negative orthant `{z : z ≤ 0}`: inequality constraints `g(x,u) ≤ 0`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NegativeOrthant;

impl ConstraintSet for NegativeOrthant {
    fn projection(&self, z: DVectorView<f64>, mut out: DVectorViewMut<f64>) {
        for i in 0..z.len() {
            out[i] = z[i].min(0.0);
        }
    }

    fn normal_cone_projection(&self, z: DVectorView<f64>, mut out: DVectorViewMut<f64>) {
        for i in 0..z.len() {
            out[i] = z[i].max(0.0);
        }
    }

    fn active_set(&self, z: DVectorView<f64>, mask: &mut [bool]) {
        for i in 0..z.len() {
            mask[i] = z[i] >= 0.0;
        }
    }
}

/// The box `{z : lb ≤ z ≤ ub}`.
#[derive(Debug, Clone)]
pub struct BoxSet {
    pub lb: nalgebra::DVector<f64>,
    pub ub: nalgebra::DVector<f64>,
}

impl BoxSet {
    pub fn new(lb: nalgebra::DVector<f64>, ub: nalgebra::DVector<f64>) -> Self {
        assert_eq!(lb.len(), ub.len(), "box bounds must have equal length");
        Self { lb, ub }
    }
}

impl ConstraintSet for BoxSet {
    fn projection(&self, z: DVectorView<f64>, mut out: DVectorViewMut<f64>) {
        debug_assert_eq!(z.len(), self.lb.len());
        for i in 0..z.len() {
            out[i] = z[i].clamp(self.lb[i], self.ub[i]);
        }
    }

    fn normal_cone_projection(&self, z: DVectorView<f64>, mut out: DVectorViewMut<f64>) {
        for i in 0..z.len() {
            out[i] = z[i] - z[i].clamp(self.lb[i], self.ub[i]);
        }
    }

    fn active_set(&self, z: DVectorView<f64>, mask: &mut [bool]) {
        for i in 0..z.len() {
            mask[i] = z[i] <= self.lb[i] || z[i] >= self.ub[i];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{dvector, DVector};

    #[test]
    fn orthant_projection() {
        let set = NegativeOrthant;
        let z = dvector![1.0, -2.0, 0.5];
        let mut p = DVector::zeros(3);
        set.projection(z.rows(0, 3), p.rows_mut(0, 3));
        assert_eq!(p, dvector![0.0, -2.0, 0.0]);
        let mut n = DVector::zeros(3);
        set.normal_cone_projection(z.rows(0, 3), n.rows_mut(0, 3));
        assert_eq!(n, dvector![1.0, 0.0, 0.5]);
    }

    #[test]
    fn box_active_set() {
        let set = BoxSet::new(dvector![-1.0, -1.0], dvector![1.0, 1.0]);
        let z = dvector![1.5, 0.0];
        let mut mask = [false; 2];
        set.active_set(z.rows(0, 2), &mut mask);
        assert_eq!(mask, [true, false]);
    }

    #[test]
    fn equality_normal_cone_is_identity() {
        let set = EqualitySet;
        let z = dvector![0.3, -0.7];
        let mut n = DVector::zeros(2);
        set.normal_cone_projection(z.rows(0, 2), n.rows_mut(0, 2));
        assert_eq!(n, z);
    }
}
