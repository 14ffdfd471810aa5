//! Minimal concrete models: quadratic costs, linear dynamics, affine
//! residuals.
//!
//! The solver core is model-agnostic; this module provides the small set of
//! concrete implementations needed to pose linear-quadratic and
//! box-constrained problems (and by the test suite).

mod lin_dynamics;
mod quad_cost;
mod residuals;

pub use lin_dynamics::LinearDiscreteDynamics;
pub use quad_cost::{CostStack, QuadraticCost};
pub use residuals::{LinearFunction, StateErrorResidual};
