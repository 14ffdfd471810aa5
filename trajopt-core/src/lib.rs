//! Trajopt: a proximal augmented-Lagrangian trajectory optimization core
//!
//! This library implements a solver for constrained, discrete-time optimal
//! control problems of the form
//!
//! ```text
//! minimize    Σ ℓ_i(x_i, u_i) + ℓ_N(x_N)
//! subject to  φ(x_i, u_i, x_{i+1}) = 0      (dynamics)
//!             g_j(x_i, u_i) ∈ C_j           (path constraints)
//!             x_0 fixed, terminal constraints on x_N
//! ```
//!
//! # Algorithm
//!
//! The solver combines an **augmented-Lagrangian (AL) outer loop** with a
//! **primal-dual DDP inner loop**:
//!
//! - **BCL penalty schedule** driving constraint infeasibility to zero
//! - **Structured Riccati factorization** (`gar` module) of the block-banded
//!   KKT system, serial or parallel over horizon legs
//! - **Proximal regularization** on the primal iterates
//! - **Armijo / nonmonotone line search** on a primal-dual merit function
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use trajopt_core::{SolverProxDdp, StageModel, TrajOptProblem, VectorSpace};
//! use trajopt_core::modelling::{LinearDiscreteDynamics, QuadraticCost, StateErrorResidual};
//!
//! let space = VectorSpace::new(nx);
//! let dynamics = LinearDiscreteDynamics::new(a, b, c);
//! let cost = QuadraticCost::new(w_x, w_u);
//! let stage = Arc::new(StageModel::new(
//!     Box::new(space),
//!     Box::new(space),
//!     Box::new(cost.clone()),
//!     Box::new(dynamics),
//! ));
//!
//! let init = StateErrorResidual::new(space, x0);
//! let mut problem = TrajOptProblem::new(Box::new(init), Box::new(cost));
//! for _ in 0..nsteps {
//!     problem.add_stage(Arc::clone(&stage));
//! }
//!
//! let mut solver = SolverProxDdp::new(1e-7);
//! solver.setup(&problem)?;
//! let converged = solver.run(&problem, &[], &[])?;
//! ```
//!
//! # References
//!
//! - Bertsekas, *Constrained Optimization and Lagrange Multiplier Methods*
//!   (the BCL outer-loop schedule)
//! - Mayne, Jacobson, *Differential Dynamic Programming*
//! - Wright, *Partitioned dynamic programming* (parallel Riccati condensing)

#![warn(clippy::all)]
#![allow(clippy::too_many_arguments)] // DDP recursions take many blocks

pub mod funcs;
pub mod gar;
pub mod manifold;
pub mod modelling;
pub mod problem;
pub mod sets;
pub mod solver;
pub mod threads;
pub mod utils;

// Re-export main types
pub use funcs::{Cost, CostData, FunctionData, StageFunction, UnaryFunction};
pub use manifold::{Manifold, VectorSpace};
pub use problem::{StageModel, TrajOptData, TrajOptProblem};
pub use sets::{BoxSet, ConstraintSet, EqualitySet, NegativeOrthant};
pub use solver::{
    apply_default_scaling_strategy, BclParams, ConstraintProxScaler, HessianApprox,
    LinesearchOptions, LsInterpolation, LsMode, MultiplierUpdateMode, Results, RolloutType,
    ScalerError, SetupError, SolverProxDdp, SolverStatus, VerboseLevel, Workspace,
};
