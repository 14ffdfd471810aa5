//! `gar`: generalized augmented Riccati solvers for LQ trajectory
//! subproblems.
//!
//! This module factorizes and solves the block-banded KKT system of a
//! proximally-regularized linear-quadratic problem:
//!
//! ```text
//! min  Σ_t ½ [x;u]ᵀ [Q Sᵀ; S R] [x;u] + qᵀx + rᵀu  (+ parameter terms)
//! s.t. A x_t + B u_t + E x_{t+1} + f = μ_dyn λ_{t+1}
//!      C x_t + D u_t + d             = μ_eq  v_t
//!      G0 x_0 + g0                   = μ_dyn λ_0
//! ```
//!
//! Two solvers share one stagewise factorization kernel:
//!
//! - [`ProximalRiccati`]: serial backward/forward sweep over the horizon.
//! - [`ParallelRiccati`]: splits the horizon into legs factorized
//!   concurrently, glued through a condensed symmetric block-tridiagonal
//!   saddle-point system in the leg-boundary states and costates.

mod block_tridiag;
mod ldl;
mod lqr_problem;
mod parallel;
mod riccati;

pub use block_tridiag::symmetric_block_tridiagonal_solve;
pub use ldl::DenseLdlt;
pub use lqr_problem::{lqr_fill_residual_rhs, LqKnot, LqrProblem};
pub use parallel::ParallelRiccati;
pub use riccati::{ProximalRiccati, StageFactor};
