//! Small shared helpers: norms, trajectory rollout.

use nalgebra::DVector;

use crate::funcs::StageFunction;
use crate::manifold::Manifold;

/// Infinity norm of a vector.
#[inline]
pub fn inf_norm(v: &DVector<f64>) -> f64 {
    v.iter().map(|x| x.abs()).fold(0.0_f64, f64::max)
}

/// Infinity norm over a sequence of vectors.
#[inline]
pub fn inf_norm_seq<'a, I>(vs: I) -> f64
where
    I: IntoIterator<Item = &'a DVector<f64>>,
{
    vs.into_iter()
        .map(inf_norm)
        .fold(0.0_f64, f64::max)
}

/// Forward-simulate explicit dynamics from `x0` under the control sequence
/// `us`, producing a state trajectory of length `us.len() + 1`.
///
/// The dynamics residual is interpreted as `x' - f(x, u)` on the next-state
/// space: the rollout solves the residual for `x'` through the function's
/// [`StageFunction::forward`] map.
pub fn rollout(
    dynamics: &dyn StageFunction,
    space: &dyn Manifold,
    x0: &DVector<f64>,
    us: &[DVector<f64>],
) -> Vec<DVector<f64>> {
    let mut xs = Vec::with_capacity(us.len() + 1);
    xs.push(x0.clone());
    for (t, u) in us.iter().enumerate() {
        let mut xnext = space.neutral();
        dynamics.forward(&xs[t], u, &mut xnext);
        xs.push(xnext);
    }
    xs
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::dvector;

    #[test]
    fn inf_norm_basics() {
        let v = dvector![1.0, -3.0, 2.0];
        assert_eq!(inf_norm(&v), 3.0);
        let w = dvector![0.5];
        assert_eq!(inf_norm_seq([&v, &w]), 3.0);
    }
}
