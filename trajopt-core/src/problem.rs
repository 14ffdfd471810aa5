//! Trajectory optimization problem: stage models, problem data, parallel
//! evaluation.

use std::sync::Arc;

use nalgebra::DVector;
use rayon::prelude::*;

use crate::funcs::{Cost, CostData, FunctionData, StageFunction, UnaryFunction};
use crate::manifold::Manifold;
use crate::sets::ConstraintSet;
use crate::threads::ThreadPool;

/// One path constraint: a stage residual and its target set.
pub struct StageConstraint {
    pub func: Box<dyn StageFunction>,
    pub set: Box<dyn ConstraintSet>,
}

/// One terminal constraint on the final state.
pub struct TerminalConstraint {
    pub func: Box<dyn UnaryFunction>,
    pub set: Box<dyn ConstraintSet>,
}

/// A node in the discrete-time problem: running cost, dynamics, and a stack
/// of path constraints.
pub struct StageModel {
    pub xspace: Box<dyn Manifold>,
    pub xspace_next: Box<dyn Manifold>,
    pub cost: Box<dyn Cost>,
    pub dynamics: Box<dyn StageFunction>,
    pub constraints: Vec<StageConstraint>,
}

impl StageModel {
    pub fn new(
        xspace: Box<dyn Manifold>,
        xspace_next: Box<dyn Manifold>,
        cost: Box<dyn Cost>,
        dynamics: Box<dyn StageFunction>,
    ) -> Self {
        Self {
            xspace,
            xspace_next,
            cost,
            dynamics,
            constraints: Vec::new(),
        }
    }

    /// Attach a path constraint `func(x, u) ∈ set`.
    pub fn add_constraint(&mut self, func: Box<dyn StageFunction>, set: Box<dyn ConstraintSet>) {
        self.constraints.push(StageConstraint { func, set });
    }

    pub fn nx(&self) -> usize {
        self.xspace.nx()
    }

    pub fn ndx1(&self) -> usize {
        self.xspace.ndx()
    }

    pub fn ndx2(&self) -> usize {
        self.xspace_next.ndx()
    }

    pub fn nu(&self) -> usize {
        self.dynamics.nu()
    }

    /// Total path-constraint rows for this stage.
    pub fn nc(&self) -> usize {
        self.constraints.iter().map(|c| c.func.nr()).sum()
    }

    /// Number of constraint blocks.
    pub fn num_constraint_blocks(&self) -> usize {
        self.constraints.len()
    }
}

/// Per-stage evaluation scratch.
pub struct StageData {
    pub cost_data: CostData,
    pub dyn_data: FunctionData,
    pub constraint_data: Vec<FunctionData>,
}

impl StageData {
    fn new(stage: &StageModel) -> Self {
        Self {
            cost_data: stage.cost.create_data(),
            dyn_data: stage.dynamics.create_data(),
            constraint_data: stage
                .constraints
                .iter()
                .map(|c| c.func.create_data())
                .collect(),
        }
    }
}

/// Evaluation scratch for a whole problem: one [`StageData`] per stage plus
/// terminal and initial-condition blocks.
pub struct TrajOptData {
    pub stage_data: Vec<StageData>,
    pub init_data: FunctionData,
    pub term_cost_data: CostData,
    pub term_cstr_data: Vec<FunctionData>,
    /// Total trajectory cost from the last `evaluate` call.
    pub cost: f64,
}

/// Trajectory optimization problem.
///
/// ```text
/// minimize    Σ ℓ_i(x_i, u_i) + ℓ_N(x_N)
/// subject to  φ_i(x_i, u_i, x_{i+1}) = 0
///             g_i(x_i, u_i) ∈ C_i
///             init(x_0) = 0, terminal constraints on x_N
/// ```
///
/// Stages are shared (`Arc`) so a caller can register one model many times,
/// as in receding-horizon problems where every stage is identical.
pub struct TrajOptProblem {
    /// Initial condition, as a unary residual constrained to zero.
    pub init_constraint: Box<dyn UnaryFunction>,
    pub stages: Vec<Arc<StageModel>>,
    pub term_cost: Box<dyn Cost>,
    pub term_constraints: Vec<TerminalConstraint>,
    /// Neutral control passed to the terminal cost.
    unone: DVector<f64>,
}

impl TrajOptProblem {
    pub fn new(init_constraint: Box<dyn UnaryFunction>, term_cost: Box<dyn Cost>) -> Self {
        let unone = DVector::zeros(term_cost.nu());
        Self {
            init_constraint,
            stages: Vec::new(),
            term_cost,
            term_constraints: Vec::new(),
            unone,
        }
    }

    pub fn add_stage(&mut self, stage: Arc<StageModel>) {
        self.stages.push(stage);
    }

    pub fn add_terminal_constraint(
        &mut self,
        func: Box<dyn UnaryFunction>,
        set: Box<dyn ConstraintSet>,
    ) {
        self.term_constraints.push(TerminalConstraint { func, set });
    }

    pub fn remove_terminal_constraints(&mut self) {
        self.term_constraints.clear();
    }

    /// Horizon length `N` (number of stages).
    pub fn num_steps(&self) -> usize {
        self.stages.len()
    }

    /// Tangent dimension of the terminal state space.
    pub fn ndx_terminal(&self) -> usize {
        self.stages
            .last()
            .map_or_else(|| self.term_cost.ndx(), |s| s.ndx2())
    }

    /// Allocate evaluation scratch sized to this problem.
    pub fn create_data(&self) -> TrajOptData {
        TrajOptData {
            stage_data: self.stages.iter().map(|s| StageData::new(s)).collect(),
            init_data: self.init_constraint.create_data(),
            term_cost_data: self.term_cost.create_data(),
            term_cstr_data: self
                .term_constraints
                .iter()
                .map(|c| c.func.create_data())
                .collect(),
            cost: 0.0,
        }
    }

    /// Validate dimensional consistency across stages and terminal blocks.
    pub fn check_integrity(&self) -> Result<(), String> {
        if self.stages.is_empty() {
            return Err("problem has no stages".to_string());
        }
        if self.init_constraint.ndx() != self.stages[0].ndx1() {
            return Err(format!(
                "initial constraint acts on ndx={}, stage 0 has ndx={}",
                self.init_constraint.ndx(),
                self.stages[0].ndx1()
            ));
        }
        for (t, stage) in self.stages.iter().enumerate() {
            let dyn_fn = &stage.dynamics;
            if dyn_fn.nr() != stage.ndx2() {
                return Err(format!(
                    "stage {}: dynamics residual has {} rows, expected ndx2={}",
                    t,
                    dyn_fn.nr(),
                    stage.ndx2()
                ));
            }
            if dyn_fn.nu() != stage.nu() {
                return Err(format!("stage {}: dynamics nu mismatch", t));
            }
            if t + 1 < self.stages.len() && stage.ndx2() != self.stages[t + 1].ndx1() {
                return Err(format!(
                    "stage {}: next-state dim {} does not chain into stage {} (ndx={})",
                    t,
                    stage.ndx2(),
                    t + 1,
                    self.stages[t + 1].ndx1()
                ));
            }
            if stage.cost.ndx() != stage.ndx1() || stage.cost.nu() != stage.nu() {
                return Err(format!("stage {}: cost dimensions mismatch", t));
            }
            for (j, cstr) in stage.constraints.iter().enumerate() {
                if cstr.func.ndx1() != stage.ndx1() || cstr.func.nu() != stage.nu() {
                    return Err(format!("stage {}: constraint {} dimensions mismatch", t, j));
                }
            }
        }
        let ndx_term = self.ndx_terminal();
        if self.term_cost.ndx() != ndx_term {
            return Err(format!(
                "terminal cost acts on ndx={}, terminal state has ndx={}",
                self.term_cost.ndx(),
                ndx_term
            ));
        }
        for (j, cstr) in self.term_constraints.iter().enumerate() {
            if cstr.func.ndx() != ndx_term {
                return Err(format!("terminal constraint {} dimensions mismatch", j));
            }
        }
        Ok(())
    }

    /// Evaluate costs, dynamics and constraint residuals along `(xs, us)`,
    /// stage per stage, in parallel. Returns the total trajectory cost.
    pub fn evaluate(
        &self,
        xs: &[DVector<f64>],
        us: &[DVector<f64>],
        data: &mut TrajOptData,
        pool: &ThreadPool,
    ) -> f64 {
        let nsteps = self.num_steps();
        debug_assert_eq!(xs.len(), nsteps + 1);
        debug_assert_eq!(us.len(), nsteps);

        let stages = &self.stages;
        pool.install(|| {
            data.stage_data
                .par_iter_mut()
                .enumerate()
                .for_each(|(t, sd)| {
                    let stage = &stages[t];
                    stage.cost.evaluate(&xs[t], &us[t], &mut sd.cost_data);
                    stage
                        .dynamics
                        .evaluate(&xs[t], &us[t], &xs[t + 1], &mut sd.dyn_data);
                    for (j, cstr) in stage.constraints.iter().enumerate() {
                        cstr.func
                            .evaluate(&xs[t], &us[t], &xs[t + 1], &mut sd.constraint_data[j]);
                    }
                });
        });

        self.init_constraint.evaluate(&xs[0], &mut data.init_data);
        self.term_cost
            .evaluate(&xs[nsteps], &self.unone, &mut data.term_cost_data);
        for (j, cstr) in self.term_constraints.iter().enumerate() {
            cstr.func.evaluate(&xs[nsteps], &mut data.term_cstr_data[j]);
        }

        data.cost = data
            .stage_data
            .iter()
            .map(|sd| sd.cost_data.value)
            .sum::<f64>()
            + data.term_cost_data.value;
        data.cost
    }

    /// Evaluate first (and optionally second) derivatives along `(xs, us)`,
    /// stage per stage, in parallel.
    pub fn compute_derivatives(
        &self,
        xs: &[DVector<f64>],
        us: &[DVector<f64>],
        data: &mut TrajOptData,
        pool: &ThreadPool,
        second_order: bool,
    ) {
        let nsteps = self.num_steps();
        debug_assert_eq!(xs.len(), nsteps + 1);
        debug_assert_eq!(us.len(), nsteps);

        let stages = &self.stages;
        pool.install(|| {
            data.stage_data
                .par_iter_mut()
                .enumerate()
                .for_each(|(t, sd)| {
                    let stage = &stages[t];
                    stage
                        .cost
                        .compute_gradients(&xs[t], &us[t], &mut sd.cost_data);
                    if second_order {
                        stage
                            .cost
                            .compute_hessians(&xs[t], &us[t], &mut sd.cost_data);
                    }
                    stage
                        .dynamics
                        .compute_jacobians(&xs[t], &us[t], &xs[t + 1], &mut sd.dyn_data);
                    for (j, cstr) in stage.constraints.iter().enumerate() {
                        cstr.func.compute_jacobians(
                            &xs[t],
                            &us[t],
                            &xs[t + 1],
                            &mut sd.constraint_data[j],
                        );
                    }
                });
        });

        self.init_constraint
            .compute_jacobians(&xs[0], &mut data.init_data);
        self.term_cost
            .compute_gradients(&xs[nsteps], &self.unone, &mut data.term_cost_data);
        if second_order {
            self.term_cost
                .compute_hessians(&xs[nsteps], &self.unone, &mut data.term_cost_data);
        }
        for (j, cstr) in self.term_constraints.iter().enumerate() {
            cstr.func
                .compute_jacobians(&xs[nsteps], &mut data.term_cstr_data[j]);
        }
    }
}
