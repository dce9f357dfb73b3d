//! Model Predictive Control (MPC) for path tracking
//!
//! Each control cycle builds a nonlinear program over a short horizon of
//! kinematic bicycle states and actuations, solves it with PANOC, and
//! returns only the first steering/throttle pair together with the
//! predicted path for display.
//!
//! The dynamics equalities are eliminated by rolling the model forward from
//! the measured state, so the optimizer works on the box-constrained
//! actuator tail of the decision vector. The full vector is rebuilt after
//! each solve and its residuals are checked against the constraint bounds.
//!
//! Ref:
//!     - L. Stella, A. Themelis, P. Sopasakis, P. Patrinos, "A simple and
//!       efficient algorithm for nonlinear model predictive control"
//!     - R. Rajamani, "Vehicle Dynamics and Control", kinematic bicycle model

pub mod config;
pub mod evaluator;
pub mod layout;
pub mod model;

use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use log::{debug, warn};
use optimization_engine::{
    constraints::Rectangle,
    core::ExitStatus,
    panoc::{PANOCCache, PANOCOptimizer},
    Optimizer, Problem, SolverError,
};

use crate::common::{
    Actuation, Controller, MpcError, MpcResult, Path2D, ReferenceCurve, VehicleState,
};

pub use config::{ActuatorLimits, CostWeights, Horizon, MpcConfig, SolverSettings};
pub use evaluator::NlpEvaluator;
pub use layout::{ControlNode, StateNode, Trajectory, VariableLayout};
pub use model::KinematicBicycle;

/// Solver statistics for one successful solve
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolveReport {
    pub exit_status: ExitStatus,
    pub iterations: usize,
    pub solve_time: Duration,
    /// Fixed-point residual norm at exit
    pub residual: f64,
    /// Largest dynamics residual outside its bounds
    pub constraint_violation: f64,
}

/// Result of one MPC cycle
#[derive(Debug, Clone)]
pub struct MpcSolution {
    /// First actuation of the optimal plan, the only one to apply
    pub actuation: Actuation,
    /// Predicted x for steps 1..N
    pub predicted_x: Vec<f64>,
    /// Predicted y for steps 1..N
    pub predicted_y: Vec<f64>,
    /// Objective at the solution
    pub cost: f64,
    /// Whole optimal plan, for diagnostics
    pub plan: Trajectory<f64>,
    pub report: SolveReport,
}

impl MpcSolution {
    pub fn predicted_path(&self) -> Path2D {
        Path2D::from_xy(&self.predicted_x, &self.predicted_y)
    }
}

/// Receding-horizon path tracker
///
/// Holds no state between cycles: every solve depends only on the vehicle
/// state and reference curve passed in.
#[derive(Debug, Clone)]
pub struct MpcController {
    config: MpcConfig,
    layout: VariableLayout,
}

impl MpcController {
    /// Fails with `ConfigurationError` if the configuration is unusable.
    pub fn new(config: MpcConfig) -> MpcResult<Self> {
        config.validate()?;
        let layout = VariableLayout::new(config.horizon.steps);
        Ok(MpcController { config, layout })
    }

    pub fn config(&self) -> &MpcConfig {
        &self.config
    }

    pub fn layout(&self) -> &VariableLayout {
        &self.layout
    }

    /// Solve one cycle.
    ///
    /// Returns an error instead of a command whenever the optimizer does not
    /// report convergence or anything non-finite shows up.
    pub fn solve(&self, state: &VehicleState, curve: &ReferenceCurve) -> MpcResult<MpcSolution> {
        if !state.is_finite() {
            return Err(MpcError::NumericDegeneracy(format!(
                "non-finite vehicle state {:?}",
                state.to_array()
            )));
        }
        if !curve.is_finite() {
            return Err(MpcError::NumericDegeneracy(format!(
                "non-finite reference coefficients {:?}",
                curve.coefficients.as_slice()
            )));
        }

        let layout = self.layout;
        let settings = &self.config.solver;
        let evaluator = NlpEvaluator::new(&self.config, *curve);

        let (u_lower, u_upper) = layout.control_bounds(&self.config.limits);
        let bounds = Rectangle::new(Some(&u_lower), Some(&u_upper));

        let cost = |u: &[f64], c: &mut f64| -> Result<(), SolverError> {
            *c = evaluator.rollout_cost(state, u);
            Ok(())
        };
        let cost_gradient = |u: &[f64], grad: &mut [f64]| -> Result<(), SolverError> {
            evaluator.rollout_gradient(state, u, grad);
            Ok(())
        };
        let problem = Problem::new(&bounds, cost_gradient, cost);

        let mut cache = PANOCCache::new(
            layout.n_control_vars(),
            settings.tolerance,
            settings.lbfgs_memory,
        );
        let mut optimizer = PANOCOptimizer::new(problem, &mut cache)
            .with_max_iter(settings.max_iterations)
            .with_max_duration(settings.max_duration());

        let mut u = vec![0.0; layout.n_control_vars()];
        // optimization_engine asserts on some exits (e.g. a budget spent
        // before the first iteration completes); a panic is a failed solve
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| optimizer.solve(&mut u)));
        let status = match outcome {
            Ok(result) => result.map_err(from_solver_error)?,
            Err(_) => {
                warn!("MPC solve aborted inside the optimizer");
                return Err(MpcError::SolverNonConvergence {
                    status: "Aborted".to_string(),
                    iterations: 0,
                });
            }
        };

        let exit_status = status.exit_status();
        if exit_status != ExitStatus::Converged {
            warn!(
                "MPC solve failed: {:?} after {} iterations in {:?} (residual {:.2e})",
                exit_status,
                status.iterations(),
                status.solve_time(),
                status.norm_fpr()
            );
            return Err(MpcError::SolverNonConvergence {
                status: format!("{:?}", exit_status),
                iterations: status.iterations(),
            });
        }

        let plan = evaluator.rollout(state, &u);
        let mut vars = vec![0.0; layout.n_vars()];
        layout.pack(&plan, &mut vars);

        let (var_lower, var_upper) = layout.variable_bounds(&self.config.limits);
        let within_bounds = vars
            .iter()
            .zip(var_lower.iter().zip(&var_upper))
            .all(|(v, (lo, hi))| v.is_finite() && lo <= v && v <= hi);
        if !within_bounds {
            warn!("MPC solve produced a non-finite or unbounded plan");
            return Err(MpcError::NumericDegeneracy(
                "solver returned a non-finite or unbounded plan".to_string(),
            ));
        }

        let (con_lower, con_upper) = layout.constraint_bounds(state);
        let violation = evaluator.constraint_violation(&vars, &con_lower, &con_upper);
        if violation > settings.constraint_tolerance {
            warn!("MPC plan violates the dynamics by {:.2e}", violation);
            return Err(MpcError::NumericDegeneracy(format!(
                "plan violates the dynamics by {:e}",
                violation
            )));
        }

        let first = plan.controls[0];
        let report = SolveReport {
            exit_status,
            iterations: status.iterations(),
            solve_time: status.solve_time(),
            residual: status.norm_fpr(),
            constraint_violation: violation,
        };
        let solution = MpcSolution {
            actuation: Actuation::new(first.delta, first.a),
            predicted_x: plan.states[1..].iter().map(|s| s.x).collect(),
            predicted_y: plan.states[1..].iter().map(|s| s.y).collect(),
            cost: evaluator.cost_value(&vars),
            plan,
            report,
        };

        debug!(
            "MPC solved in {:?} ({} iterations): cost {:.4}, violation {:.2e}, steering {:.4}, acceleration {:.4}",
            report.solve_time,
            report.iterations,
            solution.cost,
            report.constraint_violation,
            solution.actuation.steering,
            solution.actuation.acceleration
        );

        Ok(solution)
    }

    /// Solve one cycle, appending the predicted x and y coordinates to the
    /// given buffers. Nothing is appended on failure.
    pub fn solve_into(
        &self,
        state: &VehicleState,
        curve: &ReferenceCurve,
        xs: &mut Vec<f64>,
        ys: &mut Vec<f64>,
    ) -> MpcResult<Actuation> {
        let solution = self.solve(state, curve)?;
        xs.extend_from_slice(&solution.predicted_x);
        ys.extend_from_slice(&solution.predicted_y);
        Ok(solution.actuation)
    }
}

impl Controller for MpcController {
    type State = VehicleState;
    type Reference = ReferenceCurve;
    type Output = MpcResult<MpcSolution>;

    fn compute(&mut self, state: &VehicleState, reference: &ReferenceCurve) -> Self::Output {
        self.solve(state, reference)
    }

    // nothing is carried between cycles
    fn reset(&mut self) {}
}

fn from_solver_error(err: SolverError) -> MpcError {
    match err {
        SolverError::NotFiniteComputation => MpcError::NumericDegeneracy(
            "solver encountered a non-finite computation".to_string(),
        ),
        other => MpcError::SolverError(format!("{:?}", other)),
    }
}
