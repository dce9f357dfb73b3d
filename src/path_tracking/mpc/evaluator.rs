//! Objective and dynamics constraints of the MPC nonlinear program
//!
//! Both mappings are straight-line arithmetic over the decision variables,
//! generic over the scalar type. The solver only sees the actuator tail:
//! states are produced by rolling the model forward from the measured state,
//! which leaves every dynamics residual at zero. Gradients come from
//! evaluating the rollout on forward-mode dual numbers, one seeded actuator
//! at a time.

use itertools::Itertools;
use num_dual::{Dual64, DualNum};

use crate::common::{ReferenceCurve, VehicleState};
use crate::path_tracking::mpc::config::MpcConfig;
use crate::path_tracking::mpc::layout::{ControlNode, StateNode, Trajectory, VariableLayout};
use crate::path_tracking::mpc::model::KinematicBicycle;

/// Cost and constraint callback bound to one reference curve
pub struct NlpEvaluator<'a> {
    config: &'a MpcConfig,
    layout: VariableLayout,
    model: KinematicBicycle,
    curve: ReferenceCurve,
}

impl<'a> NlpEvaluator<'a> {
    pub fn new(config: &'a MpcConfig, curve: ReferenceCurve) -> Self {
        NlpEvaluator {
            config,
            layout: VariableLayout::new(config.horizon.steps),
            model: KinematicBicycle::new(config.lf),
            curve,
        }
    }

    pub fn layout(&self) -> &VariableLayout {
        &self.layout
    }

    /// Weighted tracking error, speed error, actuator effort and actuator
    /// rate of change.
    pub fn cost<T: DualNum<f64> + Copy>(
        &self,
        states: &[StateNode<T>],
        controls: &[ControlNode<T>],
    ) -> T {
        let w = &self.config.weights;
        let c = |value: f64| T::from(value);
        let v_ref = c(self.config.reference_speed);

        let mut cost = c(0.0);
        for s in states {
            let dv = s.v - v_ref;
            cost = cost
                + c(w.cte) * s.cte * s.cte
                + c(w.epsi) * s.epsi * s.epsi
                + c(w.speed) * dv * dv;
        }

        for u in controls {
            cost = cost + c(w.steering) * u.delta * u.delta + c(w.throttle) * u.a * u.a;
        }

        for (u0, u1) in controls.iter().tuple_windows() {
            let d_delta = u1.delta - u0.delta;
            let d_a = u1.a - u0.a;
            cost = cost
                + c(w.steering_rate) * d_delta * d_delta
                + c(w.throttle_rate) * d_a * d_a;
        }

        cost
    }

    /// Dynamics residuals in state-block order. At t = 0 the residual is the
    /// state itself; its bounds pin it to the measured state. For t >= 1 it
    /// is the gap between the state variable and the model prediction from
    /// t - 1.
    pub fn constraints<T: DualNum<f64> + Copy>(&self, trajectory: &Trajectory<T>, out: &mut [T]) {
        let dt = self.config.horizon.dt;
        let mut residuals = Vec::with_capacity(trajectory.states.len());
        residuals.push(trajectory.states[0]);

        for ((prev, next), control) in trajectory
            .states
            .iter()
            .tuple_windows()
            .zip(&trajectory.controls)
        {
            let predicted = self.model.predict(prev, control, &self.curve, dt).to_array();
            let next = next.to_array();
            residuals.push(StateNode::from_array(std::array::from_fn(|k| {
                next[k] - predicted[k]
            })));
        }

        self.layout.write_state_blocks(&residuals, out);
    }

    /// States reached from `initial` under `controls`, written into `states`
    pub fn rollout_into<T: DualNum<f64> + Copy>(
        &self,
        initial: StateNode<T>,
        controls: &[ControlNode<T>],
        states: &mut Vec<StateNode<T>>,
    ) {
        let dt = self.config.horizon.dt;
        states.clear();
        states.push(initial);
        for control in controls {
            let prev = states[states.len() - 1];
            states.push(self.model.predict(&prev, control, &self.curve, dt));
        }
    }

    /// Full trajectory for the actuator tail `u`
    pub fn rollout(&self, initial: &VehicleState, u: &[f64]) -> Trajectory<f64> {
        let controls = self.layout.controls_from(u);
        let mut states = Vec::with_capacity(self.layout.steps());
        self.rollout_into(StateNode::from_array(initial.to_array()), &controls, &mut states);
        Trajectory { states, controls }
    }

    /// Cost of the plan obtained by applying `u` from `initial`
    pub fn rollout_cost(&self, initial: &VehicleState, u: &[f64]) -> f64 {
        let trajectory = self.rollout(initial, u);
        self.cost(&trajectory.states, &trajectory.controls)
    }

    /// Gradient of [`rollout_cost`](Self::rollout_cost) with respect to `u`
    pub fn rollout_gradient(&self, initial: &VehicleState, u: &[f64], grad: &mut [f64]) {
        let duals: Vec<Dual64> = u.iter().map(|&v| Dual64::from(v)).collect();
        let mut controls = self.layout.controls_from(&duals);
        let start = StateNode::from_array(initial.to_array().map(Dual64::from));
        let mut states = Vec::with_capacity(self.layout.steps());

        for (i, g) in grad.iter_mut().enumerate() {
            actuator_mut(&mut controls, i).eps = 1.0;
            self.rollout_into(start, &controls, &mut states);
            *g = self.cost(&states, &controls).eps;
            actuator_mut(&mut controls, i).eps = 0.0;
        }
    }

    pub fn cost_value(&self, vars: &[f64]) -> f64 {
        let trajectory = self.layout.unpack(vars);
        self.cost(&trajectory.states, &trajectory.controls)
    }

    pub fn constraint_values(&self, vars: &[f64], out: &mut [f64]) {
        self.constraints(&self.layout.unpack(vars), out);
    }

    /// Largest distance of the residuals from their bounds
    pub fn constraint_violation(&self, vars: &[f64], lower: &[f64], upper: &[f64]) -> f64 {
        let mut residuals = vec![0.0; self.layout.n_constraints()];
        self.constraint_values(vars, &mut residuals);
        residuals
            .iter()
            .zip(lower.iter().zip(upper))
            .map(|(r, (lo, hi))| (lo - r).max(r - hi).max(0.0))
            .fold(0.0, f64::max)
    }
}

/// Entry `i` of the actuator tail: steering block first, then acceleration
fn actuator_mut<T>(controls: &mut [ControlNode<T>], i: usize) -> &mut T {
    let n = controls.len();
    if i < n {
        &mut controls[i].delta
    } else {
        &mut controls[i - n].a
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_vars(rng: &mut StdRng, n: usize) -> Vec<f64> {
        (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect()
    }

    #[test]
    fn test_zero_vector_on_flat_reference() {
        let config = MpcConfig::default();
        let evaluator = NlpEvaluator::new(&config, ReferenceCurve::straight());
        let layout = *evaluator.layout();
        let vars = layout.initial_guess(&VehicleState::new(0.0, 0.0, 0.0, 0.0, 0.0, 0.0));

        let mut residuals = vec![1.0; layout.n_constraints()];
        evaluator.constraint_values(&vars, &mut residuals);
        assert!(residuals.iter().all(|r| *r == 0.0));

        // only the speed term contributes: N * w_v * v_ref^2
        let expected = 10.0 * 1.0 * 50.0 * 50.0;
        assert_relative_eq!(evaluator.cost_value(&vars), expected, epsilon = 1e-9);
    }

    #[test]
    fn test_first_block_equals_variables() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut config = MpcConfig::default();
        for _ in 0..20 {
            config.weights.cte = rng.gen_range(0.0..10.0);
            config.weights.steering = rng.gen_range(0.0..2000.0);
            let curve = ReferenceCurve::new(
                rng.gen_range(-5.0..5.0),
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-0.1..0.1),
                rng.gen_range(-0.01..0.01),
            );
            let evaluator = NlpEvaluator::new(&config, curve);
            let layout = *evaluator.layout();
            let vars = random_vars(&mut rng, layout.n_vars());

            let mut residuals = vec![0.0; layout.n_constraints()];
            evaluator.constraint_values(&vars, &mut residuals);
            for k in 0..6 {
                assert_eq!(residuals[layout.state_offset(k)], vars[layout.state_offset(k)]);
            }
        }
    }

    #[test]
    fn test_model_rollout_is_feasible() {
        let mut rng = StdRng::seed_from_u64(5);
        let config = MpcConfig::default();
        let curve = ReferenceCurve::new(1.0, 0.1, -0.01, 0.001);
        let evaluator = NlpEvaluator::new(&config, curve);
        let layout = *evaluator.layout();
        let state = VehicleState::new(0.0, 0.0, 0.0, 15.0, 1.0, -0.1);

        let u = random_vars(&mut rng, layout.n_control_vars());
        let trajectory = evaluator.rollout(&state, &u);
        assert_eq!(trajectory.states.len(), layout.steps());
        assert_eq!(trajectory.states[0].to_array(), state.to_array());

        let mut vars = vec![0.0; layout.n_vars()];
        layout.pack(&trajectory, &mut vars);
        assert_eq!(&vars[layout.steering_offset()..], &u[..]);

        let (lower, upper) = layout.constraint_bounds(&state);
        assert!(evaluator.constraint_violation(&vars, &lower, &upper) < 1e-12);
        assert_relative_eq!(
            evaluator.rollout_cost(&state, &u),
            evaluator.cost_value(&vars),
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_rollout_gradient_matches_finite_differences() {
        let mut rng = StdRng::seed_from_u64(11);
        let config = MpcConfig::default();
        let evaluator = NlpEvaluator::new(&config, ReferenceCurve::new(0.5, 0.2, -0.05, 0.002));
        let state = VehicleState::new(0.0, 0.0, 0.0, 12.0, 0.5, -0.2);
        let n = evaluator.layout().n_control_vars();
        let u = random_vars(&mut rng, n);

        let mut grad = vec![0.0; n];
        evaluator.rollout_gradient(&state, &u, &mut grad);

        let h = 1e-6;
        for i in 0..n {
            let mut plus = u.clone();
            let mut minus = u.clone();
            plus[i] += h;
            minus[i] -= h;
            let numeric = (evaluator.rollout_cost(&state, &plus)
                - evaluator.rollout_cost(&state, &minus))
                / (2.0 * h);
            assert_relative_eq!(grad[i], numeric, epsilon = 1e-3, max_relative = 1e-5);
        }
    }

    #[test]
    fn test_steering_gradient_reaches_tracking_terms() {
        let config = MpcConfig::default();
        let curve = ReferenceCurve::new(5.0, 0.0, 0.0, 0.0);
        let evaluator = NlpEvaluator::new(&config, curve);
        let state = VehicleState::from_local(10.0, &curve);
        let n = evaluator.layout().n_control_vars();

        let mut grad = vec![0.0; n];
        evaluator.rollout_gradient(&state, &vec![0.0; n], &mut grad);
        // turning toward the path lowers the cost, earliest steering the most
        assert!(grad[0] < 0.0);
        assert!(grad[0] < grad[1]);
    }

    #[test]
    fn test_rate_terms_use_consecutive_controls() {
        let mut config = MpcConfig::default();
        config.weights = crate::path_tracking::mpc::config::CostWeights {
            cte: 0.0,
            epsi: 0.0,
            speed: 0.0,
            steering: 0.0,
            throttle: 0.0,
            steering_rate: 1.0,
            throttle_rate: 2.0,
        };
        let evaluator = NlpEvaluator::new(&config, ReferenceCurve::straight());
        let layout = *evaluator.layout();
        let mut vars = vec![0.0; layout.n_vars()];
        // a single steering step and a single throttle step
        vars[layout.steering_offset() + 3] = 0.1;
        vars[layout.acceleration_offset() + 8] = 0.5;

        // steering step enters two differences, the last throttle one
        let expected = 2.0 * 0.1 * 0.1 + 2.0 * 0.5 * 0.5;
        assert_relative_eq!(evaluator.cost_value(&vars), expected, epsilon = 1e-12);
    }
}
