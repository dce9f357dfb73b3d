//! Decision-vector layout for the MPC nonlinear program
//!
//! The solver works on one flat vector holding, block by block, N values of
//! each state field (x, y, psi, v, cte, epsi) followed by N-1 steering values
//! and N-1 acceleration values. Everything else in the crate works on the
//! typed [`Trajectory`] record; packing and unpacking happen only here.

use crate::common::VehicleState;
use crate::path_tracking::mpc::config::ActuatorLimits;

/// Number of state fields per timestep
pub const STATE_FIELDS: usize = 6;
/// Number of actuator fields per transition
pub const CONTROL_FIELDS: usize = 2;

/// One predicted vehicle state
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateNode<T> {
    pub x: T,
    pub y: T,
    pub psi: T,
    pub v: T,
    pub cte: T,
    pub epsi: T,
}

impl<T: Copy> StateNode<T> {
    /// Fields in block order
    pub fn to_array(&self) -> [T; STATE_FIELDS] {
        [self.x, self.y, self.psi, self.v, self.cte, self.epsi]
    }

    pub fn from_array(a: [T; STATE_FIELDS]) -> Self {
        Self { x: a[0], y: a[1], psi: a[2], v: a[3], cte: a[4], epsi: a[5] }
    }
}

/// Actuation applied between two consecutive states
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlNode<T> {
    /// Steering angle
    pub delta: T,
    /// Throttle
    pub a: T,
}

/// Typed view of a decision vector: N states and N-1 controls
#[derive(Debug, Clone, PartialEq)]
pub struct Trajectory<T> {
    pub states: Vec<StateNode<T>>,
    pub controls: Vec<ControlNode<T>>,
}

/// Offset scheme mapping a [`Trajectory`] onto the flat solver vector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariableLayout {
    steps: usize,
}

impl VariableLayout {
    /// `steps` is the horizon length N (at least 2).
    pub fn new(steps: usize) -> Self {
        debug_assert!(steps >= 2, "horizon needs at least 2 steps");
        Self { steps }
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    /// 6N + 2(N-1)
    pub fn n_vars(&self) -> usize {
        STATE_FIELDS * self.steps + CONTROL_FIELDS * (self.steps - 1)
    }

    /// One dynamics residual per state field per timestep
    pub fn n_constraints(&self) -> usize {
        STATE_FIELDS * self.steps
    }

    /// Start of the block holding state field `field` (0 = x ... 5 = epsi)
    pub fn state_offset(&self, field: usize) -> usize {
        debug_assert!(field < STATE_FIELDS);
        field * self.steps
    }

    pub fn steering_offset(&self) -> usize {
        STATE_FIELDS * self.steps
    }

    pub fn acceleration_offset(&self) -> usize {
        self.steering_offset() + self.steps - 1
    }

    /// Split a flat vector into states and controls.
    pub fn unpack<T: Copy>(&self, vars: &[T]) -> Trajectory<T> {
        debug_assert_eq!(vars.len(), self.n_vars());
        let n = self.steps;
        let states = (0..n)
            .map(|t| {
                let mut fields = [vars[t]; STATE_FIELDS];
                for (k, field) in fields.iter_mut().enumerate() {
                    *field = vars[self.state_offset(k) + t];
                }
                StateNode::from_array(fields)
            })
            .collect();
        let controls = self.controls_from(&vars[self.steering_offset()..]);
        Trajectory { states, controls }
    }

    /// Number of actuator variables, the tail of the decision vector
    pub fn n_control_vars(&self) -> usize {
        CONTROL_FIELDS * (self.steps - 1)
    }

    /// Read N-1 controls from a steering block followed by an acceleration
    /// block.
    pub fn controls_from<T: Copy>(&self, u: &[T]) -> Vec<ControlNode<T>> {
        debug_assert_eq!(u.len(), self.n_control_vars());
        let n = self.steps - 1;
        (0..n).map(|t| ControlNode { delta: u[t], a: u[n + t] }).collect()
    }

    /// Write N state nodes into field blocks of `out`. Used for both the
    /// decision vector and the constraint vector, which share this ordering.
    pub fn write_state_blocks<T: Copy>(&self, states: &[StateNode<T>], out: &mut [T]) {
        debug_assert_eq!(states.len(), self.steps);
        for (t, node) in states.iter().enumerate() {
            for (k, value) in node.to_array().iter().enumerate() {
                out[self.state_offset(k) + t] = *value;
            }
        }
    }

    /// Flatten a trajectory into a decision vector.
    pub fn pack<T: Copy>(&self, trajectory: &Trajectory<T>, vars: &mut [T]) {
        debug_assert_eq!(vars.len(), self.n_vars());
        debug_assert_eq!(trajectory.controls.len(), self.steps - 1);
        self.write_state_blocks(&trajectory.states, vars);
        for (t, control) in trajectory.controls.iter().enumerate() {
            vars[self.steering_offset() + t] = control.delta;
            vars[self.acceleration_offset() + t] = control.a;
        }
    }

    /// Lower and upper bounds of every decision variable
    pub fn variable_bounds(&self, limits: &ActuatorLimits) -> (Vec<f64>, Vec<f64>) {
        let n_vars = self.n_vars();
        let mut lower = vec![-limits.state_bound; n_vars];
        let mut upper = vec![limits.state_bound; n_vars];

        let steering = self.steering_offset()..self.acceleration_offset();
        lower[steering.clone()].fill(-limits.max_steering);
        upper[steering].fill(limits.max_steering);

        let acceleration = self.acceleration_offset()..n_vars;
        lower[acceleration.clone()].fill(-limits.max_acceleration);
        upper[acceleration].fill(limits.max_acceleration);

        (lower, upper)
    }

    /// Bounds of the actuator tail only
    pub fn control_bounds(&self, limits: &ActuatorLimits) -> (Vec<f64>, Vec<f64>) {
        let (lower, upper) = self.variable_bounds(limits);
        let tail = self.steering_offset();
        (lower[tail..].to_vec(), upper[tail..].to_vec())
    }

    /// Zero for every dynamics residual, except the first entry of each
    /// state block which is pinned to the initial state.
    pub fn constraint_bounds(&self, state: &VehicleState) -> (Vec<f64>, Vec<f64>) {
        let mut bounds = vec![0.0; self.n_constraints()];
        for (k, value) in state.to_array().iter().enumerate() {
            bounds[self.state_offset(k)] = *value;
        }
        (bounds.clone(), bounds)
    }

    /// Zero vector with the initial state written at t = 0.
    pub fn initial_guess(&self, state: &VehicleState) -> Vec<f64> {
        let mut vars = vec![0.0; self.n_vars()];
        for (k, value) in state.to_array().iter().enumerate() {
            vars[self.state_offset(k)] = *value;
        }
        vars
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes() {
        for n in 2..25 {
            let layout = VariableLayout::new(n);
            assert_eq!(layout.n_vars(), 6 * n + 2 * (n - 1));
            assert_eq!(layout.n_constraints(), 6 * n);
        }
        assert_eq!(VariableLayout::new(10).n_vars(), 78);
    }

    #[test]
    fn test_offsets_tile_the_vector() {
        let layout = VariableLayout::new(10);
        let offsets: Vec<usize> = (0..STATE_FIELDS).map(|k| layout.state_offset(k)).collect();
        assert_eq!(offsets, vec![0, 10, 20, 30, 40, 50]);
        assert_eq!(layout.steering_offset(), 60);
        assert_eq!(layout.acceleration_offset(), 69);
        assert_eq!(layout.acceleration_offset() + layout.steps() - 1, layout.n_vars());
    }

    #[test]
    fn test_unpack_reads_each_block() {
        let layout = VariableLayout::new(4);
        let vars: Vec<f64> = (0..layout.n_vars()).map(|i| i as f64).collect();
        let trajectory = layout.unpack(&vars);

        assert_eq!(trajectory.states.len(), 4);
        assert_eq!(trajectory.controls.len(), 3);
        assert_eq!(trajectory.states[0].to_array(), [0.0, 4.0, 8.0, 12.0, 16.0, 20.0]);
        assert_eq!(trajectory.states[3].epsi, 23.0);
        assert_eq!(trajectory.controls[0], ControlNode { delta: 24.0, a: 27.0 });
        assert_eq!(trajectory.controls[2], ControlNode { delta: 26.0, a: 29.0 });

        let mut repacked = vec![0.0; layout.n_vars()];
        layout.pack(&trajectory, &mut repacked);
        assert_eq!(repacked, vars);
    }

    #[test]
    fn test_variable_bounds() {
        let layout = VariableLayout::new(10);
        let limits = ActuatorLimits::default();
        let (lower, upper) = layout.variable_bounds(&limits);

        for i in 0..layout.steering_offset() {
            assert_eq!(lower[i], -1.0e19);
            assert_eq!(upper[i], 1.0e19);
        }
        for i in layout.steering_offset()..layout.acceleration_offset() {
            assert!((upper[i] - 0.4363).abs() < 1e-4);
            assert_eq!(lower[i], -upper[i]);
        }
        for i in layout.acceleration_offset()..layout.n_vars() {
            assert_eq!((lower[i], upper[i]), (-1.0, 1.0));
        }
    }

    #[test]
    fn test_control_tail() {
        let layout = VariableLayout::new(4);
        assert_eq!(layout.n_control_vars(), 6);
        assert_eq!(layout.steering_offset() + layout.n_control_vars(), layout.n_vars());

        let controls = layout.controls_from(&[0.1, 0.2, 0.3, -1.0, 0.0, 1.0]);
        assert_eq!(controls.len(), 3);
        assert_eq!(controls[1], ControlNode { delta: 0.2, a: 0.0 });

        let (lower, upper) = layout.control_bounds(&ActuatorLimits::default());
        assert_eq!(lower.len(), 6);
        assert!((upper[0] - 0.4363).abs() < 1e-4);
        assert_eq!((lower[5], upper[5]), (-1.0, 1.0));
    }

    #[test]
    fn test_constraint_bounds_pin_initial_state() {
        let layout = VariableLayout::new(5);
        let state = VehicleState::new(1.0, 2.0, 0.3, 10.0, -0.5, 0.1);
        let (lower, upper) = layout.constraint_bounds(&state);

        assert_eq!(lower, upper);
        for (k, value) in state.to_array().iter().enumerate() {
            assert_eq!(lower[layout.state_offset(k)], *value);
            for t in 1..5 {
                assert_eq!(lower[layout.state_offset(k) + t], 0.0);
            }
        }
    }

    #[test]
    fn test_initial_guess() {
        let layout = VariableLayout::new(3);
        let state = VehicleState::new(1.0, 2.0, 3.0, 4.0, 5.0, 6.0);
        let guess = layout.initial_guess(&state);
        let trajectory = layout.unpack(&guess);

        assert_eq!(trajectory.states[0].to_array(), state.to_array());
        assert!(trajectory.states[1..].iter().all(|s| s.to_array() == [0.0; 6]));
        assert!(trajectory.controls.iter().all(|c| c.delta == 0.0 && c.a == 0.0));
    }
}
