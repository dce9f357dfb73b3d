//! Kinematic bicycle model
//!
//! The prediction step is generic over the scalar type so the same code
//! evaluates the dynamics constraints on plain `f64` and on dual numbers.

use num_dual::DualNum;

use crate::common::{Actuation, MotionModel, ReferenceCurve, State2D};
use crate::path_tracking::mpc::layout::{ControlNode, StateNode};

/// Kinematic bicycle with the turning rate set by `lf`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KinematicBicycle {
    /// Front axle to center of gravity
    pub lf: f64,
}

impl KinematicBicycle {
    pub fn new(lf: f64) -> Self {
        Self { lf }
    }

    /// State one step after `state` under `control`, with the tracking
    /// errors measured against `curve` at the current position.
    pub fn predict<T: DualNum<f64> + Copy>(
        &self,
        state: &StateNode<T>,
        control: &ControlNode<T>,
        curve: &ReferenceCurve,
        dt: f64,
    ) -> StateNode<T> {
        let dt = T::from(dt);
        let lf = T::from(self.lf);
        let path_y = curve.evaluate(state.x);
        let path_heading = curve.desired_heading(state.x);
        let yaw_change = state.v * control.delta / lf * dt;

        StateNode {
            x: state.x + state.v * state.psi.cos() * dt,
            y: state.y + state.v * state.psi.sin() * dt,
            psi: state.psi + yaw_change,
            v: state.v + control.a * dt,
            cte: (path_y - state.y) + state.v * state.epsi.sin() * dt,
            epsi: (state.psi - path_heading) + yaw_change,
        }
    }
}

impl MotionModel for KinematicBicycle {
    type State = State2D;
    type Control = Actuation;

    fn propagate(&self, state: &State2D, control: &Actuation, dt: f64) -> State2D {
        State2D {
            x: state.x + state.v * state.yaw.cos() * dt,
            y: state.y + state.v * state.yaw.sin() * dt,
            yaw: state.yaw + state.v / self.lf * control.steering * dt,
            v: state.v + control.acceleration * dt,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_predict_straight_line() {
        let model = KinematicBicycle::new(2.67);
        let state = StateNode { x: 0.0, y: 0.0, psi: 0.0, v: 10.0, cte: 0.0, epsi: 0.0 };
        let control = ControlNode { delta: 0.0, a: 1.0 };
        let next = model.predict(&state, &control, &ReferenceCurve::straight(), 0.1);

        assert_relative_eq!(next.x, 1.0, epsilon = 1e-12);
        assert_relative_eq!(next.y, 0.0, epsilon = 1e-12);
        assert_relative_eq!(next.psi, 0.0, epsilon = 1e-12);
        assert_relative_eq!(next.v, 10.1, epsilon = 1e-12);
        assert_relative_eq!(next.cte, 0.0, epsilon = 1e-12);
        assert_relative_eq!(next.epsi, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_predict_tracking_errors() {
        let model = KinematicBicycle::new(2.0);
        let curve = ReferenceCurve::new(1.0, 1.0, 0.0, 0.0);
        let state = StateNode { x: 2.0, y: 0.5, psi: 0.2, v: 4.0, cte: 0.0, epsi: 0.1 };
        let control = ControlNode { delta: 0.1, a: 0.0 };
        let dt = 0.05;
        let next = model.predict(&state, &control, &curve, dt);

        let yaw_change = 4.0 * 0.1 / 2.0 * dt;
        assert_relative_eq!(next.psi, 0.2 + yaw_change, epsilon = 1e-12);
        // f(2) = 3
        assert_relative_eq!(next.cte, 3.0 - 0.5 + 4.0 * 0.1_f64.sin() * dt, epsilon = 1e-12);
        assert_relative_eq!(
            next.epsi,
            0.2 - 1.0_f64.atan() + yaw_change,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_propagate_matches_prediction() {
        let model = KinematicBicycle::new(2.67);
        let state = State2D::new(1.0, -1.0, 0.4, 8.0);
        let control = Actuation::new(0.2, -0.5);
        let next = model.propagate(&state, &control, 0.05);

        let node = StateNode { x: 1.0, y: -1.0, psi: 0.4, v: 8.0, cte: 0.0, epsi: 0.0 };
        let predicted = model.predict(
            &node,
            &ControlNode { delta: 0.2, a: -0.5 },
            &ReferenceCurve::straight(),
            0.05,
        );
        assert_relative_eq!(next.x, predicted.x, epsilon = 1e-12);
        assert_relative_eq!(next.y, predicted.y, epsilon = 1e-12);
        assert_relative_eq!(next.yaw, predicted.psi, epsilon = 1e-12);
        assert_relative_eq!(next.v, predicted.v, epsilon = 1e-12);
    }
}
