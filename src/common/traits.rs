//! Common traits defining interfaces for controllers and vehicle models

/// Trait for vehicle/robot motion models
pub trait MotionModel {
    /// State type
    type State;
    /// Control type
    type Control;

    /// Propagate state forward in time
    fn propagate(&self, state: &Self::State, control: &Self::Control, dt: f64) -> Self::State;
}

/// Trait for controllers (PID, LQR, MPC, etc.)
pub trait Controller {
    /// State type
    type State;
    /// Reference/target type
    type Reference;
    /// Output control type
    type Output;

    /// Compute control output
    fn compute(&mut self, state: &Self::State, reference: &Self::Reference) -> Self::Output;

    /// Reset controller state
    fn reset(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test that traits compile correctly
    struct Proportional {
        gain: f64,
        calls: usize,
    }

    impl Controller for Proportional {
        type State = f64;
        type Reference = f64;
        type Output = f64;

        fn compute(&mut self, state: &f64, reference: &f64) -> f64 {
            self.calls += 1;
            self.gain * (reference - state)
        }

        fn reset(&mut self) {
            self.calls = 0;
        }
    }

    #[test]
    fn test_controller_trait() {
        let mut controller = Proportional { gain: 2.0, calls: 0 };
        assert_eq!(controller.compute(&1.0, &3.0), 4.0);
        controller.reset();
        assert_eq!(controller.calls, 0);
    }
}
