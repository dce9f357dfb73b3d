//! Configuration for the MPC path tracker
//!
//! All values are fixed once a controller is built. Every section
//! deserializes with defaults, so a TOML file only needs the keys it changes.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::common::{MpcError, MpcResult};

/// Prediction horizon
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct Horizon {
    /// Number of predicted states (N). Must be at least 2.
    pub steps: usize,
    /// Time between predicted states [s]
    pub dt: f64,
}

impl Default for Horizon {
    fn default() -> Self {
        Self { steps: 10, dt: 0.05 }
    }
}

/// Weights of the quadratic objective
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct CostWeights {
    /// Cross-track error
    pub cte: f64,
    /// Heading error
    pub epsi: f64,
    /// Deviation from the reference speed
    pub speed: f64,
    /// Steering magnitude
    pub steering: f64,
    /// Throttle magnitude
    pub throttle: f64,
    /// Change in steering between consecutive steps
    pub steering_rate: f64,
    /// Change in throttle between consecutive steps
    pub throttle_rate: f64,
}

impl Default for CostWeights {
    fn default() -> Self {
        Self {
            cte: 4.0,
            epsi: 4.0,
            speed: 1.0,
            steering: 1000.0,
            throttle: 10.0,
            steering_rate: 4.0,
            throttle_rate: 0.0,
        }
    }
}

impl CostWeights {
    fn as_array(&self) -> [f64; 7] {
        [
            self.cte,
            self.epsi,
            self.speed,
            self.steering,
            self.throttle,
            self.steering_rate,
            self.throttle_rate,
        ]
    }
}

/// Box bounds on the decision variables
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct ActuatorLimits {
    /// Maximum steering magnitude [rad]
    pub max_steering: f64,
    /// Maximum throttle/brake magnitude (normalized)
    pub max_acceleration: f64,
    /// Sentinel bound applied to every state variable
    pub state_bound: f64,
}

impl Default for ActuatorLimits {
    fn default() -> Self {
        Self {
            // 25 degrees
            max_steering: 0.4363323129985824,
            max_acceleration: 1.0,
            state_bound: 1.0e19,
        }
    }
}

/// Settings handed to the PANOC solver
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct SolverSettings {
    /// Wall-clock budget for one solve [s]. A hard cap: the solve reports
    /// non-convergence once it runs out.
    pub max_duration_secs: f64,
    /// Fixed-point residual tolerance
    pub tolerance: f64,
    /// Largest dynamics residual accepted in the rebuilt decision vector
    pub constraint_tolerance: f64,
    pub lbfgs_memory: usize,
    pub max_iterations: usize,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            max_duration_secs: 30.0,
            tolerance: 1e-5,
            constraint_tolerance: 1e-6,
            lbfgs_memory: 10,
            max_iterations: 1000,
        }
    }
}

impl SolverSettings {
    pub fn max_duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.max_duration_secs).unwrap_or(Duration::MAX)
    }
}

/// Configuration for the MPC path tracker
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MpcConfig {
    pub horizon: Horizon,
    /// Target speed
    pub reference_speed: f64,
    pub weights: CostWeights,
    pub limits: ActuatorLimits,
    /// Distance between the front axle and the center of gravity. Tuned so
    /// the model's turning radius matches the vehicle's.
    pub lf: f64,
    pub solver: SolverSettings,
}

impl Default for MpcConfig {
    fn default() -> Self {
        Self {
            horizon: Horizon::default(),
            reference_speed: 50.0,
            weights: CostWeights::default(),
            limits: ActuatorLimits::default(),
            lf: 2.67,
            solver: SolverSettings::default(),
        }
    }
}

impl MpcConfig {
    /// Parse a TOML document; missing keys keep their defaults.
    pub fn from_toml_str(text: &str) -> MpcResult<Self> {
        let config: MpcConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML configuration file
    pub fn load<P: AsRef<Path>>(path: P) -> MpcResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> MpcResult<()> {
        if self.horizon.steps < 2 {
            return Err(config_error(format!(
                "horizon needs at least 2 steps, got {}",
                self.horizon.steps
            )));
        }
        if !(self.horizon.dt.is_finite() && self.horizon.dt > 0.0) {
            return Err(config_error(format!(
                "timestep must be positive, got {}",
                self.horizon.dt
            )));
        }
        if !(self.lf.is_finite() && self.lf != 0.0) {
            return Err(config_error(format!("lf must be non-zero, got {}", self.lf)));
        }
        if !self.reference_speed.is_finite() {
            return Err(config_error("reference speed must be finite".to_string()));
        }
        if !self.weights.as_array().iter().all(|w| w.is_finite() && *w >= 0.0) {
            return Err(config_error(
                "cost weights must be finite and non-negative".to_string(),
            ));
        }

        let limits = &self.limits;
        for (name, value) in [
            ("max_steering", limits.max_steering),
            ("max_acceleration", limits.max_acceleration),
            ("state_bound", limits.state_bound),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(config_error(format!("{} must be positive, got {}", name, value)));
            }
        }

        let solver = &self.solver;
        for (name, value) in [
            ("max_duration_secs", solver.max_duration_secs),
            ("tolerance", solver.tolerance),
            ("constraint_tolerance", solver.constraint_tolerance),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(config_error(format!("{} must be positive, got {}", name, value)));
            }
        }
        if solver.lbfgs_memory == 0 || solver.max_iterations == 0 {
            return Err(config_error(
                "L-BFGS memory and iteration limit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn config_error(msg: String) -> MpcError {
    MpcError::ConfigurationError(msg)
}
