//! mpc_path_tracking - Model Predictive Control for vehicle path tracking
//!
//! This crate formulates steering/throttle control of a kinematic bicycle as
//! a receding-horizon nonlinear program, solves it each cycle, and returns
//! the first actuation together with the predicted path.

// Core modules
pub mod common;
pub mod utils;

// Algorithm modules
pub mod path_tracking;

// Re-export common types for convenience
pub use common::{Actuation, Path2D, Point2D, ReferenceCurve, State2D, VehicleState};
pub use common::{Controller, MotionModel};
pub use common::{MpcError, MpcResult};
pub use path_tracking::mpc::{MpcConfig, MpcController, MpcSolution, SolveReport};
