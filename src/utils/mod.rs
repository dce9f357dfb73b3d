//! Utility modules for mpc_path_tracking

pub mod visualization;

pub use visualization::{colors, PathStyle, PointStyle, Visualizer};
