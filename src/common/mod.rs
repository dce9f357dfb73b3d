//! Common types, traits, and error definitions for mpc_path_tracking
//!
//! This module provides the foundational building blocks shared by the
//! controller, the vehicle model and the visualisation helpers.

pub mod types;
pub mod traits;
pub mod error;

pub use types::*;
pub use traits::*;
pub use error::*;
