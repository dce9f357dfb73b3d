//! Common types used throughout mpc_path_tracking

use nalgebra::{DMatrix, DVector, Vector4};
use num_dual::DualNum;

use crate::common::error::{MpcError, MpcResult};

/// 2D point representation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point2D {
    pub x: f64,
    pub y: f64,
}

impl Point2D {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn origin() -> Self {
        Self { x: 0.0, y: 0.0 }
    }

    pub fn distance(&self, other: &Point2D) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// World-frame pose and speed of the simulated vehicle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct State2D {
    pub x: f64,
    pub y: f64,
    pub yaw: f64,
    pub v: f64,
}

impl State2D {
    pub fn new(x: f64, y: f64, yaw: f64, v: f64) -> Self {
        Self { x, y, yaw, v }
    }

    pub fn position(&self) -> Point2D {
        Point2D::new(self.x, self.y)
    }
}

/// Path represented as a sequence of 2D points
#[derive(Debug, Clone)]
pub struct Path2D {
    pub points: Vec<Point2D>,
}

impl Path2D {
    pub fn new() -> Self {
        Self { points: Vec::new() }
    }

    pub fn from_points(points: Vec<Point2D>) -> Self {
        Self { points }
    }

    pub fn from_xy(x: &[f64], y: &[f64]) -> Self {
        assert_eq!(x.len(), y.len());
        let points = x.iter().zip(y.iter())
            .map(|(&x, &y)| Point2D::new(x, y))
            .collect();
        Self { points }
    }

    pub fn push(&mut self, point: Point2D) {
        self.points.push(point);
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn x_coords(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.x).collect()
    }

    pub fn y_coords(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.y).collect()
    }
}

impl Default for Path2D {
    fn default() -> Self {
        Self::new()
    }
}

/// Vehicle state at the start of the horizon, expressed in the vehicle's
/// local frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VehicleState {
    pub x: f64,
    pub y: f64,
    /// Heading [rad]
    pub psi: f64,
    pub v: f64,
    /// Cross-track error
    pub cte: f64,
    /// Heading error [rad]
    pub epsi: f64,
}

impl VehicleState {
    pub fn new(x: f64, y: f64, psi: f64, v: f64, cte: f64, epsi: f64) -> Self {
        Self { x, y, psi, v, cte, epsi }
    }

    /// State of a vehicle sitting at the origin of its own frame, heading
    /// along +x, with the errors measured against `curve`.
    pub fn from_local(v: f64, curve: &ReferenceCurve) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            psi: 0.0,
            v,
            cte: curve.evaluate(0.0),
            epsi: -curve.desired_heading(0.0),
        }
    }

    /// Components in decision-vector block order
    pub fn to_array(&self) -> [f64; 6] {
        [self.x, self.y, self.psi, self.v, self.cte, self.epsi]
    }

    pub fn is_finite(&self) -> bool {
        self.to_array().iter().all(|c| c.is_finite())
    }
}

/// Actuator command: steering angle [rad] and normalized throttle in [-1, 1]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Actuation {
    pub steering: f64,
    pub acceleration: f64,
}

impl Actuation {
    pub fn new(steering: f64, acceleration: f64) -> Self {
        Self { steering, acceleration }
    }

    /// Wheels straight, full brake
    pub fn full_brake() -> Self {
        Self { steering: 0.0, acceleration: -1.0 }
    }
}

/// Cubic reference path `y = c0 + c1 x + c2 x^2 + c3 x^3` in the vehicle frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferenceCurve {
    pub coefficients: Vector4<f64>,
}

impl ReferenceCurve {
    pub fn new(c0: f64, c1: f64, c2: f64, c3: f64) -> Self {
        Self { coefficients: Vector4::new(c0, c1, c2, c3) }
    }

    /// Straight line along the x axis
    pub fn straight() -> Self {
        Self::new(0.0, 0.0, 0.0, 0.0)
    }

    /// Least-squares cubic through waypoints given in the vehicle frame.
    pub fn fit(xs: &[f64], ys: &[f64]) -> MpcResult<Self> {
        if xs.len() != ys.len() {
            return Err(MpcError::InvalidParameter(format!(
                "waypoint coordinates differ in length ({} vs {})",
                xs.len(),
                ys.len()
            )));
        }
        if xs.len() < 4 {
            return Err(MpcError::InvalidParameter(format!(
                "a cubic fit needs at least 4 waypoints, got {}",
                xs.len()
            )));
        }
        if !xs.iter().chain(ys.iter()).all(|v| v.is_finite()) {
            return Err(MpcError::NumericDegeneracy(
                "non-finite waypoint coordinate".to_string(),
            ));
        }

        // Vandermonde system
        let a = DMatrix::from_fn(xs.len(), 4, |i, j| xs[i].powi(j as i32));
        let b = DVector::from_column_slice(ys);

        let svd = a.svd(true, true);
        let eps = 1e-10 * svd.singular_values.max();
        if svd.rank(eps) < 4 {
            return Err(MpcError::InvalidParameter(
                "waypoints do not determine a cubic".to_string(),
            ));
        }
        let c = svd
            .solve(&b, eps)
            .map_err(|e| MpcError::NumericDegeneracy(e.to_string()))?;

        let curve = Self::new(c[0], c[1], c[2], c[3]);
        if !curve.is_finite() {
            return Err(MpcError::NumericDegeneracy(
                "polynomial fit produced non-finite coefficients".to_string(),
            ));
        }
        Ok(curve)
    }

    pub fn is_finite(&self) -> bool {
        self.coefficients.iter().all(|c| c.is_finite())
    }

    /// f(x)
    pub fn evaluate<T: DualNum<f64> + Copy>(&self, x: T) -> T {
        let c = &self.coefficients;
        T::from(c[0]) + x * (T::from(c[1]) + x * (T::from(c[2]) + x * T::from(c[3])))
    }

    /// f'(x)
    pub fn slope<T: DualNum<f64> + Copy>(&self, x: T) -> T {
        let c = &self.coefficients;
        T::from(c[1]) + x * (T::from(2.0 * c[2]) + x * T::from(3.0 * c[3]))
    }

    /// Heading of the path tangent at x [rad]
    pub fn desired_heading<T: DualNum<f64> + Copy>(&self, x: T) -> T {
        self.slope(x).atan()
    }
}
