//
// Closed-loop path tracking simulation with Model Predictive Control.
//
// Each cycle the waypoints ahead of the vehicle are moved into its local
// frame and fitted with a cubic, the MPC problem is solved against that
// curve, and the first actuation drives a kinematic bicycle one step.
//
// usage: mpc_path_tracking [params.toml]

use std::f64::consts::PI;

use log::{info, warn};

use mpc_path_tracking::common::{
    Actuation, MotionModel, MpcResult, Path2D, Point2D, ReferenceCurve, State2D, VehicleState,
};
use mpc_path_tracking::path_tracking::mpc::{KinematicBicycle, MpcConfig, MpcController};
use mpc_path_tracking::utils::Visualizer;

const SIM_DT: f64 = 0.1;
const MAX_STEPS: usize = 500;
/// Waypoints ahead of the nearest one used for each fit
const LOOKAHEAD_POINTS: usize = 8;
/// Draw every n-th predicted horizon
const PREDICTION_PLOT_INTERVAL: usize = 10;

fn course() -> Vec<Point2D> {
    (0..=100)
        .map(|i| {
            let x = i as f64 * 5.0;
            Point2D::new(x, 8.0 * (2.0 * PI * x / 200.0).sin())
        })
        .collect()
}

fn nearest_index(state: &State2D, waypoints: &[Point2D], from: usize) -> usize {
    let position = state.position();
    waypoints
        .iter()
        .enumerate()
        .skip(from)
        .min_by(|(_, a), (_, b)| position.distance(a).total_cmp(&position.distance(b)))
        .map_or(from, |(i, _)| i)
}

/// World point in the frame of a vehicle at `state`
fn to_local(state: &State2D, point: &Point2D) -> (f64, f64) {
    let dx = point.x - state.x;
    let dy = point.y - state.y;
    let (s, c) = state.yaw.sin_cos();
    (dx * c + dy * s, -dx * s + dy * c)
}

fn to_world(state: &State2D, x: f64, y: f64) -> Point2D {
    let (s, c) = state.yaw.sin_cos();
    Point2D::new(state.x + x * c - y * s, state.y + x * s + y * c)
}

fn run(config: MpcConfig) -> MpcResult<()> {
    let controller = MpcController::new(config)?;
    let plant = KinematicBicycle::new(controller.config().lf);
    let waypoints = course();

    let mut state = State2D::new(0.0, -2.0, 0.0, 5.0);
    let mut driven = Path2D::new();
    let mut predictions = Vec::new();
    let mut nearest = 0;
    let mut failures = 0;

    for step in 0..MAX_STEPS {
        driven.push(state.position());

        nearest = nearest_index(&state, &waypoints, nearest);
        let window: Vec<(f64, f64)> = waypoints
            .iter()
            .skip(nearest)
            .take(LOOKAHEAD_POINTS)
            .map(|p| to_local(&state, p))
            .collect();
        if window.len() < 4 {
            info!("Goal reached after {} steps", step);
            break;
        }

        let xs: Vec<f64> = window.iter().map(|p| p.0).collect();
        let ys: Vec<f64> = window.iter().map(|p| p.1).collect();
        let curve = ReferenceCurve::fit(&xs, &ys)?;
        let vehicle = VehicleState::from_local(state.v, &curve);

        let actuation = match controller.solve(&vehicle, &curve) {
            Ok(solution) => {
                if step % PREDICTION_PLOT_INTERVAL == 0 {
                    let predicted: Vec<Point2D> = solution
                        .predicted_x
                        .iter()
                        .zip(&solution.predicted_y)
                        .map(|(&x, &y)| to_world(&state, x, y))
                        .collect();
                    predictions.push(Path2D::from_points(predicted));
                }
                solution.actuation
            }
            Err(e) if e.is_recoverable() => {
                warn!("step {}: {}, braking", step, e);
                failures += 1;
                Actuation::full_brake()
            }
            Err(e) => return Err(e),
        };

        state = plant.propagate(&state, &actuation, SIM_DT);
        info!(
            "step {:3}: x {:7.2} y {:6.2} v {:5.2} cte {:6.3} steering {:6.3} throttle {:6.3}",
            step, state.x, state.y, state.v, vehicle.cte, actuation.steering, actuation.acceleration
        );
    }
    driven.push(state.position());
    println!("Simulation finished with {} failed solves", failures);

    let mut vis = Visualizer::new();
    vis.set_title("MPC Path Tracking")
        .set_aspect_ratio(None)
        .plot_reference(&Path2D::from_points(waypoints.clone()))
        .plot_waypoints(&waypoints)
        .plot_trajectory(&driven);
    for prediction in &predictions {
        vis.plot_prediction(prediction);
    }
    vis.plot_start(Point2D::new(0.0, -2.0)).plot_vehicle(&state, 2.0);

    std::fs::create_dir_all("img/path_tracking")?;
    let output_path = "img/path_tracking/mpc.png";
    vis.save_png(output_path, 1200, 600)?;
    println!("MPC path tracking visualization saved to: {}", output_path);
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match std::env::args().nth(1) {
        Some(path) => match MpcConfig::load(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load {}: {}", path, e);
                std::process::exit(1);
            }
        },
        None => MpcConfig::default(),
    };

    println!("Starting MPC path tracking...");
    if let Err(e) = run(config) {
        eprintln!("MPC path tracking failed: {}", e);
        std::process::exit(1);
    }
}
