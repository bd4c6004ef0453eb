//! Estimation stage: consumes keyframe tracking outputs and produces
//! smoothed state estimates plus the landmark bookkeeping downstream
//! stages build maps from.
//!
//! The factor-graph optimizer itself is an external collaborator
//! behind the [`Estimator`] trait; the built-in variant keeps a
//! sliding keyframe window. Numerical failure is reported through the
//! registered failure callbacks rather than by stopping the stage:
//! the pipeline supervisor owns the decision to wind the run down.

pub mod smoother;

use std::sync::Arc;

use nalgebra::Vector3;
use thiserror::Error;
use tracing::error;

use crate::config::{EstimatorConfig, EstimatorType};
use crate::geometry::SE3;
use crate::imu::ImuSample;
use crate::sensor::LandmarkId;
use crate::system::module::StageWorker;
use crate::tracking::{LandmarkObservation, TrackingOutput};

pub use smoother::SlidingWindowEstimator;

/// Input to the estimation stage: one keyframe worth of odometry and
/// observations.
#[derive(Debug, Clone)]
pub struct EstimationInput {
    pub timestamp_ns: u64,
    pub odometry_pose: SE3,
    pub velocity: Vector3<f64>,
    pub observations: Vec<LandmarkObservation>,
    pub imu_window: Vec<ImuSample>,
}

impl EstimationInput {
    /// Transform a keyframe tracking output into estimator input (the
    /// transform applied by the tracking → estimation wiring).
    pub fn from_tracking(output: &TrackingOutput) -> Self {
        Self {
            timestamp_ns: output.timestamp_ns,
            odometry_pose: output.pose.clone(),
            velocity: output.velocity,
            observations: output.observations.clone(),
            imu_window: output.imu_window.clone(),
        }
    }
}

/// A landmark tracked by the estimator, with its observation count.
#[derive(Debug, Clone, Copy)]
pub struct MapPoint {
    pub landmark_id: LandmarkId,
    pub position: Vector3<f64>,
    pub observations: usize,
}

/// Smoothed state estimate for one keyframe.
#[derive(Debug, Clone)]
pub struct EstimationOutput {
    pub timestamp_ns: u64,
    pub pose: SE3,
    pub velocity: Vector3<f64>,
    pub map_points: Vec<MapPoint>,
}

/// Numerical failures an estimator can report. These are non-fatal at
/// the pipeline level; the supervisor observes the health flag and
/// ends the run in an orderly fashion.
#[derive(Debug, Error)]
pub enum EstimationError {
    #[error("non-finite state estimate at t={0} ns")]
    NonFiniteState(u64),

    #[error("translation jump of {jump_m:.2} m exceeds divergence limit {limit_m:.2} m")]
    Divergence { jump_m: f64, limit_m: f64 },
}

/// The pluggable state estimator.
pub trait Estimator: Send {
    fn process(
        &mut self,
        input: &EstimationInput,
    ) -> Result<Option<EstimationOutput>, EstimationError>;

    /// True once the smoothing window has been seeded.
    fn is_initialized(&self) -> bool;
}

/// Build the estimator selected by the configuration.
pub fn make_estimator(config: &EstimatorConfig) -> Box<dyn Estimator> {
    match config.estimator_type {
        EstimatorType::SlidingWindow => Box::new(SlidingWindowEstimator::new(config)),
    }
}

pub type FailureCallback = Box<dyn Fn() + Send>;

/// Stage worker adapting an [`Estimator`] to the pipeline module
/// contract and routing failures to the registered callbacks.
pub struct EstimationStage {
    estimator: Box<dyn Estimator>,
    failure_callbacks: Vec<FailureCallback>,
}

impl EstimationStage {
    pub fn new(estimator: Box<dyn Estimator>) -> Self {
        Self {
            estimator,
            failure_callbacks: Vec::new(),
        }
    }

    /// Register a callback fired on estimator failure (construction
    /// time only).
    pub fn register_on_failure_callback(&mut self, cb: impl Fn() + Send + 'static) {
        self.failure_callbacks.push(Box::new(cb));
    }
}

impl StageWorker for EstimationStage {
    type Input = EstimationInput;
    type Output = Arc<EstimationOutput>;

    fn process(&mut self, input: EstimationInput) -> Option<Arc<EstimationOutput>> {
        match self.estimator.process(&input) {
            Ok(output) => output.map(Arc::new),
            Err(err) => {
                error!(timestamp_ns = input.timestamp_ns, %err, "estimator failure");
                for cb in &self.failure_callbacks {
                    cb();
                }
                None
            }
        }
    }

    fn is_initialized(&self) -> bool {
        self.estimator.is_initialized()
    }
}
