//! Tracking stage: turns synchronized sensor packets into per-frame
//! odometry outputs and flags the keyframes that feed estimation.
//!
//! The visual feature-tracking algorithm itself is an external
//! collaborator selected through [`make_tracker`]; the built-in
//! variant propagates pose with IMU dead reckoning and passes the
//! packet's pre-extracted stereo features through as world-frame
//! observations.

pub mod keyframe_decision;
pub mod motion_model;
pub mod state;
pub mod tracker;

use std::sync::Arc;

use nalgebra::Vector3;

use crate::config::{TrackerConfig, TrackerType};
use crate::geometry::SE3;
use crate::imu::ImuSample;
use crate::sensor::{LandmarkId, SensorPacket};
use crate::system::module::StageWorker;

pub use state::TrackingState;
pub use tracker::StereoInertialTracker;

/// One landmark observation lifted into the world frame.
#[derive(Debug, Clone, Copy)]
pub struct LandmarkObservation {
    pub landmark_id: LandmarkId,
    pub point_world: Vector3<f64>,
}

/// Per-frame tracking result. Only keyframe outputs travel past the
/// tracking stage into estimation.
#[derive(Debug, Clone)]
pub struct TrackingOutput {
    pub timestamp_ns: u64,
    pub is_keyframe: bool,
    pub state: TrackingState,
    /// Odometry estimate, world from body.
    pub pose: SE3,
    pub velocity: Vector3<f64>,
    pub observations: Vec<LandmarkObservation>,
    /// IMU window carried along for the estimator.
    pub imu_window: Vec<ImuSample>,
}

/// The pluggable tracking algorithm.
pub trait FeatureTracker: Send {
    /// Process one packet. Returning None drops the frame entirely
    /// (nothing propagates downstream).
    fn process(&mut self, packet: &SensorPacket) -> Option<TrackingOutput>;

    /// True once a first valid pose has been produced.
    fn is_initialized(&self) -> bool;
}

/// Build the tracker selected by the configuration.
pub fn make_tracker(config: &TrackerConfig) -> Box<dyn FeatureTracker> {
    match config.tracker_type {
        TrackerType::StereoInertial => Box::new(StereoInertialTracker::new(config)),
    }
}

/// Stage worker adapting a [`FeatureTracker`] to the pipeline module
/// contract.
pub struct TrackingStage {
    tracker: Box<dyn FeatureTracker>,
}

impl TrackingStage {
    pub fn new(tracker: Box<dyn FeatureTracker>) -> Self {
        Self { tracker }
    }
}

impl StageWorker for TrackingStage {
    type Input = Arc<SensorPacket>;
    type Output = Arc<TrackingOutput>;

    fn process(&mut self, packet: Arc<SensorPacket>) -> Option<Arc<TrackingOutput>> {
        self.tracker.process(&packet).map(Arc::new)
    }

    fn is_initialized(&self) -> bool {
        self.tracker.is_initialized()
    }
}
