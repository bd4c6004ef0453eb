//! Built-in stereo-inertial tracker: IMU dead-reckoning odometry.
//!
//! Propagates the body pose by integrating the packet's IMU window,
//! falls back to the constant-velocity motion model when a packet
//! carries no IMU data, and lifts the packet's stereo features into
//! world-frame landmark observations.

use nalgebra::{UnitQuaternion, Vector3};
use tracing::trace;

use crate::config::TrackerConfig;
use crate::geometry::SE3;
use crate::imu::{GRAVITY, ImuBias, ImuSample};
use crate::sensor::SensorPacket;

use super::keyframe_decision::KeyFrameDecision;
use super::motion_model::MotionModel;
use super::state::TrackingState;
use super::{FeatureTracker, LandmarkObservation, TrackingOutput};

pub struct StereoInertialTracker {
    decision: KeyFrameDecision,
    motion_model: MotionModel,
    bias: ImuBias,
    pose: SE3,
    velocity: Vector3<f64>,
    last_imu_timestamp_ns: Option<u64>,
    initialized: bool,
}

impl StereoInertialTracker {
    pub fn new(config: &TrackerConfig) -> Self {
        Self {
            decision: KeyFrameDecision::new(config),
            motion_model: MotionModel::new(),
            bias: ImuBias::zero(),
            pose: SE3::identity(),
            velocity: Vector3::zeros(),
            last_imu_timestamp_ns: None,
            initialized: false,
        }
    }

    /// Integrate one IMU window into the current pose and velocity.
    fn integrate_imu(&mut self, window: &[ImuSample]) {
        for sample in window {
            let dt = match self.last_imu_timestamp_ns {
                Some(prev) => sample.timestamp_ns.saturating_sub(prev) as f64 * 1e-9,
                None => 0.0,
            };
            self.last_imu_timestamp_ns = Some(sample.timestamp_ns);
            if dt <= 0.0 {
                continue;
            }
            // Bias-corrected specific force back to world
            // acceleration, then a first-order update.
            let accel = sample.accel - self.bias.accel;
            let gyro = sample.gyro - self.bias.gyro;
            let accel_world = self.pose.rotation * accel + GRAVITY;
            self.pose.translation += self.velocity * dt + 0.5 * accel_world * dt * dt;
            self.velocity += accel_world * dt;
            self.pose.rotation *= UnitQuaternion::from_scaled_axis(gyro * dt);
        }
    }
}

impl FeatureTracker for StereoInertialTracker {
    fn process(&mut self, packet: &SensorPacket) -> Option<TrackingOutput> {
        let state = if !self.initialized {
            // First frame anchors the world frame at the body.
            self.pose = SE3::identity();
            self.velocity = Vector3::zeros();
            self.last_imu_timestamp_ns = packet.imu_window.last().map(|s| s.timestamp_ns);
            self.initialized = true;
            TrackingState::Ok
        } else if packet.imu_window.is_empty() {
            if let Some(predicted) = self.motion_model.predict() {
                self.pose = predicted;
            }
            trace!(
                timestamp_ns = packet.timestamp_ns,
                "packet without IMU data, motion-model propagation only"
            );
            TrackingState::Degraded
        } else {
            self.integrate_imu(&packet.imu_window);
            TrackingState::Ok
        };

        let observations: Vec<LandmarkObservation> = packet
            .frame
            .features
            .iter()
            .map(|f| LandmarkObservation {
                landmark_id: f.landmark_id,
                point_world: self.pose.transform(&f.point_cam),
            })
            .collect();

        let is_keyframe = self
            .decision
            .should_create_keyframe(packet.timestamp_ns as f64 * 1e-9, &self.pose);
        self.motion_model.update(&self.pose);

        Some(TrackingOutput {
            timestamp_ns: packet.timestamp_ns,
            is_keyframe,
            state,
            pose: self.pose.clone(),
            velocity: self.velocity,
            observations,
            imu_window: packet.imu_window.clone(),
        })
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::{LandmarkId, StereoFeature, StereoFrame};

    fn packet(timestamp_ns: u64, imu_window: Vec<ImuSample>) -> SensorPacket {
        SensorPacket {
            timestamp_ns,
            frame: StereoFrame {
                timestamp_ns,
                left: Default::default(),
                right: Default::default(),
                features: Vec::new(),
            },
            imu_window,
        }
    }

    /// Samples a stationary IMU would report: specific force exactly
    /// cancelling gravity, no rotation.
    fn stationary_window(from_ns: u64, to_ns: u64, rate_hz: u64) -> Vec<ImuSample> {
        let step = 1_000_000_000 / rate_hz;
        (from_ns..to_ns)
            .step_by(step as usize)
            .map(|t| ImuSample {
                timestamp_ns: t,
                accel: -GRAVITY,
                gyro: Vector3::zeros(),
            })
            .collect()
    }

    #[test]
    fn test_first_frame_initializes_and_is_keyframe() {
        let mut tracker = StereoInertialTracker::new(&TrackerConfig::default());
        assert!(!tracker.is_initialized());
        let out = tracker.process(&packet(0, Vec::new())).unwrap();
        assert!(out.is_keyframe);
        assert_eq!(out.state, TrackingState::Ok);
        assert!(tracker.is_initialized());
        assert!(out.pose.translation.norm() < 1e-12);
    }

    #[test]
    fn test_stationary_imu_keeps_pose_still() {
        let mut tracker = StereoInertialTracker::new(&TrackerConfig::default());
        tracker.process(&packet(0, Vec::new())).unwrap();
        let mut last = SE3::identity();
        for i in 1..=4u64 {
            let t0 = (i - 1) * 100_000_000;
            let t1 = i * 100_000_000;
            let out = tracker
                .process(&packet(t1, stationary_window(t0, t1, 200)))
                .unwrap();
            last = out.pose.clone();
        }
        assert!(last.translation.norm() < 1e-6);
        assert!(last.rotation.angle() < 1e-9);
    }

    #[test]
    fn test_keyframe_interval_pattern() {
        // Frames every 100 ms, keyframe interval 250 ms, no motion:
        // keyframes at t=0 and t=300ms.
        let mut tracker = StereoInertialTracker::new(&TrackerConfig::default());
        let mut flags = Vec::new();
        for i in 0..4u64 {
            let t1 = i * 100_000_000;
            let window = if i == 0 {
                Vec::new()
            } else {
                stationary_window((i - 1) * 100_000_000, t1, 200)
            };
            flags.push(tracker.process(&packet(t1, window)).unwrap().is_keyframe);
        }
        assert_eq!(flags, vec![true, false, false, true]);
    }

    #[test]
    fn test_features_lifted_to_world_frame() {
        let mut tracker = StereoInertialTracker::new(&TrackerConfig::default());
        let mut p = packet(0, Vec::new());
        p.frame.features.push(StereoFeature {
            landmark_id: LandmarkId(7),
            pixel: (10.0, 20.0),
            point_cam: Vector3::new(0.0, 0.0, 2.0),
        });
        let out = tracker.process(&p).unwrap();
        assert_eq!(out.observations.len(), 1);
        assert_eq!(out.observations[0].landmark_id, LandmarkId(7));
        // Identity pose at initialization: world == camera.
        assert!((out.observations[0].point_world - Vector3::new(0.0, 0.0, 2.0)).norm() < 1e-12);
    }

    #[test]
    fn test_missing_imu_degrades_tracking() {
        let mut tracker = StereoInertialTracker::new(&TrackerConfig::default());
        tracker.process(&packet(0, Vec::new())).unwrap();
        let out = tracker.process(&packet(100_000_000, Vec::new())).unwrap();
        assert_eq!(out.state, TrackingState::Degraded);
    }
}
