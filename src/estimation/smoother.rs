//! Sliding-window smoother: the built-in estimator variant.
//!
//! Keeps a fixed number of recent keyframe poses, blends each new
//! odometry pose toward the window's constant-velocity prediction,
//! and maintains per-landmark observation counts with running-mean
//! positions. Divergence checks guard the health of the whole
//! pipeline: a non-finite or wildly jumping estimate is reported as an
//! error instead of being propagated.

use std::collections::{HashMap, VecDeque};

use nalgebra::Vector3;

use crate::config::EstimatorConfig;
use crate::geometry::SE3;
use crate::sensor::LandmarkId;

use super::{EstimationError, EstimationInput, EstimationOutput, Estimator, MapPoint};

struct LandmarkTrack {
    position_sum: Vector3<f64>,
    observations: usize,
    last_seen_ns: u64,
}

pub struct SlidingWindowEstimator {
    window_size: usize,
    max_translation_jump_m: f64,
    smoothing_weight: f64,
    /// Recent keyframe poses, oldest first.
    window: VecDeque<(u64, SE3)>,
    landmarks: HashMap<LandmarkId, LandmarkTrack>,
}

impl SlidingWindowEstimator {
    pub fn new(config: &EstimatorConfig) -> Self {
        Self {
            window_size: config.window_size,
            max_translation_jump_m: config.max_translation_jump_m,
            smoothing_weight: config.smoothing_weight,
            window: VecDeque::with_capacity(config.window_size),
            landmarks: HashMap::new(),
        }
    }

    /// Constant-velocity prediction from the two most recent window
    /// poses, if available.
    fn predict_translation(&self) -> Option<Vector3<f64>> {
        let n = self.window.len();
        if n < 2 {
            return None;
        }
        let (_, ref prev) = self.window[n - 2];
        let (_, ref last) = self.window[n - 1];
        Some(last.translation + (last.translation - prev.translation))
    }

    fn update_landmarks(&mut self, input: &EstimationInput) {
        for obs in &input.observations {
            let track = self
                .landmarks
                .entry(obs.landmark_id)
                .or_insert_with(|| LandmarkTrack {
                    position_sum: Vector3::zeros(),
                    observations: 0,
                    last_seen_ns: input.timestamp_ns,
                });
            track.position_sum += obs.point_world;
            track.observations += 1;
            track.last_seen_ns = input.timestamp_ns;
        }

        // Forget landmarks that fell out of the window entirely.
        if let Some(&(oldest_ns, _)) = self.window.front() {
            self.landmarks.retain(|_, t| t.last_seen_ns >= oldest_ns);
        }
    }

    fn map_points(&self) -> Vec<MapPoint> {
        let mut points: Vec<MapPoint> = self
            .landmarks
            .iter()
            .map(|(id, track)| MapPoint {
                landmark_id: *id,
                position: track.position_sum / track.observations as f64,
                observations: track.observations,
            })
            .collect();
        points.sort_by_key(|p| p.landmark_id);
        points
    }
}

impl Estimator for SlidingWindowEstimator {
    fn process(
        &mut self,
        input: &EstimationInput,
    ) -> Result<Option<EstimationOutput>, EstimationError> {
        if !input.odometry_pose.is_finite() || !input.velocity.iter().all(|v| v.is_finite()) {
            return Err(EstimationError::NonFiniteState(input.timestamp_ns));
        }
        if let Some(&(_, ref last)) = self.window.back() {
            let jump_m = last.translation_distance(&input.odometry_pose);
            if jump_m > self.max_translation_jump_m {
                return Err(EstimationError::Divergence {
                    jump_m,
                    limit_m: self.max_translation_jump_m,
                });
            }
        }

        // Smooth: pull the odometry translation toward the window's
        // constant-velocity prediction.
        let mut pose = input.odometry_pose.clone();
        if let Some(predicted) = self.predict_translation() {
            pose.translation =
                pose.translation.lerp(&predicted, self.smoothing_weight);
        }

        self.window.push_back((input.timestamp_ns, pose.clone()));
        while self.window.len() > self.window_size {
            self.window.pop_front();
        }
        self.update_landmarks(input);

        Ok(Some(EstimationOutput {
            timestamp_ns: input.timestamp_ns,
            pose,
            velocity: input.velocity,
            map_points: self.map_points(),
        }))
    }

    fn is_initialized(&self) -> bool {
        !self.window.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::LandmarkObservation;

    fn estimator() -> SlidingWindowEstimator {
        SlidingWindowEstimator::new(&EstimatorConfig::default())
    }

    fn input_at(timestamp_ns: u64, x: f64) -> EstimationInput {
        let mut pose = SE3::identity();
        pose.translation = Vector3::new(x, 0.0, 0.0);
        EstimationInput {
            timestamp_ns,
            odometry_pose: pose,
            velocity: Vector3::zeros(),
            observations: Vec::new(),
            imu_window: Vec::new(),
        }
    }

    #[test]
    fn test_initialized_after_first_keyframe() {
        let mut est = estimator();
        assert!(!est.is_initialized());
        est.process(&input_at(0, 0.0)).unwrap();
        assert!(est.is_initialized());
    }

    #[test]
    fn test_straight_motion_passes_through() {
        let mut est = estimator();
        for i in 0..5u64 {
            let out = est.process(&input_at(i, i as f64)).unwrap().unwrap();
            // Constant velocity: the prediction matches the odometry,
            // so smoothing changes nothing.
            assert!((out.pose.translation.x - i as f64).abs() < 1e-9);
        }
    }

    #[test]
    fn test_divergence_jump_reported() {
        let mut est = estimator();
        est.process(&input_at(0, 0.0)).unwrap();
        let err = est.process(&input_at(1, 1000.0)).unwrap_err();
        assert!(matches!(err, EstimationError::Divergence { .. }));
    }

    #[test]
    fn test_non_finite_pose_reported() {
        let mut est = estimator();
        let mut input = input_at(0, 0.0);
        input.odometry_pose.translation.x = f64::NAN;
        let err = est.process(&input).unwrap_err();
        assert!(matches!(err, EstimationError::NonFiniteState(0)));
    }

    #[test]
    fn test_window_is_bounded() {
        let mut est = SlidingWindowEstimator::new(&EstimatorConfig {
            window_size: 3,
            ..EstimatorConfig::default()
        });
        for i in 0..10u64 {
            est.process(&input_at(i, i as f64 * 0.1)).unwrap();
        }
        assert_eq!(est.window.len(), 3);
    }

    #[test]
    fn test_landmark_observations_accumulate() {
        let mut est = estimator();
        for i in 0..3u64 {
            let mut input = input_at(i, 0.0);
            input.observations.push(LandmarkObservation {
                landmark_id: LandmarkId(1),
                point_world: Vector3::new(1.0, 2.0, 3.0),
            });
            est.process(&input).unwrap();
        }
        let out = est.process(&input_at(3, 0.0)).unwrap().unwrap();
        let point = out
            .map_points
            .iter()
            .find(|p| p.landmark_id == LandmarkId(1))
            .unwrap();
        assert_eq!(point.observations, 3);
        assert!((point.position - Vector3::new(1.0, 2.0, 3.0)).norm() < 1e-12);
    }
}
