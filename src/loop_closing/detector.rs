//! Pose-proximity place recognition with temporal consistency
//! checking.
//!
//! A keyframe whose refined position lands near a much older keyframe
//! is a loop candidate. Candidates must point at the same region for
//! several consecutive keyframes before a loop is accepted, which
//! suppresses spurious single-frame matches.

use nalgebra::Vector3;
use tracing::{debug, info};

use crate::config::LoopClosureConfig;

use super::{LcdInput, LoopClosureOutput, PlaceRecognizer};

#[derive(Debug, Clone, Copy)]
struct KeyframeEntry {
    timestamp_ns: u64,
    position: Vector3<f64>,
}

/// A single-keyframe proximity match.
#[derive(Debug, Clone, Copy)]
struct LoopCandidate {
    matched_index: usize,
    matched_timestamp_ns: u64,
    distance_m: f64,
}

/// Accepts a candidate only after it has been re-detected on
/// consecutive keyframes.
struct ConsistencyChecker {
    threshold: usize,
    last_matched_index: Option<usize>,
    consecutive: usize,
}

impl ConsistencyChecker {
    fn new(threshold: usize) -> Self {
        Self {
            threshold,
            last_matched_index: None,
            consecutive: 0,
        }
    }

    /// Feed the best candidate for the current keyframe (or None when
    /// nothing matched). Returns true once the same region has been
    /// matched `threshold` keyframes in a row.
    fn add_and_check(&mut self, candidate: Option<&LoopCandidate>) -> bool {
        match candidate {
            Some(c) => {
                // Consecutive detections of a nearby region: indices
                // into the keyframe database drift by a few entries as
                // the query advances, so compare with slack.
                let consistent = self
                    .last_matched_index
                    .is_some_and(|prev| c.matched_index.abs_diff(prev) <= 2);
                self.consecutive = if consistent { self.consecutive + 1 } else { 1 };
                self.last_matched_index = Some(c.matched_index);
                self.consecutive >= self.threshold
            }
            None => {
                self.last_matched_index = None;
                self.consecutive = 0;
                false
            }
        }
    }
}

pub struct ProximityDetector {
    proximity_radius_m: f64,
    min_keyframe_gap: usize,
    keyframes: Vec<KeyframeEntry>,
    checker: ConsistencyChecker,
}

impl ProximityDetector {
    pub fn new(config: &LoopClosureConfig) -> Self {
        Self {
            proximity_radius_m: config.proximity_radius_m,
            min_keyframe_gap: config.min_keyframe_gap,
            keyframes: Vec::new(),
            checker: ConsistencyChecker::new(config.consistency_threshold),
        }
    }

    /// Closest database entry at least `min_keyframe_gap` keyframes
    /// older than the query, within the proximity radius. The query
    /// itself would be inserted at index `len`.
    fn best_candidate(&self, position: &Vector3<f64>) -> Option<LoopCandidate> {
        let eligible = (self.keyframes.len() + 1)
            .checked_sub(self.min_keyframe_gap)?
            .min(self.keyframes.len());
        self.keyframes[..eligible]
            .iter()
            .enumerate()
            .map(|(i, kf)| LoopCandidate {
                matched_index: i,
                matched_timestamp_ns: kf.timestamp_ns,
                distance_m: (kf.position - position).norm(),
            })
            .filter(|c| c.distance_m <= self.proximity_radius_m)
            .min_by(|a, b| a.distance_m.total_cmp(&b.distance_m))
    }
}

impl PlaceRecognizer for ProximityDetector {
    fn process(&mut self, input: &LcdInput) -> Option<LoopClosureOutput> {
        // Refined estimation poses drive both the database and the
        // queries; raw tracking payloads are available to richer
        // recognizers but unused here.
        let estimation = match input {
            LcdInput::Estimation(e) => e,
            LcdInput::Tracking(_) => return None,
        };

        let position = estimation.pose.translation;
        let candidate = self.best_candidate(&position);
        let accepted = self.checker.add_and_check(candidate.as_ref());

        self.keyframes.push(KeyframeEntry {
            timestamp_ns: estimation.timestamp_ns,
            position,
        });

        let candidate = candidate?;
        if !accepted {
            debug!(
                timestamp_ns = estimation.timestamp_ns,
                matched_timestamp_ns = candidate.matched_timestamp_ns,
                "loop candidate awaiting consistency"
            );
            return None;
        }

        info!(
            timestamp_ns = estimation.timestamp_ns,
            matched_timestamp_ns = candidate.matched_timestamp_ns,
            distance_m = candidate.distance_m,
            "loop closure accepted"
        );
        Some(LoopClosureOutput {
            timestamp_ns: estimation.timestamp_ns,
            matched_timestamp_ns: candidate.matched_timestamp_ns,
            distance_m: candidate.distance_m,
        })
    }

    fn is_initialized(&self) -> bool {
        !self.keyframes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimation::EstimationOutput;
    use crate::geometry::SE3;
    use std::sync::Arc;

    fn detector(threshold: usize) -> ProximityDetector {
        ProximityDetector::new(&LoopClosureConfig {
            proximity_radius_m: 1.0,
            min_keyframe_gap: 5,
            consistency_threshold: threshold,
        })
    }

    fn estimation_at(timestamp_ns: u64, position: Vector3<f64>) -> LcdInput {
        let mut pose = SE3::identity();
        pose.translation = position;
        LcdInput::Estimation(Arc::new(EstimationOutput {
            timestamp_ns,
            pose,
            velocity: Vector3::zeros(),
            map_points: Vec::new(),
        }))
    }

    #[test]
    fn test_revisit_accepted_after_consistent_detections() {
        let mut det = detector(2);
        // Walk away along x, then come back to the origin.
        for i in 0..8u64 {
            let x = i as f64 * 5.0;
            assert!(det
                .process(&estimation_at(i, Vector3::new(x, 0.0, 0.0)))
                .is_none());
        }
        // First revisit: candidate found but not yet consistent.
        assert!(det
            .process(&estimation_at(100, Vector3::new(0.1, 0.0, 0.0)))
            .is_none());
        // Second consecutive revisit: accepted.
        let out = det
            .process(&estimation_at(101, Vector3::new(0.2, 0.0, 0.0)))
            .unwrap();
        assert_eq!(out.matched_timestamp_ns, 0);
    }

    #[test]
    fn test_recent_keyframes_are_not_candidates() {
        let mut det = detector(1);
        // All keyframes at the same spot, but the gap rule excludes
        // the recent ones and the database is too small at first.
        for i in 0..5u64 {
            assert!(det
                .process(&estimation_at(i, Vector3::zeros()))
                .is_none());
        }
        // Sixth keyframe: entry 0 is now old enough.
        assert!(det.process(&estimation_at(5, Vector3::zeros())).is_some());
    }

    #[test]
    fn test_tracking_payloads_ignored() {
        use crate::tracking::{TrackingOutput, TrackingState};
        let mut det = detector(1);
        let input = LcdInput::Tracking(Arc::new(TrackingOutput {
            timestamp_ns: 0,
            is_keyframe: true,
            state: TrackingState::Ok,
            pose: SE3::identity(),
            velocity: Vector3::zeros(),
            observations: Vec::new(),
            imu_window: Vec::new(),
        }));
        assert!(det.process(&input).is_none());
        assert!(!det.is_initialized());
    }
}
