//! KeyFrame decision criteria.
//!
//! A frame becomes a keyframe when enough time has passed since the
//! last one, or when the body has moved or rotated far enough. The
//! very first frame is always a keyframe.

use crate::config::TrackerConfig;
use crate::geometry::SE3;

/// Decides which frames are designated keyframes.
pub struct KeyFrameDecision {
    min_frames: usize,
    max_interval_s: f64,
    min_translation_m: f64,
    min_rotation_rad: f64,
    frames_since_kf: usize,
    last_kf_time_s: Option<f64>,
    last_kf_pose: SE3,
}

impl KeyFrameDecision {
    pub fn new(config: &TrackerConfig) -> Self {
        Self {
            min_frames: config.keyframe_min_frames,
            max_interval_s: config.keyframe_max_interval_s,
            min_translation_m: config.keyframe_min_translation_m,
            min_rotation_rad: config.keyframe_min_rotation_rad,
            frames_since_kf: 0,
            last_kf_time_s: None,
            last_kf_pose: SE3::identity(),
        }
    }

    /// Decide whether the current frame becomes a keyframe.
    pub fn should_create_keyframe(&mut self, time_s: f64, pose: &SE3) -> bool {
        let last_time = match self.last_kf_time_s {
            Some(t) => t,
            // First frame: always a keyframe.
            None => {
                self.mark_keyframe(time_s, pose);
                return true;
            }
        };

        self.frames_since_kf += 1;
        if self.frames_since_kf < self.min_frames {
            return false;
        }

        let elapsed = time_s - last_time;
        let translated = self.last_kf_pose.translation_distance(pose);
        let rotated = self.last_kf_pose.rotation_angle_to(pose);

        if elapsed >= self.max_interval_s
            || translated >= self.min_translation_m
            || rotated >= self.min_rotation_rad
        {
            self.mark_keyframe(time_s, pose);
            return true;
        }
        false
    }

    fn mark_keyframe(&mut self, time_s: f64, pose: &SE3) {
        self.frames_since_kf = 0;
        self.last_kf_time_s = Some(time_s);
        self.last_kf_pose = pose.clone();
    }
}
