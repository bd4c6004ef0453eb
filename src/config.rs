//! Pipeline configuration.
//!
//! Everything here is consumed once at construction; the pipeline
//! never re-reads configuration at runtime. Stage activation
//! (visualization, loop closure, mapping) is decided by these values
//! and disabled stages are never built.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Errors raised while loading or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("expected a stereo rig with exactly 2 cameras, got {0}")]
    WrongCameraCount(usize),

    #[error("estimator window size must be at least 1, got {0}")]
    EmptyEstimatorWindow(usize),

    #[error("loop closure consistency threshold must be at least 1, got {0}")]
    ZeroConsistencyThreshold(usize),

    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Per-camera intrinsics bundle. The pipeline only cares about rig
/// cardinality; the values ride along for the stage workers.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub width: u32,
    pub height: u32,
    pub focal_length: f64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            width: 752,
            height: 480,
            focal_length: 458.0,
        }
    }
}

/// Tracking algorithm variant selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerType {
    /// IMU dead-reckoning odometry over pre-extracted stereo features.
    StereoInertial,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub tracker_type: TrackerType,
    /// Create a keyframe at least this often (seconds).
    pub keyframe_max_interval_s: f64,
    /// Never create keyframes closer together than this many frames.
    pub keyframe_min_frames: usize,
    /// Translation since the last keyframe that forces a new one (m).
    pub keyframe_min_translation_m: f64,
    /// Rotation since the last keyframe that forces a new one (rad).
    pub keyframe_min_rotation_rad: f64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            tracker_type: TrackerType::StereoInertial,
            keyframe_max_interval_s: 0.25,
            keyframe_min_frames: 1,
            keyframe_min_translation_m: 0.5,
            keyframe_min_rotation_rad: 0.25,
        }
    }
}

/// Estimation algorithm variant selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimatorType {
    /// Fixed-size sliding window smoother.
    SlidingWindow,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    pub estimator_type: EstimatorType,
    /// Number of keyframes kept in the smoothing window.
    pub window_size: usize,
    /// A translation jump between consecutive keyframes beyond this is
    /// treated as numerical divergence (m).
    pub max_translation_jump_m: f64,
    /// Blend factor pulling the smoothed pose toward the window mean.
    pub smoothing_weight: f64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            estimator_type: EstimatorType::SlidingWindow,
            window_size: 10,
            max_translation_jump_m: 50.0,
            smoothing_weight: 0.2,
        }
    }
}

/// Mesh reconstruction variant selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MesherType {
    Projective,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MesherConfig {
    pub mesher_type: MesherType,
    /// Minimum observations a landmark needs before the mesher will
    /// use it as a vertex.
    pub min_num_obs: usize,
}

impl Default for MesherConfig {
    fn default() -> Self {
        Self {
            mesher_type: MesherType::Projective,
            min_num_obs: 4,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoopClosureConfig {
    /// Candidate radius: keyframes whose positions are closer than
    /// this are loop candidates (m).
    pub proximity_radius_m: f64,
    /// Ignore keyframes created within this many keyframes of the
    /// query (they are trivially nearby).
    pub min_keyframe_gap: usize,
    /// Consecutive consistent detections required before a loop is
    /// accepted.
    pub consistency_threshold: usize,
}

impl Default for LoopClosureConfig {
    fn default() -> Self {
        Self {
            proximity_radius_m: 1.0,
            min_keyframe_gap: 20,
            consistency_threshold: 3,
        }
    }
}

/// What the visualization stage produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisualizationType {
    /// 3D mesh from the mapping stage plus trajectory.
    Mesh2dTo3dSparse,
    /// Point cloud plus trajectory.
    Pointcloud,
    /// Trajectory only.
    None,
}

/// Rendering backend selector for the display stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayType {
    /// Renders to structured logs and counters. Real rendering
    /// backends plug in through the `DisplayBackend` trait.
    Headless,
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VioConfig {
    /// One worker thread per stage when true; strictly synchronous
    /// single-threaded operation when false.
    pub parallel_run: bool,
    pub cameras: Vec<CameraConfig>,
    pub tracker: TrackerConfig,
    pub estimator: EstimatorConfig,
    pub mesher: MesherConfig,
    pub loop_closure: LoopClosureConfig,
    pub visualize: bool,
    pub viz_type: VisualizationType,
    pub display_type: DisplayType,
    pub use_loop_closure: bool,
    /// Log the estimated trajectory to CSV.
    pub log_output: bool,
    pub output_path: PathBuf,
    /// Seed every random generator deterministically so repeated runs
    /// produce identical output.
    pub deterministic_random_seed: bool,
}

impl Default for VioConfig {
    fn default() -> Self {
        Self {
            parallel_run: true,
            cameras: vec![CameraConfig::default(), CameraConfig::default()],
            tracker: TrackerConfig::default(),
            estimator: EstimatorConfig::default(),
            mesher: MesherConfig::default(),
            loop_closure: LoopClosureConfig::default(),
            visualize: true,
            viz_type: VisualizationType::Mesh2dTo3dSparse,
            display_type: DisplayType::Headless,
            use_loop_closure: false,
            log_output: false,
            output_path: PathBuf::from("output/trajectory.csv"),
            deterministic_random_seed: false,
        }
    }
}

impl VioConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: VioConfig = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Startup preconditions. A violation here means the pipeline must
    /// not be constructed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cameras.len() != 2 {
            return Err(ConfigError::WrongCameraCount(self.cameras.len()));
        }
        if self.estimator.window_size == 0 {
            return Err(ConfigError::EmptyEstimatorWindow(0));
        }
        if self.use_loop_closure && self.loop_closure.consistency_threshold == 0 {
            return Err(ConfigError::ZeroConsistencyThreshold(0));
        }
        Ok(())
    }

    /// The mapping stage only exists when the visualization type asks
    /// for a mesh.
    pub fn mapping_enabled(&self) -> bool {
        self.viz_type == VisualizationType::Mesh2dTo3dSparse
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(VioConfig::default().validate().is_ok());
    }

    #[test]
    fn test_mono_rig_rejected() {
        let mut config = VioConfig::default();
        config.cameras.truncate(1);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::WrongCameraCount(1))
        ));
    }

    #[test]
    fn test_empty_estimator_window_rejected() {
        let mut config = VioConfig::default();
        config.estimator.window_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_mapping_enabled_tracks_viz_type() {
        let mut config = VioConfig::default();
        assert!(config.mapping_enabled());
        config.viz_type = VisualizationType::Pointcloud;
        assert!(!config.mapping_enabled());
        config.viz_type = VisualizationType::None;
        assert!(!config.mapping_enabled());
    }

    #[test]
    fn test_parse_partial_yaml() {
        let yaml = "parallel_run: false\nuse_loop_closure: true\nviz_type: pointcloud\n";
        let config: VioConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(!config.parallel_run);
        assert!(config.use_loop_closure);
        assert_eq!(config.viz_type, VisualizationType::Pointcloud);
        // Untouched sections keep their defaults.
        assert_eq!(config.mesher.min_num_obs, 4);
    }
}
