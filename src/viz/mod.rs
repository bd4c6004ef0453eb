//! Visualization stage: turns stage payloads into renderable draw
//! lists.
//!
//! The stage consumes tracking, estimation, and (when present) mapping
//! payloads, accumulates the trajectory, and emits one [`DisplayInput`]
//! per estimation update. What the draw list contains is selected by
//! the [`VisualizationType`] configured at construction. Actual
//! rendering happens in the display stage, on the caller's thread.

pub mod display;

use std::sync::Arc;

use nalgebra::Vector3;

use crate::config::VisualizationType;
use crate::estimation::EstimationOutput;
use crate::geometry::SE3;
use crate::mapping::MapperOutput;
use crate::system::module::StageWorker;
use crate::tracking::{TrackingOutput, TrackingState};

pub use display::{DisplayBackend, DisplayStage, HeadlessDisplay, make_display};

/// Any payload the visualization stage consumes.
#[derive(Debug, Clone)]
pub enum VizInput {
    Tracking(Arc<TrackingOutput>),
    Estimation(Arc<EstimationOutput>),
    Mapping(Arc<MapperOutput>),
}

/// One renderable primitive.
#[derive(Debug, Clone)]
pub enum DrawCommand {
    CameraPose(SE3),
    Trajectory(Vec<Vector3<f64>>),
    PointCloud(Vec<Vector3<f64>>),
    Mesh {
        vertices: Vec<Vector3<f64>>,
        triangles: Vec<[u32; 3]>,
    },
    StatusText(String),
}

/// A complete frame for the display stage.
#[derive(Debug, Clone)]
pub struct DisplayInput {
    pub timestamp_ns: u64,
    pub commands: Vec<DrawCommand>,
}

/// Stage worker building draw lists.
pub struct VisualizationStage {
    viz_type: VisualizationType,
    trajectory: Vec<Vector3<f64>>,
    latest_mesh: Option<Arc<MapperOutput>>,
    latest_tracking_state: TrackingState,
    frames_built: usize,
}

impl VisualizationStage {
    pub fn new(viz_type: VisualizationType) -> Self {
        Self {
            viz_type,
            trajectory: Vec::new(),
            latest_mesh: None,
            latest_tracking_state: TrackingState::NotInitialized,
            frames_built: 0,
        }
    }

    fn build_frame(&mut self, estimation: &EstimationOutput) -> DisplayInput {
        self.trajectory.push(estimation.pose.translation);

        let mut commands = vec![
            DrawCommand::CameraPose(estimation.pose.clone()),
            DrawCommand::Trajectory(self.trajectory.clone()),
        ];
        match self.viz_type {
            VisualizationType::Mesh2dTo3dSparse => {
                if let Some(mesh) = &self.latest_mesh {
                    commands.push(DrawCommand::Mesh {
                        vertices: mesh.vertices.clone(),
                        triangles: mesh.triangles.clone(),
                    });
                }
            }
            VisualizationType::Pointcloud => {
                commands.push(DrawCommand::PointCloud(
                    estimation.map_points.iter().map(|p| p.position).collect(),
                ));
            }
            VisualizationType::None => {}
        }
        commands.push(DrawCommand::StatusText(format!(
            "t={:.3}s state={:?} landmarks={}",
            estimation.timestamp_ns as f64 * 1e-9,
            self.latest_tracking_state,
            estimation.map_points.len(),
        )));

        self.frames_built += 1;
        DisplayInput {
            timestamp_ns: estimation.timestamp_ns,
            commands,
        }
    }
}

impl StageWorker for VisualizationStage {
    type Input = VizInput;
    type Output = DisplayInput;

    fn process(&mut self, input: VizInput) -> Option<DisplayInput> {
        match input {
            VizInput::Tracking(t) => {
                self.latest_tracking_state = t.state;
                None
            }
            VizInput::Mapping(m) => {
                self.latest_mesh = Some(m);
                None
            }
            VizInput::Estimation(e) => Some(self.build_frame(&e)),
        }
    }

    fn is_initialized(&self) -> bool {
        self.frames_built > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimation::MapPoint;
    use crate::sensor::LandmarkId;

    fn estimation_at(timestamp_ns: u64, x: f64) -> Arc<EstimationOutput> {
        let mut pose = SE3::identity();
        pose.translation = Vector3::new(x, 0.0, 0.0);
        Arc::new(EstimationOutput {
            timestamp_ns,
            pose,
            velocity: Vector3::zeros(),
            map_points: vec![MapPoint {
                landmark_id: LandmarkId(0),
                position: Vector3::zeros(),
                observations: 5,
            }],
        })
    }

    #[test]
    fn test_only_estimation_inputs_emit_frames() {
        let mut stage = VisualizationStage::new(VisualizationType::Pointcloud);
        let tracking = Arc::new(TrackingOutput {
            timestamp_ns: 0,
            is_keyframe: true,
            state: TrackingState::Ok,
            pose: SE3::identity(),
            velocity: Vector3::zeros(),
            observations: Vec::new(),
            imu_window: Vec::new(),
        });
        assert!(stage.process(VizInput::Tracking(tracking)).is_none());
        assert!(stage
            .process(VizInput::Estimation(estimation_at(1, 0.0)))
            .is_some());
    }

    #[test]
    fn test_trajectory_accumulates() {
        let mut stage = VisualizationStage::new(VisualizationType::None);
        for i in 0..3u64 {
            stage.process(VizInput::Estimation(estimation_at(i, i as f64)));
        }
        let frame = stage
            .process(VizInput::Estimation(estimation_at(3, 3.0)))
            .unwrap();
        let trajectory = frame
            .commands
            .iter()
            .find_map(|c| match c {
                DrawCommand::Trajectory(points) => Some(points.len()),
                _ => None,
            })
            .unwrap();
        assert_eq!(trajectory, 4);
    }

    #[test]
    fn test_pointcloud_variant_includes_points() {
        let mut stage = VisualizationStage::new(VisualizationType::Pointcloud);
        let frame = stage
            .process(VizInput::Estimation(estimation_at(0, 0.0)))
            .unwrap();
        assert!(frame
            .commands
            .iter()
            .any(|c| matches!(c, DrawCommand::PointCloud(_))));
    }

    #[test]
    fn test_mesh_variant_uses_latest_mesh() {
        let mut stage = VisualizationStage::new(VisualizationType::Mesh2dTo3dSparse);
        // No mesh yet: no mesh command.
        let frame = stage
            .process(VizInput::Estimation(estimation_at(0, 0.0)))
            .unwrap();
        assert!(!frame
            .commands
            .iter()
            .any(|c| matches!(c, DrawCommand::Mesh { .. })));

        stage.process(VizInput::Mapping(Arc::new(MapperOutput {
            timestamp_ns: 0,
            vertices: vec![Vector3::zeros()],
            triangles: Vec::new(),
        })));
        let frame = stage
            .process(VizInput::Estimation(estimation_at(1, 1.0)))
            .unwrap();
        assert!(frame
            .commands
            .iter()
            .any(|c| matches!(c, DrawCommand::Mesh { .. })));
    }
}
