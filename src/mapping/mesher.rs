//! Built-in mesher variant: well-observed landmarks become vertices,
//! connected into a simple triangle fan per keyframe.
//!
//! Real surface reconstruction plugs in through the [`Mesher`] trait;
//! this implementation exists so the mapping stage has a complete
//! default and the observation-count gate is honored end to end.

use crate::config::MesherConfig;
use crate::estimation::EstimationOutput;
use crate::tracking::TrackingOutput;

use super::{MapperOutput, Mesher};

pub struct ProjectiveMesher {
    min_num_obs: usize,
}

impl ProjectiveMesher {
    pub fn new(config: &MesherConfig) -> Self {
        Self {
            min_num_obs: config.min_num_obs,
        }
    }
}

impl Mesher for ProjectiveMesher {
    fn process(
        &mut self,
        _tracking: &TrackingOutput,
        estimation: &EstimationOutput,
    ) -> Option<MapperOutput> {
        let vertices: Vec<_> = estimation
            .map_points
            .iter()
            .filter(|p| p.observations >= self.min_num_obs)
            .map(|p| p.position)
            .collect();

        if vertices.is_empty() {
            return None;
        }

        let triangles = (1..vertices.len().saturating_sub(1))
            .map(|i| [0u32, i as u32, i as u32 + 1])
            .collect();

        Some(MapperOutput {
            timestamp_ns: estimation.timestamp_ns,
            vertices,
            triangles,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::SE3;
    use crate::estimation::MapPoint;
    use crate::sensor::LandmarkId;
    use crate::tracking::TrackingState;
    use nalgebra::Vector3;

    fn tracking() -> TrackingOutput {
        TrackingOutput {
            timestamp_ns: 0,
            is_keyframe: true,
            state: TrackingState::Ok,
            pose: SE3::identity(),
            velocity: Vector3::zeros(),
            observations: Vec::new(),
            imu_window: Vec::new(),
        }
    }

    fn estimation(observation_counts: &[usize]) -> EstimationOutput {
        EstimationOutput {
            timestamp_ns: 0,
            pose: SE3::identity(),
            velocity: Vector3::zeros(),
            map_points: observation_counts
                .iter()
                .enumerate()
                .map(|(i, &observations)| MapPoint {
                    landmark_id: LandmarkId(i as u64),
                    position: Vector3::new(i as f64, 0.0, 0.0),
                    observations,
                })
                .collect(),
        }
    }

    #[test]
    fn test_min_observation_gate() {
        let mut mesher = ProjectiveMesher::new(&MesherConfig {
            min_num_obs: 4,
            ..MesherConfig::default()
        });
        // Only two landmarks pass the gate.
        let out = mesher
            .process(&tracking(), &estimation(&[1, 4, 2, 5]))
            .unwrap();
        assert_eq!(out.vertices.len(), 2);
    }

    #[test]
    fn test_no_vertices_means_no_output() {
        let mut mesher = ProjectiveMesher::new(&MesherConfig::default());
        assert!(mesher.process(&tracking(), &estimation(&[1, 1])).is_none());
    }

    #[test]
    fn test_triangle_fan_over_vertices() {
        let mut mesher = ProjectiveMesher::new(&MesherConfig {
            min_num_obs: 1,
            ..MesherConfig::default()
        });
        let out = mesher
            .process(&tracking(), &estimation(&[1, 1, 1, 1]))
            .unwrap();
        assert_eq!(out.vertices.len(), 4);
        assert_eq!(out.triangles, vec![[0, 1, 2], [0, 2, 3]]);
    }
}
