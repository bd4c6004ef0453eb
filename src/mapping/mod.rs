//! Mapping stage: pairs keyframe tracking and estimation payloads and
//! hands them to the mesh-reconstruction worker.
//!
//! The stage has a single input queue carrying either payload kind;
//! an internal aligner matches them by timestamp so the mesher always
//! sees a consistent keyframe snapshot. The reconstruction algorithm
//! is an external collaborator behind the [`Mesher`] trait.

pub mod mesher;

use std::collections::VecDeque;
use std::sync::Arc;

use nalgebra::Vector3;
use tracing::warn;

use crate::config::{MesherConfig, MesherType};
use crate::estimation::EstimationOutput;
use crate::system::module::StageWorker;
use crate::tracking::TrackingOutput;

pub use mesher::ProjectiveMesher;

/// Either payload the mapping stage consumes.
#[derive(Debug, Clone)]
pub enum MapperInput {
    Tracking(Arc<TrackingOutput>),
    Estimation(Arc<EstimationOutput>),
}

/// Reconstructed map summary for one keyframe.
#[derive(Debug, Clone)]
pub struct MapperOutput {
    pub timestamp_ns: u64,
    pub vertices: Vec<Vector3<f64>>,
    pub triangles: Vec<[u32; 3]>,
}

/// The pluggable mesh-reconstruction algorithm.
pub trait Mesher: Send {
    fn process(
        &mut self,
        tracking: &TrackingOutput,
        estimation: &EstimationOutput,
    ) -> Option<MapperOutput>;
}

/// Build the mesher selected by the configuration.
pub fn make_mesher(config: &MesherConfig) -> Box<dyn Mesher> {
    match config.mesher_type {
        MesherType::Projective => Box::new(ProjectiveMesher::new(config)),
    }
}

/// Pairs tracking and estimation payloads by timestamp.
///
/// Both producers emit per-keyframe payloads with identical
/// timestamps; whichever arrives second completes the pair. Unmatched
/// entries older than the pairing point are discarded with a warning
/// (they can only appear if a producer dropped a keyframe).
struct KeyframeAligner {
    tracking: VecDeque<Arc<TrackingOutput>>,
    estimation: VecDeque<Arc<EstimationOutput>>,
}

impl KeyframeAligner {
    fn new() -> Self {
        Self {
            tracking: VecDeque::new(),
            estimation: VecDeque::new(),
        }
    }

    fn push(&mut self, input: MapperInput) -> Option<(Arc<TrackingOutput>, Arc<EstimationOutput>)> {
        match input {
            MapperInput::Tracking(t) => self.tracking.push_back(t),
            MapperInput::Estimation(e) => self.estimation.push_back(e),
        }
        self.try_match()
    }

    fn try_match(&mut self) -> Option<(Arc<TrackingOutput>, Arc<EstimationOutput>)> {
        while let (Some(t), Some(e)) = (self.tracking.front(), self.estimation.front()) {
            if t.timestamp_ns == e.timestamp_ns {
                let t = self.tracking.pop_front()?;
                let e = self.estimation.pop_front()?;
                return Some((t, e));
            }
            if t.timestamp_ns < e.timestamp_ns {
                let stale = self.tracking.pop_front()?;
                warn!(
                    timestamp_ns = stale.timestamp_ns,
                    "dropping unmatched tracking payload in mapping aligner"
                );
            } else {
                let stale = self.estimation.pop_front()?;
                warn!(
                    timestamp_ns = stale.timestamp_ns,
                    "dropping unmatched estimation payload in mapping aligner"
                );
            }
        }
        None
    }
}

/// Stage worker: align inputs, then run the mesher on each pair.
pub struct MappingStage {
    aligner: KeyframeAligner,
    mesher: Box<dyn Mesher>,
    meshes_produced: usize,
}

impl MappingStage {
    pub fn new(mesher: Box<dyn Mesher>) -> Self {
        Self {
            aligner: KeyframeAligner::new(),
            mesher,
            meshes_produced: 0,
        }
    }
}

impl StageWorker for MappingStage {
    type Input = MapperInput;
    type Output = Arc<MapperOutput>;

    fn process(&mut self, input: MapperInput) -> Option<Arc<MapperOutput>> {
        let (tracking, estimation) = self.aligner.push(input)?;
        let output = self.mesher.process(&tracking, &estimation)?;
        self.meshes_produced += 1;
        Some(Arc::new(output))
    }

    fn is_initialized(&self) -> bool {
        self.meshes_produced > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::SE3;
    use crate::tracking::TrackingState;

    fn tracking_at(timestamp_ns: u64) -> Arc<TrackingOutput> {
        Arc::new(TrackingOutput {
            timestamp_ns,
            is_keyframe: true,
            state: TrackingState::Ok,
            pose: SE3::identity(),
            velocity: Vector3::zeros(),
            observations: Vec::new(),
            imu_window: Vec::new(),
        })
    }

    fn estimation_at(timestamp_ns: u64) -> Arc<EstimationOutput> {
        Arc::new(EstimationOutput {
            timestamp_ns,
            pose: SE3::identity(),
            velocity: Vector3::zeros(),
            map_points: Vec::new(),
        })
    }

    #[test]
    fn test_aligner_pairs_matching_timestamps() {
        let mut aligner = KeyframeAligner::new();
        assert!(aligner.push(MapperInput::Tracking(tracking_at(10))).is_none());
        let pair = aligner.push(MapperInput::Estimation(estimation_at(10)));
        assert!(pair.is_some());
        let (t, e) = pair.unwrap();
        assert_eq!(t.timestamp_ns, 10);
        assert_eq!(e.timestamp_ns, 10);
    }

    #[test]
    fn test_aligner_drops_stale_unmatched_entries() {
        let mut aligner = KeyframeAligner::new();
        aligner.push(MapperInput::Tracking(tracking_at(10)));
        aligner.push(MapperInput::Tracking(tracking_at(20)));
        // Estimation for t=20 only: the t=10 tracking entry is stale.
        let pair = aligner.push(MapperInput::Estimation(estimation_at(20)));
        assert_eq!(pair.unwrap().0.timestamp_ns, 20);
        assert!(aligner.tracking.is_empty());
        assert!(aligner.estimation.is_empty());
    }

    #[test]
    fn test_aligner_handles_either_arrival_order() {
        let mut aligner = KeyframeAligner::new();
        assert!(aligner
            .push(MapperInput::Estimation(estimation_at(5)))
            .is_none());
        assert!(aligner.push(MapperInput::Tracking(tracking_at(5))).is_some());
    }
}
