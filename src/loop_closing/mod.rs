//! Loop-closure stage: watches the keyframe stream for revisited
//! places.
//!
//! The place-recognition algorithm is an external collaborator behind
//! the [`PlaceRecognizer`] trait; the built-in variant detects
//! revisits by pose proximity with a consecutive-detection consistency
//! gate. The stage consumes both tracking and estimation payloads but
//! has no downstream consumer: accepted loops are surfaced through the
//! stage output (and logged).

pub mod detector;

use std::sync::Arc;

use crate::config::LoopClosureConfig;
use crate::estimation::EstimationOutput;
use crate::system::module::StageWorker;
use crate::tracking::TrackingOutput;

pub use detector::ProximityDetector;

/// Either payload the loop-closure stage consumes.
#[derive(Debug, Clone)]
pub enum LcdInput {
    Tracking(Arc<TrackingOutput>),
    Estimation(Arc<EstimationOutput>),
}

/// An accepted loop closure between two keyframe timestamps.
#[derive(Debug, Clone)]
pub struct LoopClosureOutput {
    pub timestamp_ns: u64,
    pub matched_timestamp_ns: u64,
    pub distance_m: f64,
}

/// The pluggable place-recognition algorithm.
pub trait PlaceRecognizer: Send {
    fn process(&mut self, input: &LcdInput) -> Option<LoopClosureOutput>;

    /// True once the keyframe database holds at least one entry.
    fn is_initialized(&self) -> bool;
}

/// Build the recognizer selected by the configuration.
pub fn make_place_recognizer(config: &LoopClosureConfig) -> Box<dyn PlaceRecognizer> {
    Box::new(ProximityDetector::new(config))
}

/// Stage worker adapting a [`PlaceRecognizer`] to the pipeline module
/// contract.
pub struct LoopClosureStage {
    recognizer: Box<dyn PlaceRecognizer>,
}

impl LoopClosureStage {
    pub fn new(recognizer: Box<dyn PlaceRecognizer>) -> Self {
        Self { recognizer }
    }
}

impl StageWorker for LoopClosureStage {
    type Input = LcdInput;
    type Output = Arc<LoopClosureOutput>;

    fn process(&mut self, input: LcdInput) -> Option<Arc<LoopClosureOutput>> {
        self.recognizer.process(&input).map(Arc::new)
    }

    fn is_initialized(&self) -> bool {
        self.recognizer.is_initialized()
    }
}
