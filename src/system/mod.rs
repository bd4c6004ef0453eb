//! Pipeline orchestration substrate: the bounded queue, the generic
//! processing module, status snapshots, and the pipeline itself.

pub mod module;
pub mod pipeline;
pub mod queue;
pub mod status;

pub use module::{ModuleState, OutputCallback, PipelineModule, StageThread, StageWorker};
pub use pipeline::{PipelineError, VioPipeline};
pub use queue::ThreadsafeQueue;
pub use status::{PipelineStatus, QueueStatus, StageStatus};
