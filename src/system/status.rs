//! Point-in-time pipeline status used by the completion supervisor.
//!
//! The supervisor takes one snapshot per poll and uses it for both the
//! completion predicate and the diagnostic log, so the logged state is
//! exactly the state that was evaluated.

use std::fmt;

use super::module::ModuleState;
use super::queue::ThreadsafeQueue;

/// Observed state of one queue.
#[derive(Debug, Clone, Copy)]
pub struct QueueStatus {
    pub name: &'static str,
    pub shutdown: bool,
    pub empty: bool,
}

impl QueueStatus {
    pub fn of<T>(name: &'static str, queue: &ThreadsafeQueue<T>) -> Self {
        Self {
            name,
            shutdown: queue.is_shutdown(),
            empty: queue.empty(),
        }
    }

    /// A queue no longer feeds its consumer when it is shut down or
    /// has nothing queued.
    pub fn idle(&self) -> bool {
        self.shutdown || self.empty
    }
}

/// Observed state of one stage.
#[derive(Debug, Clone, Copy)]
pub struct StageStatus {
    pub name: &'static str,
    pub working: bool,
    pub initialized: bool,
}

impl StageStatus {
    pub fn of(state: &ModuleState) -> Self {
        Self {
            name: state.name(),
            working: state.is_working(),
            initialized: state.is_initialized(),
        }
    }
}

/// Snapshot of every queue and stage in the pipeline. Optional stages
/// that were never constructed are absent and count as idle.
#[derive(Debug, Clone)]
pub struct PipelineStatus {
    pub initialized: bool,
    pub estimator_ok: bool,
    pub data_source: StageStatus,
    pub tracking: StageStatus,
    pub estimation: StageStatus,
    pub mapping: Option<StageStatus>,
    pub loop_closure: Option<StageStatus>,
    pub visualization: Option<StageStatus>,
    pub display: Option<StageStatus>,
    pub queues: Vec<QueueStatus>,
}

impl PipelineStatus {
    /// True when no stage is mid-computation and no queue can still
    /// feed one: the "all quiet" half of the completion predicate.
    pub fn is_idle(&self) -> bool {
        let stage_idle = |stage: &Option<StageStatus>| stage.map_or(true, |s| !s.working);
        !self.data_source.working
            && !self.tracking.working
            && !self.estimation.working
            && stage_idle(&self.mapping)
            && stage_idle(&self.loop_closure)
            && stage_idle(&self.visualization)
            && stage_idle(&self.display)
            && self.queues.iter().all(QueueStatus::idle)
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "pipeline status:")?;
        writeln!(f, "  initialized: {}", self.initialized)?;
        writeln!(f, "  estimator ok: {}", self.estimator_ok)?;
        for stage in [Some(self.data_source), Some(self.tracking), Some(self.estimation)]
            .into_iter()
            .chain([self.mapping, self.loop_closure, self.visualization, self.display])
            .flatten()
        {
            writeln!(
                f,
                "  stage {}: working={} initialized={}",
                stage.name, stage.working, stage.initialized
            )?;
        }
        for queue in &self.queues {
            writeln!(
                f,
                "  queue {}: shutdown={} empty={}",
                queue.name, queue.shutdown, queue.empty
            )?;
        }
        Ok(())
    }
}
