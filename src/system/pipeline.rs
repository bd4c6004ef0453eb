//! The VIO pipeline: stage construction, static fan-out wiring,
//! thread lifecycle, and coordinated shutdown.
//!
//! Construction builds every enabled stage in dependency order, wires
//! producer callbacks into consumer queues, and (in parallel mode)
//! launches one worker thread per stage. The display stage is the
//! exception: rendering owns the caller's thread, so it is only ever
//! driven through `spin_display` or the sequential pass.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::config::{ConfigError, VioConfig};
use crate::estimation::{
    EstimationInput, EstimationOutput, EstimationStage, make_estimator,
};
use crate::io::TrajectoryLogger;
use crate::loop_closing::{LcdInput, LoopClosureStage, make_place_recognizer};
use crate::mapping::{MapperInput, MapperOutput, MappingStage, make_mesher};
use crate::sensor::source::{DataSourceHandle, DataSourceStage, RawSensorEvent};
use crate::sensor::SensorPacket;
use crate::tracking::{TrackingOutput, TrackingStage, make_tracker};
use crate::viz::{DisplayInput, DisplayStage, VisualizationStage, VizInput, make_display};

use super::module::{ModuleState, PipelineModule, StageThread, StageWorker};
use super::queue::ThreadsafeQueue;
use super::status::{PipelineStatus, QueueStatus, StageStatus};

/// Soft capacity of the tracking input queue. A full queue blocks the
/// caller of `spin_once`, which is the pipeline's only admission
/// control against a too-fast sensor stream.
const TRACKING_INPUT_CAPACITY: usize = 5;

/// Errors that prevent a pipeline from being constructed.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to open trajectory log: {0}")]
    TrajectoryLog(#[from] csv::Error),

    #[error("failed to spawn {stage} worker thread: {source}")]
    ThreadSpawn {
        stage: &'static str,
        source: std::io::Error,
    },
}

/// Callback invoked first during shutdown, typically to tell the
/// external data feeder to stop emitting.
pub type ShutdownCallback = Box<dyn FnMut() + Send>;

/// The pipeline root: owns every queue, stage, and worker thread for
/// one run. Not restartable after shutdown; dropping an un-shut-down
/// pipeline forces a full shutdown first.
pub struct VioPipeline {
    parallel_run: bool,

    /// Set once shutdown begins; shared with the data-source callback
    /// so late packets are dropped instead of queued.
    shutting_down: Arc<AtomicBool>,
    /// Estimator health flag, cleared by the estimation failure
    /// callback and observed by the completion supervisor.
    estimator_ok: Arc<AtomicBool>,
    shutdown_callback: Option<ShutdownCallback>,

    data_source_input: Arc<ThreadsafeQueue<RawSensorEvent>>,
    tracking_input: Arc<ThreadsafeQueue<Arc<SensorPacket>>>,
    estimation_input: Arc<ThreadsafeQueue<EstimationInput>>,
    mapping_input: Option<Arc<ThreadsafeQueue<MapperInput>>>,
    lcd_input: Option<Arc<ThreadsafeQueue<LcdInput>>>,
    viz_input: Option<Arc<ThreadsafeQueue<VizInput>>>,
    display_input: Option<Arc<ThreadsafeQueue<DisplayInput>>>,

    data_source_state: Arc<ModuleState>,
    tracking_state: Arc<ModuleState>,
    estimation_state: Arc<ModuleState>,
    mapping_state: Option<Arc<ModuleState>>,
    lcd_state: Option<Arc<ModuleState>>,
    viz_state: Option<Arc<ModuleState>>,
    display_state: Option<Arc<ModuleState>>,

    // Modules stay here in sequential mode; in parallel mode they move
    // into their worker threads at launch (the display module always
    // stays: it runs on the caller's thread).
    data_source_module: Option<PipelineModule<DataSourceStage>>,
    tracking_module: Option<PipelineModule<TrackingStage>>,
    estimation_module: Option<PipelineModule<EstimationStage>>,
    mapping_module: Option<PipelineModule<MappingStage>>,
    lcd_module: Option<PipelineModule<LoopClosureStage>>,
    viz_module: Option<PipelineModule<VisualizationStage>>,
    display_module: Option<PipelineModule<DisplayStage>>,

    threads: Vec<StageThread>,
}

impl VioPipeline {
    pub fn new(config: &VioConfig) -> Result<Self, PipelineError> {
        config.validate()?;

        let shutting_down = Arc::new(AtomicBool::new(false));
        let estimator_ok = Arc::new(AtomicBool::new(true));

        let data_source_input = Arc::new(ThreadsafeQueue::new("data-source-input"));
        let tracking_input: Arc<ThreadsafeQueue<Arc<SensorPacket>>> =
            Arc::new(ThreadsafeQueue::new("tracking-input"));
        let estimation_input: Arc<ThreadsafeQueue<EstimationInput>> =
            Arc::new(ThreadsafeQueue::new("estimation-input"));
        let mapping_input = config
            .mapping_enabled()
            .then(|| Arc::new(ThreadsafeQueue::<MapperInput>::new("mapping-input")));
        let lcd_input = config
            .use_loop_closure
            .then(|| Arc::new(ThreadsafeQueue::<LcdInput>::new("loop-closure-input")));
        let viz_queues = config.visualize.then(|| {
            (
                Arc::new(ThreadsafeQueue::<VizInput>::new("visualization-input")),
                Arc::new(ThreadsafeQueue::<DisplayInput>::new("display-input")),
            )
        });
        let viz_input = viz_queues.as_ref().map(|(v, _)| Arc::clone(v));
        let display_input = viz_queues.as_ref().map(|(_, d)| Arc::clone(d));

        // Data source: synchronizes raw events into packets and feeds
        // the head of the pipeline. Packets arriving once shutdown has
        // begun are dropped with a warning.
        let mut data_source_module = PipelineModule::new(
            "data-source",
            Arc::clone(&data_source_input),
            DataSourceStage::new(),
        );
        {
            let tracking_queue = Arc::clone(&tracking_input);
            let shutting_down = Arc::clone(&shutting_down);
            data_source_module.register_output_callback(move |packet: &Arc<SensorPacket>| {
                if shutting_down.load(Ordering::Acquire) {
                    warn!(
                        timestamp_ns = packet.timestamp_ns,
                        "pipeline is shutting down, dropping incoming packet"
                    );
                    return;
                }
                tracking_queue.push_blocking_if_full(Arc::clone(packet), TRACKING_INPUT_CAPACITY);
            });
        }

        // Tracking: mandatory. Keyframe outputs feed estimation; the
        // full stream fans out to the optional consumers.
        let mut tracking_module = PipelineModule::new(
            "tracking",
            Arc::clone(&tracking_input),
            TrackingStage::new(make_tracker(&config.tracker)),
        );
        {
            let estimation_queue = Arc::clone(&estimation_input);
            tracking_module.register_output_callback(move |output: &Arc<TrackingOutput>| {
                if output.is_keyframe {
                    estimation_queue.push(EstimationInput::from_tracking(output));
                } else {
                    trace!(
                        timestamp_ns = output.timestamp_ns,
                        "not a keyframe, skipping estimation input"
                    );
                }
            });
        }
        if let Some(queue) = &mapping_input {
            let queue = Arc::clone(queue);
            tracking_module.register_output_callback(move |output: &Arc<TrackingOutput>| {
                if output.is_keyframe {
                    queue.push(MapperInput::Tracking(Arc::clone(output)));
                }
            });
        }
        if let Some(queue) = &lcd_input {
            let queue = Arc::clone(queue);
            tracking_module.register_output_callback(move |output: &Arc<TrackingOutput>| {
                if output.is_keyframe {
                    queue.push(LcdInput::Tracking(Arc::clone(output)));
                }
            });
        }
        if let Some(queue) = &viz_input {
            let queue = Arc::clone(queue);
            tracking_module.register_output_callback(move |output: &Arc<TrackingOutput>| {
                queue.push(VizInput::Tracking(Arc::clone(output)));
            });
        }

        // Estimation: mandatory. Failure flips the health flag; the
        // supervisor decides what to do about it.
        let mut estimation_stage = EstimationStage::new(make_estimator(&config.estimator));
        {
            let estimator_ok = Arc::clone(&estimator_ok);
            estimation_stage.register_on_failure_callback(move || {
                estimator_ok.store(false, Ordering::Release);
            });
        }
        let mut estimation_module = PipelineModule::new(
            "estimation",
            Arc::clone(&estimation_input),
            estimation_stage,
        );
        if let Some(queue) = &mapping_input {
            let queue = Arc::clone(queue);
            estimation_module.register_output_callback(move |output: &Arc<EstimationOutput>| {
                queue.push(MapperInput::Estimation(Arc::clone(output)));
            });
        }
        if let Some(queue) = &lcd_input {
            let queue = Arc::clone(queue);
            estimation_module.register_output_callback(move |output: &Arc<EstimationOutput>| {
                queue.push(LcdInput::Estimation(Arc::clone(output)));
            });
        }
        if let Some(queue) = &viz_input {
            let queue = Arc::clone(queue);
            estimation_module.register_output_callback(move |output: &Arc<EstimationOutput>| {
                queue.push(VizInput::Estimation(Arc::clone(output)));
            });
        }
        if config.log_output {
            let logger = TrajectoryLogger::create(&config.output_path)?;
            estimation_module.register_output_callback(move |output: &Arc<EstimationOutput>| {
                if let Err(err) = logger.log_pose(output) {
                    warn!(%err, "failed to log trajectory row");
                }
            });
        }

        // Mapping: only when the visualization type asks for a mesh.
        let mapping_module = mapping_input.as_ref().map(|queue| {
            let mut module = PipelineModule::new(
                "mapping",
                Arc::clone(queue),
                MappingStage::new(make_mesher(&config.mesher)),
            );
            if let Some(viz_queue) = &viz_input {
                let viz_queue = Arc::clone(viz_queue);
                module.register_output_callback(move |output: &Arc<MapperOutput>| {
                    viz_queue.push(VizInput::Mapping(Arc::clone(output)));
                });
            }
            module
        });

        // Loop closure: terminal consumer, no downstream wiring.
        let lcd_module = lcd_input.as_ref().map(|queue| {
            PipelineModule::new(
                "loop-closure",
                Arc::clone(queue),
                LoopClosureStage::new(make_place_recognizer(&config.loop_closure)),
            )
        });

        // Visualization feeds the display queue; the display module is
        // driven from the caller's thread only.
        let viz_module = viz_queues.as_ref().map(|(viz_queue, display_queue)| {
            let mut module = PipelineModule::new(
                "visualization",
                Arc::clone(viz_queue),
                VisualizationStage::new(config.viz_type),
            );
            let display_queue = Arc::clone(display_queue);
            module.register_output_callback(move |frame: &DisplayInput| {
                display_queue.push(frame.clone());
            });
            module
        });
        let display_module = display_input.as_ref().map(|queue| {
            PipelineModule::new(
                "display",
                Arc::clone(queue),
                DisplayStage::new(make_display(config.display_type)),
            )
        });

        let mut pipeline = Self {
            parallel_run: config.parallel_run,
            shutting_down,
            estimator_ok,
            shutdown_callback: None,
            data_source_state: data_source_module.state(),
            tracking_state: tracking_module.state(),
            estimation_state: estimation_module.state(),
            mapping_state: mapping_module.as_ref().map(PipelineModule::state),
            lcd_state: lcd_module.as_ref().map(PipelineModule::state),
            viz_state: viz_module.as_ref().map(PipelineModule::state),
            display_state: display_module.as_ref().map(PipelineModule::state),
            data_source_input,
            tracking_input,
            estimation_input,
            mapping_input,
            lcd_input,
            viz_input,
            display_input,
            data_source_module: Some(data_source_module),
            tracking_module: Some(tracking_module),
            estimation_module: Some(estimation_module),
            mapping_module,
            lcd_module,
            viz_module,
            display_module,
            threads: Vec::new(),
        };
        pipeline.launch_threads()?;
        Ok(pipeline)
    }

    /// Handle for external sensor drivers to feed raw events into the
    /// data source.
    pub fn data_source_handle(&self) -> DataSourceHandle {
        DataSourceHandle::new(Arc::clone(&self.data_source_input))
    }

    /// Register a callback invoked first during shutdown, before any
    /// stage stops (construction-time wiring; typically signals the
    /// external feeder to stop emitting).
    pub fn register_shutdown_callback(&mut self, cb: impl FnMut() + Send + 'static) {
        self.shutdown_callback = Some(Box::new(cb));
    }

    /// Push one synchronized packet into the head of the pipeline.
    ///
    /// Blocks when the tracking input queue is full (backpressure
    /// against the sensor stream). In sequential mode this also drives
    /// one synchronous pass through every enabled stage.
    pub fn spin_once(&mut self, packet: SensorPacket) {
        if self.shutting_down.load(Ordering::Acquire) {
            warn!("not spinning pipeline as it has been shut down");
            return;
        }
        trace!(timestamp_ns = packet.timestamp_ns, "pushing packet into pipeline");
        self.tracking_input
            .push_blocking_if_full(Arc::new(packet), TRACKING_INPUT_CAPACITY);
        if !self.parallel_run {
            self.spin_sequential();
        }
    }

    /// One synchronous pass over every enabled stage in dependency
    /// order. The data source is not driven here; sequential feeding
    /// goes through `spin_once`.
    fn spin_sequential(&mut self) {
        if let Some(module) = self.tracking_module.as_mut() {
            module.spin_once();
        }
        if let Some(module) = self.estimation_module.as_mut() {
            module.spin_once();
        }
        if let Some(module) = self.mapping_module.as_mut() {
            module.spin_once();
        }
        if let Some(module) = self.lcd_module.as_mut() {
            module.spin_once();
        }
        if let Some(module) = self.viz_module.as_mut() {
            module.spin_once();
        }
        if let Some(module) = self.display_module.as_mut() {
            module.spin_once();
        }
    }

    /// Drain and render queued display payloads on the caller's
    /// thread.
    ///
    /// In parallel mode this blocks until the display queue reaches
    /// its terminal state (shutdown and drained), mirroring the run
    /// loop a windowed backend needs. In sequential mode it performs
    /// one non-blocking pass. Returns false only when no display stage
    /// is configured.
    pub fn spin_display(&mut self) -> bool {
        match self.display_module.as_mut() {
            Some(module) => {
                if self.parallel_run {
                    module.spin();
                } else {
                    module.spin_once();
                }
                true
            }
            None => false,
        }
    }

    /// True once tracking and estimation have both produced their
    /// first output.
    pub fn is_initialized(&self) -> bool {
        self.tracking_state.is_initialized() && self.estimation_state.is_initialized()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Take one status snapshot of every stage and queue.
    pub fn status(&self) -> PipelineStatus {
        let mut queues = vec![
            QueueStatus::of("data-source-input", &self.data_source_input),
            QueueStatus::of("tracking-input", &self.tracking_input),
            QueueStatus::of("estimation-input", &self.estimation_input),
        ];
        if let Some(queue) = &self.mapping_input {
            queues.push(QueueStatus::of("mapping-input", queue));
        }
        if let Some(queue) = &self.lcd_input {
            queues.push(QueueStatus::of("loop-closure-input", queue));
        }
        if let Some(queue) = &self.viz_input {
            queues.push(QueueStatus::of("visualization-input", queue));
        }
        if let Some(queue) = &self.display_input {
            queues.push(QueueStatus::of("display-input", queue));
        }
        PipelineStatus {
            initialized: self.is_initialized(),
            estimator_ok: self.estimator_ok.load(Ordering::Acquire),
            data_source: StageStatus::of(&self.data_source_state),
            tracking: StageStatus::of(&self.tracking_state),
            estimation: StageStatus::of(&self.estimation_state),
            mapping: self.mapping_state.as_deref().map(StageStatus::of),
            loop_closure: self.lcd_state.as_deref().map(StageStatus::of),
            visualization: self.viz_state.as_deref().map(StageStatus::of),
            display: self.display_state.as_deref().map(StageStatus::of),
            queues,
        }
    }

    /// Supervisory loop: poll until the pipeline has drained all work,
    /// then shut it down.
    ///
    /// This is an approximate, polling-based heuristic, not a
    /// synchronization barrier: a stage can hand its output to a
    /// downstream queue between two condition reads, so the predicate
    /// can in principle observe a transiently quiet pipeline. The poll
    /// interval bounds how stale one observation can be.
    ///
    /// Returns true after triggering (or observing) shutdown. In
    /// sequential mode it returns false after a single evaluation:
    /// the caller owns the drive loop there.
    pub fn shutdown_when_finished(&mut self, poll_interval: Duration) -> bool {
        info!("shutting down pipeline once processing has finished");
        loop {
            // The display stage lives on this thread; keep it drained
            // while supervising so queued frames cannot stall the
            // completion predicate.
            if let Some(module) = self.display_module.as_mut() {
                module.spin_once();
            }
            let status = self.status();
            let keep_running = !self.is_shutdown()
                && status.estimator_ok
                && (!status.initialized || !status.is_idle());
            if !keep_running {
                break;
            }
            debug!("{status}");
            if !self.parallel_run {
                // Sequential callers drive the pipeline themselves.
                return false;
            }
            thread::sleep(poll_interval);
        }
        info!("pipeline finished: input drained and all stages idle");
        debug!("{}", self.status());
        if !self.is_shutdown() {
            self.shutdown();
        }
        true
    }

    /// Orderly full shutdown. Idempotent: repeated calls log a warning
    /// and return.
    pub fn shutdown(&mut self) {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            warn!("shutdown requested, but the pipeline was already shut down");
            return;
        }
        info!("shutting down pipeline");

        // First: tell the external feeder to stop emitting.
        if let Some(cb) = self.shutdown_callback.as_mut() {
            info!("invoking registered shutdown callback");
            cb();
        }

        // Second: the data source, so nothing new enters the pipeline.
        self.data_source_input.shutdown();
        self.data_source_state.request_shutdown();

        // Third: every stage and queue, innermost consumers first.
        self.stop_stages_and_queues();

        // Last: collect the worker threads.
        if self.parallel_run {
            self.join_threads();
        }
        info!("pipeline shutdown complete");
    }

    fn stop_stages_and_queues(&mut self) {
        debug!("stopping stages and queues");
        self.estimation_input.shutdown();
        self.estimation_state.request_shutdown();
        self.tracking_input.shutdown();
        self.tracking_state.request_shutdown();
        if let (Some(queue), Some(state)) = (&self.mapping_input, &self.mapping_state) {
            queue.shutdown();
            state.request_shutdown();
        }
        if let (Some(queue), Some(state)) = (&self.lcd_input, &self.lcd_state) {
            queue.shutdown();
            state.request_shutdown();
        }
        if let (Some(queue), Some(state)) = (&self.viz_input, &self.viz_state) {
            queue.shutdown();
            state.request_shutdown();
        }
        // The display queue closes so `spin_display` terminates, but
        // the display stage itself keeps accepting the drain: it runs
        // on the caller's thread and still has to render leftovers.
        if let Some(queue) = &self.display_input {
            queue.shutdown();
        }
        debug!("stop signal delivered to all stages and queues");
    }

    fn join_threads(&mut self) {
        debug!("joining stage threads");
        for thread in &mut self.threads {
            thread.join();
        }
        self.threads.clear();
        debug!("all stage threads joined");
    }

    /// Re-open the head-of-pipeline queues after a pause. Distinct
    /// from terminal shutdown: a shut-down pipeline stays down.
    pub fn resume(&mut self) {
        info!("restarting tracking worker queue");
        self.tracking_input.resume();
        info!("restarting estimation worker queue");
        self.estimation_input.resume();
    }

    fn launch_threads(&mut self) -> Result<(), PipelineError> {
        if !self.parallel_run {
            info!("pipeline modules running in sequential mode");
            return Ok(());
        }
        spawn_stage(&mut self.threads, "data-source", self.data_source_module.take())?;
        spawn_stage(&mut self.threads, "tracking", self.tracking_module.take())?;
        spawn_stage(&mut self.threads, "estimation", self.estimation_module.take())?;
        spawn_stage(&mut self.threads, "mapping", self.mapping_module.take())?;
        spawn_stage(&mut self.threads, "loop-closure", self.lcd_module.take())?;
        spawn_stage(&mut self.threads, "visualization", self.viz_module.take())?;
        info!(threads = self.threads.len(), "pipeline modules launched");
        Ok(())
    }
}

impl Drop for VioPipeline {
    fn drop(&mut self) {
        if !self.is_shutdown() {
            debug!("pipeline dropped without explicit shutdown, shutting down now");
            self.shutdown();
        }
    }
}

/// Move a module onto its own worker thread, if it exists.
fn spawn_stage<W>(
    threads: &mut Vec<StageThread>,
    name: &'static str,
    module: Option<PipelineModule<W>>,
) -> Result<(), PipelineError>
where
    W: StageWorker + 'static,
    W::Input: 'static,
    W::Output: 'static,
{
    if let Some(mut module) = module {
        let thread = StageThread::spawn(name, move || module.spin())
            .map_err(|source| PipelineError::ThreadSpawn {
                stage: name,
                source,
            })?;
        threads.push(thread);
    }
    Ok(())
}
