//! Generic pipeline stage: one input queue, one unit of work, a static
//! list of output callbacks, and observable liveness state.
//!
//! A stage either runs `spin()` on a dedicated worker thread (parallel
//! mode) or is driven with `spin_once()` from the caller's thread
//! (sequential mode). Either way an iteration is: pop an input, run
//! the worker, fan the output out to every registered callback in
//! registration order.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use tracing::{debug, error};

use super::queue::ThreadsafeQueue;

/// The unit of work a stage runs on every input.
///
/// Workers own their algorithm state and are moved into the stage's
/// worker thread in parallel mode, so they must be `Send`.
pub trait StageWorker: Send {
    type Input: Send;
    type Output;

    /// Process one input, producing zero or one output.
    fn process(&mut self, input: Self::Input) -> Option<Self::Output>;

    /// Stage-specific readiness, latched by the module after every
    /// unit of work (e.g. "first valid pose estimated").
    fn is_initialized(&self) -> bool;
}

/// Callback invoked synchronously with every produced output.
pub type OutputCallback<O> = Box<dyn Fn(&O) + Send>;

/// Liveness state shared between a module and its supervisor.
///
/// The module flips `working` around each unit of work; the pipeline
/// keeps a handle for completion detection after the module itself has
/// moved into its worker thread.
pub struct ModuleState {
    name: &'static str,
    working: AtomicBool,
    shutdown_requested: AtomicBool,
    initialized: AtomicBool,
}

impl ModuleState {
    fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            working: AtomicBool::new(false),
            shutdown_requested: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// True strictly while the unit of work executes.
    pub fn is_working(&self) -> bool {
        self.working.load(Ordering::Acquire)
    }

    /// True once the worker has reported readiness at least once.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::Acquire)
    }

    /// Request the run loop to terminate after the current iteration.
    /// Does not interrupt in-flight work.
    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::Release);
    }

    fn set_working(&self, value: bool) {
        self.working.store(value, Ordering::Release);
    }

    fn latch_initialized(&self) {
        self.initialized.store(true, Ordering::Release);
    }
}

/// A processing stage bound to its input queue and worker.
pub struct PipelineModule<W: StageWorker> {
    state: Arc<ModuleState>,
    input_queue: Arc<ThreadsafeQueue<W::Input>>,
    worker: W,
    callbacks: Vec<OutputCallback<W::Output>>,
}

impl<W: StageWorker> PipelineModule<W> {
    pub fn new(name: &'static str, input_queue: Arc<ThreadsafeQueue<W::Input>>, worker: W) -> Self {
        Self {
            state: ModuleState::new(name),
            input_queue,
            worker,
            callbacks: Vec::new(),
        }
    }

    /// Handle to the shared liveness state, kept by the pipeline for
    /// supervision after the module moves into its thread.
    pub fn state(&self) -> Arc<ModuleState> {
        Arc::clone(&self.state)
    }

    /// Append an output callback. The fan-out list is fixed once the
    /// pipeline launches; registration happens only during wiring.
    pub fn register_output_callback(&mut self, cb: impl Fn(&W::Output) + Send + 'static) {
        self.callbacks.push(Box::new(cb));
    }

    /// Blocking run loop for parallel mode. Returns when shutdown is
    /// requested or the input queue is shut down and drained.
    pub fn spin(&mut self) {
        debug!(module = self.state.name, "spinning");
        while !self.state.is_shutdown_requested() {
            match self.input_queue.pop_blocking() {
                Some(input) => self.process_one(input),
                // Terminal: queue shut down and empty.
                None => break,
            }
        }
        debug!(module = self.state.name, "spin finished");
    }

    /// Sequential-mode pass: drain whatever is queued right now
    /// without blocking. Returns whether any input was processed.
    ///
    /// Draining (instead of popping exactly one item) keeps queues
    /// with several producers bounded when the whole pipeline advances
    /// in lockstep.
    pub fn spin_once(&mut self) -> bool {
        let mut worked = false;
        while !self.state.is_shutdown_requested() {
            match self.input_queue.try_pop() {
                Some(input) => {
                    self.process_one(input);
                    worked = true;
                }
                None => break,
            }
        }
        worked
    }

    fn process_one(&mut self, input: W::Input) {
        self.state.set_working(true);
        let output = self.worker.process(input);
        self.state.set_working(false);
        if self.worker.is_initialized() {
            self.state.latch_initialized();
        }
        if let Some(output) = output {
            self.emit(&output);
        }
    }

    /// Invoke every callback in registration order. A panicking
    /// callback is contained so its siblings still receive the output
    /// and the stage loop survives.
    fn emit(&self, output: &W::Output) {
        for (idx, cb) in self.callbacks.iter().enumerate() {
            let result = panic::catch_unwind(AssertUnwindSafe(|| cb(output)));
            if result.is_err() {
                error!(
                    module = self.state.name,
                    callback = idx,
                    "output callback panicked; continuing with remaining callbacks"
                );
            }
        }
    }
}

/// Worker-thread handle that always attempts a join on drop, so a
/// dropped pipeline cannot leak stage threads.
pub struct StageThread {
    name: &'static str,
    handle: Option<JoinHandle<()>>,
}

impl StageThread {
    pub fn spawn<F>(name: &'static str, f: F) -> std::io::Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = thread::Builder::new().name(name.to_string()).spawn(f)?;
        Ok(Self {
            name,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Join the thread if it has not been joined yet. A panicked stage
    /// indicates abnormal termination and is logged at error level.
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            debug!(thread = self.name, "joining stage thread");
            if handle.join().is_err() {
                error!(thread = self.name, "stage thread panicked before join");
            }
        }
    }
}

impl Drop for StageThread {
    fn drop(&mut self) {
        self.join();
    }
}
