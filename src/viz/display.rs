//! Display stage: renders queued draw lists on the caller's thread.
//!
//! Rendering backends own window/UI state that must live on the thread
//! that drives them, so this stage is never given a worker thread; the
//! pipeline drains it through `spin_display`. Real backends plug in
//! through [`DisplayBackend`]; the built-in one is headless and renders
//! to structured logs and counters.

use tracing::{debug, info};

use crate::config::DisplayType;
use crate::system::module::StageWorker;

use super::{DisplayInput, DrawCommand};

/// The pluggable rendering backend.
pub trait DisplayBackend: Send {
    fn render(&mut self, input: &DisplayInput);
}

/// Build the backend selected by the configuration.
pub fn make_display(display_type: DisplayType) -> Box<dyn DisplayBackend> {
    match display_type {
        DisplayType::Headless => Box::new(HeadlessDisplay::new()),
    }
}

/// Renders frames as log lines; counts what it saw.
pub struct HeadlessDisplay {
    frames_rendered: usize,
}

impl HeadlessDisplay {
    pub fn new() -> Self {
        Self { frames_rendered: 0 }
    }

    pub fn frames_rendered(&self) -> usize {
        self.frames_rendered
    }
}

impl Default for HeadlessDisplay {
    fn default() -> Self {
        Self::new()
    }
}

impl DisplayBackend for HeadlessDisplay {
    fn render(&mut self, input: &DisplayInput) {
        self.frames_rendered += 1;
        let status = input.commands.iter().find_map(|c| match c {
            DrawCommand::StatusText(text) => Some(text.as_str()),
            _ => None,
        });
        debug!(
            timestamp_ns = input.timestamp_ns,
            commands = input.commands.len(),
            status = status.unwrap_or(""),
            "rendered frame"
        );
        if self.frames_rendered % 100 == 0 {
            info!(frames = self.frames_rendered, "display heartbeat");
        }
    }
}

/// Stage worker wrapping a backend. A pure sink: it never produces an
/// output and has no downstream callbacks.
pub struct DisplayStage {
    backend: Box<dyn DisplayBackend>,
    frames_rendered: usize,
}

impl DisplayStage {
    pub fn new(backend: Box<dyn DisplayBackend>) -> Self {
        Self {
            backend,
            frames_rendered: 0,
        }
    }
}

impl StageWorker for DisplayStage {
    type Input = DisplayInput;
    type Output = ();

    fn process(&mut self, input: DisplayInput) -> Option<()> {
        self.backend.render(&input);
        self.frames_rendered += 1;
        None
    }

    fn is_initialized(&self) -> bool {
        self.frames_rendered > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingBackend(Arc<AtomicUsize>);

    impl DisplayBackend for CountingBackend {
        fn render(&mut self, _: &DisplayInput) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn frame(timestamp_ns: u64) -> DisplayInput {
        DisplayInput {
            timestamp_ns,
            commands: Vec::new(),
        }
    }

    #[test]
    fn test_stage_renders_every_frame_and_emits_nothing() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut stage = DisplayStage::new(Box::new(CountingBackend(Arc::clone(&count))));
        assert!(!stage.is_initialized());
        assert!(stage.process(frame(0)).is_none());
        assert!(stage.process(frame(1)).is_none());
        assert_eq!(count.load(Ordering::Relaxed), 2);
        assert!(stage.is_initialized());
    }

    #[test]
    fn test_headless_backend_counts_frames() {
        let mut display = HeadlessDisplay::new();
        display.render(&frame(0));
        display.render(&frame(1));
        assert_eq!(display.frames_rendered(), 2);
    }
}
