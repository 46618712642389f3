//! Detached processing tasks.
//!
//! A [`ProcessingTask`] bundles one input raster with one operation list
//! and produces a working image without going through a state manager:
//! the shape used for one-off work like export previews and tile
//! processing. Tasks execute once, report coarse progress to concurrent
//! pollers, and hand their result out by value when done.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use drt::{OperationDescriptor, PixelBuffer};

use crate::error::UpdateError;
use crate::pipeline::build_pipeline;
use crate::registry::OperationRegistry;

/// Progress is stored in thousandths so pollers get an atomic read.
const PROGRESS_DONE: u32 = 1000;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

enum TaskState {
    Pending(PixelBuffer),
    Done(hal::WorkingImage),
    Failed,
    Taken,
}

/// One unit of processing work: input raster in, working image out.
///
/// `execute` runs at most once; `progress` and `id` are safe to call
/// from other threads while it runs.
pub struct ProcessingTask {
    id: u64,
    operations: Vec<OperationDescriptor>,
    registry: Arc<OperationRegistry>,
    target: hal::Target,
    progress: AtomicU32,
    state: Mutex<TaskState>,
}

impl ProcessingTask {
    /// Prepares a task over `input` with the given operation list.
    #[must_use]
    pub fn new(
        input: PixelBuffer,
        operations: Vec<OperationDescriptor>,
        registry: Arc<OperationRegistry>,
        target: hal::Target,
    ) -> Self {
        Self {
            id: NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed),
            operations,
            registry,
            target,
            progress: AtomicU32::new(0),
            state: Mutex::new(TaskState::Pending(input)),
        }
    }

    /// Unique id of this task instance within the process.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Estimated progress in `[0, 1]`; 1.0 once execution finished,
    /// whether it succeeded or failed.
    #[must_use]
    pub fn progress(&self) -> f32 {
        self.progress.load(Ordering::Acquire) as f32 / PROGRESS_DONE as f32
    }

    /// Runs the task. A second call reports the first outcome's state
    /// without re-processing.
    pub fn execute(&self) -> Result<(), UpdateError> {
        profiling::scope!("ProcessingTask::execute");

        let input = {
            let mut state = self.state.lock();
            match &*state {
                TaskState::Pending(_) => {}
                TaskState::Done(_) | TaskState::Taken => return Ok(()),
                TaskState::Failed => {
                    return Err(UpdateError::Image(hal::ImageError::InvalidWorkingImage))
                }
            }
            match std::mem::replace(&mut *state, TaskState::Failed) {
                TaskState::Pending(input) => input,
                _ => unreachable!("state checked above"),
            }
        };

        let outcome = self.run(input);
        if outcome.is_err() {
            // The state already says Failed; publish completion for
            // pollers either way.
            self.progress.store(PROGRESS_DONE, Ordering::Release);
            log::warn!("task {} failed", self.id);
        }
        outcome
    }

    fn run(&self, input: PixelBuffer) -> Result<(), UpdateError> {
        let location = self.target.memory_location();
        let mut image =
            hal::create_working_image(location, input).map_err(UpdateError::Image)?;
        self.progress.store(PROGRESS_DONE / 4, Ordering::Release);

        let executor = build_pipeline(&self.operations, self.registry.clone(), &self.target)?;
        self.progress.store(PROGRESS_DONE / 2, Ordering::Release);

        if let Some(executor) = executor {
            executor.execute(&mut image)?;
        }

        *self.state.lock() = TaskState::Done(image);
        self.progress.store(PROGRESS_DONE, Ordering::Release);
        log::debug!("task {} done ({} operations)", self.id, self.operations.len());
        Ok(())
    }

    /// Takes the produced working image, if execution succeeded and the
    /// result was not taken before.
    #[must_use]
    pub fn take_result(&self) -> Option<hal::WorkingImage> {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, TaskState::Taken) {
            TaskState::Done(image) => Some(image),
            other => {
                // Not done: put whatever was there back.
                *state = other;
                None
            }
        }
    }
}
