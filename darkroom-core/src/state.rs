//! The state manager: owns the edit list, runs the pipeline on a worker
//! thread, and publishes working images to lock-free readers.
//!
//! ## Threading model
//!
//! - List mutations run on the caller thread under a mutex with short
//!   critical sections (mutate or snapshot, nothing else).
//! - Pipeline passes run on one dedicated worker thread fed by a
//!   channel. Requests arriving while a pass is queued or running are
//!   coalesced: the worker drains the queue before snapshotting, so
//!   rapid-fire edits collapse into one pass that observes the final
//!   list, and every coalesced requester resolves with that pass's
//!   outcome.
//! - The published image sits in an atomic `Arc` slot: readers never
//!   take a lock, writers publish with a release store, and a failed
//!   pass leaves the previous publication intact.
//!
//! There is no cancellation: a started pass runs to completion and is
//! superseded, not interrupted, by later edits.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use smallvec::SmallVec;

use drt::{MemoryLocation, OperationDescriptor};

use crate::error::UpdateError;
use crate::pipeline::build_pipeline;
use crate::registry::OperationRegistry;
use crate::source::SourceProvider;

/// Single-shot completion callback, invoked on the worker thread.
pub type UpdateCallback = Box<dyn FnOnce(bool) + Send>;

type Outcome = Result<(), UpdateError>;

enum WorkerMessage {
    Update {
        waiter: flume::Sender<Outcome>,
        callback: Option<UpdateCallback>,
    },
    Shutdown,
}

/// Resolves when the pass serving one update request finishes.
pub struct UpdateHandle {
    receiver: flume::Receiver<Outcome>,
}

impl UpdateHandle {
    fn pending(receiver: flume::Receiver<Outcome>) -> Self {
        Self { receiver }
    }

    /// A handle that is already resolved.
    fn resolved(outcome: Outcome) -> Self {
        let (sender, receiver) = flume::bounded(1);
        let _ = sender.send(outcome);
        Self { receiver }
    }

    /// Blocks until the pass finishes.
    pub fn wait(self) -> Outcome {
        match self.receiver.recv() {
            Ok(outcome) => outcome,
            Err(_) => Err(UpdateError::Abandoned),
        }
    }

    /// Awaits the pass without blocking the executor.
    pub async fn wait_async(self) -> Outcome {
        match self.receiver.recv_async().await {
            Ok(outcome) => outcome,
            Err(_) => Err(UpdateError::Abandoned),
        }
    }
}

/// One coherent view of the manager's externally visible state.
///
/// The three parts are read together but not under one lock; the
/// working image may be one pass ahead of or behind the list when an
/// update is in flight, which is the same guarantee individual reads
/// give.
pub struct StateSnapshot {
    /// The configured source path.
    pub source_path: Option<PathBuf>,
    /// Copy of the ordered operation list.
    pub operations: Vec<OperationDescriptor>,
    /// The latest published working image, if any pass succeeded yet.
    pub working_image: Option<Arc<hal::WorkingImage>>,
}

struct Shared {
    provider: Arc<dyn SourceProvider>,
    registry: Arc<OperationRegistry>,
    target: hal::Target,
    location: MemoryLocation,

    source_path: Mutex<Option<PathBuf>>,
    operations: Mutex<Vec<OperationDescriptor>>,
    current: ArcSwapOption<hal::WorkingImage>,
    /// Requests accepted but not yet served by a finished pass. A
    /// requester increments strictly before its message enters the
    /// channel and the worker subtracts the requests a pass served only
    /// after that pass completes, so the count is nonzero whenever a
    /// message is buffered or a pass is running.
    updates_in_flight: AtomicUsize,
}

/// Owns the editable operation list and the published working image.
pub struct StateManager {
    shared: Arc<Shared>,
    sender: flume::Sender<WorkerMessage>,
    worker: Option<JoinHandle<()>>,
}

impl StateManager {
    /// Builds a manager executing on the backend `target`.
    ///
    /// The matching working-image creators must already be registered
    /// (normally by [`crate::init`]).
    pub fn new(
        provider: Arc<dyn SourceProvider>,
        registry: Arc<OperationRegistry>,
        target: hal::Target,
    ) -> Self {
        let location = target.memory_location();
        let shared = Arc::new(Shared {
            provider,
            registry,
            target,
            location,
            source_path: Mutex::new(None),
            operations: Mutex::new(Vec::new()),
            current: ArcSwapOption::const_empty(),
            updates_in_flight: AtomicUsize::new(0),
        });

        let (sender, receiver) = flume::unbounded();
        let worker_shared = shared.clone();
        let worker = std::thread::Builder::new()
            .name("darkroom-update".to_string())
            .spawn(move || worker_loop(&worker_shared, &receiver))
            .ok();
        if worker.is_none() {
            log::error!("failed to spawn the update worker; updates will resolve as abandoned");
        }

        Self {
            shared,
            sender,
            worker,
        }
    }

    /// Sets the source path subsequent updates load from.
    pub fn set_source(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        log::debug!("source set to {}", path.display());
        *self.shared.source_path.lock() = Some(path);
    }

    /// The configured source path.
    #[must_use]
    pub fn source_path(&self) -> Option<PathBuf> {
        self.shared.source_path.lock().clone()
    }

    /// Appends `descriptor` and requests an update.
    pub fn add(&self, descriptor: OperationDescriptor) -> UpdateHandle {
        self.shared.operations.lock().push(descriptor);
        self.request_update(None)
    }

    /// Replaces the descriptor at `index` and requests an update.
    pub fn modify(
        &self,
        index: usize,
        descriptor: OperationDescriptor,
    ) -> Result<UpdateHandle, UpdateError> {
        {
            let mut operations = self.shared.operations.lock();
            let len = operations.len();
            let slot = operations
                .get_mut(index)
                .ok_or(UpdateError::IndexOutOfBounds { index, len })?;
            *slot = descriptor;
        }
        Ok(self.request_update(None))
    }

    /// Removes the descriptor at `index` and requests an update.
    pub fn remove(&self, index: usize) -> Result<UpdateHandle, UpdateError> {
        {
            let mut operations = self.shared.operations.lock();
            let len = operations.len();
            if index >= len {
                return Err(UpdateError::IndexOutOfBounds { index, len });
            }
            operations.remove(index);
        }
        Ok(self.request_update(None))
    }

    /// Empties the list, reverting the working image to the source.
    pub fn reset_to_original(&self) -> UpdateHandle {
        self.shared.operations.lock().clear();
        self.request_update(None)
    }

    /// Schedules an asynchronous pass over the current list.
    ///
    /// The returned handle resolves with the outcome of the pass that
    /// observes this request; `callback`, if given, fires once on the
    /// worker thread with the success flag.
    pub fn request_update(&self, callback: Option<UpdateCallback>) -> UpdateHandle {
        if self.shared.source_path.lock().is_none() {
            if let Some(callback) = callback {
                callback(false);
            }
            return UpdateHandle::resolved(Err(UpdateError::NoSource));
        }

        let (waiter, receiver) = flume::bounded(1);
        self.shared.updates_in_flight.fetch_add(1, Ordering::AcqRel);
        if self
            .sender
            .send(WorkerMessage::Update { waiter, callback })
            .is_err()
        {
            self.shared.updates_in_flight.fetch_sub(1, Ordering::AcqRel);
            return UpdateHandle::resolved(Err(UpdateError::Abandoned));
        }
        UpdateHandle::pending(receiver)
    }

    /// Lock-free read of the latest published working image.
    #[must_use]
    pub fn working_image(&self) -> Option<Arc<hal::WorkingImage>> {
        self.shared.current.load_full()
    }

    /// Whether a pass is queued or running.
    #[must_use]
    pub fn is_update_pending(&self) -> bool {
        self.shared.updates_in_flight.load(Ordering::Acquire) > 0
    }

    /// Snapshot copy of the operation list.
    #[must_use]
    pub fn active_operations(&self) -> Vec<OperationDescriptor> {
        self.shared.operations.lock().clone()
    }

    /// The exposed state as one value: source path, operation list,
    /// published image.
    #[must_use]
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            source_path: self.source_path(),
            operations: self.active_operations(),
            working_image: self.working_image(),
        }
    }

    /// Exports the published working image and hands it to the source
    /// provider for writeback. Blocks the caller for the duration.
    pub fn commit_working_image_to_source(&self) -> Result<(), UpdateError> {
        profiling::scope!("StateManager::commit");

        let image = self
            .working_image()
            .ok_or(UpdateError::Image(hal::ImageError::InvalidWorkingImage))?;
        let buffer = image.export_cpu_copy().map_err(UpdateError::Image)?;
        self.shared.provider.store(&buffer)?;
        log::info!("working image committed to source");
        Ok(())
    }
}

impl Drop for StateManager {
    fn drop(&mut self) {
        let _ = self.sender.send(WorkerMessage::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn worker_loop(shared: &Arc<Shared>, receiver: &flume::Receiver<WorkerMessage>) {
    while let Ok(message) = receiver.recv() {
        let mut waiters: SmallVec<[flume::Sender<Outcome>; 1]> = SmallVec::new();
        let mut callbacks: SmallVec<[UpdateCallback; 1]> = SmallVec::new();
        let mut shutdown = false;

        match message {
            WorkerMessage::Update { waiter, callback } => {
                waiters.push(waiter);
                callbacks.extend(callback);
            }
            WorkerMessage::Shutdown => break,
        }
        // Coalesce every queued request into this pass; the snapshot
        // below will observe the list all of them produced.
        while let Ok(message) = receiver.try_recv() {
            match message {
                WorkerMessage::Update { waiter, callback } => {
                    waiters.push(waiter);
                    callbacks.extend(callback);
                }
                WorkerMessage::Shutdown => {
                    shutdown = true;
                    break;
                }
            }
        }

        let outcome = run_pass(shared);
        if let Err(error) = &outcome {
            log::error!("update pass failed: {error}");
        }

        // Retire exactly the requests this pass served. Requests that
        // arrived during the pass incremented the count before entering
        // the channel, so it stays nonzero until their pass finishes.
        shared
            .updates_in_flight
            .fetch_sub(waiters.len(), Ordering::AcqRel);

        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
        for callback in callbacks {
            callback(outcome.is_ok());
        }

        if shutdown {
            break;
        }
    }
    log::debug!("update worker exiting");
}

fn run_pass(shared: &Arc<Shared>) -> Result<(), UpdateError> {
    profiling::scope!("StateManager::run_pass");

    // Snapshot list and path under the lock; everything after runs
    // without holding it.
    let (operations, path) = {
        let operations = shared.operations.lock().clone();
        let path = shared.source_path.lock().clone();
        (operations, path.ok_or(UpdateError::NoSource)?)
    };

    let raster = shared.provider.load(&path)?;
    let mut image = hal::create_working_image(shared.location, raster)
        .map_err(UpdateError::Image)?;

    if let Some(executor) =
        build_pipeline(&operations, shared.registry.clone(), &shared.target)?
    {
        executor.execute(&mut image)?;
    }

    // Publish; a reader holding the previous Arc keeps it alive.
    shared.current.store(Some(Arc::new(image)));
    log::debug!(
        "published working image after {} operations",
        operations.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use drt::{ChannelLayout, OperationKind, PixelBuffer};
    use parking_lot::Mutex as PlMutex;

    use crate::registry::{builtin_registry, register_working_images};
    use crate::source::SourceError;

    /// In-memory provider serving one fixed raster.
    struct MemorySource {
        raster: PixelBuffer,
        stored: PlMutex<Option<PixelBuffer>>,
    }

    impl MemorySource {
        fn new(raster: PixelBuffer) -> Arc<Self> {
            Arc::new(Self {
                raster,
                stored: PlMutex::new(None),
            })
        }
    }

    impl SourceProvider for MemorySource {
        fn load(&self, _path: &Path) -> Result<PixelBuffer, SourceError> {
            Ok(self.raster.clone())
        }

        fn store(&self, raster: &PixelBuffer) -> Result<(), SourceError> {
            *self.stored.lock() = Some(raster.clone());
            Ok(())
        }

        fn metadata(&self, key: &str) -> Option<String> {
            (key == "format").then(|| "memory".to_string())
        }
    }

    /// Provider that always fails to load.
    struct BrokenSource;

    impl SourceProvider for BrokenSource {
        fn load(&self, path: &Path) -> Result<PixelBuffer, SourceError> {
            Err(SourceError::Io(format!("cannot open {}", path.display())))
        }

        fn store(&self, _raster: &PixelBuffer) -> Result<(), SourceError> {
            Err(SourceError::Io("read-only".to_string()))
        }
    }

    fn source_raster() -> PixelBuffer {
        PixelBuffer::from_vec(
            2,
            1,
            ChannelLayout::RgbaF32,
            vec![0.2, 0.4, 0.6, 1.0, 0.8, 0.1, 0.5, 1.0],
        )
    }

    fn manager_with(provider: Arc<dyn SourceProvider>) -> StateManager {
        register_working_images(&hal::Target::Cpu);
        let manager = StateManager::new(provider, builtin_registry(), hal::Target::Cpu);
        manager.set_source("memory:source");
        manager
    }

    #[test]
    fn update_without_source_resolves_no_source() {
        register_working_images(&hal::Target::Cpu);
        let manager = StateManager::new(
            MemorySource::new(source_raster()),
            builtin_registry(),
            hal::Target::Cpu,
        );
        let outcome = manager.request_update(None).wait();
        assert!(matches!(outcome, Err(UpdateError::NoSource)));
        assert!(manager.working_image().is_none());
    }

    #[test]
    fn empty_list_publishes_a_source_equal_image() {
        let manager = manager_with(MemorySource::new(source_raster()));
        manager.request_update(None).wait().unwrap();

        let image = manager.working_image().expect("image published");
        assert_eq!(image.size(), (2, 1));
        assert_eq!(image.export_cpu_copy().unwrap().data, source_raster().data);
        assert!(!manager.is_update_pending());
    }

    #[test]
    fn add_triggers_an_update_reflecting_the_edit() {
        let manager = manager_with(MemorySource::new(source_raster()));
        manager
            .add(OperationDescriptor::with_value(
                OperationKind::Brightness,
                0.25,
            ))
            .wait()
            .unwrap();

        let image = manager.working_image().unwrap();
        let buffer = image.export_cpu_copy().unwrap();
        assert!((buffer.get(0, 0, 0) - 0.45).abs() < 1e-5);
        assert!((buffer.get(1, 0, 0) - 1.05).abs() < 1e-5);
        assert_eq!(buffer.get(0, 0, 3), 1.0);
    }

    #[test]
    fn rapid_edits_coalesce_into_the_final_value() {
        let manager = manager_with(MemorySource::new(source_raster()));
        let _ = manager.add(OperationDescriptor::with_value(
            OperationKind::Brightness,
            0.1,
        ));
        let _ = manager
            .modify(
                0,
                OperationDescriptor::with_value(OperationKind::Brightness, 0.2),
            )
            .unwrap();
        let last = manager
            .modify(
                0,
                OperationDescriptor::with_value(OperationKind::Brightness, 0.3),
            )
            .unwrap();
        last.wait().unwrap();

        let buffer = manager.working_image().unwrap().export_cpu_copy().unwrap();
        assert!((buffer.get(0, 0, 0) - 0.5).abs() < 1e-5);
        assert_eq!(manager.active_operations().len(), 1);
    }

    #[test]
    fn modify_and_remove_check_bounds() {
        let manager = manager_with(MemorySource::new(source_raster()));
        assert!(matches!(
            manager.modify(3, OperationDescriptor::new(OperationKind::Contrast)),
            Err(UpdateError::IndexOutOfBounds { index: 3, len: 0 })
        ));
        assert!(matches!(
            manager.remove(0),
            Err(UpdateError::IndexOutOfBounds { index: 0, len: 0 })
        ));
    }

    #[test]
    fn failed_updates_keep_the_previous_publication() {
        let manager = manager_with(MemorySource::new(source_raster()));
        manager.request_update(None).wait().unwrap();
        let before = manager.working_image().unwrap();

        // Swap in a path so the provider still answers, then break the
        // pass with an executor-level failure: none exists on the CPU
        // path, so break the source instead.
        let broken = manager_with(Arc::new(BrokenSource));
        let outcome = broken.request_update(None).wait();
        assert!(matches!(outcome, Err(UpdateError::Source(_))));
        assert!(broken.working_image().is_none());

        // The healthy manager's publication is untouched.
        assert!(Arc::ptr_eq(&before, &manager.working_image().unwrap()));
    }

    #[test]
    fn callback_reports_failure() {
        let manager = manager_with(Arc::new(BrokenSource));
        let (tx, rx) = flume::bounded(1);
        let handle = manager.request_update(Some(Box::new(move |success| {
            let _ = tx.send(success);
        })));
        let _ = handle.wait();
        assert_eq!(rx.recv().unwrap(), false);
        assert!(!manager.is_update_pending());
    }

    #[test]
    fn reset_reverts_to_the_source() {
        let manager = manager_with(MemorySource::new(source_raster()));
        manager
            .add(OperationDescriptor::with_value(
                OperationKind::Exposure,
                1.0,
            ))
            .wait()
            .unwrap();
        manager.reset_to_original().wait().unwrap();
        let buffer = manager.working_image().unwrap().export_cpu_copy().unwrap();
        assert_eq!(buffer.data, source_raster().data);
        assert!(manager.active_operations().is_empty());
    }

    #[test]
    fn commit_hands_the_working_image_to_the_provider() {
        let provider = MemorySource::new(source_raster());
        let manager = manager_with(provider.clone());
        manager
            .add(OperationDescriptor::with_value(
                OperationKind::Brightness,
                0.25,
            ))
            .wait()
            .unwrap();
        manager.commit_working_image_to_source().unwrap();

        let stored = provider.stored.lock().clone().expect("raster stored");
        assert!((stored.get(0, 0, 0) - 0.45).abs() < 1e-5);
        assert_eq!(provider.metadata("format").as_deref(), Some("memory"));
    }

    #[test]
    fn snapshot_exposes_path_list_and_image_together() {
        let manager = manager_with(MemorySource::new(source_raster()));
        manager
            .add(OperationDescriptor::with_value(
                OperationKind::Contrast,
                1.2,
            ))
            .wait()
            .unwrap();

        let snapshot = manager.snapshot();
        assert_eq!(
            snapshot.source_path.as_deref(),
            Some(Path::new("memory:source"))
        );
        assert_eq!(snapshot.operations.len(), 1);
        assert_eq!(snapshot.operations[0].kind, OperationKind::Contrast);
        assert!(snapshot.working_image.is_some());
    }

    #[test]
    fn disabled_descriptor_is_observationally_absent() {
        let manager = manager_with(MemorySource::new(source_raster()));
        manager.request_update(None).wait().unwrap();
        let plain = manager.working_image().unwrap().export_cpu_copy().unwrap();

        let mut disabled = OperationDescriptor::with_value(OperationKind::Exposure, 2.0);
        disabled.enabled = false;
        manager.add(disabled).wait().unwrap();
        let with_disabled = manager.working_image().unwrap().export_cpu_copy().unwrap();
        assert_eq!(plain.data, with_disabled.data);
    }
}
