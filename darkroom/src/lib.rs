/*! darkroom is a non-destructive image editor core: it applies an
 *  editable, totally ordered list of tonal operations to a loaded
 *  source image and maintains an always-consistent working image that
 *  renderers and exporters can read without blocking.
 *
 *  The heavy lifting lives in the layer crates: `darkroom-types` for
 *  the shared data model, `prism` for the kernel IR, `darkroom-hal` for
 *  CPU/GPU working images, `darkroom-core` for the decider, pipeline
 *  and state management. This crate ties them together behind the
 *  [`Editor`] facade and contributes the pieces an application needs
 *  around the core: a file-backed [`FileSource`] provider and RON
 *  [`sidecar`] persistence for edit lists.
 *
 *  ```no_run
 *  use std::sync::Arc;
 *  use darkroom::{Editor, FileSource, OperationDescriptor, OperationKind};
 *
 *  let editor = Editor::new(Arc::new(FileSource::new()))?;
 *  editor.load_image("photo.png")?;
 *  editor
 *      .add_operation(OperationDescriptor::with_value(OperationKind::Brightness, 0.2))
 *      .wait()?;
 *  editor.commit_to_source()?;
 *  # Ok::<(), Box<dyn std::error::Error>>(())
 *  ```
 */

#![warn(trivial_casts, unused_qualifications)]

mod source;

pub mod sidecar;

use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use drt::{
    ChannelLayout, FamilySet, GpuFamily, MemoryLocation, OperationDescriptor, OperationKind,
    OperationRange, ParamValue, PixelBuffer, PARAM_VALUE,
};
pub use hal::WorkingImage;

pub use drc::{
    init, BackendSelection, InitError, PipelineError, SourceError, SourceProvider, UpdateCallback,
    UpdateError, UpdateHandle,
};

pub use source::FileSource;

/// The engine facade: one loaded image, its edit list, and the
/// published working image.
///
/// Construction selects the process backend (first construction only;
/// the choice is process-wide) and registers the built-in operations.
pub struct Editor {
    state: drc::StateManager,
    provider: Arc<dyn SourceProvider>,
    target: hal::Target,
}

impl Editor {
    /// Builds an editor on `provider`.
    ///
    /// The first editor in the process runs the backend decider; see
    /// [`drc::init`] for the selection and override rules.
    pub fn new(provider: Arc<dyn SourceProvider>) -> Result<Self, InitError> {
        let selection = drc::init()?;
        let target = selection.target();
        let state =
            drc::StateManager::new(provider.clone(), drc::builtin_registry(), target.clone());
        Ok(Self {
            state,
            provider,
            target,
        })
    }

    /// Loads `path` and blocks until the first working image is
    /// published, so a valid image is readable as soon as this returns.
    pub fn load_image(&self, path: impl Into<PathBuf>) -> Result<(), UpdateError> {
        self.state.set_source(path);
        self.state.request_update(None).wait()
    }

    /// Appends an operation; the returned handle resolves when the
    /// pass serving this edit completes.
    pub fn add_operation(&self, descriptor: OperationDescriptor) -> UpdateHandle {
        self.state.add(descriptor)
    }

    /// Replaces the operation at `index`.
    pub fn modify_operation(
        &self,
        index: usize,
        descriptor: OperationDescriptor,
    ) -> Result<UpdateHandle, UpdateError> {
        self.state.modify(index, descriptor)
    }

    /// Removes the operation at `index`.
    pub fn remove_operation(&self, index: usize) -> Result<UpdateHandle, UpdateError> {
        self.state.remove(index)
    }

    /// Clears the edit list, reverting to the source image.
    pub fn reset(&self) -> UpdateHandle {
        self.state.reset_to_original()
    }

    /// Schedules a pass over the current list; see
    /// [`drc::StateManager::request_update`].
    pub fn request_update(&self, callback: Option<UpdateCallback>) -> UpdateHandle {
        self.state.request_update(callback)
    }

    /// Lock-free read of the latest published working image.
    #[must_use]
    pub fn working_image(&self) -> Option<Arc<WorkingImage>> {
        self.state.working_image()
    }

    /// Whether a pass is queued or running.
    #[must_use]
    pub fn is_update_pending(&self) -> bool {
        self.state.is_update_pending()
    }

    /// Snapshot copy of the edit list.
    #[must_use]
    pub fn active_operations(&self) -> Vec<OperationDescriptor> {
        self.state.active_operations()
    }

    /// The loaded source path.
    #[must_use]
    pub fn source_path(&self) -> Option<PathBuf> {
        self.state.source_path()
    }

    /// Exports the working image and writes it back through the source
    /// provider. Synchronous.
    pub fn commit_to_source(&self) -> Result<(), UpdateError> {
        self.state.commit_working_image_to_source()
    }

    /// Runs `operations` against the loaded source as a detached task
    /// and returns the resulting raster, leaving the editor's own list
    /// and working image untouched. Useful for export previews with a
    /// different look than the current edit.
    pub fn process_copy(
        &self,
        operations: Vec<OperationDescriptor>,
    ) -> Result<PixelBuffer, UpdateError> {
        let path = self.source_path().ok_or(UpdateError::NoSource)?;
        let raster = self.provider.load(&path)?;
        let task = drc::ProcessingTask::new(
            raster,
            operations,
            drc::builtin_registry(),
            self.target.clone(),
        );
        task.execute()?;
        let image = task
            .take_result()
            .ok_or(UpdateError::Image(hal::ImageError::InvalidWorkingImage))?;
        image.export_cpu_copy().map_err(UpdateError::Image)
    }

    /// Writes the current edit list to a sidecar file. Callers pick the
    /// path convention; the core does not impose one.
    pub fn save_edits(&self, path: impl AsRef<Path>) -> Result<(), sidecar::SidecarError> {
        sidecar::save_edit_list(path.as_ref(), &self.active_operations())
    }

    /// Replaces the edit list with the contents of a sidecar file.
    ///
    /// Each restored operation is appended individually; the passes
    /// coalesce, and the returned handle resolves once the final list
    /// is reflected in the working image.
    pub fn load_edits(&self, path: impl AsRef<Path>) -> Result<UpdateHandle, sidecar::SidecarError> {
        let operations = sidecar::load_edit_list(path.as_ref())?;
        let mut handle = self.reset();
        for descriptor in operations {
            handle = self.add_operation(descriptor);
        }
        Ok(handle)
    }
}
