//! Process-wide backend configuration.
//!
//! [`init`] runs the backend decider exactly once, registers the
//! matching working-image creators, and publishes the selection as a
//! read-only process-wide value. Kernels and images never reach for the
//! global themselves; the selection hands out a [`hal::Target`] that is
//! passed by value to whatever needs it.

use once_cell::sync::OnceCell;

use drt::{FamilySet, GpuFamily, MemoryLocation};

use crate::decider;
use crate::error::InitError;
use crate::registry::register_working_images;

/// Environment variable pinning the backend, skipping the benchmark.
/// Accepted values: `cpu`, `gpu`, `gpu:<family>` (e.g. `gpu:vulkan`).
pub const BACKEND_ENV: &str = "DARKROOM_BACKEND";

/// The backend the process runs on, fixed at startup.
pub struct BackendSelection {
    /// Where working images live.
    pub memory_location: MemoryLocation,
    /// The winning GPU family, when `memory_location` is GPU memory.
    pub family: Option<GpuFamily>,
    /// Families whose device probe succeeded during selection.
    pub supported_families: FamilySet,
    #[cfg(feature = "gpu")]
    gpu: Option<std::sync::Arc<hal::GpuContext>>,
}

impl BackendSelection {
    /// The compilation/dispatch target matching this selection.
    #[must_use]
    pub fn target(&self) -> hal::Target {
        #[cfg(feature = "gpu")]
        if let Some(context) = &self.gpu {
            return hal::Target::Gpu(context.clone());
        }
        hal::Target::Cpu
    }

    /// The already-initialized selection, if [`init`] has run.
    #[must_use]
    pub fn get() -> Option<&'static Self> {
        SELECTION.get()
    }
}

static SELECTION: OnceCell<BackendSelection> = OnceCell::new();

/// Selects the process backend, once.
///
/// The first call benchmarks (or honors [`BACKEND_ENV`]) and registers
/// the working-image creators; later calls return the cached selection.
/// Call this from one thread before spinning up state managers.
pub fn init() -> Result<&'static BackendSelection, InitError> {
    SELECTION.get_or_try_init(|| {
        let decision = match std::env::var(BACKEND_ENV) {
            Ok(raw) => decider::decide_with_override(&raw)?,
            Err(_) => decider::decide()?,
        };

        let selection = BackendSelection {
            memory_location: decision.location,
            family: decision.family,
            supported_families: decision.supported,
            #[cfg(feature = "gpu")]
            gpu: decision.gpu,
        };
        register_working_images(&selection.target());

        match selection.family {
            Some(family) => log::info!("backend: {} via {family}", selection.memory_location),
            None => log::info!("backend: {}", selection.memory_location),
        }
        Ok(selection)
    })
}
