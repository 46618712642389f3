//! Error types surfaced by the core's top-level call sites.
//!
//! Everything is `Clone` because an update outcome is broadcast to every
//! coalesced requester.

use thiserror::Error;

use drt::{MemoryLocation, OperationKind};

use crate::source::SourceError;

/// Failures of startup backend selection.
#[derive(Clone, Debug, Error)]
pub enum InitError {
    /// The CPU baseline benchmark itself failed; there is no backend the
    /// process could fall back to.
    #[error("CPU benchmark failed: {0}")]
    CpuBenchmarkFailed(String),
    /// `DARKROOM_BACKEND` held something unparseable.
    #[error("invalid DARKROOM_BACKEND value `{0}` (expected `cpu`, `gpu` or `gpu:<family>`)")]
    BadOverride(String),
    /// Preparing the reference raster or registry failed.
    #[error(transparent)]
    Image(#[from] hal::ImageError),
}

/// Failures of pipeline construction and execution.
#[derive(Clone, Debug, Error)]
pub enum PipelineError {
    /// The executor was compiled for a different storage location than
    /// the image it was handed.
    #[error("executor requires a {expected} image but received a {actual} image")]
    BackendMismatch {
        /// Location the executor was configured for.
        expected: MemoryLocation,
        /// Location of the image passed to `execute`.
        actual: MemoryLocation,
    },
    /// A fused build encountered an operation with no fusion form.
    #[error("operation {0} has no fusion form")]
    MissingFusionFragment(OperationKind),
    /// A sequential pass encountered an operation with no fallback form.
    /// Execution treats this as a soft failure and only logs it.
    #[error("operation {0} has no sequential form")]
    MissingFallbackFragment(OperationKind),
    /// Storage or transfer failure underneath the executor.
    #[error(transparent)]
    Image(#[from] hal::ImageError),
    /// Device or kernel-compilation failure underneath the executor.
    #[error(transparent)]
    Device(#[from] hal::DeviceError),
}

/// Failures reported by [`StateManager`](crate::StateManager) operations.
#[derive(Clone, Debug, Error)]
pub enum UpdateError {
    /// An update was requested before any source was set.
    #[error("no source image has been set")]
    NoSource,
    /// An edit named an index past the end of the operation list.
    #[error("operation index {index} is out of bounds (list holds {len})")]
    IndexOutOfBounds {
        /// Requested index.
        index: usize,
        /// Length of the list at the time of the call.
        len: usize,
    },
    /// The worker was shut down before the request resolved.
    #[error("update was abandoned by the worker")]
    Abandoned,
    /// The source provider failed to deliver or accept a raster.
    #[error(transparent)]
    Source(#[from] SourceError),
    /// The pass failed while building or executing the pipeline.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    /// The pass failed in working-image storage handling.
    #[error(transparent)]
    Image(#[from] hal::ImageError),
}
