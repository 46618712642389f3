/*!
# darkroom hardware abstraction layer

A *working image* is the mutable pixel field the adjustment pipeline
operates on: "a rectangular float32 raster that lives somewhere". This
crate abstracts the *somewhere* (main memory or a GPU device) behind
one sum type, so upper layers never branch on storage location.

## Storage model

[`WorkingImage`] has a CPU variant (host vector, cheap shared export) and
a GPU variant (host mirror plus a device storage buffer, feature `gpu`).
Both cache their metadata when contents are installed; the read-path
accessors never touch storage, and the GPU getters in particular never
talk to the device.

## Transfers

`update_from` copies from a [`PixelBuffer`]; `update_from_owned` takes
the buffer by value so the CPU variant can adopt the allocation and the
GPU variant can keep it as the host mirror without a second copy. Export
to CPU is always a deep copy; on the GPU variant it synchronizes
device→host first. No alias of internal storage escapes except the
explicitly shared [`WorkingImage::export_cpu_shared`] handle, which is
immutable to its holders.

## Kernels

Compiled [`prism`] kernels dispatch in place through
[`WorkingImage::run_kernel`]: row-parallel evaluation on the CPU variant,
a 16×16-tiled compute dispatch on the GPU variant. Raw storage access
stays inside this crate.
*/

#![warn(trivial_casts, unused_qualifications)]

pub mod cpu;
#[cfg(feature = "gpu")]
pub mod gpu;

use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use thiserror::Error;

use drt::{GpuFamily, MemoryLocation, PixelBuffer};

pub use cpu::{CpuImage, CpuKernel};
#[cfg(feature = "gpu")]
pub use gpu::{GpuContext, GpuImage, GpuKernel};

/// Failures of working-image storage and transfer operations.
#[derive(Clone, Debug, Error)]
pub enum ImageError {
    /// A [`PixelBuffer`]'s element count does not match its geometry.
    #[error("pixel buffer is invalid: {elements} elements for a {width}x{height}x{channels} region")]
    InvalidBuffer {
        /// Claimed width.
        width: u32,
        /// Claimed height.
        height: u32,
        /// Claimed channel count.
        channels: u32,
        /// Actual element count of the sample vector.
        elements: usize,
    },
    /// Allocating host or device storage failed.
    #[error("allocating {bytes} bytes in {location} failed")]
    AllocFailed {
        /// Requested size.
        bytes: usize,
        /// Where the allocation was attempted.
        location: MemoryLocation,
    },
    /// Operation attempted on an image that holds no contents yet.
    #[error("working image is uninitialized")]
    InvalidWorkingImage,
    /// A host↔device copy reported a failure.
    #[error("host/device transfer failed: {0}")]
    DeviceTransferFailed(String),
    /// Invariant violation; does not occur in correct builds.
    #[error("internal invariant violated: {0}")]
    Unexpected(&'static str),
}

/// Failures of device discovery, initialization and kernel compilation.
#[derive(Clone, Debug, Error)]
pub enum DeviceError {
    /// The family has no compute runtime linked into this build.
    #[error("{0} support is not compiled into this build")]
    FamilyNotCompiled(GpuFamily),
    /// The runtime is present but exposes no matching adapter.
    #[error("no {0} adapter is available")]
    AdapterUnavailable(GpuFamily),
    /// Opening a device on the selected adapter failed.
    #[error("device request failed: {0}")]
    DeviceRequest(String),
    /// The 1×1 upload probe did not survive a round trip.
    #[error("device probe failed: {0}")]
    Probe(String),
    /// The kernel graph did not validate.
    #[error("kernel rejected: {0}")]
    Compilation(#[from] prism::ValidationError),
    /// The generated shader was rejected by the device.
    #[error("shader compilation failed: {0}")]
    Shader(String),
}

/// Compilation target of a fused kernel, carrying the device context
/// when the target is a GPU.
#[derive(Clone)]
pub enum Target {
    /// Row-parallel evaluation on the host.
    Cpu,
    /// Compute dispatch on an opened device.
    #[cfg(feature = "gpu")]
    Gpu(Arc<GpuContext>),
}

impl Target {
    /// The memory location images must live in to run kernels compiled
    /// for this target.
    #[must_use]
    pub fn memory_location(&self) -> MemoryLocation {
        match self {
            Self::Cpu => MemoryLocation::CpuRam,
            #[cfg(feature = "gpu")]
            Self::Gpu(_) => MemoryLocation::GpuMemory,
        }
    }
}

/// A kernel lowered for one concrete target.
///
/// Compilation happens once per pipeline; the artifact is immutable and
/// reusable across executions.
pub enum CompiledKernel {
    /// Validated arena ready for the CPU evaluator.
    Cpu(CpuKernel),
    /// WGSL compute pipeline on a specific device.
    #[cfg(feature = "gpu")]
    Gpu(GpuKernel),
}

impl CompiledKernel {
    /// Lowers `kernel` for `target`.
    pub fn compile(kernel: &prism::Kernel, target: &Target) -> Result<Self, DeviceError> {
        match target {
            Target::Cpu => Ok(Self::Cpu(CpuKernel::compile(kernel)?)),
            #[cfg(feature = "gpu")]
            Target::Gpu(context) => Ok(Self::Gpu(context.compile_kernel(kernel)?)),
        }
    }

    /// The storage location this artifact can execute against.
    #[must_use]
    pub fn memory_location(&self) -> MemoryLocation {
        match self {
            Self::Cpu(_) => MemoryLocation::CpuRam,
            #[cfg(feature = "gpu")]
            Self::Gpu(_) => MemoryLocation::GpuMemory,
        }
    }
}

/// A pixel field whose storage may live in CPU RAM or GPU memory.
///
/// See the crate docs for the storage and transfer contracts.
pub enum WorkingImage {
    /// Host-resident variant.
    Cpu(CpuImage),
    /// Device-resident variant.
    #[cfg(feature = "gpu")]
    Gpu(GpuImage),
}

impl WorkingImage {
    /// Replaces the contents with a copy of `buffer`.
    pub fn update_from(&mut self, buffer: &PixelBuffer) -> Result<(), ImageError> {
        match self {
            Self::Cpu(image) => image.update_from(buffer),
            #[cfg(feature = "gpu")]
            Self::Gpu(image) => image.update_from(buffer),
        }
    }

    /// Replaces the contents, taking ownership of `buffer`.
    ///
    /// Purely an optimization contract: the caller pledges not to reuse
    /// the buffer, letting the variants adopt the allocation.
    pub fn update_from_owned(&mut self, buffer: PixelBuffer) -> Result<(), ImageError> {
        match self {
            Self::Cpu(image) => image.update_from_owned(buffer),
            #[cfg(feature = "gpu")]
            Self::Gpu(image) => image.update_from_owned(buffer),
        }
    }

    /// Deep copy of the contents into a fresh CPU buffer, synchronizing
    /// device→host first on the GPU variant.
    pub fn export_cpu_copy(&self) -> Result<PixelBuffer, ImageError> {
        match self {
            Self::Cpu(image) => image.export_cpu_copy(),
            #[cfg(feature = "gpu")]
            Self::Gpu(image) => image.export_cpu_copy(),
        }
    }

    /// Shared handle to the already-CPU-resident storage.
    ///
    /// Offered by the CPU variant only; the GPU variant returns `None`
    /// because its authoritative copy lives on the device.
    #[must_use]
    pub fn export_cpu_shared(&self) -> Option<Arc<PixelBuffer>> {
        match self {
            Self::Cpu(image) => image.export_cpu_shared(),
            #[cfg(feature = "gpu")]
            Self::Gpu(_) => None,
        }
    }

    /// `(width, height)` from cached metadata.
    #[must_use]
    pub fn size(&self) -> (u32, u32) {
        match self {
            Self::Cpu(image) => image.size(),
            #[cfg(feature = "gpu")]
            Self::Gpu(image) => image.size(),
        }
    }

    /// Channel count from cached metadata.
    #[must_use]
    pub fn channels(&self) -> u32 {
        match self {
            Self::Cpu(image) => image.channels(),
            #[cfg(feature = "gpu")]
            Self::Gpu(image) => image.channels(),
        }
    }

    /// `width · height`.
    #[must_use]
    pub fn pixel_count(&self) -> usize {
        let (width, height) = self.size();
        width as usize * height as usize
    }

    /// `width · height · channels`.
    #[must_use]
    pub fn element_count(&self) -> usize {
        self.pixel_count() * self.channels() as usize
    }

    /// Whether metadata is present and backing storage is allocated.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        match self {
            Self::Cpu(image) => image.is_valid(),
            #[cfg(feature = "gpu")]
            Self::Gpu(image) => image.is_valid(),
        }
    }

    /// Where the primary storage lives.
    #[must_use]
    pub fn memory_location(&self) -> MemoryLocation {
        match self {
            Self::Cpu(_) => MemoryLocation::CpuRam,
            #[cfg(feature = "gpu")]
            Self::Gpu(_) => MemoryLocation::GpuMemory,
        }
    }

    /// Runs a compiled kernel over the contents, in place.
    ///
    /// The artifact must have been compiled for this image's storage
    /// location; executors check the location before calling.
    pub fn run_kernel(&mut self, kernel: &CompiledKernel) -> Result<(), ImageError> {
        match (self, kernel) {
            (Self::Cpu(image), CompiledKernel::Cpu(kernel)) => image.run_kernel(kernel),
            #[cfg(feature = "gpu")]
            (Self::Gpu(image), CompiledKernel::Gpu(kernel)) => image.run_kernel(kernel),
            #[cfg(feature = "gpu")]
            _ => Err(ImageError::Unexpected(
                "compiled kernel target does not match image storage",
            )),
        }
    }
}

/// Constructor registered for one memory location.
pub type WorkingImageCreator =
    Box<dyn Fn(PixelBuffer) -> Result<WorkingImage, ImageError> + Send + Sync>;

static CREATORS: Lazy<RwLock<Vec<(MemoryLocation, WorkingImageCreator)>>> =
    Lazy::new(|| RwLock::new(Vec::new()));

/// Registers the creator for `location`, replacing any previous one.
///
/// Registration is a single-threaded startup affair; steady-state use of
/// the registry is read-only.
pub fn register_working_image(location: MemoryLocation, creator: WorkingImageCreator) {
    let mut creators = CREATORS.write();
    creators.retain(|&(registered, _)| registered != location);
    creators.push((location, creator));
    log::debug!("registered working-image creator for {location}");
}

/// Instantiates a working image of the given location from `buffer`.
pub fn create_working_image(
    location: MemoryLocation,
    buffer: PixelBuffer,
) -> Result<WorkingImage, ImageError> {
    let creators = CREATORS.read();
    let creator = creators
        .iter()
        .find(|&&(registered, _)| registered == location)
        .map(|(_, creator)| creator)
        .ok_or(ImageError::Unexpected(
            "no working-image creator registered for the requested location",
        ))?;
    creator(buffer)
}

/// Checks a buffer's geometry/storage agreement, reporting the typed
/// [`ImageError::InvalidBuffer`] mismatch. Used on every ingestion path,
/// and by fallback fragments before they mutate a buffer in place.
pub fn validate_buffer(buffer: &PixelBuffer) -> Result<(), ImageError> {
    if buffer.is_valid() {
        Ok(())
    } else {
        Err(ImageError::InvalidBuffer {
            width: buffer.width,
            height: buffer.height,
            channels: buffer.channel_count,
            elements: buffer.data.len(),
        })
    }
}
