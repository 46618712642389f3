/*! Host-resident working image.

Contents live in one `Arc<PixelBuffer>`: kernels mutate it through
`Arc::make_mut`, so a shared export taken by a reader is never written
through. The writer re-owns (and if necessary copies) the storage
before the next mutation. Kernel evaluation is parallel over row bands
with one evaluator per worker; vectorization across x is left to the
compiler.
*/

use std::sync::Arc;

use rayon::prelude::*;

use drt::{ChannelLayout, MemoryLocation, PixelBuffer};
use prism::eval::Evaluator;

use crate::{validate_buffer, DeviceError, ImageError};

/// Rows per parallel task. Eight-row bands keep tasks coarse enough to
/// amortize scheduling on small images.
const ROW_BAND: usize = 8;

/// Cached geometry of a working image.
#[derive(Copy, Clone, Debug, Default)]
pub(crate) struct Meta {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub layout: ChannelLayout,
}

impl Meta {
    pub fn of(buffer: &PixelBuffer) -> Self {
        Self {
            width: buffer.width,
            height: buffer.height,
            channels: buffer.channel_count,
            layout: buffer.layout,
        }
    }
}

/// A kernel validated for CPU evaluation.
pub struct CpuKernel {
    kernel: prism::Kernel,
}

impl CpuKernel {
    /// Validates and captures the kernel graph.
    pub fn compile(kernel: &prism::Kernel) -> Result<Self, DeviceError> {
        kernel.validate()?;
        Ok(Self {
            kernel: kernel.clone(),
        })
    }

    /// The captured graph.
    #[must_use]
    pub fn kernel(&self) -> &prism::Kernel {
        &self.kernel
    }
}

/// The CPU variant of a working image.
pub struct CpuImage {
    meta: Meta,
    contents: Option<Arc<PixelBuffer>>,
}

impl CpuImage {
    /// Builds an image owning `buffer`.
    pub fn new(buffer: PixelBuffer) -> Result<Self, ImageError> {
        let mut image = Self {
            meta: Meta::default(),
            contents: None,
        };
        image.update_from_owned(buffer)?;
        Ok(image)
    }

    /// Replaces the contents with a copy of `buffer`.
    pub fn update_from(&mut self, buffer: &PixelBuffer) -> Result<(), ImageError> {
        validate_buffer(buffer)?;
        let copy = clone_host_samples(buffer)?;
        self.install(copy);
        Ok(())
    }

    /// Replaces the contents, adopting the allocation of `buffer`.
    pub fn update_from_owned(&mut self, buffer: PixelBuffer) -> Result<(), ImageError> {
        validate_buffer(&buffer)?;
        self.install(buffer);
        Ok(())
    }

    fn install(&mut self, buffer: PixelBuffer) {
        self.meta = Meta::of(&buffer);
        self.contents = Some(Arc::new(buffer));
    }

    /// Deep copy into a fresh buffer.
    pub fn export_cpu_copy(&self) -> Result<PixelBuffer, ImageError> {
        let contents = self.contents.as_deref().ok_or(ImageError::InvalidWorkingImage)?;
        clone_host_samples(contents)
    }

    /// Shared handle to the resident storage, without copying.
    #[must_use]
    pub fn export_cpu_shared(&self) -> Option<Arc<PixelBuffer>> {
        self.contents.clone()
    }

    /// `(width, height)` from cached metadata.
    #[must_use]
    pub fn size(&self) -> (u32, u32) {
        (self.meta.width, self.meta.height)
    }

    /// Channel count from cached metadata.
    #[must_use]
    pub fn channels(&self) -> u32 {
        self.meta.channels
    }

    /// Whether contents are installed.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.contents.is_some() && self.meta.width > 0 && self.meta.height > 0
    }

    /// Always [`MemoryLocation::CpuRam`].
    #[must_use]
    pub fn memory_location(&self) -> MemoryLocation {
        MemoryLocation::CpuRam
    }

    /// Evaluates `kernel` over every pixel, in place.
    pub fn run_kernel(&mut self, kernel: &CpuKernel) -> Result<(), ImageError> {
        profiling::scope!("CpuImage::run_kernel");

        if kernel.kernel().channel_count() as u32 != self.meta.channels {
            return Err(ImageError::Unexpected(
                "kernel channel count does not match image",
            ));
        }
        let contents = self.contents.as_mut().ok_or(ImageError::InvalidWorkingImage)?;
        // Readers holding a shared export keep the old storage; the
        // kernel gets a uniquely owned buffer to mutate.
        let buffer = Arc::make_mut(contents);

        let channels = buffer.channel_count as usize;
        let row = buffer.width as usize * channels;
        let graph = kernel.kernel();

        buffer
            .data
            .par_chunks_mut(row * ROW_BAND)
            .for_each_init(
                || Evaluator::new(graph),
                |evaluator, band| {
                    for pixel in band.chunks_exact_mut(channels) {
                        evaluator.evaluate(pixel);
                    }
                },
            );
        Ok(())
    }
}

/// Copies the samples of `buffer`, surfacing allocation failure instead
/// of aborting.
pub(crate) fn clone_host_samples(buffer: &PixelBuffer) -> Result<PixelBuffer, ImageError> {
    let mut data = Vec::new();
    data.try_reserve_exact(buffer.data.len())
        .map_err(|_| ImageError::AllocFailed {
            bytes: buffer.size_in_bytes(),
            location: MemoryLocation::CpuRam,
        })?;
    data.extend_from_slice(&buffer.data);

    let mut copy = PixelBuffer::from_vec(buffer.width, buffer.height, buffer.layout, data);
    copy.x = buffer.x;
    copy.y = buffer.y;
    copy.channel_count = buffer.channel_count;
    Ok(copy)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_pixel_source() -> PixelBuffer {
        PixelBuffer::from_vec(
            2,
            1,
            ChannelLayout::RgbaF32,
            vec![0.2, 0.4, 0.6, 1.0, 0.8, 0.1, 0.5, 1.0],
        )
    }

    #[test]
    fn round_trip_through_cpu_copy_is_exact() {
        let source = two_pixel_source();
        let image = CpuImage::new(source.clone()).unwrap();
        let exported = image.export_cpu_copy().unwrap();
        assert_eq!(exported.data, source.data);
        assert_eq!(exported.width, 2);
        assert_eq!(exported.channel_count, 4);
    }

    #[test]
    fn invalid_buffers_are_rejected() {
        let bad = PixelBuffer::from_vec(2, 1, ChannelLayout::RgbaF32, vec![0.0; 7]);
        assert!(matches!(
            CpuImage::new(bad),
            Err(ImageError::InvalidBuffer { .. })
        ));
    }

    #[test]
    fn update_from_copies_and_recaches_metadata() {
        let mut image = CpuImage::new(two_pixel_source()).unwrap();
        let replacement = PixelBuffer::new(3, 3, ChannelLayout::RgbaF32);
        image.update_from(&replacement).unwrap();
        assert_eq!(image.size(), (3, 3));
        assert_eq!(image.export_cpu_copy().unwrap().pixel_count(), 9);
    }

    #[test]
    fn shared_export_is_untouched_by_later_kernels() {
        let mut image = CpuImage::new(two_pixel_source()).unwrap();
        let shared = image.export_cpu_shared().unwrap();

        let mut kernel = prism::Kernel::new(4);
        let offset = kernel.literal(0.5);
        for c in 0..3 {
            let root = kernel.output(c);
            let lifted = kernel.add(root, offset);
            kernel.set_output(c, lifted);
        }
        let compiled = CpuKernel::compile(&kernel).unwrap();
        image.run_kernel(&compiled).unwrap();

        // The reader's snapshot still holds the pre-kernel samples.
        assert_eq!(shared.get(0, 0, 0), 0.2);
        assert_eq!(image.export_cpu_copy().unwrap().get(0, 0, 0), 0.7);
        // Alpha forwarded.
        assert_eq!(image.export_cpu_copy().unwrap().get(0, 0, 3), 1.0);
    }

    #[test]
    fn one_by_one_image_survives_kernels() {
        let source = PixelBuffer::from_vec(1, 1, ChannelLayout::RgbaF32, vec![0.5, 0.5, 0.5, 1.0]);
        let mut image = CpuImage::new(source).unwrap();
        let kernel = prism::Kernel::new(4);
        let compiled = CpuKernel::compile(&kernel).unwrap();
        image.run_kernel(&compiled).unwrap();
        assert_eq!(
            image.export_cpu_copy().unwrap().data,
            vec![0.5, 0.5, 0.5, 1.0]
        );
    }
}
