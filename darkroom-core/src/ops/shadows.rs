//! Shadows: lifts or lowers the dark tones.
//!
//! `p + value · mask(luma)` where the mask falls from 1 at luma 0.0 to
//! 0 at luma 0.5; the darker the pixel, the stronger the adjustment.

use drt::{OperationDescriptor, OperationKind, OperationRange, PixelBuffer};

use crate::error::PipelineError;

use super::masks::{self, Ramp};
use super::{check_rgb, clamped_value, Rgba};

pub const KIND: OperationKind = OperationKind::Shadows;

/// Luma endpoints of the shadows mask.
pub(crate) const RAMP: Ramp = Ramp::down(0.0, 0.5);

pub fn fuse(
    kernel: &mut prism::Kernel,
    input: Rgba,
    descriptor: &OperationDescriptor,
) -> Rgba {
    let value = clamped_value(descriptor);
    if OperationRange::of(KIND).is_default(value) {
        return input;
    }
    masks::fuse_masked(kernel, input, value, RAMP)
}

pub fn apply(
    buffer: &mut PixelBuffer,
    descriptor: &OperationDescriptor,
) -> Result<(), PipelineError> {
    check_rgb(buffer)?;
    let value = clamped_value(descriptor);
    if OperationRange::of(KIND).is_default(value) {
        return Ok(());
    }
    log::debug!("shadows: value={value:.2}");
    masks::apply_masked(buffer, value, RAMP);
    Ok(())
}
