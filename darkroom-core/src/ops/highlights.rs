//! Highlights: lifts or lowers the bright tones.
//!
//! `p + value · mask(luma)` where the mask ramps from 0 at luma 0.2 to
//! 1 at luma 0.8, so mid-tones shade smoothly into the effect and dark
//! pixels are untouched.

use drt::{OperationDescriptor, OperationKind, OperationRange, PixelBuffer};

use crate::error::PipelineError;

use super::masks::{self, Ramp};
use super::{check_rgb, clamped_value, Rgba};

pub const KIND: OperationKind = OperationKind::Highlights;

/// Luma endpoints of the highlights mask.
pub(crate) const RAMP: Ramp = Ramp::up(0.2, 0.8);

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
    log::debug!("highlights: value={value:.2}");
    masks::apply_masked(buffer, value, RAMP);
    Ok(())
}
