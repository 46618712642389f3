//! Whites: shifts the white point.
//!
//! `p + value · mask(luma)` with the mask ramping from 0 at luma 0.7 to
//! 1 at luma 1.0, a tighter band than highlights, so only near-white
//! pixels respond. The (0.7, 1.0) endpoints mirror the blacks band at
//! the opposite end of the luma axis.

use drt::{OperationDescriptor, OperationKind, OperationRange, PixelBuffer};

use crate::error::PipelineError;

use super::masks::{self, Ramp};
use super::{check_rgb, clamped_value, Rgba};

pub const KIND: OperationKind = OperationKind::Whites;

/// Luma endpoints of the whites mask.
pub(crate) const RAMP: Ramp = Ramp::up(0.7, 1.0);

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
    log::debug!("whites: value={value:.2}");
    masks::apply_masked(buffer, value, RAMP);
    Ok(())
}
