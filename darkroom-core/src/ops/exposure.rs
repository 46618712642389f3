//! Exposure: EV-based multiplier, `p · 2^value` on RGB.
//!
//! The exponential folds into a constant on the host, so the kernel only
//! carries one multiply per channel.

use drt::{OperationDescriptor, OperationKind, OperationRange, PixelBuffer};

use crate::error::PipelineError;

use super::{check_rgb, clamped_value, Rgba};

pub const KIND: OperationKind = OperationKind::Exposure;

pub fn fuse(
    kernel: &mut prism::Kernel,
    input: Rgba,
    descriptor: &OperationDescriptor,
) -> Rgba {
    let value = clamped_value(descriptor);
    if OperationRange::of(KIND).is_default(value) {
        return input;
    }

    let factor = kernel.literal(value.exp2());
    let mut output = input;
    for c in 0..3 {
        output[c] = kernel.mul(input[c], factor);
    }
    output
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

    log::debug!("exposure: value={value:.2} EV");
    let factor = value.exp2();
    let channels = buffer.channel_count as usize;
    for pixel in buffer.data.chunks_exact_mut(channels) {
        for sample in &mut pixel[..3] {
            *sample *= factor;
        }
    }
    Ok(())
}
