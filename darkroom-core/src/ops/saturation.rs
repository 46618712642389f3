//! Saturation: scales chroma away from or toward luma.
//!
//! `luma + (p − luma) · (1 + value)` on RGB. At −1 the image collapses
//! to its luma; positive values push colors apart without moving the
//! luminance axis.

use drt::{OperationDescriptor, OperationKind, OperationRange, PixelBuffer};

use crate::error::PipelineError;

use super::masks;
use super::{check_rgb, clamped_value, Rgba};

pub const KIND: OperationKind = OperationKind::Saturation;

pub fn fuse(
    kernel: &mut prism::Kernel,
    input: Rgba,
    descriptor: &OperationDescriptor,
) -> Rgba {
    let value = clamped_value(descriptor);
    if OperationRange::of(KIND).is_default(value) {
        return input;
    }

    let luma = masks::luma_ir(kernel, &input);
    let multiplier = kernel.literal(1.0 + value);
    let mut output = input;
    for c in 0..3 {
        let chroma = kernel.sub(input[c], luma);
        let scaled = kernel.mul(chroma, multiplier);
        output[c] = kernel.add(luma, scaled);
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

    log::debug!("saturation: value={value:.2}");
    let multiplier = 1.0 + value;
    let channels = buffer.channel_count as usize;
    for pixel in buffer.data.chunks_exact_mut(channels) {
        let luma = masks::luma(pixel);
        for sample in &mut pixel[..3] {
            *sample = luma + (*sample - luma) * multiplier;
        }
    }
    Ok(())
}
