//! Contrast: expands or compresses the range around the 0.5 midpoint.
//!
//! `0.5 + (p − 0.5) · (1 + value)` on RGB. The stored value lives in
//! `[0, 2]` with identity at 1, so the applied multiplier spans 1..3.

use drt::{OperationDescriptor, OperationKind, OperationRange, PixelBuffer};

use crate::error::PipelineError;

use super::{check_rgb, clamped_value, Rgba};

pub const KIND: OperationKind = OperationKind::Contrast;

const MIDPOINT: f32 = 0.5;

pub fn fuse(
    kernel: &mut prism::Kernel,
    input: Rgba,
    descriptor: &OperationDescriptor,
) -> Rgba {
    let value = clamped_value(descriptor);
    if OperationRange::of(KIND).is_default(value) {
        return input;
    }

    let multiplier = kernel.literal(1.0 + value);
    let midpoint = kernel.literal(MIDPOINT);
    let mut output = input;
    for c in 0..3 {
        let centered = kernel.sub(input[c], midpoint);
        let scaled = kernel.mul(centered, multiplier);
        output[c] = kernel.add(midpoint, scaled);
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

    log::debug!("contrast: value={value:.2}");
    let multiplier = 1.0 + value;
    let channels = buffer.channel_count as usize;
    for pixel in buffer.data.chunks_exact_mut(channels) {
        for sample in &mut pixel[..3] {
            *sample = MIDPOINT + (*sample - MIDPOINT) * multiplier;
        }
    }
    Ok(())
}
