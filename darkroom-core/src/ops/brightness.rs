//! Brightness: adds a constant to every color channel.
//!
//! `p + value` on RGB, alpha untouched. The result is not clamped: the
//! pipeline works in unbounded float and exporters decide how to fit the
//! range of their target format.

use drt::{OperationDescriptor, OperationKind, OperationRange, PixelBuffer};

use crate::error::PipelineError;

use super::{check_rgb, clamped_value, Rgba};

pub const KIND: OperationKind = OperationKind::Brightness;

pub fn fuse(
    kernel: &mut prism::Kernel,
    input: Rgba,
    descriptor: &OperationDescriptor,
) -> Rgba {
    let value = clamped_value(descriptor);
    if OperationRange::of(KIND).is_default(value) {
        return input;
    }

    let offset = kernel.literal(value);
    let mut output = input;
    for c in 0..3 {
        output[c] = kernel.add(input[c], offset);
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

    log::debug!("brightness: value={value:.2}");
    let channels = buffer.channel_count as usize;
    for pixel in buffer.data.chunks_exact_mut(channels) {
        for sample in &mut pixel[..3] {
            *sample += value;
        }
    }
    Ok(())
}
