//! The tonal operations.
//!
//! Every operation has up to two execution facets, registered in
//! parallel tables keyed by [`OperationKind`]:
//!
//! - a **fusion fragment** ([`FusionFn`]) extends a per-pixel kernel
//!   graph with the operation's math: no intermediate buffer, shared
//!   coordinates, alpha forwarded untouched;
//! - a **fallback fragment** ([`FallbackFn`]) mutates a CPU buffer in
//!   place with the same math, for the sequential executor and for
//!   verifying fused output against a reference.
//!
//! Both facets read the descriptor's `value` once, clamp it into the
//! operation's declared range (with a warning), and treat the result as
//! a compile-time constant.

pub(crate) mod masks;

pub mod blacks;
pub mod brightness;
pub mod contrast;
pub mod exposure;
pub mod highlights;
pub mod saturation;
pub mod shadows;
pub mod whites;

use drt::{OperationDescriptor, OperationRange, PixelBuffer, PARAM_VALUE};

use crate::error::PipelineError;

/// Per-channel output roots of the kernel being fused, RGBA-indexed.
pub type Rgba = [prism::Handle; 4];

/// Fusion facet: extends the kernel, returns the new output roots.
pub type FusionFn = fn(&mut prism::Kernel, Rgba, &OperationDescriptor) -> Rgba;

/// Fallback facet: mutates a CPU buffer in place.
pub type FallbackFn = fn(&mut PixelBuffer, &OperationDescriptor) -> Result<(), PipelineError>;

/// Reads and range-clamps the descriptor's primary value, logging when
/// an out-of-range input had to be pulled back.
pub(crate) fn clamped_value(descriptor: &OperationDescriptor) -> f32 {
    let range = OperationRange::of(descriptor.kind);
    let value = descriptor.float(PARAM_VALUE, range.default);
    if range.contains(value) {
        value
    } else {
        log::warn!(
            "{} value {value} outside [{}, {}], clamping",
            descriptor.kind,
            range.min,
            range.max
        );
        range.clamp(value)
    }
}

/// Whether `descriptor` would leave every pixel unchanged.
///
/// Out-of-range values are compared after clamping so that a descriptor
/// and its clamped form always behave identically.
pub(crate) fn is_noop(descriptor: &OperationDescriptor) -> bool {
    let range = OperationRange::of(descriptor.kind);
    let value = descriptor.float(PARAM_VALUE, range.default);
    range.is_default(range.clamp(value))
}

/// Guards the fallback entry: valid buffer with RGB channels present.
pub(crate) fn check_rgb(buffer: &PixelBuffer) -> Result<(), PipelineError> {
    hal::validate_buffer(buffer)?;
    if buffer.channel_count < 3 {
        return Err(hal::ImageError::Unexpected(
            "tonal operations require at least three channels",
        )
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use drt::{ChannelLayout, OperationKind};
    use prism::eval::Evaluator;

    use crate::registry::OperationRegistry;

    fn test_buffer() -> PixelBuffer {
        PixelBuffer::from_vec(
            3,
            1,
            ChannelLayout::RgbaF32,
            vec![
                0.2, 0.4, 0.6, 1.0, // mid tones
                0.02, 0.05, 0.1, 0.5, // deep shadows
                0.9, 0.95, 0.85, 1.0, // near white
            ],
        )
    }

    /// Runs one descriptor through the fallback facet.
    fn run_fallback(descriptor: &OperationDescriptor, buffer: &mut PixelBuffer) {
        let registry = OperationRegistry::with_builtin();
        let apply = registry.fallback(descriptor.kind).unwrap();
        apply(buffer, descriptor).unwrap();
    }

    /// Runs one descriptor through the fusion facet on the CPU evaluator.
    fn run_fused(descriptor: &OperationDescriptor, buffer: &mut PixelBuffer) {
        let registry = OperationRegistry::with_builtin();
        let fuse = registry.fusion(descriptor.kind).unwrap();
        let mut kernel = prism::Kernel::new(4);
        let input: Rgba = std::array::from_fn(|c| kernel.output(c as u8));
        let output = fuse(&mut kernel, input, descriptor);
        for c in 0..4 {
            kernel.set_output(c, output[c as usize]);
        }
        kernel.validate().unwrap();
        let mut evaluator = Evaluator::new(&kernel);
        for pixel in buffer.data.chunks_exact_mut(4) {
            evaluator.evaluate(pixel);
        }
    }

    #[test]
    fn every_kind_has_both_facets() {
        let registry = OperationRegistry::with_builtin();
        for kind in OperationKind::ALL {
            assert!(registry.fusion(kind).is_some(), "{kind} lacks fusion");
            assert!(registry.fallback(kind).is_some(), "{kind} lacks fallback");
            assert!(registry.is_defined(kind));
        }
    }

    #[test]
    fn fused_and_fallback_agree_on_every_operation() {
        for kind in OperationKind::ALL {
            let descriptor = OperationDescriptor::with_value(kind, 0.35);
            let mut sequential = test_buffer();
            run_fallback(&descriptor, &mut sequential);
            let mut fused = test_buffer();
            run_fused(&descriptor, &mut fused);
            for (index, (a, b)) in sequential.data.iter().zip(&fused.data).enumerate() {
                assert_eq!(a, b, "{kind} diverges at element {index}");
            }
        }
    }

    #[test]
    fn alpha_is_forwarded_by_every_operation() {
        for kind in OperationKind::ALL {
            let descriptor = OperationDescriptor::with_value(kind, -0.6);
            let mut buffer = test_buffer();
            run_fallback(&descriptor, &mut buffer);
            assert_eq!(buffer.get(0, 0, 3), 1.0, "{kind} touched alpha");
            assert_eq!(buffer.get(1, 0, 3), 0.5, "{kind} touched alpha");
        }
    }

    #[test]
    fn default_values_change_nothing() {
        for kind in OperationKind::ALL {
            let range = OperationRange::of(kind);
            let descriptor = OperationDescriptor::with_value(kind, range.default);
            assert!(is_noop(&descriptor));
            let mut buffer = test_buffer();
            run_fallback(&descriptor, &mut buffer);
            assert_eq!(buffer.data, test_buffer().data, "{kind} altered pixels");
        }
    }

    #[test]
    fn out_of_range_values_act_like_their_clamped_form() {
        for kind in OperationKind::ALL {
            let range = OperationRange::of(kind);
            let wild = OperationDescriptor::with_value(kind, range.max + 2.0);
            let clamped = OperationDescriptor::with_value(kind, range.max);
            let mut from_wild = test_buffer();
            run_fallback(&wild, &mut from_wild);
            let mut from_clamped = test_buffer();
            run_fallback(&clamped, &mut from_clamped);
            assert_eq!(from_wild.data, from_clamped.data, "{kind}");
        }
    }

    #[test]
    fn brightness_reference_semantics() {
        let descriptor = OperationDescriptor::with_value(OperationKind::Brightness, 0.25);
        let mut buffer = PixelBuffer::from_vec(
            2,
            1,
            ChannelLayout::RgbaF32,
            vec![0.2, 0.4, 0.6, 1.0, 0.8, 0.1, 0.5, 1.0],
        );
        run_fallback(&descriptor, &mut buffer);
        let expected = [0.45, 0.65, 0.85, 1.0, 1.05, 0.35, 0.75, 1.0];
        for (a, b) in buffer.data.iter().zip(expected) {
            assert!((a - b).abs() < 1e-5, "{a} != {b}");
        }
    }

    #[test]
    fn contrast_reference_semantics() {
        // Stored value 1.5 means multiplier 2.5 around the midpoint.
        let descriptor = OperationDescriptor::with_value(OperationKind::Contrast, 1.5);
        let mut buffer =
            PixelBuffer::from_vec(1, 1, ChannelLayout::RgbaF32, vec![0.5, 0.6, 0.7, 1.0]);
        run_fallback(&descriptor, &mut buffer);
        let expected = [0.5, 0.75, 1.0, 1.0];
        for (a, b) in buffer.data.iter().zip(expected) {
            assert!((a - b).abs() < 1e-5, "{a} != {b}");
        }
    }

    #[test]
    fn exposure_doubles_per_stop() {
        let descriptor = OperationDescriptor::with_value(OperationKind::Exposure, 1.0);
        let mut buffer =
            PixelBuffer::from_vec(1, 1, ChannelLayout::RgbaF32, vec![0.1, 0.2, 0.3, 1.0]);
        run_fallback(&descriptor, &mut buffer);
        let expected = [0.2, 0.4, 0.6, 1.0];
        for (a, b) in buffer.data.iter().zip(expected) {
            assert!((a - b).abs() < 1e-6, "{a} != {b}");
        }
    }

    #[test]
    fn saturation_minus_one_reduces_to_luma() {
        let descriptor = OperationDescriptor::with_value(OperationKind::Saturation, -1.0);
        let mut buffer =
            PixelBuffer::from_vec(1, 1, ChannelLayout::RgbaF32, vec![0.3, 0.6, 0.1, 1.0]);
        let expected = masks::luma(&[0.3, 0.6, 0.1]);
        run_fallback(&descriptor, &mut buffer);
        for c in 0..3 {
            assert!((buffer.data[c as usize] - expected).abs() < 1e-6);
        }
        assert_eq!(buffer.data[3], 1.0);
    }

    #[test]
    fn masked_operations_respect_their_thresholds() {
        // A pixel below the highlights ramp start must not move.
        let descriptor = OperationDescriptor::with_value(OperationKind::Highlights, 0.5);
        let mut dark =
            PixelBuffer::from_vec(1, 1, ChannelLayout::RgbaF32, vec![0.05, 0.05, 0.05, 1.0]);
        run_fallback(&descriptor, &mut dark);
        assert_eq!(dark.data, vec![0.05, 0.05, 0.05, 1.0]);

        // A pixel above the ramp end moves by the full value.
        let mut bright =
            PixelBuffer::from_vec(1, 1, ChannelLayout::RgbaF32, vec![0.9, 0.9, 0.9, 1.0]);
        run_fallback(&descriptor, &mut bright);
        for c in 0..3 {
            assert!((bright.data[c as usize] - 1.4).abs() < 1e-6);
        }

        // Blacks: only near-black pixels respond at all.
        let descriptor = OperationDescriptor::with_value(OperationKind::Blacks, 0.5);
        let mut mid =
            PixelBuffer::from_vec(1, 1, ChannelLayout::RgbaF32, vec![0.5, 0.5, 0.5, 1.0]);
        run_fallback(&descriptor, &mut mid);
        assert_eq!(mid.data, vec![0.5, 0.5, 0.5, 1.0]);

        // Whites: a mid-gray pixel sits below the 0.7 ramp start.
        let descriptor = OperationDescriptor::with_value(OperationKind::Whites, -0.5);
        let mut gray =
            PixelBuffer::from_vec(1, 1, ChannelLayout::RgbaF32, vec![0.5, 0.5, 0.5, 1.0]);
        run_fallback(&descriptor, &mut gray);
        assert_eq!(gray.data, vec![0.5, 0.5, 0.5, 1.0]);

        // Shadows: ramp spans (0.0, 0.5); luma 0.25 gets half the value.
        let descriptor = OperationDescriptor::with_value(OperationKind::Shadows, 0.4);
        let mut shadow =
            PixelBuffer::from_vec(1, 1, ChannelLayout::RgbaF32, vec![0.25, 0.25, 0.25, 1.0]);
        run_fallback(&descriptor, &mut shadow);
        for c in 0..3 {
            assert!((shadow.data[c as usize] - 0.45).abs() < 1e-6);
        }
    }
}
