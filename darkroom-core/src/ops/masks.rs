//! Luma and the clamped linear ramps the tonal masks are built from.
//!
//! Every helper exists in two forms, a scalar one for the sequential
//! path and an IR builder for the fused path, written so both perform
//! the same f32 operations in the same order. Keeping the two forms in
//! lockstep is what lets the test suite hold them to 1-ULP agreement.

use prism::{Handle, Kernel};

use super::Rgba;

/// Rec. 601 luma weights for R, G, B.
pub(crate) const LUMA_WEIGHTS: [f32; 3] = [0.299, 0.587, 0.114];

/// `0.299·R + 0.587·G + 0.114·B`.
#[inline]
pub(crate) fn luma(pixel: &[f32]) -> f32 {
    LUMA_WEIGHTS[0] * pixel[0] + LUMA_WEIGHTS[1] * pixel[1] + LUMA_WEIGHTS[2] * pixel[2]
}

/// Same dataflow as [`luma`], appended to a kernel.
pub(crate) fn luma_ir(kernel: &mut Kernel, input: &Rgba) -> Handle {
    let mut acc: Option<Handle> = None;
    for (c, &weight) in LUMA_WEIGHTS.iter().enumerate() {
        let w = kernel.literal(weight);
        let term = kernel.mul(w, input[c]);
        acc = Some(match acc {
            Some(sum) => kernel.add(sum, term),
            None => term,
        });
    }
    acc.unwrap_or_else(|| kernel.literal(0.0))
}

/// A clamped linear ramp over luma.
///
/// `Up` rises from 0 at `lo` to 1 at `hi` (highlights, whites);
/// `Down` falls from 1 at `lo` to 0 at `hi` (shadows, blacks).
#[derive(Copy, Clone, Debug)]
pub(crate) struct Ramp {
    lo: f32,
    hi: f32,
    rising: bool,
}

impl Ramp {
    pub(crate) const fn up(lo: f32, hi: f32) -> Self {
        Self { lo, hi, rising: true }
    }

    pub(crate) const fn down(lo: f32, hi: f32) -> Self {
        Self { lo, hi, rising: false }
    }

    /// Scalar mask weight for a luma value.
    #[inline]
    pub(crate) fn eval(&self, luma: f32) -> f32 {
        let raw = if self.rising {
            (luma - self.lo) / (self.hi - self.lo)
        } else {
            (self.hi - luma) / (self.hi - self.lo)
        };
        raw.max(0.0).min(1.0)
    }

    /// Same dataflow as [`Ramp::eval`], appended to a kernel.
    pub(crate) fn build(&self, kernel: &mut Kernel, luma: Handle) -> Handle {
        let span = kernel.literal(self.hi - self.lo);
        let raw = if self.rising {
            let lo = kernel.literal(self.lo);
            let shifted = kernel.sub(luma, lo);
            kernel.div(shifted, span)
        } else {
            let hi = kernel.literal(self.hi);
            let shifted = kernel.sub(hi, luma);
            kernel.div(shifted, span)
        };
        let zero = kernel.literal(0.0);
        let one = kernel.literal(1.0);
        kernel.clamp(raw, zero, one)
    }
}

/// Fused form shared by the four masked tonal operations:
/// `rgb += value · mask(luma)`, alpha forwarded.
pub(crate) fn fuse_masked(kernel: &mut Kernel, input: Rgba, value: f32, ramp: Ramp) -> Rgba {
    let luma = luma_ir(kernel, &input);
    let mask = ramp.build(kernel, luma);
    let value = kernel.literal(value);
    let delta = kernel.mul(value, mask);

    let mut output = input;
    for c in 0..3 {
        output[c] = kernel.add(input[c], delta);
    }
    output
}

/// Sequential form shared by the four masked tonal operations.
pub(crate) fn apply_masked(buffer: &mut drt::PixelBuffer, value: f32, ramp: Ramp) {
    let channels = buffer.channel_count as usize;
    for pixel in buffer.data.chunks_exact_mut(channels) {
        let delta = value * ramp.eval(luma(pixel));
        for sample in &mut pixel[..3] {
            *sample += delta;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ramps_clamp_at_both_ends() {
        let up = Ramp::up(0.2, 0.8);
        assert_eq!(up.eval(0.0), 0.0);
        assert_eq!(up.eval(0.2), 0.0);
        assert_eq!(up.eval(0.8), 1.0);
        assert_eq!(up.eval(1.0), 1.0);
        assert!((up.eval(0.5) - 0.5).abs() < 1e-6);

        let down = Ramp::down(0.0, 0.5);
        assert_eq!(down.eval(0.0), 1.0);
        assert_eq!(down.eval(0.5), 0.0);
        assert_eq!(down.eval(0.75), 0.0);
        assert!((down.eval(0.25) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn luma_matches_its_ir_form() {
        let pixel = [0.3f32, 0.6, 0.1];
        let scalar = luma(&pixel);

        let mut kernel = Kernel::new(4);
        let input: Rgba = std::array::from_fn(|c| kernel.output(c as u8));
        let handle = luma_ir(&mut kernel, &input);
        kernel.set_output(0, handle);
        let mut samples = [0.3f32, 0.6, 0.1, 1.0];
        prism::eval::Evaluator::new(&kernel).evaluate(&mut samples);

        assert_eq!(samples[0], scalar);
    }

    #[test]
    fn ramp_matches_its_ir_form() {
        for probe in [0.0f32, 0.1, 0.3, 0.55, 0.79, 0.94, 1.0] {
            let ramp = Ramp::up(0.2, 0.8);
            let scalar = ramp.eval(probe);

            let mut kernel = Kernel::new(1);
            let root = kernel.output(0);
            let mask = ramp.build(&mut kernel, root);
            kernel.set_output(0, mask);
            let mut samples = [probe];
            prism::eval::Evaluator::new(&kernel).evaluate(&mut samples);

            assert_eq!(samples[0], scalar, "probe {probe}");
        }
    }
}
