//! Sample-format conversions at the edges of the pipeline.
//!
//! The pipeline itself is always RGBA/F32; these helpers bring provider
//! output into that layout and take committed rasters back out to 8-bit
//! for display or encoding. Float→byte conversion clamps to `[0, 1]`
//! and rounds to nearest, the behavior exporters expect from an HDR
//! working space.

use drt::{ChannelLayout, PixelBuffer};

use crate::error::PipelineError;

/// Converts an RGBA/F32 buffer to packed 8-bit RGBA samples.
pub fn to_rgba_u8(buffer: &PixelBuffer) -> Result<Vec<u8>, PipelineError> {
    hal::validate_buffer(buffer)?;
    if buffer.channel_count != 4 || !buffer.layout.is_float() {
        return Err(hal::ImageError::Unexpected(
            "8-bit export requires an RGBA float buffer",
        )
        .into());
    }

    Ok(buffer
        .data
        .iter()
        .map(|&sample| (sample.clamp(0.0, 1.0) * 255.0).round() as u8)
        .collect())
}

/// Builds an RGBA/F32 buffer from packed 8-bit RGBA samples,
/// normalizing to `[0, 1]`.
pub fn from_rgba_u8(width: u32, height: u32, samples: &[u8]) -> Result<PixelBuffer, PipelineError> {
    let expected = width as usize * height as usize * 4;
    if samples.len() != expected {
        return Err(hal::ImageError::InvalidBuffer {
            width,
            height,
            channels: 4,
            elements: samples.len(),
        }
        .into());
    }

    let data = samples
        .iter()
        .map(|&sample| f32::from(sample) / 255.0)
        .collect();
    Ok(PixelBuffer::from_vec(
        width,
        height,
        ChannelLayout::RgbaF32,
        data,
    ))
}

/// Pads an RGB/F32 buffer to RGBA/F32 with opaque alpha. RGBA input is
/// passed through as a plain copy.
pub fn ensure_rgba(buffer: &PixelBuffer) -> Result<PixelBuffer, PipelineError> {
    hal::validate_buffer(buffer)?;
    match buffer.channel_count {
        4 => {
            let mut copy = buffer.clone();
            copy.layout = ChannelLayout::RgbaF32;
            copy.channel_count = 4;
            Ok(copy)
        }
        3 => {
            let mut data = Vec::with_capacity(buffer.pixel_count() * 4);
            for pixel in buffer.data.chunks_exact(3) {
                data.extend_from_slice(pixel);
                data.push(1.0);
            }
            let mut padded =
                PixelBuffer::from_vec(buffer.width, buffer.height, ChannelLayout::RgbaF32, data);
            padded.x = buffer.x;
            padded.y = buffer.y;
            Ok(padded)
        }
        _ => Err(hal::ImageError::Unexpected(
            "only RGB and RGBA buffers can enter the pipeline",
        )
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u8_round_trip_is_exact_on_representable_values() {
        let source = from_rgba_u8(2, 1, &[0, 51, 128, 255, 204, 25, 1, 254]).unwrap();
        assert!(source.is_valid());
        assert_eq!(source.layout, ChannelLayout::RgbaF32);
        let back = to_rgba_u8(&source).unwrap();
        assert_eq!(back, vec![0, 51, 128, 255, 204, 25, 1, 254]);
    }

    #[test]
    fn float_export_clamps_out_of_range_samples() {
        let buffer = PixelBuffer::from_vec(
            1,
            1,
            ChannelLayout::RgbaF32,
            vec![-0.5, 1.5, 0.5, 1.0],
        );
        assert_eq!(to_rgba_u8(&buffer).unwrap(), vec![0, 255, 128, 255]);
    }

    #[test]
    fn rgb_is_padded_with_opaque_alpha() {
        let rgb = PixelBuffer::from_vec(
            2,
            1,
            ChannelLayout::RgbF32,
            vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6],
        );
        let rgba = ensure_rgba(&rgb).unwrap();
        assert_eq!(rgba.channel_count, 4);
        assert_eq!(rgba.data, vec![0.1, 0.2, 0.3, 1.0, 0.4, 0.5, 0.6, 1.0]);
    }

    #[test]
    fn mismatched_sample_counts_are_rejected() {
        assert!(from_rgba_u8(2, 2, &[0; 15]).is_err());
        let bad = PixelBuffer::from_vec(2, 1, ChannelLayout::RgbaF32, vec![0.0; 5]);
        assert!(to_rgba_u8(&bad).is_err());
    }
}
