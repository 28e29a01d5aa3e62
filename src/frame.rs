//! Owned video frames.
//!
//! - `Frame`: dense pixel buffer in a fixed channel order with explicit
//!   dimensions, the acquisition sequence index, and an optional source
//!   timestamp.
//!
//! Frames are produced by the ingestion layer and treated as read-only
//! downstream. Annotation works on a copy.

use std::time::Duration;

use anyhow::{anyhow, Result};
use image::RgbImage;

use crate::ingest::normalize::{normalize_to_rgb, PixelFormat};

/// Channel layout of a frame's pixel buffer.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelLayout {
    /// Interleaved 8-bit R, G, B.
    Rgb8,
}

impl PixelLayout {
    pub fn channels(self) -> usize {
        match self {
            PixelLayout::Rgb8 => 3,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Position in acquisition order within one run, starting at 0.
    pub sequence: u64,
    /// Presentation time reported by the source, when it has one.
    pub timestamp: Option<Duration>,
}

impl Frame {
    /// Wrap an RGB8 buffer. Fails when the buffer length does not match the
    /// dimensions.
    pub fn from_rgb(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = expected_len(width, height, PixelLayout::Rgb8)?;
        if data.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            sequence: 0,
            timestamp: None,
        })
    }

    /// Convert a captured buffer in any supported pixel format to an RGB frame.
    #[cfg_attr(not(feature = "ingest-v4l2"), allow(dead_code))]
    pub(crate) fn from_pixels(
        pixels: &[u8],
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<Self> {
        let rgb = normalize_to_rgb(pixels, width, height, format)?;
        Self::from_rgb(rgb, width, height)
    }

    pub fn from_image(image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            data: image.into_raw(),
            width,
            height,
            sequence: 0,
            timestamp: None,
        }
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn with_timestamp(mut self, timestamp: Option<Duration>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn layout(&self) -> PixelLayout {
        PixelLayout::Rgb8
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.data
    }

    /// Bytes per row.
    pub fn stride(&self) -> usize {
        self.width as usize * self.layout().channels()
    }

    /// Copy into an `image` buffer for resizing or drawing.
    pub fn to_image(&self) -> RgbImage {
        // Length is validated at construction, so this cannot fail.
        RgbImage::from_raw(self.width, self.height, self.data.clone())
            .unwrap_or_else(|| RgbImage::new(self.width, self.height))
    }

    /// RGB value at (x, y), if inside the frame.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = y as usize * self.stride() + x as usize * 3;
        Some([
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
        ])
    }
}

fn expected_len(width: u32, height: u32, layout: PixelLayout) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(layout.channels()))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_rgb_validates_length() {
        assert!(Frame::from_rgb(vec![0u8; 12], 2, 2).is_ok());
        assert!(Frame::from_rgb(vec![0u8; 11], 2, 2).is_err());
    }

    #[test]
    fn pixel_lookup_respects_bounds() -> Result<()> {
        let mut data = vec![0u8; 2 * 2 * 3];
        data[9..12].copy_from_slice(&[10, 20, 30]);
        let frame = Frame::from_rgb(data, 2, 2)?;

        assert_eq!(frame.pixel(1, 1), Some([10, 20, 30]));
        assert_eq!(frame.pixel(2, 0), None);
        assert_eq!(frame.stride(), 6);
        Ok(())
    }

    #[test]
    fn image_round_trip_keeps_dimensions() {
        let image = RgbImage::from_pixel(4, 3, image::Rgb([1, 2, 3]));
        let frame = Frame::from_image(image).with_sequence(7);
        assert_eq!((frame.width, frame.height, frame.sequence), (4, 3, 7));
        assert_eq!(frame.to_image().get_pixel(3, 2).0, [1, 2, 3]);
    }
}
