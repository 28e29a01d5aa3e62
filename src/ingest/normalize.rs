//! Capture buffer conversion to packed RGB.

use anyhow::{anyhow, bail, Result};

/// Pixel layouts the capture backends hand us.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PixelFormat {
    Rgb24,
    Bgr24,
    Yuyv,
    Nv12,
}

impl PixelFormat {
    /// Map a V4L2 FourCC to a format we can convert.
    pub(crate) fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"RGB3" => Some(Self::Rgb24),
            b"BGR3" => Some(Self::Bgr24),
            b"YUYV" => Some(Self::Yuyv),
            b"NV12" => Some(Self::Nv12),
            _ => None,
        }
    }

    /// Buffer size in bytes for a `width` x `height` capture.
    fn buffer_len(self, width: u32, height: u32) -> Result<usize> {
        match self {
            Self::Yuyv if width % 2 != 0 => {
                bail!("YUYV frame width must be even, got {}", width)
            }
            Self::Nv12 if width % 2 != 0 || height % 2 != 0 => {
                bail!("NV12 frame dimensions must be even, got {}x{}", width, height)
            }
            _ => {}
        }
        let area = (width as usize)
            .checked_mul(height as usize)
            .ok_or_else(|| anyhow!("frame dimensions {}x{} overflow", width, height))?;
        let len = match self {
            Self::Rgb24 | Self::Bgr24 => area.checked_mul(3),
            Self::Yuyv => area.checked_mul(2),
            Self::Nv12 => area.checked_add(area / 2),
        };
        len.ok_or_else(|| anyhow!("frame dimensions {}x{} overflow", width, height))
    }
}

pub(crate) fn normalize_to_rgb(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<Vec<u8>> {
    let expected = format.buffer_len(width, height)?;
    if pixels.len() != expected {
        bail!(
            "{:?} buffer holds {} bytes, {}x{} needs {}",
            format,
            pixels.len(),
            width,
            height,
            expected
        );
    }

    let mut out = Vec::with_capacity(width as usize * height as usize * 3);
    match format {
        PixelFormat::Rgb24 => out.extend_from_slice(pixels),
        PixelFormat::Bgr24 => {
            for bgr in pixels.chunks_exact(3) {
                out.extend_from_slice(&[bgr[2], bgr[1], bgr[0]]);
            }
        }
        PixelFormat::Yuyv => {
            // Y0 U Y1 V covers two horizontally adjacent pixels.
            for macro_pixel in pixels.chunks_exact(4) {
                let (u, v) = (macro_pixel[1], macro_pixel[3]);
                out.extend_from_slice(&ycbcr(macro_pixel[0], u, v));
                out.extend_from_slice(&ycbcr(macro_pixel[2], u, v));
            }
        }
        PixelFormat::Nv12 => {
            let w = width as usize;
            let (luma, chroma) = pixels.split_at(w * height as usize);
            for (row, luma_row) in luma.chunks_exact(w.max(1)).enumerate() {
                let chroma_row = &chroma[(row / 2) * w..];
                for (col, &y) in luma_row.iter().enumerate() {
                    let pair = (col / 2) * 2;
                    out.extend_from_slice(&ycbcr(y, chroma_row[pair], chroma_row[pair + 1]));
                }
            }
        }
    }
    Ok(out)
}

/// Full-range BT.601 in 8.8 fixed point.
fn ycbcr(y: u8, cb: u8, cr: u8) -> [u8; 3] {
    let y = i32::from(y);
    let cb = i32::from(cb) - 128;
    let cr = i32::from(cr) - 128;
    let r = y + ((359 * cr + 128) >> 8);
    let g = y - ((88 * cb + 183 * cr + 128) >> 8);
    let b = y + ((454 * cb + 128) >> 8);
    [saturate(r), saturate(g), saturate(b)]
}

fn saturate(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neutral_chroma_is_gray() -> Result<()> {
        let nv12 = [vec![90u8; 4], vec![128u8; 2]].concat();
        assert_eq!(normalize_to_rgb(&nv12, 2, 2, PixelFormat::Nv12)?, vec![90u8; 12]);

        let yuyv = [200u8, 128, 200, 128];
        assert_eq!(normalize_to_rgb(&yuyv, 2, 1, PixelFormat::Yuyv)?, vec![200u8; 6]);
        Ok(())
    }

    #[test]
    fn strong_red_chroma_saturates() {
        assert_eq!(ycbcr(255, 128, 255), [255, 164, 255]);
        assert_eq!(ycbcr(0, 128, 0), [0, 91, 0]);
    }

    #[test]
    fn bgr_swaps_channels() -> Result<()> {
        let rgb = normalize_to_rgb(&[1, 2, 3, 4, 5, 6], 2, 1, PixelFormat::Bgr24)?;
        assert_eq!(rgb, vec![3, 2, 1, 6, 5, 4]);
        Ok(())
    }

    #[test]
    fn rejects_mismatched_buffers() {
        assert!(normalize_to_rgb(&[0u8; 9], 2, 3, PixelFormat::Rgb24).is_err());
        assert!(normalize_to_rgb(&[0u8; 6], 3, 1, PixelFormat::Yuyv).is_err());
        assert_eq!(PixelFormat::from_fourcc(b"MJPG"), None);
    }
}
