//! Frame → model tensor conversion.
//!
//! Frames are letterboxed into the model's input size: scaled by a single gain
//! so the whole frame fits, centered, and padded with gray (114). The tensor is
//! NCHW `f32` in 0..1 with batch size one. The letterbox geometry travels with
//! the tensor so detections can be mapped back to source pixels.

use image::imageops::{self, FilterType};

use crate::frame::Frame;

/// Gray level used for letterbox padding.
pub const PAD_VALUE: u8 = 114;

/// Spatial size of a model input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InputSize {
    pub width: u32,
    pub height: u32,
}

impl InputSize {
    pub fn square(size: u32) -> Self {
        Self {
            width: size,
            height: size,
        }
    }

    /// Round both sides up to a multiple of `stride`.
    pub fn aligned_to(self, stride: u32) -> Self {
        Self {
            width: check_img_size(self.width, stride),
            height: check_img_size(self.height, stride),
        }
    }
}

/// Round `size` up to the nearest multiple of the model stride (at least one
/// stride).
pub fn check_img_size(size: u32, stride: u32) -> u32 {
    if stride == 0 {
        return size;
    }
    let aligned = size.div_ceil(stride).max(1) * stride;
    if aligned != size {
        log::warn!(
            "input size {} must be a multiple of stride {}, using {}",
            size,
            stride,
            aligned
        );
    }
    aligned
}

/// Geometry of one letterbox transform.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Letterbox {
    pub gain: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub source_width: u32,
    pub source_height: u32,
    pub input: InputSize,
}

impl Letterbox {
    pub fn fit(source_width: u32, source_height: u32, input: InputSize) -> Self {
        let gain = (input.width as f32 / source_width.max(1) as f32)
            .min(input.height as f32 / source_height.max(1) as f32);
        let (unpad_w, unpad_h) = scaled_dims(source_width, source_height, gain, input);
        Self {
            gain,
            pad_x: ((input.width - unpad_w) / 2) as f32,
            pad_y: ((input.height - unpad_h) / 2) as f32,
            source_width,
            source_height,
            input,
        }
    }

    /// Size of the scaled frame inside the padded input.
    pub fn unpadded(&self) -> (u32, u32) {
        scaled_dims(self.source_width, self.source_height, self.gain, self.input)
    }

    /// Map a point from model-input space back to source-frame space
    /// (unclamped).
    pub fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.gain, (y - self.pad_y) / self.gain)
    }
}

fn scaled_dims(width: u32, height: u32, gain: f32, input: InputSize) -> (u32, u32) {
    let w = ((width as f32 * gain).round() as u32).clamp(1, input.width);
    let h = ((height as f32 * gain).round() as u32).clamp(1, input.height);
    (w, h)
}

/// Normalized NCHW tensor for one frame.
#[derive(Clone, Debug)]
pub struct PreprocessedTensor {
    data: Vec<f32>,
    shape: [usize; 4],
    letterbox: Letterbox,
}

impl PreprocessedTensor {
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// `(batch, channels, height, width)`.
    pub fn shape(&self) -> [usize; 4] {
        self.shape
    }

    pub fn letterbox(&self) -> &Letterbox {
        &self.letterbox
    }

    pub fn value(&self, channel: usize, y: usize, x: usize) -> Option<f32> {
        let [_, channels, height, width] = self.shape;
        if channel >= channels || y >= height || x >= width {
            return None;
        }
        self.data.get((channel * height + y) * width + x).copied()
    }
}

/// Letterbox, normalize and reorder a frame into a model tensor.
pub fn preprocess(frame: &Frame, input: InputSize) -> PreprocessedTensor {
    let letterbox = Letterbox::fit(frame.width, frame.height, input);
    let (unpad_w, unpad_h) = letterbox.unpadded();

    let source = frame.to_image();
    let resized = if (unpad_w, unpad_h) == (frame.width, frame.height) {
        source
    } else {
        imageops::resize(&source, unpad_w, unpad_h, FilterType::Triangle)
    };

    let width = input.width as usize;
    let height = input.height as usize;
    let plane = width * height;
    let mut data = vec![PAD_VALUE as f32 / 255.0; plane * 3];

    let offset_x = letterbox.pad_x as usize;
    let offset_y = letterbox.pad_y as usize;
    for (x, y, pixel) in resized.enumerate_pixels() {
        let index = (y as usize + offset_y) * width + x as usize + offset_x;
        for channel in 0..3 {
            data[channel * plane + index] = pixel.0[channel] as f32 / 255.0;
        }
    }

    PreprocessedTensor {
        data,
        shape: [1, 3, height, width],
        letterbox,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_size_rounds_up_to_stride() {
        assert_eq!(check_img_size(640, 32), 640);
        assert_eq!(check_img_size(650, 32), 672);
        assert_eq!(check_img_size(1, 32), 32);
        assert_eq!(InputSize::square(100).aligned_to(32), InputSize::square(128));
    }

    #[test]
    fn wide_frames_are_padded_vertically() {
        let lb = Letterbox::fit(1280, 720, InputSize::square(640));
        assert!((lb.gain - 0.5).abs() < 1e-6);
        assert_eq!(lb.unpadded(), (640, 360));
        assert_eq!((lb.pad_x, lb.pad_y), (0.0, 140.0));
        assert_eq!(lb.to_source(320.0, 320.0), (640.0, 360.0));
    }

    #[test]
    fn tall_frames_are_padded_horizontally() {
        let lb = Letterbox::fit(300, 600, InputSize::square(64));
        assert_eq!(lb.unpadded(), (32, 64));
        assert_eq!((lb.pad_x, lb.pad_y), (16.0, 0.0));
    }

    #[test]
    fn tensor_is_nchw_normalized_with_gray_padding() {
        // 4x2 red frame into an 8x8 input: gain 2, scaled to 8x4, pad_y 2.
        let pixels = [255u8, 0, 0].repeat(8);
        let frame = Frame::from_rgb(pixels, 4, 2).unwrap();
        let tensor = preprocess(&frame, InputSize::square(8));

        assert_eq!(tensor.shape(), [1, 3, 8, 8]);
        assert_eq!(tensor.data().len(), 3 * 64);
        let pad = PAD_VALUE as f32 / 255.0;
        assert_eq!(tensor.value(0, 0, 0), Some(pad));
        assert_eq!(tensor.value(0, 4, 4), Some(1.0));
        assert_eq!(tensor.value(1, 4, 4), Some(0.0));
        assert_eq!(tensor.value(2, 7, 7), Some(pad));
        assert_eq!(tensor.value(3, 0, 0), None);
    }
}
