//! Aspect-preserving fit of frames into a display box.

use image::imageops::{self, FilterType};

use crate::frame::Frame;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Alignment {
    #[default]
    Center,
    TopLeft,
}

/// Where a scaled frame lands inside the display box.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DisplayRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Largest size with the image's aspect ratio that fits inside the box.
///
/// Frames relatively taller than the box fill its height; relatively wider
/// frames fill its width. Returns `None` for empty images or boxes.
pub fn fit_dimensions(
    image_width: u32,
    image_height: u32,
    box_width: u32,
    box_height: u32,
) -> Option<(u32, u32)> {
    if image_width == 0 || image_height == 0 || box_width == 0 || box_height == 0 {
        return None;
    }
    let (iw, ih) = (image_width as u64, image_height as u64);
    let (bw, bh) = (box_width as u64, box_height as u64);
    let (width, height) = if iw * bh <= ih * bw {
        ((iw * bh / ih).max(1), bh)
    } else {
        (bw, (ih * bw / iw).max(1))
    };
    Some((width as u32, height as u32))
}

pub fn placement(
    image_width: u32,
    image_height: u32,
    box_width: u32,
    box_height: u32,
    alignment: Alignment,
) -> Option<DisplayRect> {
    let (width, height) = fit_dimensions(image_width, image_height, box_width, box_height)?;
    let (x, y) = match alignment {
        Alignment::Center => ((box_width - width) / 2, (box_height - height) / 2),
        Alignment::TopLeft => (0, 0),
    };
    Some(DisplayRect {
        x,
        y,
        width,
        height,
    })
}

/// Resize `frame` to fit the box. Frames that already fit exactly are cloned.
pub fn scale_for_display(frame: &Frame, box_width: u32, box_height: u32) -> Option<Frame> {
    let (width, height) = fit_dimensions(frame.width, frame.height, box_width, box_height)?;
    if (width, height) == (frame.width, frame.height) {
        return Some(frame.clone());
    }
    let resized = imageops::resize(&frame.to_image(), width, height, FilterType::Triangle);
    Some(
        Frame::from_image(resized)
            .with_sequence(frame.sequence)
            .with_timestamp(frame.timestamp),
    )
}
