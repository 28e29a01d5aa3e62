//! Box and label overlay.
//!
//! Annotation always works on a copy; the raw frame handed to subscribers is
//! never drawn on.

use image::{Rgb, RgbImage};

use crate::detect::{ClassMap, Detection, DetectionSet};
use crate::frame::Frame;

const PALETTE: [[u8; 3]; 20] = [
    [0xFF, 0x38, 0x38],
    [0xFF, 0x9D, 0x97],
    [0xFF, 0x70, 0x1F],
    [0xFF, 0xB2, 0x1D],
    [0xCF, 0xD2, 0x31],
    [0x48, 0xF9, 0x0A],
    [0x92, 0xCC, 0x17],
    [0x3D, 0xDB, 0x86],
    [0x1A, 0x93, 0x34],
    [0x00, 0xD4, 0xBB],
    [0x2C, 0x99, 0xA8],
    [0x00, 0xC2, 0xFF],
    [0x34, 0x45, 0x93],
    [0x64, 0x73, 0xFF],
    [0x00, 0x18, 0xEC],
    [0x84, 0x38, 0xFF],
    [0x52, 0x00, 0x85],
    [0xCB, 0x38, 0xFF],
    [0xFF, 0x95, 0xC8],
    [0xFF, 0x37, 0xC7],
];

const GLYPH_WIDTH: u32 = 5;
const GLYPH_HEIGHT: u32 = 7;
const GLYPH_ADVANCE: u32 = GLYPH_WIDTH + 1;

/// Drawing options.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnnotationStyle {
    pub line_thickness: u32,
    pub hide_labels: bool,
    pub hide_conf: bool,
}

impl Default for AnnotationStyle {
    fn default() -> Self {
        Self {
            line_thickness: 3,
            hide_labels: false,
            hide_conf: false,
        }
    }
}

/// Stable color for a class id.
pub fn class_color(class_id: usize) -> Rgb<u8> {
    Rgb(PALETTE[class_id % PALETTE.len()])
}

/// Label text for one detection, e.g. `person 0.87`.
pub fn label_text(detection: &Detection, classes: &ClassMap, style: &AnnotationStyle) -> String {
    let name = classes
        .name(detection.class_id)
        .map(str::to_string)
        .unwrap_or_else(|| format!("class {}", detection.class_id));
    if style.hide_conf {
        name
    } else {
        format!("{} {:.2}", name, detection.confidence)
    }
}

/// Draw every detection onto a copy of `frame`.
///
/// Ids outside `classes` are still drawn, labelled by their number; the
/// statistics stage is what reports them.
pub fn annotate(
    frame: &Frame,
    detections: &DetectionSet,
    classes: &ClassMap,
    style: &AnnotationStyle,
) -> Frame {
    if detections.is_empty() {
        return frame.clone();
    }
    let mut image = frame.to_image();
    for detection in detections {
        let color = class_color(detection.class_id);
        draw_box(&mut image, detection, style.line_thickness.max(1), color);
        if !style.hide_labels {
            let text = label_text(detection, classes, style);
            draw_label(&mut image, detection, &text, style.line_thickness.max(1), color);
        }
    }
    Frame::from_image(image)
        .with_sequence(frame.sequence)
        .with_timestamp(frame.timestamp)
}

fn draw_box(image: &mut RgbImage, detection: &Detection, thickness: u32, color: Rgb<u8>) {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return;
    }
    let x1 = detection.bbox.x1.min(width - 1);
    let y1 = detection.bbox.y1.min(height - 1);
    let x2 = detection.bbox.x2.min(width - 1);
    let y2 = detection.bbox.y2.min(height - 1);

    for t in 0..thickness {
        let top = (y1 + t).min(y2);
        let bottom = y2.saturating_sub(t).max(y1);
        let left = (x1 + t).min(x2);
        let right = x2.saturating_sub(t).max(x1);
        for x in x1..=x2 {
            image.put_pixel(x, top, color);
            image.put_pixel(x, bottom, color);
        }
        for y in y1..=y2 {
            image.put_pixel(left, y, color);
            image.put_pixel(right, y, color);
        }
    }
}

fn draw_label(
    image: &mut RgbImage,
    detection: &Detection,
    text: &str,
    thickness: u32,
    color: Rgb<u8>,
) {
    let scale = (thickness / 3).max(1);
    let padding = scale;
    let tab_width = text.chars().count() as u32 * GLYPH_ADVANCE * scale + 2 * padding;
    let tab_height = GLYPH_HEIGHT * scale + 2 * padding;

    // Above the box when it fits, otherwise tucked inside its top edge.
    let x = detection.bbox.x1;
    let y = if detection.bbox.y1 >= tab_height {
        detection.bbox.y1 - tab_height
    } else {
        detection.bbox.y1
    };

    fill_rect(image, x, y, tab_width, tab_height, color);
    let ink = text_color(color);
    let mut cursor = x + padding;
    for ch in text.chars() {
        if let Some(glyph) = glyph_bits(ch.to_ascii_uppercase()) {
            draw_glyph(image, cursor, y + padding, &glyph, scale, ink);
        }
        cursor += GLYPH_ADVANCE * scale;
    }
}

fn text_color(background: Rgb<u8>) -> Rgb<u8> {
    let [r, g, b] = background.0;
    let luma = 299 * r as u32 + 587 * g as u32 + 114 * b as u32;
    if luma > 150_000 {
        Rgb([0, 0, 0])
    } else {
        Rgb([255, 255, 255])
    }
}

fn fill_rect(image: &mut RgbImage, x: u32, y: u32, w: u32, h: u32, color: Rgb<u8>) {
    let (width, height) = image.dimensions();
    for py in y..y.saturating_add(h).min(height) {
        for px in x..x.saturating_add(w).min(width) {
            image.put_pixel(px, py, color);
        }
    }
}

fn draw_glyph(image: &mut RgbImage, x: u32, y: u32, glyph: &[u8; 7], scale: u32, color: Rgb<u8>) {
    for (row, pattern) in glyph.iter().enumerate() {
        for col in 0..GLYPH_WIDTH {
            if (pattern >> (GLYPH_WIDTH - 1 - col)) & 1 == 1 {
                fill_rect(
                    image,
                    x + col * scale,
                    y + row as u32 * scale,
                    scale,
                    scale,
                    color,
                );
            }
        }
    }
}

fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    let bits = match ch {
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'B' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110],
        'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'D' => [0b11110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11110],
        'E' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b11111],
        'F' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000],
        'G' => [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111],
        'H' => [0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'J' => [0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100],
        'K' => [0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001],
        'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
        'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
        'N' => [0b10001, 0b10001, 0b11001, 0b10101, 0b10011, 0b10001, 0b10001],
        'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'P' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
        'Q' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101],
        'R' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001],
        'S' => [0b01111, 0b10000, 0b10000, 0b01110, 0b00001, 0b00001, 0b11110],
        'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100],
        'U' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'V' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100],
        'W' => [0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010],
        'X' => [0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001],
        'Y' => [0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b00100],
        'Z' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111],
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11111, 0b00010, 0b00100, 0b00010, 0b00001, 0b10001, 0b01110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        '.' => [0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b01100, 0b01100],
        '-' => [0b00000, 0b00000, 0b00000, 0b11111, 0b00000, 0b00000, 0b00000],
        _ => return None,
    };
    Some(bits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::PixelBox;

    fn gray_frame(width: u32, height: u32) -> Frame {
        Frame::from_rgb(vec![40; (width * height * 3) as usize], width, height)
            .unwrap()
            .with_sequence(7)
    }

    fn detection(bbox: [u32; 4], class_id: usize) -> Detection {
        Detection {
            bbox: PixelBox {
                x1: bbox[0],
                y1: bbox[1],
                x2: bbox[2],
                y2: bbox[3],
            },
            confidence: 0.87,
            class_id,
        }
    }

    #[test]
    fn draws_box_edges_in_class_color() {
        let frame = gray_frame(64, 64);
        let set = DetectionSet::new(vec![detection([20, 30, 50, 60], 2)]);
        let style = AnnotationStyle {
            hide_labels: true,
            ..AnnotationStyle::default()
        };
        let annotated = annotate(&frame, &set, &ClassMap::coco(), &style);

        let color = class_color(2).0;
        assert_eq!(annotated.pixel(20, 45), Some(color));
        assert_eq!(annotated.pixel(22, 45), Some(color));
        assert_eq!(annotated.pixel(50, 45), Some(color));
        assert_eq!(annotated.pixel(35, 30), Some(color));
        // Interior and exterior untouched.
        assert_eq!(annotated.pixel(35, 45), Some([40, 40, 40]));
        assert_eq!(annotated.pixel(5, 5), Some([40, 40, 40]));
        assert_eq!(annotated.sequence, 7);
    }

    #[test]
    fn raw_frame_is_left_untouched() {
        let frame = gray_frame(32, 32);
        let before = frame.pixels().to_vec();
        let set = DetectionSet::new(vec![detection([0, 0, 31, 31], 0)]);
        let annotated = annotate(&frame, &set, &ClassMap::coco(), &AnnotationStyle::default());
        assert_eq!(frame.pixels(), before.as_slice());
        assert_ne!(annotated.pixels(), before.as_slice());
    }

    #[test]
    fn boxes_on_the_frame_edge_do_not_panic() {
        let frame = gray_frame(16, 8);
        let set = DetectionSet::new(vec![detection([10, 0, 16, 8], 79)]);
        let annotated = annotate(&frame, &set, &ClassMap::coco(), &AnnotationStyle::default());
        assert_eq!((annotated.width, annotated.height), (16, 8));
    }

    #[test]
    fn label_text_follows_style() {
        let det = detection([0, 0, 4, 4], 0);
        let classes = ClassMap::coco();
        assert_eq!(label_text(&det, &classes, &AnnotationStyle::default()), "person 0.87");
        let no_conf = AnnotationStyle {
            hide_conf: true,
            ..AnnotationStyle::default()
        };
        assert_eq!(label_text(&det, &classes, &no_conf), "person");
        assert_eq!(
            label_text(&detection([0, 0, 4, 4], 500), &classes, &no_conf),
            "class 500"
        );
    }
}
