use serde::Serialize;

/// One candidate straight out of a detector, in model-input pixel space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RawDetection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    pub class_id: usize,
}

impl RawDetection {
    pub fn new(bbox: [f32; 4], confidence: f32, class_id: usize) -> Self {
        Self {
            x1: bbox[0],
            y1: bbox[1],
            x2: bbox[2],
            y2: bbox[3],
            confidence,
            class_id,
        }
    }

    /// Build from a center/size box, the layout YOLO heads emit.
    pub fn from_center(cx: f32, cy: f32, w: f32, h: f32, confidence: f32, class_id: usize) -> Self {
        Self::new(
            [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0],
            confidence,
            class_id,
        )
    }

    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    pub fn iou(&self, other: &RawDetection) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        let intersection = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            0.0
        } else {
            intersection / union
        }
    }

    /// Finite coordinates and confidence, positive extent.
    pub fn is_well_formed(&self) -> bool {
        [self.x1, self.y1, self.x2, self.y2, self.confidence]
            .iter()
            .all(|v| v.is_finite())
            && self.x2 > self.x1
            && self.y2 > self.y1
    }
}

/// Box in source-frame pixels, clamped to the frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct PixelBox {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl PixelBox {
    pub fn width(&self) -> u32 {
        self.x2.saturating_sub(self.x1)
    }

    pub fn height(&self) -> u32 {
        self.y2.saturating_sub(self.y1)
    }
}

/// A detection mapped back onto the source frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Detection {
    pub bbox: PixelBox,
    pub confidence: f32,
    pub class_id: usize,
}

/// Detections for one frame, in suppression output order.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DetectionSet {
    detections: Vec<Detection>,
}

impl DetectionSet {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self { detections }
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Detection> {
        self.detections.iter()
    }

    pub fn as_slice(&self) -> &[Detection] {
        &self.detections
    }
}

impl<'a> IntoIterator for &'a DetectionSet {
    type Item = &'a Detection;
    type IntoIter = std::slice::Iter<'a, Detection>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let a = RawDetection::new([0.0, 0.0, 10.0, 10.0], 0.9, 0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn iou_of_half_overlap() {
        let a = RawDetection::new([0.0, 0.0, 10.0, 10.0], 0.9, 0);
        let b = RawDetection::new([5.0, 0.0, 15.0, 10.0], 0.8, 0);
        // intersection 50, union 150
        assert!((a.iou(&b) - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn center_boxes_convert_to_corners() {
        let d = RawDetection::from_center(50.0, 40.0, 20.0, 10.0, 0.5, 3);
        assert_eq!((d.x1, d.y1, d.x2, d.y2), (40.0, 35.0, 60.0, 45.0));
        assert!(d.is_well_formed());
        assert!(!RawDetection::new([5.0, 5.0, 5.0, 9.0], 0.5, 0).is_well_formed());
        assert!(!RawDetection::new([0.0, 0.0, 1.0, 1.0], f32::NAN, 0).is_well_formed());
    }
}
