//! Class label maps.
//!
//! Detections carry raw integer class ids; a `ClassMap` is the only way to turn
//! one into a name. Ids outside the map are schema errors, never silent
//! out-of-range lookups.

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::PipelineError;

const COCO_CLASSES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
    "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch", "potted plant",
    "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote", "keyboard", "cell phone",
    "microwave", "oven", "toaster", "sink", "refrigerator", "book", "clock", "vase", "scissors",
    "teddy bear", "hair drier", "toothbrush",
];

/// Ordered set of class names with a validated index domain `0..len()`.
///
/// Cheap to clone; the names are shared.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassMap {
    names: Arc<[String]>,
}

impl ClassMap {
    pub fn new<I, S>(names: I) -> Result<Self, PipelineError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names
            .into_iter()
            .map(|name| name.into().trim().to_string())
            .collect();
        if names.is_empty() {
            return Err(PipelineError::configuration(
                "labels",
                "label map must contain at least one class",
            ));
        }
        let mut seen = HashSet::new();
        for name in &names {
            if name.is_empty() {
                return Err(PipelineError::configuration("labels", "class names must not be empty"));
            }
            if !seen.insert(name.as_str()) {
                return Err(PipelineError::configuration(
                    "labels",
                    format!("duplicate class name '{}'", name),
                ));
            }
        }
        Ok(Self {
            names: names.into(),
        })
    }

    /// The 80 COCO classes the stock YOLOv5 weights are trained on.
    pub fn coco() -> Self {
        Self {
            names: COCO_CLASSES.iter().map(|name| name.to_string()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn name(&self, class_id: usize) -> Option<&str> {
        self.names.get(class_id).map(String::as_str)
    }

    /// Name for `class_id`, or a `SchemaError` when the id is out of range.
    pub fn resolve(&self, class_id: usize) -> Result<&str, PipelineError> {
        self.name(class_id).ok_or(PipelineError::Schema {
            class_id,
            known: self.len(),
        })
    }

    pub fn id_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|candidate| candidate == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

impl Default for ClassMap {
    fn default() -> Self {
        Self::coco()
    }
}
