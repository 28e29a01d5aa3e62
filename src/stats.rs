//! Per-frame class counts.

use serde::Serialize;

use crate::detect::{ClassMap, DetectionSet};
use crate::error::PipelineError;

/// Count of detections per class for one frame.
///
/// Every label in the map has an entry, zero included, in label-map order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StatisticsSnapshot {
    counts: Vec<(String, usize)>,
}

impl StatisticsSnapshot {
    /// All-zero snapshot over `classes`.
    pub fn empty(classes: &ClassMap) -> Self {
        Self {
            counts: classes.iter().map(|name| (name.to_string(), 0)).collect(),
        }
    }

    pub fn get(&self, label: &str) -> Option<usize> {
        self.counts
            .iter()
            .find(|(name, _)| name == label)
            .map(|(_, count)| *count)
    }

    pub fn total(&self) -> usize {
        self.counts.iter().map(|(_, count)| count).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.counts.iter().map(|(name, count)| (name.as_str(), *count))
    }

    /// Labels with at least one detection, in label-map order.
    pub fn nonzero(&self) -> impl Iterator<Item = (&str, usize)> {
        self.iter().filter(|(_, count)| *count > 0)
    }

    /// Non-zero counts, highest first. Ties keep label-map order.
    pub fn ranked(&self) -> Vec<(&str, usize)> {
        let mut ranked: Vec<(&str, usize)> = self.nonzero().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked
    }

    /// Human-readable summary such as `2 persons, 1 car`.
    pub fn summary(&self) -> String {
        let parts: Vec<String> = self
            .nonzero()
            .map(|(name, count)| {
                if count == 1 {
                    format!("{} {}", count, name)
                } else {
                    format!("{} {}s", count, name)
                }
            })
            .collect();
        if parts.is_empty() {
            "no detections".to_string()
        } else {
            parts.join(", ")
        }
    }
}

/// Count `detections` against `classes`.
///
/// Any class id outside the map fails the whole snapshot with a schema error;
/// no partial counts are produced.
pub fn aggregate(
    detections: &DetectionSet,
    classes: &ClassMap,
) -> Result<StatisticsSnapshot, PipelineError> {
    let mut snapshot = StatisticsSnapshot::empty(classes);
    for detection in detections {
        classes.resolve(detection.class_id)?;
        snapshot.counts[detection.class_id].1 += 1;
    }
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{Detection, PixelBox};

    fn detection(class_id: usize) -> Detection {
        Detection {
            bbox: PixelBox {
                x1: 0,
                y1: 0,
                x2: 10,
                y2: 10,
            },
            confidence: 0.9,
            class_id,
        }
    }

    #[test]
    fn counts_every_label_including_zero() {
        let classes = ClassMap::new(["person", "bicycle", "car"]).unwrap();
        let set = DetectionSet::new(vec![detection(0), detection(2), detection(0)]);
        let snapshot = aggregate(&set, &classes).unwrap();

        assert_eq!(snapshot.get("person"), Some(2));
        assert_eq!(snapshot.get("bicycle"), Some(0));
        assert_eq!(snapshot.get("car"), Some(1));
        assert_eq!(snapshot.get("truck"), None);
        assert_eq!(snapshot.total(), set.len());
        assert_eq!(snapshot.iter().count(), 3);
    }

    #[test]
    fn empty_frame_is_all_zero() {
        let classes = ClassMap::coco();
        let snapshot = aggregate(&DetectionSet::default(), &classes).unwrap();
        assert_eq!(snapshot, StatisticsSnapshot::empty(&classes));
        assert_eq!(snapshot.total(), 0);
        assert_eq!(snapshot.summary(), "no detections");
    }

    #[test]
    fn unknown_class_is_schema_error() {
        let classes = ClassMap::new(["person", "car"]).unwrap();
        let set = DetectionSet::new(vec![detection(0), detection(5)]);
        assert!(matches!(
            aggregate(&set, &classes),
            Err(PipelineError::Schema {
                class_id: 5,
                known: 2
            })
        ));
    }

    #[test]
    fn ranked_and_summary_views() {
        let classes = ClassMap::new(["person", "bicycle", "car", "dog"]).unwrap();
        let set = DetectionSet::new(vec![
            detection(2),
            detection(0),
            detection(0),
            detection(3),
        ]);
        let snapshot = aggregate(&set, &classes).unwrap();
        assert_eq!(snapshot.ranked(), vec![("person", 2), ("car", 1), ("dog", 1)]);
        assert_eq!(snapshot.summary(), "2 persons, 1 car, 1 dog");
    }
}
