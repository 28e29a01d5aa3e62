use anyhow::Result;

use crate::detect::backend::Detector;
use crate::detect::labels::ClassMap;
use crate::detect::result::RawDetection;
use crate::preprocess::{InputSize, PreprocessedTensor};

/// Scripted backend for tests and dry runs.
///
/// Each call to `detect` returns the next entry of the script. Once the script
/// is exhausted it returns no detections, or starts over when cycling.
pub struct StubBackend {
    classes: ClassMap,
    input_size: InputSize,
    script: Vec<Vec<RawDetection>>,
    cursor: usize,
    cycle: bool,
    calls: u64,
}

impl StubBackend {
    pub fn new(classes: ClassMap, input_size: InputSize) -> Self {
        Self {
            classes,
            input_size,
            script: Vec::new(),
            cursor: 0,
            cycle: false,
            calls: 0,
        }
    }

    pub fn with_script(mut self, script: Vec<Vec<RawDetection>>) -> Self {
        self.script = script;
        self.cursor = 0;
        self
    }

    /// Replay the script from the start once it runs out.
    pub fn cycling(mut self) -> Self {
        self.cycle = true;
        self
    }

    /// Number of `detect` calls so far.
    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl Detector for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn classes(&self) -> &ClassMap {
        &self.classes
    }

    fn input_size(&self) -> InputSize {
        self.input_size
    }

    fn detect(&mut self, _tensor: &PreprocessedTensor) -> Result<Vec<RawDetection>> {
        self.calls += 1;
        if self.cursor >= self.script.len() {
            if !self.cycle || self.script.is_empty() {
                return Ok(Vec::new());
            }
            self.cursor = 0;
        }
        let detections = self.script[self.cursor].clone();
        self.cursor += 1;
        Ok(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use crate::preprocess::preprocess;

    fn tensor() -> PreprocessedTensor {
        let frame = Frame::from_rgb(vec![0; 4 * 4 * 3], 4, 4).unwrap();
        preprocess(&frame, InputSize::square(32))
    }

    #[test]
    fn replays_script_then_goes_quiet() {
        let hit = RawDetection::new([1.0, 1.0, 5.0, 5.0], 0.9, 0);
        let mut backend = StubBackend::new(ClassMap::coco(), InputSize::square(32))
            .with_script(vec![vec![hit], vec![]]);
        let input = tensor();

        assert_eq!(backend.detect(&input).unwrap(), vec![hit]);
        assert!(backend.detect(&input).unwrap().is_empty());
        assert!(backend.detect(&input).unwrap().is_empty());
        assert_eq!(backend.calls(), 3);
    }

    #[test]
    fn cycling_script_starts_over() {
        let a = RawDetection::new([1.0, 1.0, 5.0, 5.0], 0.9, 0);
        let b = RawDetection::new([2.0, 2.0, 6.0, 6.0], 0.8, 2);
        let mut backend = StubBackend::new(ClassMap::coco(), InputSize::square(32))
            .with_script(vec![vec![a], vec![b]])
            .cycling();
        let input = tensor();

        let seen: Vec<usize> = (0..4)
            .map(|_| backend.detect(&input).unwrap()[0].class_id)
            .collect();
        assert_eq!(seen, vec![0, 2, 0, 2]);
    }
}
