#![cfg(feature = "backend-tract")]

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::Detector;
use crate::detect::labels::ClassMap;
use crate::detect::registry::ModelSpec;
use crate::detect::result::RawDetection;
use crate::error::{ModelLoadErrorKind, PipelineError};
use crate::preprocess::{InputSize, PreprocessedTensor};

/// Candidates scoring below this never leave the backend.
const CANDIDATE_FLOOR: f32 = 0.001;

/// Tract-based backend for YOLOv5 ONNX exports.
///
/// Expects a single output of shape `[1, N, 5 + C]` where each row is
/// `cx, cy, w, h, objectness, class scores...` in input pixel space.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    classes: ClassMap,
    input_size: InputSize,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn load(spec: &ModelSpec) -> Result<Self, PipelineError> {
        let weights = spec.weights.display().to_string();
        let is_onnx = spec
            .weights
            .extension()
            .and_then(|ext| ext.to_str())
            .map_or(false, |ext| ext.eq_ignore_ascii_case("onnx"));
        if !is_onnx {
            return Err(PipelineError::model_load(
                ModelLoadErrorKind::IncompatibleFormat,
                weights,
                "tract backend only loads .onnx exports",
            ));
        }

        let input = spec.input_size;
        let model = tract_onnx::onnx()
            .model_for_path(&spec.weights)
            .and_then(|model| {
                model.with_input_fact(
                    0,
                    InferenceFact::dt_shape(
                        f32::datum_type(),
                        tvec!(1, 3, input.height as usize, input.width as usize),
                    ),
                )
            })
            .and_then(|model| model.into_optimized())
            .and_then(|model| model.into_runnable())
            .map_err(|e| {
                PipelineError::model_load(ModelLoadErrorKind::IncompatibleFormat, &weights, e)
            })?;

        log::info!(
            "tract: loaded {} ({}x{}, {} classes)",
            weights,
            input.width,
            input.height,
            spec.classes.len()
        );

        Ok(Self {
            model,
            classes: spec.classes.clone(),
            input_size: input,
        })
    }

    fn build_input(&self, tensor: &PreprocessedTensor) -> Result<Tensor> {
        let [batch, channels, height, width] = tensor.shape();
        if (width as u32, height as u32) != (self.input_size.width, self.input_size.height) {
            return Err(anyhow!(
                "tensor size {}x{} does not match model input {}x{}",
                width,
                height,
                self.input_size.width,
                self.input_size.height
            ));
        }
        let input = tract_ndarray::Array4::from_shape_vec(
            (batch, channels, height, width),
            tensor.data().to_vec(),
        )
        .context("preprocessed tensor has inconsistent shape")?;
        Ok(input.into_tensor())
    }

    fn decode(&self, outputs: TVec<TValue>) -> Result<Vec<RawDetection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let shape = output.shape();
        let row_len = *shape
            .last()
            .ok_or_else(|| anyhow!("model output is a scalar"))?;
        if row_len < 6 {
            return Err(anyhow!("unexpected output shape {:?}", shape));
        }
        let values = output
            .as_slice::<f32>()
            .context("model output tensor was not f32")?;

        let mut detections = Vec::new();
        for row in values.chunks_exact(row_len) {
            let objectness = row[4];
            if objectness < CANDIDATE_FLOOR {
                continue;
            }
            let (class_id, class_score) = row[5..]
                .iter()
                .copied()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |best, (id, score)| {
                    if score > best.1 {
                        (id, score)
                    } else {
                        best
                    }
                });
            let confidence = objectness * class_score;
            if confidence < CANDIDATE_FLOOR {
                continue;
            }
            detections.push(RawDetection::from_center(
                row[0], row[1], row[2], row[3], confidence, class_id,
            ));
        }
        Ok(detections)
    }
}

impl Detector for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn classes(&self) -> &ClassMap {
        &self.classes
    }

    fn input_size(&self) -> InputSize {
        self.input_size
    }

    fn detect(&mut self, tensor: &PreprocessedTensor) -> Result<Vec<RawDetection>> {
        let input = self.build_input(tensor)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs)
    }
}
