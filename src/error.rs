//! Error taxonomy for the detection pipeline.
//!
//! Every error names the stage and the resource it concerns so an owner can
//! tell configuration mistakes (bad path, bad device) from transient
//! conditions (device busy, disconnect) and from model/code defects
//! (label-map mismatch).

use std::fmt;

use thiserror::Error;

/// Why a frame source could not be opened or read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquisitionErrorKind {
    /// The file or device node does not exist.
    PathNotFound,
    /// The device exists but is busy or cannot be opened right now.
    DeviceUnavailable,
    /// The descriptor names a format or source type this build cannot read.
    Unsupported,
    /// Decoding or capturing a frame failed.
    Read,
    /// A live source went away mid-run.
    Disconnected,
}

impl fmt::Display for AcquisitionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::PathNotFound => "path not found",
            Self::DeviceUnavailable => "device busy or unavailable",
            Self::Unsupported => "unsupported source",
            Self::Read => "read failure",
            Self::Disconnected => "source disconnected",
        };
        f.write_str(label)
    }
}

/// Why a detector backend failed to initialize.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelLoadErrorKind {
    FileNotFound,
    IncompatibleFormat,
    BackendUnavailable,
}

impl fmt::Display for ModelLoadErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::FileNotFound => "weights file not found",
            Self::IncompatibleFormat => "incompatible weights format",
            Self::BackendUnavailable => "backend unavailable",
        };
        f.write_str(label)
    }
}

/// Pipeline stage an error originated from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Configuration,
    Acquisition,
    ModelLoad,
    Inference,
    Statistics,
    Delivery,
    /// The worker thread itself, outside any one stage's error path.
    Worker,
}

/// Coarse grouping used when reporting errors to an owner.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad path, bad device, bad threshold: the owner must change something.
    Configuration,
    /// Busy device, disconnect, slow consumer: retrying may succeed.
    Transient,
    /// Model/label mismatch or backend failure: a defect to investigate.
    Defect,
}

#[derive(Clone, Debug, Error)]
pub enum PipelineError {
    #[error("acquisition error on {resource}: {kind}: {detail}")]
    Acquisition {
        kind: AcquisitionErrorKind,
        resource: String,
        detail: String,
    },

    #[error("configuration error in {field}: {detail}")]
    Configuration { field: String, detail: String },

    #[error("model load error for {weights}: {kind}: {detail}")]
    ModelLoad {
        kind: ModelLoadErrorKind,
        weights: String,
        detail: String,
    },

    #[error("schema error: class id {class_id} is outside the label map ({known} classes)")]
    Schema { class_id: usize, known: usize },

    #[error("inference failed in backend {backend}: {detail}")]
    Inference { backend: String, detail: String },

    #[error("delivery to subscriber #{subscriber} failed: {detail}")]
    Delivery { subscriber: usize, detail: String },

    #[error("pipeline worker panicked: {detail}")]
    WorkerPanic { detail: String },
}

impl PipelineError {
    pub fn acquisition(
        kind: AcquisitionErrorKind,
        resource: impl Into<String>,
        detail: impl fmt::Display,
    ) -> Self {
        Self::Acquisition {
            kind,
            resource: resource.into(),
            detail: detail.to_string(),
        }
    }

    pub fn configuration(field: impl Into<String>, detail: impl fmt::Display) -> Self {
        Self::Configuration {
            field: field.into(),
            detail: detail.to_string(),
        }
    }

    pub fn model_load(
        kind: ModelLoadErrorKind,
        weights: impl Into<String>,
        detail: impl fmt::Display,
    ) -> Self {
        Self::ModelLoad {
            kind,
            weights: weights.into(),
            detail: detail.to_string(),
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            Self::Acquisition { .. } => Stage::Acquisition,
            Self::Configuration { .. } => Stage::Configuration,
            Self::ModelLoad { .. } => Stage::ModelLoad,
            Self::Schema { .. } => Stage::Statistics,
            Self::Inference { .. } => Stage::Inference,
            Self::Delivery { .. } => Stage::Delivery,
            Self::WorkerPanic { .. } => Stage::Worker,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Acquisition { kind, .. } => match kind {
                AcquisitionErrorKind::PathNotFound | AcquisitionErrorKind::Unsupported => {
                    ErrorCategory::Configuration
                }
                AcquisitionErrorKind::DeviceUnavailable
                | AcquisitionErrorKind::Read
                | AcquisitionErrorKind::Disconnected => ErrorCategory::Transient,
            },
            Self::ModelLoad { kind, .. } => match kind {
                ModelLoadErrorKind::FileNotFound => ErrorCategory::Configuration,
                ModelLoadErrorKind::IncompatibleFormat | ModelLoadErrorKind::BackendUnavailable => {
                    ErrorCategory::Defect
                }
            },
            Self::Schema { .. } | Self::Inference { .. } | Self::WorkerPanic { .. } => {
                ErrorCategory::Defect
            }
            Self::Delivery { .. } => ErrorCategory::Transient,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquisition_errors_separate_missing_paths_from_busy_devices() {
        let missing = PipelineError::acquisition(
            AcquisitionErrorKind::PathNotFound,
            "clip.mp4",
            "no such file",
        );
        let busy = PipelineError::acquisition(
            AcquisitionErrorKind::DeviceUnavailable,
            "/dev/video0",
            "EBUSY",
        );

        assert_eq!(missing.stage(), Stage::Acquisition);
        assert_eq!(missing.category(), ErrorCategory::Configuration);
        assert_eq!(busy.category(), ErrorCategory::Transient);
        assert!(busy.to_string().contains("/dev/video0"));
        assert!(busy.to_string().contains("device busy"));
    }

    #[test]
    fn schema_errors_are_defects() {
        let err = PipelineError::Schema {
            class_id: 91,
            known: 80,
        };
        assert_eq!(err.stage(), Stage::Statistics);
        assert_eq!(err.category(), ErrorCategory::Defect);
        assert!(err.to_string().contains("91"));
    }

    #[test]
    fn model_load_error_names_the_weights() {
        let err = PipelineError::model_load(
            ModelLoadErrorKind::FileNotFound,
            "weights/yolov5s.onnx",
            "missing",
        );
        assert_eq!(err.category(), ErrorCategory::Configuration);
        assert!(err.to_string().contains("weights/yolov5s.onnx"));
    }
}
