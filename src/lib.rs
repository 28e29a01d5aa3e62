//! detstream
//!
//! Continuous object detection over camera and file sources.
//!
//! # Architecture
//!
//! Each cycle moves one frame through a fixed chain of stages:
//!
//! ```text
//! FrameSource -> preprocess -> Detector -> postprocess -> {annotate, aggregate} -> OutputFanout
//! ```
//!
//! A `PipelineController` owns the worker thread that runs this chain, the
//! runtime configuration it reads each cycle, and the lifecycle state machine
//! (`Idle -> Running -> Terminating -> Stopped`). Consumers subscribe to the
//! fanout and receive one `OutputTriple` per frame: the annotated frame, the
//! untouched raw frame, and the per-class statistics, all built from the same
//! detection set.
//!
//! # Module Structure
//!
//! - `ingest`: frame sources (image files, FFmpeg video, V4L2 cameras, `stub://`)
//! - `preprocess`: letterboxing into model tensors
//! - `detect`: detector capability, label maps, backend registry
//! - `postprocess`: confidence filter, NMS, rescale
//! - `stats`, `annotate`: per-frame outputs
//! - `fanout`: bounded drop-oldest delivery
//! - `pipeline`: controller and worker
//! - `display`: aspect-preserving fit for presentation layers

pub mod annotate;
pub mod config;
pub mod detect;
pub mod display;
pub mod error;
pub mod fanout;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod postprocess;
pub mod preprocess;
pub mod stats;

pub use annotate::{annotate, AnnotationStyle};
pub use config::{AppConfig, PipelineConfig};
pub use detect::{
    BackendRegistry, ClassMap, Detection, DetectionSet, Detector, DeviceSelector, ModelSpec,
    PixelBox, RawDetection, StubBackend,
};
pub use error::{AcquisitionErrorKind, ErrorCategory, ModelLoadErrorKind, PipelineError, Stage};
pub use fanout::{DeliveryReport, OutputFanout, OutputTriple, PipelineEvent, Subscription};
pub use frame::{Frame, PixelLayout};
pub use ingest::{synthetic_handle_open, CaptureSettings, FrameSource, SourceDescriptor, SourceKind};
pub use pipeline::{
    PipelineController, PipelineState, RunEnd, RunOptions, RunSummary, StageTimings, StartOutcome,
};
pub use postprocess::{non_max_suppression, postprocess, NmsParams};
pub use preprocess::{preprocess, InputSize, Letterbox, PreprocessedTensor};
pub use stats::{aggregate, StatisticsSnapshot};
