//! Run loop, lifecycle and control surface.
//!
//! A `PipelineController` owns at most one worker thread at a time. The worker
//! performs the whole cycle sequentially (acquire, preprocess, infer,
//! postprocess, annotate, aggregate, publish) and releases its source before
//! the controller reports `Stopped`.

mod controller;
mod worker;

use std::fmt;
use std::time::Duration;

use crate::annotate::AnnotationStyle;
use crate::detect::ClassMap;
use crate::error::PipelineError;
use crate::ingest::CaptureSettings;

pub use controller::PipelineController;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Running,
    /// Stop requested; the worker is finishing its current cycle.
    Terminating,
    Stopped,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Idle => "idle",
            PipelineState::Running => "running",
            PipelineState::Terminating => "terminating",
            PipelineState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// A run was already active; nothing changed.
    AlreadyRunning,
}

/// How a run ended.
#[derive(Clone, Debug)]
pub enum RunEnd {
    /// `stop()` (or a source switch) ended it.
    Stopped,
    /// The source ran out of frames.
    Exhausted,
    Failed(PipelineError),
}

impl RunEnd {
    pub fn is_failed(&self) -> bool {
        matches!(self, RunEnd::Failed(_))
    }

    pub fn error(&self) -> Option<&PipelineError> {
        match self {
            RunEnd::Failed(err) => Some(err),
            _ => None,
        }
    }
}

/// Time spent in each stage of a cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StageTimings {
    pub preprocess: Duration,
    pub inference: Duration,
    pub postprocess: Duration,
    pub annotate: Duration,
}

impl StageTimings {
    pub fn total(&self) -> Duration {
        self.preprocess + self.inference + self.postprocess + self.annotate
    }

    fn accumulate(&mut self, other: &StageTimings) {
        self.preprocess += other.preprocess;
        self.inference += other.inference;
        self.postprocess += other.postprocess;
        self.annotate += other.annotate;
    }

    fn averaged(&self, frames: u64) -> StageTimings {
        let Ok(frames) = u32::try_from(frames) else {
            return StageTimings::default();
        };
        if frames == 0 {
            return StageTimings::default();
        }
        StageTimings {
            preprocess: self.preprocess / frames,
            inference: self.inference / frames,
            postprocess: self.postprocess / frames,
            annotate: self.annotate / frames,
        }
    }
}

impl fmt::Display for StageTimings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.1}ms pre-process, {:.1}ms inference, {:.1}ms NMS, {:.1}ms annotate",
            self.preprocess.as_secs_f64() * 1e3,
            self.inference.as_secs_f64() * 1e3,
            self.postprocess.as_secs_f64() * 1e3,
            self.annotate.as_secs_f64() * 1e3,
        )
    }
}

/// Outcome of one run, from `start()` to the worker exiting.
#[derive(Clone, Debug)]
pub struct RunSummary {
    /// Display name of the source the run read from.
    pub source: String,
    pub frames_processed: u64,
    pub schema_errors: u64,
    /// Events evicted from slow subscribers' queues.
    pub dropped_deliveries: u64,
    pub average_timings: StageTimings,
    pub end: RunEnd,
}

/// Settings fixed for the lifetime of a controller.
#[derive(Clone, Debug)]
pub struct RunOptions {
    /// Minimum delay between cycles; zero disables pacing.
    pub pacing: Duration,
    /// End the run on the first class id the label map does not know.
    pub schema_errors_fatal: bool,
    pub annotation: AnnotationStyle,
    pub capture: CaptureSettings,
    pub labels: ClassMap,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            pacing: Duration::from_millis(25),
            schema_errors_fatal: false,
            annotation: AnnotationStyle::default(),
            capture: CaptureSettings::default(),
            labels: ClassMap::coco(),
        }
    }
}
