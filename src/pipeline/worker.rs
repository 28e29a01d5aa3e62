use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};

use crate::annotate::annotate;
use crate::detect::Detector;
use crate::error::PipelineError;
use crate::fanout::{OutputFanout, OutputTriple, PipelineEvent};
use crate::ingest::FrameSource;
use crate::postprocess::postprocess;
use crate::preprocess::preprocess;
use crate::stats::aggregate;

use super::controller::Shared;
use super::{PipelineState, RunEnd, RunOptions, RunSummary, StageTimings};

pub(super) enum Cycle {
    Published,
    Exhausted,
}

/// Everything one run owns. Built by `start()`, consumed by the worker thread.
pub(super) struct Worker {
    pub(super) shared: Arc<Shared>,
    pub(super) fanout: Arc<OutputFanout>,
    pub(super) source: FrameSource,
    pub(super) detector: Box<dyn Detector>,
    pub(super) options: RunOptions,
    pub(super) stop: Receiver<()>,
    frames: u64,
    schema_errors: u64,
    dropped: u64,
    timings: StageTimings,
}

/// Marks the run stopped if teardown itself unwinds.
struct StoppedOnExit(Arc<Shared>);

impl Drop for StoppedOnExit {
    fn drop(&mut self) {
        if std::thread::panicking() {
            log::error!("pipeline worker panicked during teardown; marking run stopped");
            self.0.set_state(PipelineState::Stopped);
        }
    }
}

fn panic_detail(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|msg| msg.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

impl Worker {
    pub(super) fn new(
        shared: Arc<Shared>,
        fanout: Arc<OutputFanout>,
        source: FrameSource,
        detector: Box<dyn Detector>,
        options: RunOptions,
        stop: Receiver<()>,
    ) -> Self {
        Self {
            shared,
            fanout,
            source,
            detector,
            options,
            stop,
            frames: 0,
            schema_errors: 0,
            dropped: 0,
            timings: StageTimings::default(),
        }
    }

    /// Thread body. Returns once the run has ended and the source is closed.
    pub(super) fn run(mut self) {
        let _guard = StoppedOnExit(self.shared.clone());
        let source_name = self.source.descriptor().display_name();
        log::info!(
            "run started: source={} detector={}",
            source_name,
            self.detector.name()
        );

        // A panicking stage ends the run through the same teardown as an error.
        let end = match panic::catch_unwind(AssertUnwindSafe(|| self.run_loop())) {
            Ok(end) => end,
            Err(payload) => RunEnd::Failed(PipelineError::WorkerPanic {
                detail: panic_detail(payload.as_ref()),
            }),
        };

        self.source.close();
        let summary = RunSummary {
            source: source_name,
            frames_processed: self.frames,
            schema_errors: self.schema_errors,
            dropped_deliveries: self.dropped,
            average_timings: self.timings.averaged(self.frames),
            end,
        };
        match &summary.end {
            RunEnd::Failed(err) => log::error!(
                "run failed after {} frames: {}",
                summary.frames_processed,
                err
            ),
            end => log::info!(
                "run ended ({:?}) after {} frames, avg {}",
                end,
                summary.frames_processed,
                summary.average_timings
            ),
        }

        self.shared.record_run(summary.clone());
        self.fanout.publish(PipelineEvent::RunEnded(summary));
        self.shared.set_state(PipelineState::Stopped);
    }

    fn run_loop(&mut self) -> RunEnd {
        loop {
            if self.stop_requested() {
                return RunEnd::Stopped;
            }
            match self.run_cycle() {
                Ok(Cycle::Published) => {}
                Ok(Cycle::Exhausted) => return RunEnd::Exhausted,
                Err(err) => return RunEnd::Failed(err),
            }
            if self.pace() {
                return RunEnd::Stopped;
            }
        }
    }

    /// `stop()` moves the state to Terminating before it signals, so either
    /// one counts as a request.
    fn stop_requested(&self) -> bool {
        if self.shared.state() == PipelineState::Terminating {
            return true;
        }
        match self.stop.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => true,
            Err(TryRecvError::Empty) => false,
        }
    }

    /// Sleep out the pacing interval. Returns true when a stop arrived.
    fn pace(&self) -> bool {
        if self.options.pacing.is_zero() {
            return false;
        }
        match self.stop.recv_timeout(self.options.pacing) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) => false,
        }
    }

    /// One frame through every stage. Thresholds are read once per cycle,
    /// after acquisition, so a change lands on the next frame pulled and
    /// never mid-frame.
    pub(super) fn run_cycle(&mut self) -> Result<Cycle, PipelineError> {
        let Some(frame) = self.source.next_frame()? else {
            return Ok(Cycle::Exhausted);
        };
        let params = self.shared.config_snapshot().nms_params();

        let started = Instant::now();
        let tensor = preprocess(&frame, self.detector.input_size());
        let preprocessed = Instant::now();

        let raw = self
            .detector
            .detect(&tensor)
            .map_err(|e| PipelineError::Inference {
                backend: self.detector.name().to_string(),
                detail: format!("{:#}", e),
            })?;
        let inferred = Instant::now();

        let detections = postprocess(&raw, &params, tensor.letterbox());
        let suppressed = Instant::now();

        let classes = self.detector.classes();
        let statistics = aggregate(&detections, classes);
        if let Err(err) = &statistics {
            self.schema_errors += 1;
            log::warn!("frame {}: {}", frame.sequence, err);
            if self.options.schema_errors_fatal {
                return Err(err.clone());
            }
        }
        let annotated = annotate(&frame, &detections, classes, &self.options.annotation);
        let finished = Instant::now();

        let timings = StageTimings {
            preprocess: preprocessed - started,
            inference: inferred - preprocessed,
            postprocess: suppressed - inferred,
            annotate: finished - suppressed,
        };
        self.timings.accumulate(&timings);
        self.frames += 1;

        if let Ok(snapshot) = &statistics {
            log::debug!(
                "frame {}: {} ({})",
                frame.sequence,
                snapshot.summary(),
                timings
            );
        }

        let triple = OutputTriple {
            sequence: frame.sequence,
            annotated: Arc::new(annotated),
            raw: Arc::new(frame),
            detections: Arc::new(detections),
            statistics,
            timings,
        };
        let report = self.fanout.publish(PipelineEvent::Frame(Arc::new(triple)));
        self.dropped += report.dropped as u64;
        Ok(Cycle::Published)
    }
}
