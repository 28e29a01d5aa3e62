use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;

use crate::config::{check_unit_interval, PipelineConfig};
use crate::detect::{BackendRegistry, DeviceSelector, ModelSpec};
use crate::error::PipelineError;
use crate::fanout::{OutputFanout, Subscription};
use crate::ingest::{FrameSource, SourceDescriptor};

use super::worker::Worker;
use super::{PipelineState, RunOptions, RunSummary, StartOutcome};

/// State shared between the controller and its worker.
pub(crate) struct Shared {
    config: RwLock<PipelineConfig>,
    state: Mutex<PipelineState>,
    state_changed: Condvar,
    last_run: Mutex<Option<RunSummary>>,
}

impl Shared {
    pub(crate) fn new(config: PipelineConfig) -> Self {
        Self {
            config: RwLock::new(config),
            state: Mutex::new(PipelineState::Idle),
            state_changed: Condvar::new(),
            last_run: Mutex::new(None),
        }
    }

    pub(crate) fn config_snapshot(&self) -> PipelineConfig {
        self.config
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub(crate) fn update_config(&self, apply: impl FnOnce(&mut PipelineConfig)) {
        let mut config = self
            .config
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        apply(&mut config);
    }

    fn lock_state(&self) -> MutexGuard<'_, PipelineState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn state(&self) -> PipelineState {
        *self.lock_state()
    }

    pub(crate) fn set_state(&self, next: PipelineState) {
        let mut state = self.lock_state();
        if *state != next {
            log::debug!("pipeline state {} -> {}", *state, next);
            *state = next;
            self.state_changed.notify_all();
        }
    }

    /// Move to `next` only from `from`. Returns whether it moved.
    fn transition(&self, from: PipelineState, next: PipelineState) -> bool {
        let mut state = self.lock_state();
        if *state != from {
            return false;
        }
        log::debug!("pipeline state {} -> {}", *state, next);
        *state = next;
        self.state_changed.notify_all();
        true
    }

    fn wait_for(&self, target: PipelineState, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock_state();
        while *state != target {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = match self.state_changed.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }

    pub(crate) fn record_run(&self, summary: RunSummary) {
        *self
            .last_run
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(summary);
    }

    pub(crate) fn last_run(&self) -> Option<RunSummary> {
        self.last_run
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

struct ActiveRun {
    thread: JoinHandle<()>,
    stop: Sender<()>,
}

/// Owns the lifecycle of one detection pipeline.
///
/// `start`, `stop` and `select_source` are serialized, so at most one worker
/// (and one open source) exists per controller. Dropping the controller stops
/// any active run.
pub struct PipelineController {
    shared: Arc<Shared>,
    registry: Arc<BackendRegistry>,
    options: RunOptions,
    fanout: Arc<OutputFanout>,
    control: Mutex<Option<ActiveRun>>,
}

impl PipelineController {
    pub fn new(
        config: PipelineConfig,
        registry: Arc<BackendRegistry>,
        options: RunOptions,
    ) -> Self {
        Self {
            shared: Arc::new(Shared::new(config)),
            registry,
            options,
            fanout: Arc::new(OutputFanout::new()),
            control: Mutex::new(None),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.shared.state()
    }

    /// Block until the pipeline reaches `state`. Returns false on timeout.
    pub fn wait_for_state(&self, state: PipelineState, timeout: Duration) -> bool {
        self.shared.wait_for(state, timeout)
    }

    /// Summary of the most recent finished run.
    pub fn last_run(&self) -> Option<RunSummary> {
        self.shared.last_run()
    }

    pub fn config(&self) -> PipelineConfig {
        self.shared.config_snapshot()
    }

    pub fn subscribe(&self, capacity: usize) -> Subscription {
        self.fanout.subscribe(capacity)
    }

    /// Load the detector, open the source and spawn the worker.
    ///
    /// On error nothing was started and the state is unchanged.
    pub fn start(&self) -> Result<StartOutcome, PipelineError> {
        let mut control = self.lock_control();
        self.start_locked(&mut control)
    }

    /// Stop the active run, waiting for its current cycle to finish and its
    /// source to close. Returns `None` when nothing was running.
    pub fn stop(&self) -> Option<RunSummary> {
        let mut control = self.lock_control();
        self.stop_locked(&mut control)
    }

    /// Switch sources. While running this stops the current run, releasing its
    /// source, and starts a new one on `source`.
    pub fn select_source(&self, source: SourceDescriptor) -> Result<(), PipelineError> {
        let mut control = self.lock_control();
        let was_running = self.shared.state() == PipelineState::Running;
        self.stop_locked(&mut control);
        log::info!("source selected: {}", source.display_name());
        self.shared.update_config(|cfg| cfg.source = source);
        if was_running {
            self.start_locked(&mut control)?;
        }
        Ok(())
    }

    /// Takes effect on the next start.
    pub fn select_weights(&self, weights: impl Into<PathBuf>) -> Result<(), PipelineError> {
        let weights = weights.into();
        if weights.as_os_str().is_empty() {
            return Err(PipelineError::configuration("weights", "weights path must not be empty"));
        }
        log::info!("weights selected: {}", weights.display());
        self.shared.update_config(|cfg| cfg.weights = weights);
        Ok(())
    }

    /// Takes effect on the next start.
    pub fn select_device(&self, device: DeviceSelector) {
        log::info!("device selected: {}", device);
        self.shared.update_config(|cfg| cfg.device = device);
    }

    /// Takes effect from the next cycle of an active run.
    pub fn set_confidence_threshold(&self, threshold: f32) -> Result<(), PipelineError> {
        check_unit_interval("confidence_threshold", threshold)?;
        self.shared
            .update_config(|cfg| cfg.confidence_threshold = threshold);
        Ok(())
    }

    fn lock_control(&self) -> MutexGuard<'_, Option<ActiveRun>> {
        self.control
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn start_locked(&self, control: &mut Option<ActiveRun>) -> Result<StartOutcome, PipelineError> {
        if self.shared.state() == PipelineState::Running {
            log::warn!("start requested while already running; ignoring");
            return Ok(StartOutcome::AlreadyRunning);
        }
        // A run that ended on its own leaves a finished thread behind.
        if let Some(previous) = control.take() {
            join_run(previous);
        }

        let config = self.shared.config_snapshot();
        config.validate()?;

        let spec = ModelSpec {
            weights: config.weights.clone(),
            input_size: config.input_size,
            classes: self.options.labels.clone(),
            device: config.device.clone(),
        };
        let detector = self.registry.load(&spec)?;
        let source = FrameSource::open(&config.source, &self.options.capture)?;

        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
        let worker = Worker::new(
            self.shared.clone(),
            self.fanout.clone(),
            source,
            detector,
            self.options.clone(),
            stop_rx,
        );

        self.launch(control, worker, stop_tx, spawn_worker)
    }

    /// Hand the worker to a thread. `Running` is set before the spawn so a
    /// run that ends immediately still finishes in `Stopped`; a failed spawn
    /// puts the previous state back.
    fn launch<S>(
        &self,
        control: &mut Option<ActiveRun>,
        worker: Worker,
        stop: Sender<()>,
        spawn: S,
    ) -> Result<StartOutcome, PipelineError>
    where
        S: FnOnce(Worker) -> io::Result<JoinHandle<()>>,
    {
        let previous = self.shared.state();
        self.shared.set_state(PipelineState::Running);
        match spawn(worker) {
            Ok(thread) => {
                *control = Some(ActiveRun { thread, stop });
                Ok(StartOutcome::Started)
            }
            Err(e) => {
                // The failed spawn dropped the worker, and with it the source.
                self.shared.set_state(previous);
                Err(PipelineError::configuration(
                    "worker",
                    format!("failed to spawn worker thread: {}", e),
                ))
            }
        }
    }

    fn stop_locked(&self, control: &mut Option<ActiveRun>) -> Option<RunSummary> {
        let run = control.take()?;
        if !self
            .shared
            .transition(PipelineState::Running, PipelineState::Terminating)
        {
            // The run already ended by itself; reap it without reporting a stop.
            join_run(run);
            return None;
        }
        log::info!("stopping pipeline");
        let _ = run.stop.try_send(());
        join_run(run);
        self.shared.last_run()
    }
}

fn join_run(run: ActiveRun) {
    drop(run.stop);
    if run.thread.join().is_err() {
        log::error!("pipeline worker exited by panic");
    }
}

fn spawn_worker(worker: Worker) -> io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("detstream-worker".to_string())
        .spawn(move || worker.run())
}

impl Drop for PipelineController {
    fn drop(&mut self) {
        let mut control = self.lock_control();
        self.stop_locked(&mut control);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{ClassMap, StubBackend};
    use crate::ingest::{synthetic_handle_open, CaptureSettings};
    use crate::preprocess::InputSize;

    #[test]
    fn failed_spawn_leaves_state_unchanged() {
        let controller = PipelineController::new(
            PipelineConfig::default(),
            Arc::new(BackendRegistry::new()),
            RunOptions::default(),
        );
        let descriptor: SourceDescriptor = "stub://camera/controller-spawn".parse().unwrap();
        let source = FrameSource::open(&descriptor, &CaptureSettings::default()).unwrap();
        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
        let worker = Worker::new(
            controller.shared.clone(),
            controller.fanout.clone(),
            source,
            Box::new(StubBackend::new(ClassMap::coco(), InputSize::square(64))),
            RunOptions::default(),
            stop_rx,
        );

        let mut control = controller.lock_control();
        let err = controller
            .launch(&mut control, worker, stop_tx, |worker| {
                drop(worker);
                Err(io::Error::new(io::ErrorKind::Other, "thread limit reached"))
            })
            .unwrap_err();
        assert!(control.is_none());
        drop(control);

        assert!(matches!(err, PipelineError::Configuration { .. }));
        assert_eq!(controller.state(), PipelineState::Idle);
        assert!(!synthetic_handle_open("controller-spawn"));
        assert!(controller.last_run().is_none());
    }
}
