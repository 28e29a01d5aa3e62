//! detstream - run a detection pipeline from the command line.
//!
//! Reads configuration (file named by `DETSTREAM_CONFIG` or `--config`, then
//! `DETSTREAM_*` env vars, then flags), starts the pipeline, and logs the
//! per-frame statistics until the source is exhausted, `--seconds` elapse, or
//! Ctrl-C is pressed. `--snapshot` writes the last annotated frame as PNG.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use detstream::display::scale_for_display;
use detstream::{
    AppConfig, BackendRegistry, Frame, PipelineController, PipelineEvent, RunEnd,
    SourceDescriptor,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Object detection over camera and file sources")]
struct Args {
    /// JSON or TOML config file.
    #[arg(long, env = "DETSTREAM_CONFIG")]
    config: Option<PathBuf>,

    /// Camera index (`0`) or image/video path.
    #[arg(long)]
    source: Option<String>,

    /// Model weights.
    #[arg(long)]
    weights: Option<PathBuf>,

    #[arg(long)]
    conf_thres: Option<f32>,

    #[arg(long)]
    iou_thres: Option<f32>,

    /// `cpu`, an accelerator ordinal (`0`, `cuda:0`), or a backend name.
    #[arg(long)]
    device: Option<String>,

    /// Stop after this many seconds.
    #[arg(long)]
    seconds: Option<u64>,

    /// Write the last annotated frame here as PNG.
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Fit the snapshot into a WIDTHxHEIGHT box.
    #[arg(long, value_parser = parse_box)]
    display: Option<(u32, u32)>,

    #[arg(long)]
    hide_labels: bool,

    #[arg(long)]
    hide_conf: bool,

    /// Milliseconds between cycles; 0 disables pacing.
    #[arg(long)]
    pacing_ms: Option<u64>,
}

fn parse_box(value: &str) -> Result<(u32, u32), String> {
    let (w, h) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{}'", value))?;
    let w = w.trim().parse::<u32>().map_err(|e| e.to_string())?;
    let h = h.trim().parse::<u32>().map_err(|e| e.to_string())?;
    if w == 0 || h == 0 {
        return Err("display box must be non-empty".to_string());
    }
    Ok((w, h))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = match &args.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };
    apply_args(&mut cfg, &args)?;

    let registry = Arc::new(BackendRegistry::with_builtin());
    log::info!(
        "backends: {} (default {})",
        registry.list().join(", "),
        registry.default_backend().unwrap_or("none")
    );

    let controller = PipelineController::new(cfg.pipeline.clone(), registry, cfg.run_options());
    let events = controller.subscribe(cfg.subscriber_capacity);

    let (tx, rx) = crossbeam_channel::bounded(1);
    ctrlc::set_handler(move || {
        let _ = tx.try_send(());
    })
    .context("error setting Ctrl-C handler")?;

    log::info!(
        "starting: source={} weights={} conf={:.2}",
        cfg.pipeline.source.display_name(),
        cfg.pipeline.weights.display(),
        cfg.pipeline.confidence_threshold
    );
    controller.start()?;

    let deadline = args.seconds.map(|s| Instant::now() + Duration::from_secs(s));
    let mut last_annotated: Option<Arc<Frame>> = None;
    let mut stop_requested = false;

    let summary = loop {
        if !stop_requested {
            let interrupted = rx.try_recv().is_ok();
            let timed_out = deadline.map_or(false, |d| Instant::now() >= d);
            if interrupted || timed_out {
                log::info!("stop requested, finishing current frame...");
                stop_requested = true;
                if let Some(summary) = controller.stop() {
                    break summary;
                }
            }
        }

        match events.recv_timeout(Duration::from_millis(100)) {
            Some(PipelineEvent::Frame(triple)) => {
                match &triple.statistics {
                    Ok(stats) => {
                        let ranked: Vec<String> = stats
                            .ranked()
                            .into_iter()
                            .map(|(name, count)| format!("{}: {}", name, count))
                            .collect();
                        log::info!("frame {}: [{}]", triple.sequence, ranked.join(", "));
                    }
                    Err(err) => log::warn!("frame {}: {}", triple.sequence, err),
                }
                last_annotated = Some(triple.annotated.clone());
            }
            Some(PipelineEvent::RunEnded(summary)) => break summary,
            None => {}
        }
    };

    log::info!(
        "processed {} frames from {} (avg {}), {} schema errors, {} dropped deliveries",
        summary.frames_processed,
        summary.source,
        summary.average_timings,
        summary.schema_errors,
        summary.dropped_deliveries
    );

    if let Some(path) = &args.snapshot {
        match &last_annotated {
            Some(frame) => write_snapshot(frame, path, args.display)?,
            None => log::warn!("no frame processed, snapshot not written"),
        }
    }

    match summary.end {
        RunEnd::Failed(err) => Err(anyhow!(err)),
        RunEnd::Stopped | RunEnd::Exhausted => Ok(()),
    }
}

fn apply_args(cfg: &mut AppConfig, args: &Args) -> Result<()> {
    if let Some(source) = &args.source {
        cfg.pipeline.source = source.parse::<SourceDescriptor>()?;
    }
    if let Some(weights) = &args.weights {
        cfg.pipeline.weights = weights.clone();
    }
    if let Some(conf) = args.conf_thres {
        cfg.pipeline.confidence_threshold = conf;
    }
    if let Some(iou) = args.iou_thres {
        cfg.pipeline.iou_threshold = iou;
    }
    if let Some(device) = &args.device {
        cfg.pipeline.device = device.parse()?;
    }
    if let Some(pacing) = args.pacing_ms {
        cfg.pacing = Duration::from_millis(pacing);
    }
    cfg.annotation.hide_labels |= args.hide_labels;
    cfg.annotation.hide_conf |= args.hide_conf;
    cfg.pipeline.validate()?;
    Ok(())
}

fn write_snapshot(frame: &Frame, path: &Path, display: Option<(u32, u32)>) -> Result<()> {
    let scaled = match display {
        Some((width, height)) => scale_for_display(frame, width, height)
            .ok_or_else(|| anyhow!("cannot fit {}x{} frame", frame.width, frame.height))?,
        None => frame.clone(),
    };
    scaled
        .to_image()
        .save(path)
        .with_context(|| format!("failed to write snapshot {}", path.display()))?;
    log::info!(
        "snapshot written to {} ({}x{})",
        path.display(),
        scaled.width,
        scaled.height
    );
    Ok(())
}
