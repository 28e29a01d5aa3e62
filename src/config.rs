use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::annotate::AnnotationStyle;
use crate::detect::{ClassMap, DeviceSelector};
use crate::error::PipelineError;
use crate::fanout::DEFAULT_CAPACITY;
use crate::ingest::{CaptureSettings, SourceDescriptor};
use crate::pipeline::RunOptions;
use crate::postprocess::NmsParams;
use crate::preprocess::InputSize;

const DEFAULT_SOURCE: &str = "0";
const DEFAULT_WEIGHTS: &str = "./yolov5s.onnx";
const DEFAULT_CONF_THRES: f32 = 0.25;
const DEFAULT_IOU_THRES: f32 = 0.45;
const DEFAULT_MAX_DET: usize = 1000;
const DEFAULT_IMG_SIZE: u32 = 640;
const DEFAULT_LINE_THICKNESS: u32 = 3;
/// 40 frames per second at most.
const DEFAULT_PACING_MS: u64 = 25;
pub const MODEL_STRIDE: u32 = 32;

/// Runtime configuration of one pipeline.
///
/// Threshold and source changes apply while running; weights, device and input
/// size are read when a run starts.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineConfig {
    pub source: SourceDescriptor,
    pub weights: PathBuf,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
    pub device: DeviceSelector,
    pub input_size: InputSize,
    /// Keep only these class ids.
    pub classes: Option<Vec<usize>>,
    pub agnostic_nms: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source: SourceDescriptor::Device(0),
            weights: PathBuf::from(DEFAULT_WEIGHTS),
            confidence_threshold: DEFAULT_CONF_THRES,
            iou_threshold: DEFAULT_IOU_THRES,
            max_detections: DEFAULT_MAX_DET,
            device: DeviceSelector::Cpu,
            input_size: InputSize::square(DEFAULT_IMG_SIZE),
            classes: None,
            agnostic_nms: false,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        check_unit_interval("confidence_threshold", self.confidence_threshold)?;
        check_unit_interval("iou_threshold", self.iou_threshold)?;
        if self.max_detections == 0 {
            return Err(PipelineError::configuration(
                "max_detections",
                "must be greater than zero",
            ));
        }
        if self.weights.as_os_str().is_empty() {
            return Err(PipelineError::configuration("weights", "weights path must not be empty"));
        }
        if self.input_size.width == 0 || self.input_size.height == 0 {
            return Err(PipelineError::configuration("input_size", "must be non-zero"));
        }
        if let Some(classes) = &self.classes {
            if classes.is_empty() {
                return Err(PipelineError::configuration(
                    "classes",
                    "class filter must name at least one class",
                ));
            }
        }
        Ok(())
    }

    pub fn nms_params(&self) -> NmsParams {
        NmsParams {
            confidence_threshold: self.confidence_threshold,
            iou_threshold: self.iou_threshold,
            max_detections: self.max_detections,
            class_agnostic: self.agnostic_nms,
            classes: self.classes.clone(),
        }
    }
}

pub(crate) fn check_unit_interval(field: &str, value: f32) -> Result<(), PipelineError> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(PipelineError::configuration(
            field,
            format!("{} is outside [0, 1]", value),
        ));
    }
    Ok(())
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct AppConfigFile {
    source: Option<String>,
    weights: Option<PathBuf>,
    conf_thres: Option<f32>,
    iou_thres: Option<f32>,
    max_det: Option<usize>,
    device: Option<String>,
    img_size: Option<u32>,
    classes: Option<Vec<usize>>,
    agnostic_nms: Option<bool>,
    labels: Option<LabelsConfigFile>,
    capture: Option<CaptureConfigFile>,
    annotation: Option<AnnotationConfigFile>,
    pacing_ms: Option<u64>,
    schema_errors_fatal: Option<bool>,
    subscriber_capacity: Option<usize>,
}

/// Labels inline or from a newline-separated file.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LabelsConfigFile {
    Inline(Vec<String>),
    File { path: PathBuf },
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct AnnotationConfigFile {
    line_thickness: Option<u32>,
    hide_labels: Option<bool>,
    hide_conf: Option<bool>,
}

/// Everything the `detstream` binary needs to build a controller.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub pipeline: PipelineConfig,
    pub labels: ClassMap,
    pub capture: CaptureSettings,
    pub annotation: AnnotationStyle,
    pub pacing: Duration,
    pub schema_errors_fatal: bool,
    pub subscriber_capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            labels: ClassMap::coco(),
            capture: CaptureSettings::default(),
            annotation: AnnotationStyle {
                line_thickness: DEFAULT_LINE_THICKNESS,
                ..AnnotationStyle::default()
            },
            pacing: Duration::from_millis(DEFAULT_PACING_MS),
            schema_errors_fatal: false,
            subscriber_capacity: DEFAULT_CAPACITY,
        }
    }
}

impl AppConfig {
    /// Defaults, then the file named by `DETSTREAM_CONFIG`, then `DETSTREAM_*`
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("DETSTREAM_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Same as `load` but from an explicit file, still honoring env overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut cfg = Self::from_file(read_config_file(path)?)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: AppConfigFile) -> Result<Self> {
        let defaults = Self::default();
        let source = match file.source {
            Some(source) => source.parse()?,
            None => DEFAULT_SOURCE.parse()?,
        };
        let device = match file.device {
            Some(device) => device.parse()?,
            None => DeviceSelector::Cpu,
        };
        let labels = match file.labels {
            Some(LabelsConfigFile::Inline(names)) => ClassMap::new(names)?,
            Some(LabelsConfigFile::File { path }) => read_labels(&path)?,
            None => defaults.labels,
        };
        let img_size = file.img_size.unwrap_or(DEFAULT_IMG_SIZE);

        let pipeline = PipelineConfig {
            source,
            weights: file.weights.unwrap_or(defaults.pipeline.weights),
            confidence_threshold: file.conf_thres.unwrap_or(DEFAULT_CONF_THRES),
            iou_threshold: file.iou_thres.unwrap_or(DEFAULT_IOU_THRES),
            max_detections: file.max_det.unwrap_or(DEFAULT_MAX_DET),
            device,
            input_size: InputSize::square(img_size),
            classes: file.classes,
            agnostic_nms: file.agnostic_nms.unwrap_or(false),
        };

        let capture_file = file.capture.unwrap_or_default();
        let capture = CaptureSettings {
            width: capture_file.width.unwrap_or(defaults.capture.width),
            height: capture_file.height.unwrap_or(defaults.capture.height),
            target_fps: capture_file.target_fps.unwrap_or(defaults.capture.target_fps),
        };

        let annotation_file = file.annotation.unwrap_or_default();
        let annotation = AnnotationStyle {
            line_thickness: annotation_file
                .line_thickness
                .unwrap_or(DEFAULT_LINE_THICKNESS),
            hide_labels: annotation_file.hide_labels.unwrap_or(false),
            hide_conf: annotation_file.hide_conf.unwrap_or(false),
        };

        Ok(Self {
            pipeline,
            labels,
            capture,
            annotation,
            pacing: file
                .pacing_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.pacing),
            schema_errors_fatal: file.schema_errors_fatal.unwrap_or(false),
            subscriber_capacity: file
                .subscriber_capacity
                .unwrap_or(defaults.subscriber_capacity),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(source) = std::env::var("DETSTREAM_SOURCE") {
            if !source.trim().is_empty() {
                self.pipeline.source = source.parse()?;
            }
        }
        if let Ok(weights) = std::env::var("DETSTREAM_WEIGHTS") {
            if !weights.trim().is_empty() {
                self.pipeline.weights = PathBuf::from(weights);
            }
        }
        if let Ok(conf) = std::env::var("DETSTREAM_CONF_THRES") {
            self.pipeline.confidence_threshold = conf
                .trim()
                .parse()
                .map_err(|_| anyhow!("DETSTREAM_CONF_THRES must be a number in [0, 1]"))?;
        }
        if let Ok(iou) = std::env::var("DETSTREAM_IOU_THRES") {
            self.pipeline.iou_threshold = iou
                .trim()
                .parse()
                .map_err(|_| anyhow!("DETSTREAM_IOU_THRES must be a number in [0, 1]"))?;
        }
        if let Ok(max_det) = std::env::var("DETSTREAM_MAX_DET") {
            self.pipeline.max_detections = max_det
                .trim()
                .parse()
                .map_err(|_| anyhow!("DETSTREAM_MAX_DET must be a positive integer"))?;
        }
        if let Ok(device) = std::env::var("DETSTREAM_DEVICE") {
            self.pipeline.device = device.parse()?;
        }
        if let Ok(labels) = std::env::var("DETSTREAM_LABELS") {
            if !labels.trim().is_empty() {
                self.labels = read_labels(Path::new(labels.trim()))?;
            }
        }
        if let Ok(pacing) = std::env::var("DETSTREAM_PACING_MS") {
            let millis: u64 = pacing.trim().parse().map_err(|_| {
                anyhow!("DETSTREAM_PACING_MS must be an integer number of milliseconds")
            })?;
            self.pacing = Duration::from_millis(millis);
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.pipeline.validate()?;
        self.pipeline.input_size = self.pipeline.input_size.aligned_to(MODEL_STRIDE);
        if let Some(classes) = &self.pipeline.classes {
            if let Some(bad) = classes.iter().find(|id| **id >= self.labels.len()) {
                return Err(PipelineError::configuration(
                    "classes",
                    format!("class id {} is outside the {} labels", bad, self.labels.len()),
                )
                .into());
            }
        }
        if self.annotation.line_thickness == 0 {
            return Err(anyhow!("annotation line_thickness must be at least 1"));
        }
        Ok(())
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            pacing: self.pacing,
            schema_errors_fatal: self.schema_errors_fatal,
            annotation: self.annotation.clone(),
            capture: self.capture.clone(),
            labels: self.labels.clone(),
        }
    }
}

fn read_config_file(path: &Path) -> Result<AppConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

/// One class name per line; blank lines and `#` comments are skipped.
fn read_labels(path: &Path) -> Result<ClassMap> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read labels file {}", path.display()))?;
    let names = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'));
    Ok(ClassMap::new(names)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_tool() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.source, SourceDescriptor::Device(0));
        assert_eq!(cfg.confidence_threshold, 0.25);
        assert_eq!(cfg.iou_threshold, 0.45);
        assert_eq!(cfg.max_detections, 1000);
        assert_eq!(cfg.input_size, InputSize::square(640));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_thresholds() {
        for bad in [-0.1, 1.5, f32::NAN] {
            let cfg = PipelineConfig {
                confidence_threshold: bad,
                ..PipelineConfig::default()
            };
            assert!(matches!(
                cfg.validate(),
                Err(PipelineError::Configuration { .. })
            ));
        }
        let cfg = PipelineConfig {
            max_detections: 0,
            ..PipelineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn nms_params_carry_filter_options() {
        let cfg = PipelineConfig {
            classes: Some(vec![0, 2]),
            agnostic_nms: true,
            ..PipelineConfig::default()
        };
        let params = cfg.nms_params();
        assert!(params.class_agnostic);
        assert_eq!(params.classes, Some(vec![0, 2]));
        assert_eq!(params.max_detections, 1000);
    }
}
