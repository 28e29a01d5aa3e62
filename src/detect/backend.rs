use std::fmt;
use std::str::FromStr;

use anyhow::Result;

use crate::detect::labels::ClassMap;
use crate::detect::result::RawDetection;
use crate::error::PipelineError;
use crate::preprocess::{InputSize, PreprocessedTensor};

/// Where inference should run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum DeviceSelector {
    /// The registry's default CPU backend.
    #[default]
    Cpu,
    /// Accelerator by ordinal (`0`, `cuda:1`).
    Accelerator(u32),
    /// A backend registered under this name (`tract`, `stub`, ...).
    Runtime(String),
}

impl FromStr for DeviceSelector {
    type Err = PipelineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim().to_ascii_lowercase();
        if value.is_empty() || value == "cpu" {
            return Ok(DeviceSelector::Cpu);
        }
        let ordinal = value.strip_prefix("cuda:").unwrap_or(&value);
        if !ordinal.is_empty() && ordinal.bytes().all(|b| b.is_ascii_digit()) {
            let index = ordinal.parse::<u32>().map_err(|e| {
                PipelineError::configuration("device", format!("invalid device ordinal: {}", e))
            })?;
            return Ok(DeviceSelector::Accelerator(index));
        }
        if value.starts_with("cuda:") {
            return Err(PipelineError::configuration(
                "device",
                format!("invalid accelerator selector '{}'", value),
            ));
        }
        Ok(DeviceSelector::Runtime(value))
    }
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSelector::Cpu => f.write_str("cpu"),
            DeviceSelector::Accelerator(index) => write!(f, "cuda:{}", index),
            DeviceSelector::Runtime(name) => f.write_str(name),
        }
    }
}

/// Detection capability.
///
/// A detector receives one preprocessed tensor per call and returns raw
/// candidates in model-input pixel space. Confidence filtering, suppression
/// and rescaling happen downstream, so implementations should return every
/// candidate they consider plausible.
pub trait Detector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Labels the model's class ids index into.
    fn classes(&self) -> &ClassMap;

    /// Spatial size of the tensors this detector expects.
    fn input_size(&self) -> InputSize;

    /// Run inference on one tensor.
    fn detect(&mut self, tensor: &PreprocessedTensor) -> Result<Vec<RawDetection>>;

    /// Optional warm-up hook, run once after loading.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_device_selectors() {
        assert_eq!("".parse::<DeviceSelector>().unwrap(), DeviceSelector::Cpu);
        assert_eq!("CPU".parse::<DeviceSelector>().unwrap(), DeviceSelector::Cpu);
        assert_eq!(
            "0".parse::<DeviceSelector>().unwrap(),
            DeviceSelector::Accelerator(0)
        );
        assert_eq!(
            "cuda:2".parse::<DeviceSelector>().unwrap(),
            DeviceSelector::Accelerator(2)
        );
        assert_eq!(
            "tract".parse::<DeviceSelector>().unwrap(),
            DeviceSelector::Runtime("tract".into())
        );
        assert!("cuda:x".parse::<DeviceSelector>().is_err());
    }

    #[test]
    fn selector_display_round_trips() {
        for text in ["cpu", "cuda:1", "stub"] {
            let selector: DeviceSelector = text.parse().unwrap();
            assert_eq!(selector.to_string(), text);
        }
    }
}
