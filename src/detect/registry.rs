use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::detect::backend::{Detector, DeviceSelector};
use crate::detect::labels::ClassMap;
use crate::error::{ModelLoadErrorKind, PipelineError};
use crate::preprocess::InputSize;

/// Everything a backend needs to build a detector.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelSpec {
    pub weights: PathBuf,
    pub input_size: InputSize,
    pub classes: ClassMap,
    pub device: DeviceSelector,
}

pub type DetectorFactory =
    dyn Fn(&ModelSpec) -> Result<Box<dyn Detector>, PipelineError> + Send + Sync;

/// Named detector factories.
///
/// The first registered backend becomes the default used for `cpu`.
/// Accelerator ordinals route to a backend registered as `cuda`.
pub struct BackendRegistry {
    factories: BTreeMap<String, Arc<DetectorFactory>>,
    default_name: Option<String>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
            default_name: None,
        }
    }

    /// Registry with the backends compiled into this build. `tract` is the
    /// default when present. The no-op `stub` detector is only
    /// registered in test builds or with the `stub-detector` feature, so a
    /// build without a real backend fails `cpu` loads as BackendUnavailable.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        #[cfg(feature = "backend-tract")]
        registry.register("tract", |spec: &ModelSpec| {
            crate::detect::backends::TractBackend::load(spec)
                .map(|backend| Box::new(backend) as Box<dyn Detector>)
        });
        #[cfg(any(test, feature = "stub-detector"))]
        registry.register("stub", |spec: &ModelSpec| {
            Ok(Box::new(crate::detect::backends::StubBackend::new(
                spec.classes.clone(),
                spec.input_size,
            )) as Box<dyn Detector>)
        });
        registry
    }

    /// Register a factory. The first registered backend becomes the default.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&ModelSpec) -> Result<Box<dyn Detector>, PipelineError> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.default_name.is_none() {
            self.default_name = Some(name.clone());
        }
        self.factories.insert(name, Arc::new(factory));
    }

    pub fn set_default(&mut self, name: &str) -> Result<(), PipelineError> {
        if !self.factories.contains_key(name) {
            return Err(PipelineError::configuration(
                "device",
                format!("backend '{}' not registered", name),
            ));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    pub fn default_backend(&self) -> Option<&str> {
        self.default_name.as_deref()
    }

    pub fn list(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    /// Backend name a device selector resolves to.
    pub fn resolve(&self, device: &DeviceSelector) -> Result<String, PipelineError> {
        match device {
            DeviceSelector::Cpu => self.default_name.clone().ok_or_else(|| {
                PipelineError::model_load(
                    ModelLoadErrorKind::BackendUnavailable,
                    "",
                    "no detector backends registered",
                )
            }),
            DeviceSelector::Accelerator(index) => {
                if self.factories.contains_key("cuda") {
                    Ok("cuda".to_string())
                } else {
                    Err(PipelineError::model_load(
                        ModelLoadErrorKind::BackendUnavailable,
                        "",
                        format!(
                            "accelerator cuda:{} requested but no cuda backend is built",
                            index
                        ),
                    ))
                }
            }
            DeviceSelector::Runtime(name) => {
                if self.factories.contains_key(name) {
                    Ok(name.clone())
                } else {
                    Err(PipelineError::configuration(
                        "device",
                        format!(
                            "unknown backend '{}' (available: {})",
                            name,
                            self.list().join(", ")
                        ),
                    ))
                }
            }
        }
    }

    /// Build and warm up a detector for `spec`.
    ///
    /// A missing weights file is reported before any backend runs.
    pub fn load(&self, spec: &ModelSpec) -> Result<Box<dyn Detector>, PipelineError> {
        let weights = spec.weights.display().to_string();
        let name = self.resolve(&spec.device).map_err(|err| match err {
            PipelineError::ModelLoad { kind, detail, .. } => PipelineError::ModelLoad {
                kind,
                weights: weights.clone(),
                detail,
            },
            other => other,
        })?;
        if !spec.weights.is_file() {
            return Err(PipelineError::model_load(
                ModelLoadErrorKind::FileNotFound,
                weights,
                "weights file does not exist",
            ));
        }
        let factory = self.factories.get(&name).ok_or_else(|| {
            PipelineError::model_load(
                ModelLoadErrorKind::BackendUnavailable,
                &weights,
                format!("backend '{}' not registered", name),
            )
        })?;

        let mut detector = factory(spec)?;
        detector.warm_up().map_err(|e| {
            PipelineError::model_load(
                ModelLoadErrorKind::IncompatibleFormat,
                &weights,
                format!("warm-up failed: {:#}", e),
            )
        })?;
        log::info!("detector '{}' loaded from {}", detector.name(), weights);
        Ok(detector)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backends::StubBackend;
    use tempfile::NamedTempFile;

    fn spec(weights: PathBuf, device: DeviceSelector) -> ModelSpec {
        ModelSpec {
            weights,
            input_size: InputSize::square(64),
            classes: ClassMap::coco(),
            device,
        }
    }

    #[test]
    fn first_registered_backend_is_default() {
        let mut registry = BackendRegistry::new();
        registry.register("stub", |s: &ModelSpec| {
            Ok(Box::new(StubBackend::new(s.classes.clone(), s.input_size)) as Box<dyn Detector>)
        });
        registry.register("other", |s: &ModelSpec| {
            Ok(Box::new(StubBackend::new(s.classes.clone(), s.input_size)) as Box<dyn Detector>)
        });
        assert_eq!(registry.default_backend(), Some("stub"));
        registry.set_default("other").unwrap();
        assert_eq!(registry.default_backend(), Some("other"));
        assert!(registry.set_default("missing").is_err());
    }

    #[test]
    fn cpu_without_backends_is_unavailable() {
        let weights = NamedTempFile::new().unwrap();
        let err = BackendRegistry::new()
            .load(&spec(weights.path().to_path_buf(), DeviceSelector::Cpu))
            .err()
            .unwrap();
        assert!(matches!(
            err,
            PipelineError::ModelLoad {
                kind: ModelLoadErrorKind::BackendUnavailable,
                ..
            }
        ));
    }

    #[test]
    fn missing_weights_is_file_not_found() {
        let registry = BackendRegistry::with_builtin();
        let err = registry
            .load(&spec(
                PathBuf::from("/nonexistent/model.onnx"),
                DeviceSelector::Runtime("stub".into()),
            ))
            .err()
            .unwrap();
        assert!(matches!(
            err,
            PipelineError::ModelLoad {
                kind: ModelLoadErrorKind::FileNotFound,
                ..
            }
        ));
    }

    #[test]
    fn accelerator_without_cuda_backend_is_unavailable() {
        let weights = NamedTempFile::new().unwrap();
        let registry = BackendRegistry::with_builtin();
        let err = registry
            .load(&spec(
                weights.path().to_path_buf(),
                DeviceSelector::Accelerator(0),
            ))
            .err()
            .unwrap();
        match err {
            PipelineError::ModelLoad { kind, weights: w, .. } => {
                assert_eq!(kind, ModelLoadErrorKind::BackendUnavailable);
                assert_eq!(w, weights.path().display().to_string());
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn unknown_runtime_is_configuration_error() {
        let weights = NamedTempFile::new().unwrap();
        let registry = BackendRegistry::with_builtin();
        let err = registry
            .load(&spec(
                weights.path().to_path_buf(),
                DeviceSelector::Runtime("openvino".into()),
            ))
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::Configuration { .. }));
    }

    #[test]
    fn loads_stub_backend_by_name() {
        let weights = NamedTempFile::new().unwrap();
        let registry = BackendRegistry::with_builtin();
        let detector = registry
            .load(&spec(
                weights.path().to_path_buf(),
                DeviceSelector::Runtime("stub".into()),
            ))
            .unwrap();
        assert_eq!(detector.name(), "stub");
        assert_eq!(detector.input_size(), InputSize::square(64));
    }
}
