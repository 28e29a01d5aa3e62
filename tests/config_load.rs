use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::{Builder, NamedTempFile};

use detstream::{AppConfig, DeviceSelector, InputSize, SourceDescriptor};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "DETSTREAM_CONFIG",
        "DETSTREAM_SOURCE",
        "DETSTREAM_WEIGHTS",
        "DETSTREAM_CONF_THRES",
        "DETSTREAM_IOU_THRES",
        "DETSTREAM_MAX_DET",
        "DETSTREAM_DEVICE",
        "DETSTREAM_LABELS",
        "DETSTREAM_PACING_MS",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let cfg = AppConfig::load().expect("load defaults");
    assert_eq!(cfg.pipeline.source, SourceDescriptor::Device(0));
    assert_eq!(cfg.pipeline.source.display_name(), "Webcam");
    assert_eq!(cfg.pipeline.weights, PathBuf::from("./yolov5s.onnx"));
    assert_eq!(cfg.pipeline.confidence_threshold, 0.25);
    assert_eq!(cfg.pipeline.iou_threshold, 0.45);
    assert_eq!(cfg.pipeline.max_detections, 1000);
    assert_eq!(cfg.pipeline.input_size, InputSize::square(640));
    assert_eq!(cfg.labels.len(), 80);
    assert_eq!(cfg.pacing, Duration::from_millis(25));
    assert_eq!(cfg.annotation.line_thickness, 3);
}

#[test]
fn loads_json_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "source": "clips/street.mp4",
        "weights": "models/best.onnx",
        "conf_thres": 0.4,
        "max_det": 50,
        "img_size": 600,
        "classes": [0, 2],
        "agnostic_nms": true,
        "labels": ["person", "bicycle", "car"],
        "capture": { "width": 1280, "height": 720, "target_fps": 15 },
        "annotation": { "line_thickness": 2, "hide_conf": true },
        "subscriber_capacity": 8
    }"#;
    file.write_all(json.as_bytes()).expect("write config");

    std::env::set_var("DETSTREAM_CONFIG", file.path());
    std::env::set_var("DETSTREAM_CONF_THRES", "0.6");
    std::env::set_var("DETSTREAM_DEVICE", "cuda:1");
    std::env::set_var("DETSTREAM_PACING_MS", "0");

    let cfg = AppConfig::load().expect("load config");

    assert_eq!(
        cfg.pipeline.source,
        SourceDescriptor::Path(PathBuf::from("clips/street.mp4"))
    );
    assert_eq!(cfg.pipeline.source.display_name(), "street.mp4");
    assert_eq!(cfg.pipeline.weights, PathBuf::from("models/best.onnx"));
    assert_eq!(cfg.pipeline.confidence_threshold, 0.6);
    assert_eq!(cfg.pipeline.max_detections, 50);
    // Rounded up to the model stride.
    assert_eq!(cfg.pipeline.input_size, InputSize::square(608));
    assert_eq!(cfg.pipeline.classes, Some(vec![0, 2]));
    assert!(cfg.pipeline.agnostic_nms);
    assert_eq!(cfg.pipeline.device, DeviceSelector::Accelerator(1));
    assert_eq!(cfg.labels.name(2), Some("car"));
    assert_eq!(cfg.capture.width, 1280);
    assert_eq!(cfg.capture.target_fps, 15);
    assert_eq!(cfg.annotation.line_thickness, 2);
    assert!(cfg.annotation.hide_conf);
    assert!(!cfg.annotation.hide_labels);
    assert_eq!(cfg.pacing, Duration::ZERO);
    assert_eq!(cfg.subscriber_capacity, 8);

    clear_env();
}

#[test]
fn loads_toml_file_with_label_file() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let mut labels = NamedTempFile::new().expect("temp labels");
    labels
        .write_all(b"# custom model\nhelmet\n\nvest\n")
        .expect("write labels");

    let mut file = Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp toml config");
    let toml = format!(
        "source = \"1\"\niou_thres = 0.5\n\n[labels]\npath = \"{}\"\n",
        labels.path().display()
    );
    file.write_all(toml.as_bytes()).expect("write config");

    let cfg = AppConfig::load_from(file.path()).expect("load toml");
    assert_eq!(cfg.pipeline.source, SourceDescriptor::Device(1));
    assert_eq!(cfg.pipeline.iou_threshold, 0.5);
    assert_eq!(cfg.labels.len(), 2);
    assert_eq!(cfg.labels.name(1), Some("vest"));

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    std::env::set_var("DETSTREAM_CONF_THRES", "1.5");
    assert!(AppConfig::load().is_err());
    clear_env();

    std::env::set_var("DETSTREAM_MAX_DET", "many");
    assert!(AppConfig::load().is_err());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    file.write_all(br#"{ "labels": ["a", "b"], "classes": [5] }"#)
        .expect("write config");
    std::env::set_var("DETSTREAM_CONFIG", file.path());
    assert!(AppConfig::load().is_err());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    file.write_all(br#"{ "unknown_key": 1 }"#).expect("write config");
    std::env::set_var("DETSTREAM_CONFIG", file.path());
    assert!(AppConfig::load().is_err());
    clear_env();
}
