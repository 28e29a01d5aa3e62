//! Frame ingestion sources.
//!
//! This module provides `FrameSource`, a single handle over every kind of
//! frame producer:
//! - Still images (png/jpeg/bmp) through the `image` crate
//! - Local video files (feature: ingest-file-ffmpeg)
//! - USB/V4L2 cameras addressed by device index (feature: ingest-v4l2)
//! - Synthetic `stub://` sources (testing and demos)
//!
//! A source is opened from a `SourceDescriptor`, yields frames in acquisition
//! order, and owns its device/file handle until `close()` (or drop). Camera
//! sources are infinite; video files end when exhausted; images yield one frame.
//! Exhaustion is reported as `Ok(None)`, never as an error.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{AcquisitionErrorKind, PipelineError};
use crate::frame::Frame;

pub mod file;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;
#[cfg_attr(not(feature = "ingest-v4l2"), allow(dead_code))]
pub(crate) mod normalize;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub(crate) mod v4l2;

pub use file::{classify_path, FileKind};
pub use synthetic::synthetic_handle_open;

use file::StillImageSource;
#[cfg(feature = "ingest-file-ffmpeg")]
use file_ffmpeg::FfmpegVideoSource;
use synthetic::SyntheticSource;
#[cfg(feature = "ingest-v4l2")]
use v4l2::V4l2Camera;

/// What to read frames from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceDescriptor {
    /// Capture device by index (`0` is the first camera).
    Device(u32),
    /// Image or video file, or a `stub://` synthetic source.
    Path(PathBuf),
}

impl SourceDescriptor {
    /// Short name for status lines: "Webcam" for devices, the file name otherwise.
    pub fn display_name(&self) -> String {
        match self {
            SourceDescriptor::Device(0) => "Webcam".to_string(),
            SourceDescriptor::Device(index) => format!("Webcam {}", index),
            SourceDescriptor::Path(path) => {
                if is_synthetic(path) {
                    return path.display().to_string();
                }
                path.file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string())
            }
        }
    }
}

impl FromStr for SourceDescriptor {
    type Err = PipelineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        if value.is_empty() {
            return Err(PipelineError::configuration(
                "source",
                "source descriptor must not be empty",
            ));
        }
        if value.bytes().all(|b| b.is_ascii_digit()) {
            let index = value.parse::<u32>().map_err(|e| {
                PipelineError::configuration("source", format!("invalid device index: {}", e))
            })?;
            return Ok(SourceDescriptor::Device(index));
        }
        Ok(SourceDescriptor::Path(PathBuf::from(value)))
    }
}

impl fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceDescriptor::Device(index) => write!(f, "{}", index),
            SourceDescriptor::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Capture parameters for live and synthetic sources.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaptureSettings {
    /// Preferred frame width.
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
    /// Target frame rate (frames per second).
    pub target_fps: u32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            target_fps: 30,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    Camera,
    Video,
    Image,
}

/// Statistics for an open (or closed) source.
#[derive(Clone, Debug)]
pub struct SourceStats {
    pub frames_read: u64,
    pub descriptor: String,
    pub open: bool,
}

pub struct FrameSource {
    descriptor: SourceDescriptor,
    kind: SourceKind,
    backend: Option<SourceBackend>,
    frames_read: u64,
}

enum SourceBackend {
    Synthetic(SyntheticSource),
    Still(StillImageSource),
    #[cfg(feature = "ingest-file-ffmpeg")]
    Video(FfmpegVideoSource),
    #[cfg(feature = "ingest-v4l2")]
    Camera(V4l2Camera),
}

impl FrameSource {
    /// Open the source a descriptor names and take ownership of its handle.
    pub fn open(
        descriptor: &SourceDescriptor,
        settings: &CaptureSettings,
    ) -> Result<Self, PipelineError> {
        let (kind, backend) = match descriptor {
            SourceDescriptor::Device(index) => open_device(*index, settings)?,
            SourceDescriptor::Path(path) if is_synthetic(path) => {
                let source = SyntheticSource::open(&path.to_string_lossy(), settings)?;
                (source.kind(), SourceBackend::Synthetic(source))
            }
            SourceDescriptor::Path(path) => open_file(path, settings)?,
        };
        log::info!("FrameSource: opened {} ({:?})", descriptor, kind);
        Ok(Self {
            descriptor: descriptor.clone(),
            kind,
            backend: Some(backend),
            frames_read: 0,
        })
    }

    /// Read the next frame. `Ok(None)` means the source is exhausted or closed.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, PipelineError> {
        let Some(backend) = self.backend.as_mut() else {
            return Ok(None);
        };
        let frame = match backend {
            SourceBackend::Synthetic(source) => source.next_frame()?,
            SourceBackend::Still(source) => source.next_frame()?,
            #[cfg(feature = "ingest-file-ffmpeg")]
            SourceBackend::Video(source) => source.next_frame()?,
            #[cfg(feature = "ingest-v4l2")]
            SourceBackend::Camera(source) => source.next_frame()?,
        };
        Ok(frame.map(|frame| {
            let frame = frame.with_sequence(self.frames_read);
            self.frames_read += 1;
            frame
        }))
    }

    /// Release the underlying handle. Idempotent; safe before any read.
    pub fn close(&mut self) {
        if let Some(backend) = self.backend.take() {
            match backend {
                SourceBackend::Synthetic(mut source) => source.release(),
                SourceBackend::Still(source) => drop(source),
                #[cfg(feature = "ingest-file-ffmpeg")]
                SourceBackend::Video(source) => drop(source),
                #[cfg(feature = "ingest-v4l2")]
                SourceBackend::Camera(source) => drop(source),
            }
            log::info!(
                "FrameSource: closed {} after {} frames",
                self.descriptor,
                self.frames_read
            );
        }
    }

    pub fn is_open(&self) -> bool {
        self.backend.is_some()
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    pub fn stats(&self) -> SourceStats {
        SourceStats {
            frames_read: self.frames_read,
            descriptor: self.descriptor.to_string(),
            open: self.is_open(),
        }
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.close();
    }
}

fn is_synthetic(path: &Path) -> bool {
    path.to_string_lossy().starts_with("stub://")
}

#[cfg(feature = "ingest-v4l2")]
fn open_device(
    index: u32,
    settings: &CaptureSettings,
) -> Result<(SourceKind, SourceBackend), PipelineError> {
    let camera = V4l2Camera::open(index, settings)?;
    Ok((SourceKind::Camera, SourceBackend::Camera(camera)))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn open_device(
    index: u32,
    _settings: &CaptureSettings,
) -> Result<(SourceKind, SourceBackend), PipelineError> {
    Err(PipelineError::acquisition(
        AcquisitionErrorKind::Unsupported,
        format!("device {}", index),
        "camera capture requires the ingest-v4l2 feature",
    ))
}

fn open_file(
    path: &Path,
    settings: &CaptureSettings,
) -> Result<(SourceKind, SourceBackend), PipelineError> {
    let resource = path.display().to_string();
    if !path.exists() {
        return Err(PipelineError::acquisition(
            AcquisitionErrorKind::PathNotFound,
            resource,
            "no such file",
        ));
    }
    match classify_path(path) {
        Some(FileKind::Image) => {
            let source = StillImageSource::open(path)?;
            Ok((SourceKind::Image, SourceBackend::Still(source)))
        }
        Some(FileKind::Video) => open_video(path, settings),
        None => Err(PipelineError::acquisition(
            AcquisitionErrorKind::Unsupported,
            resource,
            "unrecognized file extension",
        )),
    }
}

#[cfg(feature = "ingest-file-ffmpeg")]
fn open_video(
    path: &Path,
    settings: &CaptureSettings,
) -> Result<(SourceKind, SourceBackend), PipelineError> {
    let source = FfmpegVideoSource::open(path, settings)?;
    Ok((SourceKind::Video, SourceBackend::Video(source)))
}

#[cfg(not(feature = "ingest-file-ffmpeg"))]
fn open_video(
    path: &Path,
    _settings: &CaptureSettings,
) -> Result<(SourceKind, SourceBackend), PipelineError> {
    Err(PipelineError::acquisition(
        AcquisitionErrorKind::Unsupported,
        path.display().to_string(),
        "video decoding requires the ingest-file-ffmpeg feature",
    ))
}
