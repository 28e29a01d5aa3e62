//! Synthetic `stub://` frame sources.
//!
//! Descriptor grammar: `stub://<kind>/<name>[?key=value&...]`
//! - `kind`: `camera` (infinite), `video` (finite, `frames=N`, default 30),
//!   `image` (one frame)
//! - `fail_after=N`: the N+1-th read fails with a disconnect
//! - `interval_ms=N`: each read blocks for N ms, like a camera waiting on
//!   its next exposure
//!
//! Each name behaves like an exclusive device handle: a second open of the
//! same name fails as busy until the first is released.

use std::collections::BTreeSet;
use std::sync::Mutex;
use std::time::Duration;

use super::{CaptureSettings, SourceKind};
use crate::error::{AcquisitionErrorKind, PipelineError};
use crate::frame::Frame;

const DEFAULT_VIDEO_FRAMES: u64 = 30;

static OPEN_HANDLES: Mutex<BTreeSet<String>> = Mutex::new(BTreeSet::new());

/// True while a synthetic source with this name holds its handle.
pub fn synthetic_handle_open(name: &str) -> bool {
    OPEN_HANDLES
        .lock()
        .map(|handles| handles.contains(name))
        .unwrap_or(false)
}

pub(crate) struct SyntheticSource {
    name: String,
    kind: SourceKind,
    frame_limit: Option<u64>,
    fail_after: Option<u64>,
    interval: Duration,
    settings: CaptureSettings,
    frame_count: u64,
    scene_state: u8,
    holds_handle: bool,
}

impl SyntheticSource {
    pub(crate) fn open(
        descriptor: &str,
        settings: &CaptureSettings,
    ) -> Result<Self, PipelineError> {
        let spec = descriptor.strip_prefix("stub://").unwrap_or(descriptor);
        let (path, query) = match spec.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (spec, None),
        };
        let (kind, name) = match path.split_once('/') {
            Some((kind, name)) if !name.is_empty() => (kind, name),
            _ => (path, path),
        };
        let kind = match kind {
            "camera" => SourceKind::Camera,
            "video" => SourceKind::Video,
            "image" => SourceKind::Image,
            other => {
                return Err(PipelineError::acquisition(
                    AcquisitionErrorKind::Unsupported,
                    descriptor,
                    format!("unknown synthetic source kind '{}'", other),
                ))
            }
        };

        let mut frame_limit = match kind {
            SourceKind::Camera => None,
            SourceKind::Video => Some(DEFAULT_VIDEO_FRAMES),
            SourceKind::Image => Some(1),
        };
        let mut fail_after = None;
        let mut interval = Duration::ZERO;
        for pair in query.into_iter().flat_map(|q| q.split('&')) {
            let Some((key, value)) = pair.split_once('=') else {
                continue;
            };
            let parsed: u64 = value.parse().map_err(|_| {
                PipelineError::acquisition(
                    AcquisitionErrorKind::Unsupported,
                    descriptor,
                    format!("'{}' must be an integer", key),
                )
            })?;
            match key {
                "frames" if kind == SourceKind::Video => frame_limit = Some(parsed),
                "fail_after" => fail_after = Some(parsed),
                "interval_ms" => interval = Duration::from_millis(parsed),
                _ => log::warn!("SyntheticSource: ignoring parameter '{}' on {}", key, descriptor),
            }
        }

        {
            let mut handles = OPEN_HANDLES.lock().map_err(|_| {
                PipelineError::acquisition(
                    AcquisitionErrorKind::DeviceUnavailable,
                    descriptor,
                    "synthetic handle table poisoned",
                )
            })?;
            if !handles.insert(name.to_string()) {
                return Err(PipelineError::acquisition(
                    AcquisitionErrorKind::DeviceUnavailable,
                    descriptor,
                    "handle already held by another source",
                ));
            }
        }

        log::info!("SyntheticSource: connected to {} (synthetic)", descriptor);
        Ok(Self {
            name: name.to_string(),
            kind,
            frame_limit,
            fail_after,
            interval,
            settings: settings.clone(),
            frame_count: 0,
            scene_state: 0,
            holds_handle: true,
        })
    }

    pub(crate) fn kind(&self) -> SourceKind {
        self.kind
    }

    pub(crate) fn next_frame(&mut self) -> Result<Option<Frame>, PipelineError> {
        if self.fail_after.is_some_and(|limit| self.frame_count >= limit) {
            return Err(PipelineError::acquisition(
                AcquisitionErrorKind::Disconnected,
                format!("stub://{}", self.name),
                format!("synthetic disconnect after {} frames", self.frame_count),
            ));
        }
        if self.frame_limit.is_some_and(|limit| self.frame_count >= limit) {
            return Ok(None);
        }
        if !self.interval.is_zero() {
            std::thread::sleep(self.interval);
        }

        let pixels = self.generate_synthetic_pixels();
        let timestamp = (self.settings.target_fps > 0).then(|| {
            Duration::from_nanos(self.frame_count * 1_000_000_000 / self.settings.target_fps as u64)
        });
        self.frame_count += 1;

        let frame = Frame::from_rgb(pixels, self.settings.width, self.settings.height)
            .map_err(|e| {
                PipelineError::acquisition(
                    AcquisitionErrorKind::Read,
                    format!("stub://{}", self.name),
                    e,
                )
            })?;
        Ok(Some(frame.with_timestamp(timestamp)))
    }

    pub(crate) fn release(&mut self) {
        if !self.holds_handle {
            return;
        }
        self.holds_handle = false;
        match OPEN_HANDLES.lock() {
            Ok(mut handles) => {
                handles.remove(&self.name);
            }
            Err(poisoned) => {
                poisoned.into_inner().remove(&self.name);
            }
        }
    }

    fn generate_synthetic_pixels(&mut self) -> Vec<u8> {
        let pixel_count = (self.settings.width * self.settings.height * 3) as usize;
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count + self.scene_state as u64) % 256) as u8;
        }
        pixels
    }
}

impl Drop for SyntheticSource {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> CaptureSettings {
        CaptureSettings {
            width: 8,
            height: 6,
            target_fps: 10,
        }
    }

    #[test]
    fn second_open_of_same_name_is_busy() -> Result<(), PipelineError> {
        let mut first = SyntheticSource::open("stub://camera/synthetic-busy", &settings())?;
        let err = SyntheticSource::open("stub://camera/synthetic-busy", &settings())
            .err()
            .expect("second open must fail");
        assert!(matches!(
            err,
            PipelineError::Acquisition {
                kind: AcquisitionErrorKind::DeviceUnavailable,
                ..
            }
        ));

        first.release();
        let _again = SyntheticSource::open("stub://camera/synthetic-busy", &settings())?;
        Ok(())
    }

    #[test]
    fn image_kind_yields_one_frame() -> Result<(), PipelineError> {
        let mut source = SyntheticSource::open("stub://image/synthetic-still", &settings())?;
        assert!(source.next_frame()?.is_some());
        assert!(source.next_frame()?.is_none());
        Ok(())
    }

    #[test]
    fn fail_after_simulates_disconnect() -> Result<(), PipelineError> {
        let mut source =
            SyntheticSource::open("stub://camera/synthetic-unplug?fail_after=2", &settings())?;
        assert!(source.next_frame()?.is_some());
        assert!(source.next_frame()?.is_some());
        let err = source.next_frame().err().expect("third read must fail");
        assert!(matches!(
            err,
            PipelineError::Acquisition {
                kind: AcquisitionErrorKind::Disconnected,
                ..
            }
        ));
        Ok(())
    }

    #[test]
    fn frames_carry_source_timestamps() -> Result<(), PipelineError> {
        let mut source = SyntheticSource::open("stub://video/synthetic-ts?frames=2", &settings())?;
        let _first = source.next_frame()?;
        let second = source.next_frame()?.expect("second frame");
        assert_eq!(second.timestamp, Some(Duration::from_millis(100)));
        assert_eq!((second.width, second.height), (8, 6));
        Ok(())
    }

    #[test]
    fn interval_blocks_each_read() -> Result<(), PipelineError> {
        let mut source =
            SyntheticSource::open("stub://camera/synthetic-paced?interval_ms=30", &settings())?;
        let started = std::time::Instant::now();
        assert!(source.next_frame()?.is_some());
        assert!(source.next_frame()?.is_some());
        assert!(started.elapsed() >= Duration::from_millis(60));
        Ok(())
    }

    #[test]
    fn unknown_kind_is_unsupported() {
        assert!(SyntheticSource::open("stub://radar/x", &settings()).is_err());
    }
}
