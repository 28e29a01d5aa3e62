//! Local file frame sources.
//!
//! Files are classified by extension:
//! - still images (`jpg`, `jpeg`, `png`, `bmp`) decode through the `image`
//!   crate and yield exactly one frame
//! - videos (`mp4`, `mkv`, `avi`, `flv`, `mov`, `webm`, ...) decode through
//!   FFmpeg (feature: ingest-file-ffmpeg) until the file is exhausted

use std::path::{Path, PathBuf};

use crate::error::{AcquisitionErrorKind, PipelineError};
use crate::frame::Frame;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp"];
const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "mkv", "avi", "flv", "mov", "webm", "m4v", "wmv", "mpg", "mpeg", "ts",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
    Image,
    Video,
}

/// Classify a path by its extension (case-insensitive).
pub fn classify_path(path: &Path) -> Option<FileKind> {
    let extension = path.extension()?.to_string_lossy().to_ascii_lowercase();
    if IMAGE_EXTENSIONS.contains(&extension.as_str()) {
        Some(FileKind::Image)
    } else if VIDEO_EXTENSIONS.contains(&extension.as_str()) {
        Some(FileKind::Video)
    } else {
        None
    }
}

/// Single-image source. Decodes eagerly on open so a corrupt file fails at
/// start rather than mid-run.
pub(crate) struct StillImageSource {
    path: PathBuf,
    frame: Option<Frame>,
}

impl StillImageSource {
    pub(crate) fn open(path: &Path) -> Result<Self, PipelineError> {
        let decoded = image::open(path).map_err(|e| {
            PipelineError::acquisition(
                AcquisitionErrorKind::Read,
                path.display().to_string(),
                format!("failed to decode image: {}", e),
            )
        })?;
        let frame = Frame::from_image(decoded.to_rgb8());
        log::info!(
            "StillImageSource: loaded {} ({}x{})",
            path.display(),
            frame.width,
            frame.height
        );
        Ok(Self {
            path: path.to_path_buf(),
            frame: Some(frame),
        })
    }

    pub(crate) fn next_frame(&mut self) -> Result<Option<Frame>, PipelineError> {
        let frame = self.frame.take();
        if frame.is_none() {
            log::debug!("StillImageSource: {} exhausted", self.path.display());
        }
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{CaptureSettings, FrameSource, SourceDescriptor, SourceKind};
    use image::{Rgb, RgbImage};

    #[test]
    fn classifies_by_extension() {
        assert_eq!(classify_path(Path::new("a/b.JPG")), Some(FileKind::Image));
        assert_eq!(classify_path(Path::new("clip.mkv")), Some(FileKind::Video));
        assert_eq!(classify_path(Path::new("weights.onnx")), None);
        assert_eq!(classify_path(Path::new("noext")), None);
    }

    #[test]
    fn image_file_yields_exactly_one_frame() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("still.png");
        RgbImage::from_pixel(5, 4, Rgb([200, 10, 10])).save(&path)?;

        let descriptor = SourceDescriptor::Path(path);
        let mut source = FrameSource::open(&descriptor, &CaptureSettings::default())?;
        assert_eq!(source.kind(), SourceKind::Image);

        let frame = source.next_frame()?.expect("one frame");
        assert_eq!((frame.width, frame.height), (5, 4));
        assert_eq!(frame.pixel(0, 0), Some([200, 10, 10]));
        assert!(source.next_frame()?.is_none());
        Ok(())
    }

    #[test]
    fn corrupt_image_is_a_read_error() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"not a png")?;

        let err = StillImageSource::open(&path).err().expect("decode must fail");
        assert!(matches!(
            err,
            PipelineError::Acquisition {
                kind: AcquisitionErrorKind::Read,
                ..
            }
        ));
        Ok(())
    }
}
