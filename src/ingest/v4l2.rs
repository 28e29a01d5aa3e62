//! V4L2 camera source.
//!
//! Device index `N` maps to `/dev/videoN`. The device is opened exclusively for
//! the lifetime of the source and released on drop. Captured buffers are
//! normalized to RGB regardless of the negotiated pixel format.

use std::io;

use ouroboros::self_referencing;

use super::normalize::PixelFormat;
use super::CaptureSettings;
use crate::error::{AcquisitionErrorKind, PipelineError};
use crate::frame::Frame;

pub(crate) struct V4l2Camera {
    device_path: String,
    state: DeviceV4l2State,
    format: PixelFormat,
    active_width: u32,
    active_height: u32,
    frame_count: u64,
}

#[self_referencing]
struct DeviceV4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Camera {
    pub(crate) fn open(index: u32, settings: &CaptureSettings) -> Result<Self, PipelineError> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let device_path = format!("/dev/video{}", index);
        let device = v4l::Device::with_path(&device_path)
            .map_err(|err| open_error(&device_path, err))?;
        let mut format = device
            .format()
            .map_err(|err| open_error(&device_path, err))?;
        format.width = settings.width;
        format.height = settings.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Camera: failed to set format on {}: {}",
                    device_path,
                    err
                );
                device
                    .format()
                    .map_err(|err| open_error(&device_path, err))?
            }
        };
        let pixel_format = PixelFormat::from_fourcc(&format.fourcc.repr).ok_or_else(|| {
            PipelineError::acquisition(
                AcquisitionErrorKind::Unsupported,
                device_path.clone(),
                format!(
                    "unsupported pixel format {}",
                    String::from_utf8_lossy(&format.fourcc.repr)
                ),
            )
        })?;

        if settings.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(settings.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("V4l2Camera: failed to set fps on {}: {}", device_path, err);
            }
        }

        let state = DeviceV4l2StateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
            },
        }
        .try_build()
        .map_err(|err| open_error(&device_path, err))?;

        log::info!(
            "V4l2Camera: connected to {} ({}x{}, {:?})",
            device_path,
            format.width,
            format.height,
            pixel_format
        );
        Ok(Self {
            device_path,
            state,
            format: pixel_format,
            active_width: format.width,
            active_height: format.height,
            frame_count: 0,
        })
    }

    pub(crate) fn next_frame(&mut self) -> Result<Option<Frame>, PipelineError> {
        use v4l::io::traits::CaptureStream;

        let (width, height, format) = (self.active_width, self.active_height, self.format);
        let frame = self
            .state
            .with_mut(|fields| {
                fields
                    .stream
                    .next()
                    .map(|(buf, _meta)| Frame::from_pixels(buf, width, height, format))
            })
            .map_err(|err| {
                let kind = if err.raw_os_error() == Some(libc::ENODEV) {
                    AcquisitionErrorKind::Disconnected
                } else {
                    AcquisitionErrorKind::Read
                };
                PipelineError::acquisition(kind, self.device_path.clone(), err)
            })?
            .map_err(|err| {
                PipelineError::acquisition(
                    AcquisitionErrorKind::Read,
                    self.device_path.clone(),
                    err,
                )
            })?;

        self.frame_count += 1;
        Ok(Some(frame))
    }
}

impl Drop for V4l2Camera {
    fn drop(&mut self) {
        log::debug!(
            "V4l2Camera: releasing {} after {} frames",
            self.device_path,
            self.frame_count
        );
    }
}

fn open_error(device_path: &str, err: io::Error) -> PipelineError {
    if err.kind() == io::ErrorKind::NotFound {
        return PipelineError::acquisition(AcquisitionErrorKind::PathNotFound, device_path, err);
    }
    let detail = if err.raw_os_error() == Some(libc::EBUSY) {
        format!("held by another process: {}", err)
    } else {
        err.to_string()
    };
    PipelineError::acquisition(AcquisitionErrorKind::DeviceUnavailable, device_path, detail)
}
