//! Local video file source using FFmpeg.
//!
//! Frames are decoded in acquisition order and converted to RGB24. The end of
//! the file drains the decoder and then reports exhaustion (`Ok(None)`).

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use ffmpeg_next as ffmpeg;

use super::CaptureSettings;
use crate::error::{AcquisitionErrorKind, PipelineError};
use crate::frame::Frame;

pub(crate) struct FfmpegVideoSource {
    resource: String,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    time_base: f64,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    eof_sent: bool,
    frame_count: u64,
}

impl FfmpegVideoSource {
    pub(crate) fn open(path: &Path, _settings: &CaptureSettings) -> Result<Self, PipelineError> {
        let resource = path.display().to_string();
        Self::open_inner(path).map_err(|e| {
            PipelineError::acquisition(AcquisitionErrorKind::Read, resource, format!("{:#}", e))
        })
    }

    fn open_inner(path: &Path) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&path)
            .with_context(|| format!("failed to open video '{}' with ffmpeg", path.display()))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow::anyhow!("file has no video track"))?;
        let stream_index = input_stream.index();
        let time_base = f64::from(input_stream.time_base());
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        log::info!(
            "FfmpegVideoSource: opened {} ({}x{})",
            path.display(),
            decoder.width(),
            decoder.height()
        );
        Ok(Self {
            resource: path.display().to_string(),
            input,
            stream_index,
            time_base,
            decoder,
            scaler,
            eof_sent: false,
            frame_count: 0,
        })
    }

    pub(crate) fn next_frame(&mut self) -> Result<Option<Frame>, PipelineError> {
        let resource = self.resource.clone();
        self.decode_next().map_err(|e| {
            PipelineError::acquisition(AcquisitionErrorKind::Read, resource, format!("{:#}", e))
        })
    }

    fn decode_next(&mut self) -> Result<Option<Frame>> {
        let mut decoded = ffmpeg::frame::Video::empty();

        while self.decoder.receive_frame(&mut decoded).is_err() {
            if self.eof_sent {
                log::debug!(
                    "FfmpegVideoSource: {} exhausted after {} frames",
                    self.resource,
                    self.frame_count
                );
                return Ok(None);
            }
            let stream_index = self.stream_index;
            let packet = self
                .input
                .packets()
                .find(|(stream, _)| stream.index() == stream_index)
                .map(|(_, packet)| packet);
            match packet {
                Some(packet) => self
                    .decoder
                    .send_packet(&packet)
                    .context("decoder rejected packet")?,
                None => {
                    self.decoder.send_eof().context("drain decoder at end of file")?;
                    self.eof_sent = true;
                }
            }
        }

        let mut rgb = ffmpeg::frame::Video::empty();
        self.scaler
            .run(&decoded, &mut rgb)
            .context("convert decoded frame to RGB24")?;
        let timestamp = decoded
            .pts()
            .filter(|pts| *pts >= 0)
            .map(|pts| Duration::from_secs_f64(pts as f64 * self.time_base));

        self.frame_count += 1;
        Ok(Some(packed_rgb(&rgb)?.with_timestamp(timestamp)))
    }
}

/// Copy plane 0 into a tightly packed frame, dropping any row padding.
fn packed_rgb(plane: &ffmpeg::frame::Video) -> Result<Frame> {
    let (width, height) = (plane.width(), plane.height());
    let row_len = width as usize * 3;
    let stride = plane.stride(0).max(row_len);
    let data = plane.data(0);

    let pixels: Vec<u8> = data
        .chunks(stride)
        .take(height as usize)
        .filter_map(|row| row.get(..row_len))
        .flatten()
        .copied()
        .collect();
    if pixels.len() != row_len * height as usize {
        anyhow::bail!("decoded plane is shorter than {}x{}", width, height);
    }
    Frame::from_rgb(pixels, width, height)
}
