//! Local file frame source using FFmpeg.
//!
//! Decodes the best video stream of a local file to RGB in memory. End of file
//! is reported as `None`; `rewind` seeks back to the start and flushes the decoder.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;
use image::RgbImage;

use super::{FrameSource, SourceStats};
use crate::frame::Frame;

pub(crate) struct FfmpegFileSource {
    path: String,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    frame_interval: Option<Duration>,
    eof_sent: bool,
    position: u64,
    stats: SourceStats,
}

impl FfmpegFileSource {
    pub(crate) fn open(path: &str) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&path)
            .with_context(|| format!("failed to open file input '{}' with ffmpeg", path))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("file has no video track"))?;
        let stream_index = input_stream.index();
        let frame_interval = interval_from_rate(input_stream.avg_frame_rate());
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
            "FileSource: opened {} (ffmpeg, {}x{}, interval {:?})",
            path,
            decoder.width(),
            decoder.height(),
            frame_interval
        );

        Ok(Self {
            path: path.to_string(),
            input,
            stream_index,
            decoder,
            scaler,
            frame_interval,
            eof_sent: false,
            position: 0,
            stats: SourceStats {
                path: path.to_string(),
                ..SourceStats::default()
            },
        })
    }

    fn next_packet(&mut self) -> Option<ffmpeg::Packet> {
        let stream_index = self.stream_index;
        self.input
            .packets()
            .find(|(stream, _)| stream.index() == stream_index)
            .map(|(_, packet)| packet)
    }

    fn convert(&mut self, decoded: &ffmpeg::frame::Video) -> Result<Frame> {
        let mut rgb_frame = ffmpeg::frame::Video::empty();
        self.scaler
            .run(decoded, &mut rgb_frame)
            .context("scale frame to RGB")?;
        let (pixels, width, height) = frame_to_pixels(&rgb_frame)?;
        let image = RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("decoded frame buffer does not match {}x{}", width, height))?;

        self.position += 1;
        self.stats.frames_read += 1;
        Ok(Frame::new(image, self.position))
    }
}

impl FrameSource for FfmpegFileSource {
    fn describe(&self) -> String {
        format!("{} (ffmpeg)", self.path)
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let mut decoded = ffmpeg::frame::Video::empty();
        loop {
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                return self.convert(&decoded).map(Some);
            }
            if self.eof_sent {
                return Ok(None);
            }
            match self.next_packet() {
                Some(packet) => self
                    .decoder
                    .send_packet(&packet)
                    .context("send packet to ffmpeg decoder")?,
                None => {
                    self.decoder
                        .send_eof()
                        .context("send eof to ffmpeg decoder")?;
                    self.eof_sent = true;
                }
            }
        }
    }

    fn rewind(&mut self) -> Result<()> {
        self.input.seek(0, ..).context("seek to start of file")?;
        self.decoder.flush();
        self.eof_sent = false;
        self.position = 0;
        self.stats.rewinds += 1;
        Ok(())
    }

    fn frame_interval(&self) -> Option<Duration> {
        self.frame_interval
    }

    fn stats(&self) -> SourceStats {
        self.stats.clone()
    }
}

fn interval_from_rate(rate: ffmpeg::Rational) -> Option<Duration> {
    if rate.numerator() <= 0 || rate.denominator() <= 0 {
        return None;
    }
    let fps = f64::from(rate);
    (fps.is_finite() && fps > 0.0).then(|| Duration::from_secs_f64(1.0 / fps))
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        let pixels = data
            .get(..row_bytes * height as usize)
            .context("ffmpeg frame is shorter than its dimensions")?;
        return Ok((pixels.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}
