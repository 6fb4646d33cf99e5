//! Video decoder using FFmpeg
//!
//! Opens a container, locates the best video stream and decodes it one packet
//! at a time into caller-provided frame storage. Conversion to RGBA happens
//! separately in `RgbaConverter` so it can run on the presentation side.

use std::path::Path;

use ffmpeg_next::format::Pixel;
use ffmpeg_next::software::scaling;

use super::codec::{Decoded, FrameConverter, StreamInfo, TimeBase, VideoSource};
use crate::error::{MediaError, Result};

/// Decoder options applied when a session is opened
#[derive(Debug, Clone, Copy)]
pub struct DecoderParams {
    /// FFmpeg decoder threads (0 lets FFmpeg decide)
    pub thread_count: usize,
}

impl Default for DecoderParams {
    fn default() -> Self {
        Self { thread_count: 8 }
    }
}

impl From<ffmpeg_next::Rational> for TimeBase {
    fn from(r: ffmpeg_next::Rational) -> Self {
        TimeBase::new(r.numerator(), r.denominator())
    }
}

impl From<TimeBase> for ffmpeg_next::Rational {
    fn from(tb: TimeBase) -> Self {
        ffmpeg_next::Rational::new(tb.num, tb.den)
    }
}

/// Decoding half of a codec session
pub struct DecodeSession {
    /// The input format context
    input: ffmpeg_next::format::context::Input,
    /// Index of the video stream
    stream_index: usize,
    /// Video decoder
    decoder: ffmpeg_next::decoder::Video,
    /// Stream metadata
    info: StreamInfo,
    /// End of input was sent to the decoder
    draining: bool,
    /// Decoder returned its last frame
    finished: bool,
}

impl DecodeSession {
    /// Open a video file for decoding
    pub fn open<P: AsRef<Path>>(path: P, params: &DecoderParams) -> Result<Self> {
        // Initialize FFmpeg (safe to call multiple times)
        ffmpeg_next::init()?;

        let path = path.as_ref();
        let path_str = path.display().to_string();

        let input = ffmpeg_next::format::input(&path).map_err(|e| MediaError::io(path, e))?;

        let stream = input
            .streams()
            .best(ffmpeg_next::media::Type::Video)
            .ok_or_else(|| MediaError::StreamNotFound(path_str.clone()))?;
        let stream_index = stream.index();

        let time_base = TimeBase::from(stream.time_base());

        let frame_rate = [stream.avg_frame_rate(), stream.rate()]
            .into_iter()
            .find(|r| r.numerator() > 0 && r.denominator() > 0)
            .map(f64::from)
            .unwrap_or(30.0);

        let duration = if stream.duration() > 0 {
            time_base.ticks_to_seconds(stream.duration())
        } else if input.duration() > 0 {
            input.duration() as f64 / ffmpeg_next::ffi::AV_TIME_BASE as f64
        } else {
            0.0
        };

        let parameters = stream.parameters();
        let codec = ffmpeg_next::decoder::find(parameters.id())
            .ok_or_else(|| MediaError::CodecOpen(format!("no decoder for {:?}", parameters.id())))?;
        let codec_name = codec.name().to_string();

        let mut context = ffmpeg_next::codec::context::Context::from_parameters(parameters)
            .map_err(|e| MediaError::CodecOpen(e.to_string()))?;
        if params.thread_count > 0 {
            context.set_threading(ffmpeg_next::codec::threading::Config::count(params.thread_count));
        }
        let decoder = context
            .decoder()
            .video()
            .map_err(|e| MediaError::CodecOpen(format!("{}: {}", codec_name, e)))?;

        let info = StreamInfo {
            width: decoder.width(),
            height: decoder.height(),
            time_base,
            frame_rate,
            duration,
            codec_name,
        };

        tracing::info!(
            "Opened video: {}x{} @ {:.2}fps, duration: {:.2}s, codec: {}, time base: {}/{}",
            info.width,
            info.height,
            info.frame_rate,
            info.duration,
            info.codec_name,
            time_base.num,
            time_base.den
        );

        Ok(Self {
            input,
            stream_index,
            decoder,
            info,
            draining: false,
            finished: false,
        })
    }

    /// Whether the decoder has returned its last frame
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Try to pull one frame out of the decoder
    fn receive(&mut self, frame: &mut ffmpeg_next::frame::Video) -> Result<Option<i64>> {
        match self.decoder.receive_frame(frame) {
            Ok(()) => Ok(Some(frame.timestamp().or(frame.pts()).unwrap_or(0))),
            Err(ffmpeg_next::Error::Other {
                errno: ffmpeg_next::error::EAGAIN,
            }) => Ok(None),
            Err(ffmpeg_next::Error::Eof) => {
                self.finished = true;
                Ok(None)
            }
            Err(e) => Err(MediaError::DecodeTransient(e.to_string())),
        }
    }
}

impl VideoSource for DecodeSession {
    type Frame = ffmpeg_next::frame::Video;
    type Converter = RgbaConverter;

    fn info(&self) -> &StreamInfo {
        &self.info
    }

    fn allocate_frame(&self) -> Self::Frame {
        ffmpeg_next::frame::Video::empty()
    }

    fn converter(&self) -> Result<Self::Converter> {
        RgbaConverter::new(self.decoder.format(), self.info.width, self.info.height)
    }

    fn decode_next(&mut self, frame: &mut Self::Frame) -> Result<Decoded> {
        if self.finished {
            return Ok(Decoded::EndOfStream);
        }

        // Drain frames already buffered inside the decoder first
        if let Some(pts) = self.receive(frame)? {
            return Ok(Decoded::Frame { pts });
        }
        if self.finished || self.draining {
            self.finished = true;
            return Ok(Decoded::EndOfStream);
        }

        let mut packet = ffmpeg_next::Packet::empty();
        match packet.read(&mut self.input) {
            Ok(()) => {
                if packet.stream() != self.stream_index {
                    return Ok(Decoded::Pending);
                }
                self.decoder
                    .send_packet(&packet)
                    .map_err(|e| MediaError::DecodeTransient(e.to_string()))?;
            }
            Err(ffmpeg_next::Error::Eof) => {
                self.decoder.send_eof()?;
                self.draining = true;
            }
            Err(e) => {
                // Unreadable input is treated as the end of the stream
                tracing::warn!("Failed to read packet, treating as end of stream: {}", e);
                self.decoder.send_eof()?;
                self.draining = true;
            }
        }

        match self.receive(frame)? {
            Some(pts) => Ok(Decoded::Frame { pts }),
            None if self.finished => Ok(Decoded::EndOfStream),
            None => Ok(Decoded::Pending),
        }
    }

    fn seek(&mut self, seconds: f64) -> Result<()> {
        // FFmpeg's input.seek() uses AV_TIME_BASE (microseconds)
        let timestamp_us = (seconds.max(0.0) * ffmpeg_next::ffi::AV_TIME_BASE as f64) as i64;

        // Seek to nearest keyframe at or before the target
        let result = self.input.seek(timestamp_us, ..timestamp_us);
        self.decoder.flush();
        self.draining = false;
        self.finished = false;

        result.map_err(|e| MediaError::Seek {
            target: seconds,
            reason: e.to_string(),
        })
    }
}

/// Native → RGBA conversion through libswscale
pub struct RgbaConverter {
    /// Created lazily when the decoder reports no format up front
    scaler: Option<scaling::Context>,
    /// Reused destination frame
    rgba: ffmpeg_next::frame::Video,
    width: u32,
    height: u32,
}

impl RgbaConverter {
    pub fn new(format: Pixel, width: u32, height: u32) -> Result<Self> {
        let scaler = if format == Pixel::None {
            None
        } else {
            Some(Self::create_scaler(format, width, height)?)
        };
        Ok(Self {
            scaler,
            rgba: ffmpeg_next::frame::Video::new(Pixel::RGBA, width, height),
            width,
            height,
        })
    }

    fn create_scaler(format: Pixel, width: u32, height: u32) -> Result<scaling::Context> {
        scaling::Context::get(
            format,
            width,
            height,
            Pixel::RGBA,
            width,
            height,
            scaling::Flags::BILINEAR,
        )
        .map_err(|e| MediaError::CodecOpen(format!("Failed to create scaler: {}", e)))
    }
}

impl FrameConverter<ffmpeg_next::frame::Video> for RgbaConverter {
    fn convert(&mut self, frame: &ffmpeg_next::frame::Video, out: &mut [u8]) -> Result<()> {
        // Recreate scaler if the stream changed format mid-way
        let stale = self
            .scaler
            .as_ref()
            .map_or(true, |scaler| scaler.input().format != frame.format());
        if stale {
            self.scaler = Some(Self::create_scaler(frame.format(), self.width, self.height)?);
        }
        if let Some(scaler) = self.scaler.as_mut() {
            scaler.run(frame, &mut self.rgba)?;
        }

        let data = self.rgba.data(0);
        let stride = self.rgba.stride(0);
        let row_bytes = (self.width as usize) * 4;
        let rows = self.height as usize;
        if out.len() < row_bytes * rows {
            return Err(MediaError::DecodeTransient(format!(
                "RGBA buffer too small: {} < {}",
                out.len(),
                row_bytes * rows
            )));
        }

        if stride == row_bytes {
            out[..row_bytes * rows].copy_from_slice(&data[..row_bytes * rows]);
        } else {
            for (y, dst) in out.chunks_exact_mut(row_bytes).take(rows).enumerate() {
                let start = y * stride;
                dst.copy_from_slice(&data[start..start + row_bytes]);
            }
        }
        Ok(())
    }
}
