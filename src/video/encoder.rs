//! Video encoder and muxer using FFmpeg
//!
//! Converts RGBA/BGRA frames into the target pixel format, encodes them and
//! writes every produced packet into the output container with timestamps
//! rescaled from the codec time base to the stream time base.

use std::path::Path;

use ffmpeg_next::format::Pixel;
use ffmpeg_next::software::scaling;

use super::capture::CaptureFormat;
use super::codec::{TimeBase, VideoSink};
use crate::error::{MediaError, Result};
use crate::settings::ExportSettings;

/// Encoder configuration
#[derive(Debug, Clone)]
pub struct EncoderParams {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// FFmpeg encoder name, e.g. `prores_ks`
    pub codec: String,
    /// Codec profile option, e.g. `4444`
    pub profile: Option<String>,
    /// Encoder pixel format, e.g. `yuv444p10le`
    pub pixel_format: String,
    pub bit_rate: Option<usize>,
    /// Layout of the pixels handed to `encode_frame`
    pub input_format: CaptureFormat,
    /// Flip rows vertically before encoding (bottom-up readbacks)
    pub vflip: bool,
}

impl EncoderParams {
    pub fn from_settings(width: u32, height: u32, fps: f64, settings: &ExportSettings) -> Self {
        Self {
            width,
            height,
            fps,
            codec: settings.codec.clone(),
            profile: settings.profile.clone(),
            pixel_format: settings.pixel_format.clone(),
            bit_rate: settings.bit_rate,
            input_format: CaptureFormat::Rgba8,
            vflip: settings.vflip,
        }
    }
}

impl CaptureFormat {
    fn ffmpeg_pixel(self) -> Pixel {
        match self {
            CaptureFormat::Rgba8 => Pixel::RGBA,
            CaptureFormat::Bgra8 => Pixel::BGRA,
        }
    }
}

/// Encoding half of a codec session
pub struct EncodeSession {
    /// Output container
    output: ffmpeg_next::format::context::Output,
    /// Opened encoder
    encoder: ffmpeg_next::codec::encoder::video::Encoder,
    /// Index of the video stream in the container
    stream_index: usize,
    /// Time base of the encoder (one tick per frame)
    codec_time_base: ffmpeg_next::Rational,
    /// Time base chosen by the muxer after writing the header
    stream_time_base: ffmpeg_next::Rational,
    /// Input layout → encoder pixel format
    scaler: scaling::Context,
    /// Staging frame in the input layout
    input_frame: ffmpeg_next::frame::Video,
    /// Frame handed to the encoder
    encoded_frame: ffmpeg_next::frame::Video,
    width: u32,
    height: u32,
    vflip: bool,
    /// Last timestamp accepted by the encoder
    last_pts: Option<i64>,
    packets_written: u64,
    /// Trailer written
    finished: bool,
    path: String,
}

impl EncodeSession {
    /// Create the container at `path`, open the encoder and write the header
    pub fn open<P: AsRef<Path>>(path: P, params: &EncoderParams) -> Result<Self> {
        ffmpeg_next::init()?;

        let path = path.as_ref();
        let path_str = path.display().to_string();

        if params.width == 0 || params.height == 0 || params.fps <= 0.0 {
            return Err(MediaError::CodecOpen(format!(
                "invalid output geometry {}x{} @ {}fps",
                params.width, params.height, params.fps
            )));
        }

        let pixel_format: Pixel = params
            .pixel_format
            .parse()
            .map_err(|_| MediaError::CodecOpen(format!("unknown pixel format {}", params.pixel_format)))?;

        let codec = ffmpeg_next::encoder::find_by_name(&params.codec)
            .ok_or_else(|| MediaError::CodecOpen(format!("no encoder named {}", params.codec)))?;

        let mut output = ffmpeg_next::format::output(&path).map_err(|e| MediaError::io(path, e))?;

        // Generate global header when the format requires it
        let global_header = output
            .format()
            .flags()
            .contains(ffmpeg_next::format::Flags::GLOBAL_HEADER);

        let codec_time_base: ffmpeg_next::Rational = TimeBase::from_frame_rate(params.fps).into();
        let frame_rate = ffmpeg_next::Rational::new(codec_time_base.denominator(), codec_time_base.numerator());

        let mut encoder = ffmpeg_next::codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .map_err(|e| MediaError::CodecOpen(e.to_string()))?;
        encoder.set_width(params.width);
        encoder.set_height(params.height);
        encoder.set_format(pixel_format);
        encoder.set_time_base(codec_time_base);
        encoder.set_frame_rate(Some(frame_rate));
        // Packets must come out in presentation order
        encoder.set_max_b_frames(0);
        if let Some(bit_rate) = params.bit_rate {
            encoder.set_bit_rate(bit_rate);
        }
        if global_header {
            encoder.set_flags(ffmpeg_next::codec::Flags::GLOBAL_HEADER);
        }

        let mut options = ffmpeg_next::Dictionary::new();
        if let Some(profile) = &params.profile {
            options.set("profile", profile);
        }
        let encoder = encoder
            .open_with(options)
            .map_err(|e| MediaError::CodecOpen(format!("{}: {}", params.codec, e)))?;

        let stream_index = {
            let mut stream = output
                .add_stream(codec)
                .map_err(|e| MediaError::CodecOpen(e.to_string()))?;
            stream.set_parameters(&encoder);
            stream.set_time_base(codec_time_base);
            stream.index()
        };

        output.write_header().map_err(|e| MediaError::io(path, e))?;

        let stream_time_base = output
            .stream(stream_index)
            .map(|s| s.time_base())
            .unwrap_or(codec_time_base);

        let input_pixel = params.input_format.ffmpeg_pixel();
        let scaler = scaling::Context::get(
            input_pixel,
            params.width,
            params.height,
            pixel_format,
            params.width,
            params.height,
            scaling::Flags::BILINEAR,
        )
        .map_err(|e| MediaError::CodecOpen(format!("Failed to create scaler: {}", e)))?;

        tracing::info!(
            "Exporting {}x{} @ {:.2}fps to {} ({} {}, stream time base {}/{})",
            params.width,
            params.height,
            params.fps,
            path_str,
            params.codec,
            params.pixel_format,
            stream_time_base.numerator(),
            stream_time_base.denominator()
        );

        Ok(Self {
            output,
            encoder,
            stream_index,
            codec_time_base,
            stream_time_base,
            scaler,
            input_frame: ffmpeg_next::frame::Video::new(input_pixel, params.width, params.height),
            encoded_frame: ffmpeg_next::frame::Video::new(pixel_format, params.width, params.height),
            width: params.width,
            height: params.height,
            vflip: params.vflip,
            last_pts: None,
            packets_written: 0,
            finished: false,
            path: path_str,
        })
    }

    /// Number of packets written to the container so far
    pub fn packets_written(&self) -> u64 {
        self.packets_written
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Copy tightly packed pixels into the staging frame, honoring its stride
    fn fill_input(&mut self, pixels: &[u8]) {
        let row_bytes = (self.width as usize) * 4;
        let rows = self.height as usize;
        let stride = self.input_frame.stride(0);
        let data = self.input_frame.data_mut(0);

        for y in 0..rows {
            let src_row = if self.vflip { rows - 1 - y } else { y };
            let src = &pixels[src_row * row_bytes..(src_row + 1) * row_bytes];
            data[y * stride..y * stride + row_bytes].copy_from_slice(src);
        }
    }

    /// Write every packet the encoder has ready
    fn drain_packets(&mut self) -> Result<usize> {
        let mut written = 0;
        let mut packet = ffmpeg_next::Packet::empty();
        loop {
            match self.encoder.receive_packet(&mut packet) {
                Ok(()) => {
                    packet.set_stream(self.stream_index);
                    packet.rescale_ts(self.codec_time_base, self.stream_time_base);
                    packet
                        .write_interleaved(&mut self.output)
                        .map_err(|e| MediaError::io(&self.path, e))?;
                    written += 1;
                }
                Err(ffmpeg_next::Error::Other {
                    errno: ffmpeg_next::error::EAGAIN,
                })
                | Err(ffmpeg_next::Error::Eof) => break,
                Err(e) => return Err(MediaError::Encode(e.to_string())),
            }
        }
        self.packets_written += written as u64;
        Ok(written)
    }
}

/// Make a frame's buffers exclusively ours before writing into them.
/// The encoder may still hold a reference to the previous contents.
fn make_writable(frame: &mut ffmpeg_next::frame::Video) -> Result<()> {
    // SAFETY: The frame owns a valid AVFrame and the &mut borrow keeps it exclusive for the call
    let ret = unsafe { ffmpeg_next::ffi::av_frame_make_writable(frame.as_mut_ptr()) };
    if ret < 0 {
        return Err(MediaError::Encode("frame is not writable".to_string()));
    }
    Ok(())
}

impl VideoSink for EncodeSession {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn encode_frame(&mut self, pixels: &[u8], pts: i64) -> Result<usize> {
        if self.finished {
            return Err(MediaError::Encode("session already finished".to_string()));
        }
        let expected = (self.width as usize) * (self.height as usize) * 4;
        if pixels.len() < expected {
            return Err(MediaError::Encode(format!(
                "pixel buffer too small: {} < {}",
                pixels.len(),
                expected
            )));
        }
        if let Some(last) = self.last_pts {
            if pts <= last {
                return Err(MediaError::Encode(format!(
                    "timestamp {} does not follow {}",
                    pts, last
                )));
            }
        }

        make_writable(&mut self.input_frame)?;
        make_writable(&mut self.encoded_frame)?;
        self.fill_input(pixels);
        self.scaler
            .run(&self.input_frame, &mut self.encoded_frame)
            .map_err(|e| MediaError::Encode(e.to_string()))?;

        self.encoded_frame.set_pts(Some(pts));
        self.encoder
            .send_frame(&self.encoded_frame)
            .map_err(|e| MediaError::Encode(e.to_string()))?;
        self.last_pts = Some(pts);

        self.drain_packets()
    }

    fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        self.encoder.send_eof().map_err(|e| MediaError::Encode(e.to_string()))?;
        self.drain_packets()?;
        self.output
            .write_trailer()
            .map_err(|e| MediaError::io(&self.path, e))?;

        tracing::info!(
            "Finished export to {}: {} packets",
            self.path,
            self.packets_written
        );
        Ok(())
    }
}

impl Drop for EncodeSession {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            tracing::error!("Failed to finalize {}: {}", self.path, e);
        }
    }
}
