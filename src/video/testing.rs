//! Test doubles for the playback and export pipelines

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::codec::{Decoded, FrameConverter, StreamInfo, TimeBase, VideoSink, VideoSource};
use super::texture::TextureSink;
use crate::error::{MediaError, Result};

/// Pts left in a frame the source wiped
pub(crate) const CLEARED_PTS: i64 = -1;

/// Native frame of the synthetic stream: just its timestamp
#[derive(Debug, Default)]
pub(crate) struct SyntheticFrame {
    pub pts: i64,
}

/// Constant frame rate stream with one tick per frame and periodic keyframes
pub(crate) struct SyntheticSource {
    info: StreamInfo,
    total: i64,
    /// Keyframe interval in frames
    gop: i64,
    next: i64,
    fail_at: Option<i64>,
    decode_delay: Duration,
}

impl SyntheticSource {
    pub fn new(frames: i64, fps: u32) -> Self {
        Self {
            info: StreamInfo {
                width: 4,
                height: 2,
                time_base: TimeBase::new(1, fps as i32),
                frame_rate: fps as f64,
                duration: frames as f64 / fps as f64,
                codec_name: "synthetic".to_string(),
            },
            total: frames,
            gop: 10,
            next: 0,
            fail_at: None,
            decode_delay: Duration::ZERO,
        }
    }

    pub fn with_gop(mut self, gop: i64) -> Self {
        self.gop = gop.max(1);
        self
    }

    /// Fail once when decoding frame `index`; that frame is lost
    pub fn with_decode_error_at(mut self, index: i64) -> Self {
        self.fail_at = Some(index);
        self
    }

    pub fn with_decode_delay(mut self, delay: Duration) -> Self {
        self.decode_delay = delay;
        self
    }
}

impl VideoSource for SyntheticSource {
    type Frame = SyntheticFrame;
    type Converter = PtsConverter;

    fn info(&self) -> &StreamInfo {
        &self.info
    }

    fn allocate_frame(&self) -> SyntheticFrame {
        SyntheticFrame::default()
    }

    fn converter(&self) -> Result<PtsConverter> {
        Ok(PtsConverter)
    }

    fn decode_next(&mut self, frame: &mut SyntheticFrame) -> Result<Decoded> {
        // Like FFmpeg, the output frame is wiped whenever no frame comes back
        if self.next >= self.total {
            frame.pts = CLEARED_PTS;
            return Ok(Decoded::EndOfStream);
        }
        if !self.decode_delay.is_zero() {
            std::thread::sleep(self.decode_delay);
        }
        if self.fail_at == Some(self.next) {
            self.fail_at = None;
            self.next += 1;
            frame.pts = CLEARED_PTS;
            return Err(MediaError::DecodeTransient("corrupt packet".to_string()));
        }
        frame.pts = self.next;
        self.next += 1;
        Ok(Decoded::Frame { pts: frame.pts })
    }

    fn seek(&mut self, seconds: f64) -> Result<()> {
        let target = self.info.time_base.seconds_to_ticks(seconds).clamp(0, self.total);
        // Land on the keyframe at or before the target like a real demuxer
        self.next = (target / self.gop) * self.gop;
        Ok(())
    }
}

/// Writes the frame's pts into the first 8 bytes of the output
pub(crate) struct PtsConverter;

impl FrameConverter<SyntheticFrame> for PtsConverter {
    fn convert(&mut self, frame: &SyntheticFrame, out: &mut [u8]) -> Result<()> {
        out[..8].copy_from_slice(&frame.pts.to_le_bytes());
        Ok(())
    }
}

pub(crate) fn read_pts(pixels: &[u8]) -> i64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&pixels[..8]);
    i64::from_le_bytes(bytes)
}

/// Texture sink remembering the pts of every uploaded frame
#[derive(Debug, Default)]
pub(crate) struct RecordingSink {
    pub presented: Vec<i64>,
}

impl TextureSink for RecordingSink {
    fn upload_frame(&mut self, pixels: &[u8], _width: u32, _height: u32) -> bool {
        self.presented.push(read_pts(pixels));
        true
    }
}

/// What a `RecordingVideoSink` received
#[derive(Debug, Default)]
pub(crate) struct Recording {
    /// (pts, tag in the first 4 pixel bytes)
    pub frames: Vec<(i64, u32)>,
    pub finish_calls: usize,
}

/// Encoder stand-in that records timestamps and frame tags
pub(crate) struct RecordingVideoSink {
    width: u32,
    height: u32,
    recording: Arc<Mutex<Recording>>,
    fail_on: Option<i64>,
}

impl RecordingVideoSink {
    pub fn new(width: u32, height: u32) -> (Self, Arc<Mutex<Recording>>) {
        let recording = Arc::new(Mutex::new(Recording::default()));
        let sink = Self {
            width,
            height,
            recording: Arc::clone(&recording),
            fail_on: None,
        };
        (sink, recording)
    }

    /// Reject the frame submitted with this pts
    pub fn failing_on(mut self, pts: i64) -> Self {
        self.fail_on = Some(pts);
        self
    }
}

impl VideoSink for RecordingVideoSink {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn encode_frame(&mut self, pixels: &[u8], pts: i64) -> Result<usize> {
        if self.fail_on == Some(pts) {
            return Err(MediaError::Encode("rejected".to_string()));
        }
        let tag = u32::from_le_bytes([pixels[0], pixels[1], pixels[2], pixels[3]]);
        self.recording.lock().unwrap().frames.push((pts, tag));
        Ok(1)
    }

    fn finish(&mut self) -> Result<()> {
        self.recording.lock().unwrap().finish_calls += 1;
        Ok(())
    }
}

/// Frame filled with `tag` as little-endian u32 pixels
pub(crate) fn tagged_frame(width: u32, height: u32, tag: u32) -> Vec<u8> {
    tag.to_le_bytes().repeat((width * height) as usize)
}

/// Poll `cond` every millisecond until it holds or `timeout` passes
pub(crate) fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    cond()
}
