//! Codec session seams
//!
//! The decode and encode pipelines only talk to the external codec through
//! these traits. `DecodeSession` and `EncodeSession` are the FFmpeg-backed
//! implementations; tests drive the threaded pipeline with synthetic ones.

use crate::error::Result;

/// Rational number of seconds represented by one timestamp tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBase {
    pub num: i32,
    pub den: i32,
}

impl TimeBase {
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// Time base for a constant frame rate: one tick per frame
    ///
    /// Non-integer rates (29.97, 59.94) use a 1/1000 frame tick so the
    /// rational stays exact for the NTSC family.
    pub fn from_frame_rate(fps: f64) -> Self {
        if fps <= 0.0 {
            return Self::new(1, 30);
        }
        let rounded = fps.round();
        if (fps - rounded).abs() < 1e-3 {
            Self::new(1, rounded as i32)
        } else {
            Self::new(1000, (fps * 1000.0).round() as i32)
        }
    }

    /// Seconds per tick
    pub fn as_f64(&self) -> f64 {
        if self.den == 0 {
            0.0
        } else {
            self.num as f64 / self.den as f64
        }
    }

    pub fn ticks_to_seconds(&self, ticks: i64) -> f64 {
        ticks as f64 * self.as_f64()
    }

    /// Nearest tick for a time in seconds
    pub fn seconds_to_ticks(&self, seconds: f64) -> i64 {
        let per_tick = self.as_f64();
        if per_tick <= 0.0 {
            return 0;
        }
        (seconds / per_tick).round() as i64
    }

    /// First tick at or after a time in seconds
    ///
    /// Float noise below a millionth of a tick is ignored, so a time computed
    /// from a frame index maps back onto that frame.
    pub fn seconds_to_ticks_ceil(&self, seconds: f64) -> i64 {
        let per_tick = self.as_f64();
        if per_tick <= 0.0 {
            return 0;
        }
        (seconds / per_tick - 1e-6).ceil() as i64
    }
}

/// Stream metadata recorded when a session is opened
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
    pub time_base: TimeBase,
    /// Frames per second
    pub frame_rate: f64,
    /// Duration in seconds (0 when the container does not report one)
    pub duration: f64,
    pub codec_name: String,
}

impl StreamInfo {
    /// Estimated total frame count
    pub fn frame_count(&self) -> u64 {
        (self.duration * self.frame_rate) as u64
    }

    /// Seconds between two frames
    pub fn frame_interval(&self) -> f64 {
        if self.frame_rate > 0.0 {
            1.0 / self.frame_rate
        } else {
            0.0
        }
    }

    /// Number of queued frames covering `look_ahead_ms` of playback, at least 2
    pub fn queue_capacity(&self, look_ahead_ms: u32) -> usize {
        let frames = (self.frame_rate * look_ahead_ms as f64 / 1000.0).ceil();
        (frames as usize).max(2)
    }

    /// Size of a tightly packed RGBA frame
    pub fn rgba_size(&self) -> usize {
        (self.width as usize) * (self.height as usize) * 4
    }
}

/// Outcome of advancing the decoder by one packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoded {
    /// A frame was written into the caller's storage
    Frame { pts: i64 },
    /// The packet produced no frame yet (or belonged to another stream)
    Pending,
    /// No more frames until the next seek
    EndOfStream,
}

/// Decoder side of a codec session
///
/// Owned by the decode thread once playback starts. Frame storage is
/// allocated once through `allocate_frame` and reused for every packet.
pub trait VideoSource: Send + 'static {
    type Frame: Send + 'static;
    type Converter: FrameConverter<Self::Frame>;

    fn info(&self) -> &StreamInfo;

    fn allocate_frame(&self) -> Self::Frame;

    /// Build the native → RGBA converter used on the presentation side
    fn converter(&self) -> Result<Self::Converter>;

    fn decode_next(&mut self, frame: &mut Self::Frame) -> Result<Decoded>;

    /// Keyframe-aligned seek followed by a flush of buffered decoder state
    fn seek(&mut self, seconds: f64) -> Result<()>;
}

/// Converts native frames into tightly packed RGBA
pub trait FrameConverter<F> {
    /// `out` holds exactly `width * height * 4` bytes
    fn convert(&mut self, frame: &F, out: &mut [u8]) -> Result<()>;
}

/// Encoder side of a codec session, including the muxer
pub trait VideoSink {
    fn width(&self) -> u32;

    fn height(&self) -> u32;

    /// Convert and submit one frame, then write every packet that is ready.
    /// Returns the number of packets written.
    fn encode_frame(&mut self, pixels: &[u8], pts: i64) -> Result<usize>;

    /// Flush buffered packets and finalize the container. Idempotent.
    fn finish(&mut self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_base_conversion() {
        let tb = TimeBase::new(1, 30);
        assert_eq!(tb.seconds_to_ticks(5.0), 150);
        assert!((tb.ticks_to_seconds(45) - 1.5).abs() < 1e-9);

        let mov = TimeBase::new(1, 15360);
        assert_eq!(mov.seconds_to_ticks(1.0), 15360);
    }

    #[test]
    fn test_seconds_to_ticks_ceil() {
        let tb = TimeBase::new(1, 30);
        // 5.11s lies between frames 153 (5.100s) and 154 (5.133s)
        assert_eq!(tb.seconds_to_ticks(5.11), 153);
        assert_eq!(tb.seconds_to_ticks_ceil(5.11), 154);
        assert_eq!(tb.seconds_to_ticks_ceil(42.0 / 30.0), 42);
        assert_eq!(tb.seconds_to_ticks_ceil(0.0), 0);
        assert_eq!(TimeBase::new(1, 0).seconds_to_ticks_ceil(1.0), 0);
    }

    #[test]
    fn test_time_base_from_frame_rate() {
        assert_eq!(TimeBase::from_frame_rate(30.0), TimeBase::new(1, 30));
        assert_eq!(TimeBase::from_frame_rate(29.97), TimeBase::new(1000, 29970));
        assert_eq!(TimeBase::from_frame_rate(0.0), TimeBase::new(1, 30));
    }

    #[test]
    fn test_zero_denominator_is_safe() {
        let tb = TimeBase::new(1, 0);
        assert_eq!(tb.as_f64(), 0.0);
        assert_eq!(tb.seconds_to_ticks(3.0), 0);
    }

    #[test]
    fn test_queue_capacity() {
        let info = StreamInfo {
            width: 1920,
            height: 1080,
            time_base: TimeBase::new(1, 30),
            frame_rate: 30.0,
            duration: 10.0,
            codec_name: "h264".to_string(),
        };
        assert_eq!(info.queue_capacity(100), 3);
        assert_eq!(info.queue_capacity(0), 2);
        assert_eq!(info.frame_count(), 300);
        assert_eq!(info.rgba_size(), 1920 * 1080 * 4);
    }
}
