//! Synchronous scrubbing decoder
//!
//! Decodes on the caller's thread with no queue and no clock. Each
//! `update()` advances the decoder by at most `MAX_DECODE_ATTEMPTS` packets
//! and presents the next frame; after a seek it presents the first frame at
//! or after the target instead of the keyframe the demuxer landed on.

use std::path::Path;

use super::codec::{Decoded, FrameConverter, StreamInfo, VideoSource};
use super::decoder::{DecodeSession, DecoderParams};
use super::texture::TextureSink;

/// Packets decoded per `update()` before giving up until the next tick
const MAX_DECODE_ATTEMPTS: usize = 10;

struct Session<S: VideoSource> {
    source: S,
    converter: S::Converter,
    frame: S::Frame,
    /// Newest frame short of the seek target, kept apart from `frame`
    /// because the decoder clears its output when it has nothing to return
    held: S::Frame,
    info: StreamInfo,
}

/// Frame-stepping decoder for scrubbing UIs
pub struct VideoSeeker<S: VideoSource = DecodeSession> {
    session: Option<Session<S>>,
    pixels: Vec<u8>,
    new_frame: bool,
    /// Seek target in ticks still waiting for its frame
    target: Option<i64>,
    /// Pts of the frame in `Session::held` while short of the target
    candidate: Option<i64>,
    end_of_stream: bool,
    last_pts: Option<i64>,
}

impl VideoSeeker<DecodeSession> {
    pub fn load(&mut self, path: impl AsRef<Path>, thread_count: usize) -> bool {
        let path = path.as_ref();
        self.close();
        match DecodeSession::open(path, &DecoderParams { thread_count }) {
            Ok(session) => self.load_source(session),
            Err(e) => {
                tracing::error!("VideoSeeker: failed to load {}: {}", path.display(), e);
                false
            }
        }
    }
}

impl<S: VideoSource> Default for VideoSeeker<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: VideoSource> VideoSeeker<S> {
    pub fn new() -> Self {
        Self {
            session: None,
            pixels: Vec::new(),
            new_frame: false,
            target: None,
            candidate: None,
            end_of_stream: false,
            last_pts: None,
        }
    }

    pub fn load_source(&mut self, source: S) -> bool {
        self.close();
        let converter = match source.converter() {
            Ok(converter) => converter,
            Err(e) => {
                tracing::error!("VideoSeeker: failed to create frame converter: {}", e);
                return false;
            }
        };
        let info = source.info().clone();
        self.pixels = vec![0; info.rgba_size()];
        self.session = Some(Session {
            frame: source.allocate_frame(),
            held: source.allocate_frame(),
            source,
            converter,
            info,
        });
        true
    }

    pub fn close(&mut self) {
        self.session = None;
        self.new_frame = false;
        self.target = None;
        self.candidate = None;
        self.end_of_stream = false;
        self.last_pts = None;
    }

    /// Decode and present the next frame (or the frame a seek is waiting for)
    pub fn update<T: TextureSink + ?Sized>(&mut self, sink: &mut T) {
        self.new_frame = false;
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if self.end_of_stream {
            return;
        }

        // (pts, whether the frame is the held candidate)
        let mut found = None;
        for _ in 0..MAX_DECODE_ATTEMPTS {
            match session.source.decode_next(&mut session.frame) {
                Ok(Decoded::Frame { pts }) => {
                    if self.target.is_some_and(|target| pts < target) {
                        std::mem::swap(&mut session.frame, &mut session.held);
                        self.candidate = Some(pts);
                        continue;
                    }
                    found = Some((pts, false));
                    break;
                }
                Ok(Decoded::Pending) => {}
                Ok(Decoded::EndOfStream) => {
                    self.end_of_stream = true;
                    // Target lies past the last frame: show the last one
                    if self.target.is_some() {
                        found = self.candidate.map(|pts| (pts, true));
                    }
                    break;
                }
                Err(e) => tracing::warn!("VideoSeeker: {}", e),
            }
        }

        let Some((pts, held)) = found else {
            return;
        };
        self.target = None;
        self.candidate = None;

        let frame = if held { &session.held } else { &session.frame };
        match session.converter.convert(frame, &mut self.pixels) {
            Ok(()) => {
                if sink.upload_frame(&self.pixels, session.info.width, session.info.height) {
                    self.new_frame = true;
                    self.last_pts = Some(pts);
                }
            }
            Err(e) => tracing::warn!("VideoSeeker: failed to convert frame: {}", e),
        }
    }

    pub fn seek_time(&mut self, seconds: f64) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let seconds = seconds.max(0.0);
        if let Err(e) = session.source.seek(seconds) {
            tracing::warn!("VideoSeeker: {}", e);
            return;
        }
        self.target = Some(session.info.time_base.seconds_to_ticks_ceil(seconds));
        self.candidate = None;
        self.end_of_stream = false;
    }

    pub fn seek_frame(&mut self, frame: u64) {
        let frame_rate = self.frame_rate();
        if frame_rate > 0.0 {
            self.seek_time(frame as f64 / frame_rate);
        }
    }

    pub fn seek_position(&mut self, position: f64) {
        self.seek_time(position.clamp(0.0, 1.0) * self.duration());
    }

    pub fn is_loaded(&self) -> bool {
        self.session.is_some()
    }

    pub fn is_frame_new(&self) -> bool {
        self.new_frame
    }

    /// Decoder reached the end; a seek resets it
    pub fn is_finished(&self) -> bool {
        self.end_of_stream
    }

    /// Pts of the last presented frame
    pub fn last_pts(&self) -> Option<i64> {
        self.last_pts
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn width(&self) -> u32 {
        self.session.as_ref().map_or(0, |s| s.info.width)
    }

    pub fn height(&self) -> u32 {
        self.session.as_ref().map_or(0, |s| s.info.height)
    }

    pub fn duration(&self) -> f64 {
        self.session.as_ref().map_or(0.0, |s| s.info.duration)
    }

    pub fn frame_rate(&self) -> f64 {
        self.session.as_ref().map_or(0.0, |s| s.info.frame_rate)
    }

    pub fn frame_count(&self) -> u64 {
        self.session.as_ref().map_or(0, |s| s.info.frame_count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::testing::{RecordingSink, SyntheticSource};

    fn seeker(frames: i64) -> VideoSeeker<SyntheticSource> {
        let mut seeker = VideoSeeker::new();
        assert!(seeker.load_source(SyntheticSource::new(frames, 30)));
        seeker
    }

    #[test]
    fn test_update_steps_one_frame() {
        let mut seeker = seeker(30);
        let mut sink = RecordingSink::default();
        for _ in 0..3 {
            seeker.update(&mut sink);
            assert!(seeker.is_frame_new());
        }
        assert_eq!(sink.presented, vec![0, 1, 2]);
    }

    #[test]
    fn test_seek_lands_on_target_frame() {
        let mut seeker = seeker(300);
        let mut sink = RecordingSink::default();

        // Keyframe at 40, target 47: seven frames of pre-roll fit in one update
        seeker.seek_frame(47);
        seeker.update(&mut sink);
        assert_eq!(sink.presented, vec![47]);
        assert_eq!(seeker.last_pts(), Some(47));

        seeker.seek_position(0.5);
        seeker.update(&mut sink);
        assert_eq!(sink.presented.last(), Some(&150));
    }

    #[test]
    fn test_long_preroll_spans_updates() {
        let mut seeker = VideoSeeker::new();
        seeker.load_source(SyntheticSource::new(300, 30).with_gop(30));
        let mut sink = RecordingSink::default();

        // Keyframe at 0, target 25: 25 frames of pre-roll take three updates
        seeker.seek_frame(25);
        seeker.update(&mut sink);
        assert!(!seeker.is_frame_new());
        seeker.update(&mut sink);
        assert!(!seeker.is_frame_new());
        seeker.update(&mut sink);
        assert!(seeker.is_frame_new());
        assert_eq!(sink.presented, vec![25]);
    }

    #[test]
    fn test_seek_past_last_frame_shows_last() {
        let mut seeker = seeker(5);
        let mut sink = RecordingSink::default();
        seeker.seek_time(0.16);
        // Tick 5 doesn't exist; the decoder runs out after frame 4 and wipes
        // its output frame, so frame 4 must come from the held copy
        seeker.update(&mut sink);
        assert_eq!(sink.presented, vec![4]);
        assert_eq!(seeker.last_pts(), Some(4));
        assert!(seeker.is_finished());
    }

    #[test]
    fn test_seek_between_frames_lands_on_next_frame() {
        let mut seeker = seeker(300);
        let mut sink = RecordingSink::default();
        // 5.11s falls between frame 153 (5.100s) and 154 (5.133s)
        seeker.seek_time(5.11);
        seeker.update(&mut sink);
        assert_eq!(sink.presented, vec![154]);
    }

    #[test]
    fn test_end_of_stream() {
        let mut seeker = seeker(2);
        let mut sink = RecordingSink::default();
        seeker.update(&mut sink);
        seeker.update(&mut sink);
        seeker.update(&mut sink);
        assert!(!seeker.is_frame_new());
        assert!(seeker.is_finished());
        assert_eq!(sink.presented, vec![0, 1]);

        seeker.seek_time(0.0);
        assert!(!seeker.is_finished());
        seeker.update(&mut sink);
        assert_eq!(sink.presented.last(), Some(&0));
    }

    #[test]
    fn test_unloaded_seeker_is_inert() {
        let mut seeker: VideoSeeker<SyntheticSource> = VideoSeeker::default();
        seeker.seek_time(3.0);
        seeker.update(&mut RecordingSink::default());
        assert!(!seeker.is_loaded());
        assert!(!seeker.is_frame_new());
        assert_eq!(seeker.frame_count(), 0);
    }
}
