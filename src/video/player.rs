//! Background-threaded video player
//!
//! A decode thread fills a bounded queue of native frames ahead of the
//! playback clock. Once per render tick, `update()` takes every frame that
//! has become due, keeps only the newest, converts it to RGBA and hands it
//! to a texture sink. The caller never blocks on decode work.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;

use super::clock::{sanitize_speed, PlaybackClock, PlaybackStatus};
use super::codec::{FrameConverter, StreamInfo, VideoSource};
use super::decoder::{DecodeSession, DecoderParams};
use super::frame::{DecodedFrame, FramePool};
use super::texture::TextureSink;
use super::worker::{DecodeWorker, Exchange, PlaybackState, Shared};
use crate::settings::PlayerSettings;
use crate::telemetry::PlaybackStats;

/// Tolerance when comparing a frame's pts against the clock, in seconds
const PTS_EPSILON: f64 = 1e-6;

/// Frames checked out of the pool outside the queue: one being decoded,
/// one being presented
const POOL_HEADROOM: usize = 2;

/// Session state that only exists while a video is loaded
struct Loaded<S: VideoSource> {
    shared: Arc<Shared<S::Frame>>,
    converter: S::Converter,
    info: StreamInfo,
    thread_handle: Option<JoinHandle<()>>,
}

/// Threaded video player
///
/// `S` is the codec session; `DecodeSession` (FFmpeg) unless a custom
/// source is loaded through `load_source`.
pub struct VideoPlayer<S: VideoSource = DecodeSession> {
    settings: PlayerSettings,
    loaded: Option<Loaded<S>>,
    /// Last converted frame, tightly packed RGBA
    pixels: Vec<u8>,
    /// Whether the last `update()` presented a frame
    new_frame: bool,
    /// Pts of the last presented frame
    last_pts: Option<i64>,
    path: Option<PathBuf>,
}

impl VideoPlayer<DecodeSession> {
    /// Open a video file and start the decode thread
    ///
    /// Returns false (and stays unloaded) if the file can't be opened.
    pub fn load(&mut self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        self.close();

        let params = DecoderParams {
            thread_count: self.settings.decode_threads,
        };
        match DecodeSession::open(path, &params) {
            Ok(session) => {
                let loaded = self.load_source(session);
                if loaded {
                    self.path = Some(path.to_path_buf());
                }
                loaded
            }
            Err(e) => {
                tracing::error!("Failed to load {}: {}", path.display(), e);
                false
            }
        }
    }
}

impl<S: VideoSource> VideoPlayer<S> {
    pub fn new(settings: PlayerSettings) -> Self {
        Self {
            settings,
            loaded: None,
            pixels: Vec::new(),
            new_frame: false,
            last_pts: None,
            path: None,
        }
    }

    /// Take ownership of an opened codec session and start decoding
    pub fn load_source(&mut self, source: S) -> bool {
        self.close();

        let converter = match source.converter() {
            Ok(converter) => converter,
            Err(e) => {
                tracing::error!("Failed to create frame converter: {}", e);
                return false;
            }
        };

        let info = source.info().clone();
        let capacity = info.queue_capacity(self.settings.look_ahead_ms);
        let pool = FramePool::new(capacity + POOL_HEADROOM, || source.allocate_frame());

        self.settings.speed = sanitize_speed(self.settings.speed);
        let mut clock = PlaybackClock::new();
        clock.set_speed(self.settings.speed);
        let state = PlaybackState {
            playing: false,
            looping: self.settings.loop_playback,
            seek: None,
            seek_generation: 0,
            end_of_stream: false,
            preroll: true,
            reveal: true,
            clock,
        };

        let shared = Arc::new(Shared::new(Exchange::new(state, capacity, pool)));
        let thread_handle = match DecodeWorker::new(source, Arc::clone(&shared)).spawn() {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!("Failed to spawn decode thread: {}", e);
                return false;
            }
        };

        tracing::info!(
            "VideoPlayer: {}x{} @ {:.2}fps, duration: {:.2}s, queue: {} frames",
            info.width,
            info.height,
            info.frame_rate,
            info.duration,
            capacity
        );

        self.pixels = vec![0; info.rgba_size()];
        self.new_frame = false;
        self.last_pts = None;
        self.loaded = Some(Loaded {
            shared,
            converter,
            info,
            thread_handle: Some(thread_handle),
        });
        true
    }

    /// Stop the decode thread and release the session. No-op when unloaded.
    pub fn close(&mut self) {
        let Some(mut loaded) = self.loaded.take() else {
            return;
        };

        loaded.shared.cancel();
        if let Some(handle) = loaded.thread_handle.take() {
            if let Err(e) = handle.join() {
                tracing::warn!("Failed to join decode thread: {:?}", e);
            }
        }

        self.new_frame = false;
        self.last_pts = None;
        self.path = None;
        tracing::info!("VideoPlayer: closed");
    }

    /// Present the newest due frame, if any
    ///
    /// Call once per render tick. Frames that became due since the last
    /// tick but were overtaken by a newer due frame are skipped.
    pub fn update<T: TextureSink + ?Sized>(&mut self, sink: &mut T) {
        self.new_frame = false;
        let Some(loaded) = self.loaded.as_mut() else {
            return;
        };
        let shared = &loaded.shared;
        let time_base = loaded.info.time_base;
        let duration = loaded.info.duration;

        let (frame, now) = {
            let mut guard = shared.lock();
            let ex = &mut *guard;
            let now = ex.state.clock.current_time();

            let past_end = ex.state.end_of_stream || (duration > 0.0 && now > duration);
            if ex.state.looping && ex.state.playing && past_end {
                tracing::debug!("VideoPlayer: looping");
                ex.request_seek(0.0);
                ex.state.clock.play();
                shared.notify();
                return;
            }

            // First frame after load or a seek is at or past the target; show it
            // even while the clock is frozen
            let mut kept: Option<DecodedFrame<S::Frame>> = None;
            if ex.state.reveal {
                kept = ex.ring.pop_front();
                ex.state.reveal = kept.is_none();
            }
            while let Some(frame) = ex
                .ring
                .pop_front_if(|f| time_base.ticks_to_seconds(f.pts) <= now + PTS_EPSILON)
            {
                if let Some(older) = kept.replace(frame) {
                    ex.pool.release(older);
                    ex.stats.frames_skipped += 1;
                }
            }
            let Some(frame) = kept else {
                return;
            };
            shared.notify();
            (frame, now)
        };

        // Convert and upload outside the lock
        let presented = match loaded.converter.convert(&frame.storage, &mut self.pixels) {
            Ok(()) => sink.upload_frame(&self.pixels, loaded.info.width, loaded.info.height),
            Err(e) => {
                tracing::warn!("Failed to convert frame {}: {}", frame.pts, e);
                false
            }
        };
        let pts = frame.pts;

        let mut ex = shared.lock();
        ex.pool.release(frame);
        shared.notify();
        if presented {
            ex.stats.frames_presented += 1;
            ex.stats.presentation_lag = now - time_base.ticks_to_seconds(pts);
            self.new_frame = true;
            self.last_pts = Some(pts);
        }
    }

    /// Start or resume playback
    ///
    /// After the end of a non-looping video this restarts from the beginning.
    pub fn play(&mut self) {
        self.with_exchange(|ex| {
            if ex.state.end_of_stream && !ex.state.looping {
                ex.request_seek(0.0);
            }
            ex.state.playing = true;
            ex.state.clock.play();
        });
    }

    /// Pause playback. No-op unless playing.
    pub fn pause(&mut self) {
        self.with_exchange(|ex| {
            if ex.state.playing {
                ex.state.playing = false;
                ex.state.clock.pause();
            }
        });
    }

    /// Change the playback rate (negative values clamp to zero)
    pub fn set_speed(&mut self, speed: f64) {
        let speed = sanitize_speed(speed);
        self.settings.speed = speed;
        self.with_exchange(|ex| ex.state.clock.set_speed(speed));
    }

    pub fn set_loop(&mut self, looping: bool) {
        self.settings.loop_playback = looping;
        self.with_exchange(|ex| ex.state.looping = looping);
    }

    /// Jump to `seconds`. Queued frames are discarded and the decoder
    /// restarts from the keyframe before the target.
    pub fn seek_time(&mut self, seconds: f64) {
        let duration = self.duration();
        let mut target = seconds.max(0.0);
        if duration > 0.0 {
            target = target.min(duration);
        }
        self.with_exchange(|ex| ex.request_seek(target));
        tracing::debug!("VideoPlayer: seek to {:.3}s", target);
    }

    /// Seek to a fraction of the duration
    pub fn seek_position(&mut self, position: f64) {
        self.seek_time(position.clamp(0.0, 1.0) * self.duration());
    }

    /// Seek to a frame index
    pub fn seek_frame(&mut self, frame: u64) {
        let frame_rate = self.frame_rate();
        if frame_rate > 0.0 {
            self.seek_time(frame as f64 / frame_rate);
        }
    }

    fn with_exchange(&mut self, apply: impl FnOnce(&mut Exchange<S::Frame>)) {
        if let Some(loaded) = &self.loaded {
            let mut ex = loaded.shared.lock();
            apply(&mut *ex);
            loaded.shared.notify();
        }
    }

    fn read_exchange<R>(&self, default: R, read: impl FnOnce(&Exchange<S::Frame>) -> R) -> R {
        match &self.loaded {
            Some(loaded) => read(&*loaded.shared.lock()),
            None => default,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    pub fn is_playing(&self) -> bool {
        self.read_exchange(false, |ex| ex.state.playing)
    }

    pub fn is_looping(&self) -> bool {
        self.settings.loop_playback
    }

    /// Whether the last `update()` uploaded a new frame
    pub fn is_frame_new(&self) -> bool {
        self.new_frame
    }

    pub fn status(&self) -> PlaybackStatus {
        self.read_exchange(PlaybackStatus::Stopped, |ex| ex.state.clock.status())
    }

    /// Current media time in seconds
    pub fn current_time(&self) -> f64 {
        self.read_exchange(0.0, |ex| ex.state.clock.current_time())
    }

    /// Current media time as a fraction of the duration
    pub fn position(&self) -> f64 {
        let duration = self.duration();
        if duration > 0.0 {
            (self.current_time() / duration).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    /// Frame index of the last presented frame
    pub fn current_frame(&self) -> Option<u64> {
        let info = self.info()?;
        let pts = self.last_pts?;
        let seconds = info.time_base.ticks_to_seconds(pts);
        Some((seconds * info.frame_rate).round().max(0.0) as u64)
    }

    pub fn speed(&self) -> f64 {
        self.settings.speed
    }

    pub fn info(&self) -> Option<&StreamInfo> {
        self.loaded.as_ref().map(|l| &l.info)
    }

    pub fn width(&self) -> u32 {
        self.info().map_or(0, |i| i.width)
    }

    pub fn height(&self) -> u32 {
        self.info().map_or(0, |i| i.height)
    }

    pub fn frame_rate(&self) -> f64 {
        self.info().map_or(0.0, |i| i.frame_rate)
    }

    pub fn duration(&self) -> f64 {
        self.info().map_or(0.0, |i| i.duration)
    }

    pub fn frame_count(&self) -> u64 {
        self.info().map_or(0, |i| i.frame_count())
    }

    /// Path of the loaded file (None for custom sources)
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Last converted frame as tightly packed RGBA
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn stats(&self) -> PlaybackStats {
        self.read_exchange(PlaybackStats::default(), |ex| ex.stats_snapshot())
    }
}

impl Default for VideoPlayer<DecodeSession> {
    fn default() -> Self {
        Self::new(PlayerSettings::default())
    }
}

impl<S: VideoSource> Drop for VideoPlayer<S> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::testing::{wait_until, RecordingSink, SyntheticSource};
    use std::time::Duration;

    fn player(looping: bool) -> VideoPlayer<SyntheticSource> {
        VideoPlayer::new(PlayerSettings {
            loop_playback: looping,
            ..PlayerSettings::default()
        })
    }

    /// Call `update()` every millisecond until `done` or two seconds pass
    fn run_until(
        player: &mut VideoPlayer<SyntheticSource>,
        sink: &mut RecordingSink,
        mut done: impl FnMut(&VideoPlayer<SyntheticSource>, &RecordingSink) -> bool,
    ) -> bool {
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while std::time::Instant::now() < deadline {
            player.update(sink);
            if done(player, sink) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        false
    }

    fn strictly_increasing(pts: &[i64]) -> bool {
        pts.windows(2).all(|w| w[0] < w[1])
    }

    #[test]
    fn test_failed_load_stays_unloaded() {
        let mut player: VideoPlayer = VideoPlayer::default();
        assert!(!player.load("/nonexistent/immersive-media/clip.mov"));
        assert!(!player.is_loaded());
        assert!(!player.is_playing());
        assert_eq!(player.duration(), 0.0);
    }

    #[test]
    fn test_load_reports_stream_info() {
        let mut player = player(false);
        assert!(player.load_source(SyntheticSource::new(300, 30)));
        assert!(player.is_loaded());
        assert_eq!(player.width(), 4);
        assert_eq!(player.frame_rate(), 30.0);
        assert!((player.duration() - 10.0).abs() < 1e-9);
        assert_eq!(player.frame_count(), 300);
        assert_eq!(player.status(), PlaybackStatus::Stopped);
        assert!(player.path().is_none());
    }

    #[test]
    fn test_first_frame_shown_before_play() {
        let mut player = player(false);
        player.load_source(SyntheticSource::new(300, 30));
        let mut sink = RecordingSink::default();

        assert!(run_until(&mut player, &mut sink, |_, s| !s.presented.is_empty()));
        assert_eq!(sink.presented, vec![0]);
        assert!(player.is_frame_new());
        assert!(!player.is_playing());

        player.update(&mut sink);
        assert!(!player.is_frame_new());
    }

    #[test]
    fn test_close_and_pause_twice_are_noops() {
        let mut player = player(false);
        player.load_source(SyntheticSource::new(300, 30));
        player.play();
        player.pause();
        let paused_at = player.current_time();
        player.pause();
        assert_eq!(player.status(), PlaybackStatus::Paused);
        assert_eq!(player.current_time(), paused_at);

        player.close();
        player.close();
        assert!(!player.is_loaded());

        // Commands on a closed player do nothing
        player.play();
        player.update(&mut RecordingSink::default());
        assert!(!player.is_playing());
        assert!(!player.is_frame_new());
    }

    #[test]
    fn test_seek_position_sets_clock() {
        let mut player = player(false);
        player.load_source(SyntheticSource::new(300, 30));
        player.seek_position(0.5);
        assert!((player.current_time() - 5.0).abs() < 1e-9);
        assert!((player.position() - 0.5).abs() < 1e-9);

        player.seek_frame(60);
        assert!((player.current_time() - 2.0).abs() < 1e-9);

        // Targets are clamped to the stream
        player.seek_time(-3.0);
        assert_eq!(player.current_time(), 0.0);
        player.seek_time(99.0);
        assert!((player.current_time() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_queue_bounded_when_decode_outruns_playback() {
        let mut player = player(false);
        player.load_source(SyntheticSource::new(300, 30));
        player.play();

        assert!(wait_until(Duration::from_secs(2), || {
            let stats = player.stats();
            stats.queue_depth == stats.queue_capacity
        }));
        std::thread::sleep(Duration::from_millis(20));

        let stats = player.stats();
        assert_eq!(stats.queue_capacity, 3);
        assert!(stats.queue_high_water <= stats.queue_capacity);
    }

    #[test]
    fn test_frames_after_seek_are_not_earlier_than_target() {
        let mut player = player(false);
        player.load_source(SyntheticSource::new(300, 30));
        player.play();
        let mut sink = RecordingSink::default();
        assert!(run_until(&mut player, &mut sink, |_, s| s.presented.len() >= 3));

        // 5.1s is between keyframes 150 and 160
        player.seek_time(5.1);
        let mut after = RecordingSink::default();
        assert!(run_until(&mut player, &mut after, |_, s| s.presented.len() >= 5));

        assert!(after.presented.iter().all(|&pts| pts >= 153), "{:?}", after.presented);
        assert!(strictly_increasing(&after.presented));
        assert!(player.current_frame().is_some_and(|f| f >= 153));
    }

    #[test]
    fn test_seek_while_paused_shows_target_frame() {
        let mut player = player(false);
        player.load_source(SyntheticSource::new(300, 30));
        let mut sink = RecordingSink::default();

        player.seek_frame(42);
        assert!(run_until(&mut player, &mut sink, |_, s| s.presented.contains(&42)));
        assert!(!player.is_playing());
        assert!(sink.presented.iter().all(|&pts| pts == 0 || pts == 42));
    }

    #[test]
    fn test_seek_between_frames_never_shows_earlier_frame() {
        let mut player = player(false);
        player.load_source(SyntheticSource::new(300, 30));
        player.play();
        let mut sink = RecordingSink::default();
        assert!(run_until(&mut player, &mut sink, |_, s| s.presented.len() >= 3));

        // Frame 153 sits at 5.100s, before the target
        player.seek_time(5.11);
        let mut after = RecordingSink::default();
        assert!(run_until(&mut player, &mut after, |_, s| s.presented.len() >= 3));

        assert_eq!(after.presented.first(), Some(&154));
        assert!(strictly_increasing(&after.presented));
    }

    #[test]
    fn test_paused_seek_between_frames_shows_next_frame() {
        let mut player = player(false);
        player.load_source(SyntheticSource::new(300, 30));
        let mut sink = RecordingSink::default();

        player.seek_time(5.11);
        assert!(run_until(&mut player, &mut sink, |_, s| s.presented.iter().any(|&pts| pts != 0)));
        assert!(!player.is_playing());
        assert_eq!(sink.presented.last(), Some(&154));
        assert!(sink.presented.iter().all(|&pts| pts == 0 || pts == 154));
        assert!((player.current_time() - 5.11).abs() < 1e-9);

        // The clock stays frozen, so nothing further is shown
        std::thread::sleep(Duration::from_millis(20));
        player.update(&mut sink);
        assert!(!player.is_frame_new());
    }

    #[test]
    fn test_speed_reports_clock_rate() {
        let mut player = player(false);
        player.load_source(SyntheticSource::new(300, 30));
        player.set_speed(f64::NAN);
        assert_eq!(player.speed(), 1.0);
        player.set_speed(-2.0);
        assert_eq!(player.speed(), 0.0);
        player.set_speed(1.5);
        assert_eq!(player.speed(), 1.5);
    }

    #[test]
    fn test_skip_ahead_presents_newest_due_frame() {
        let mut player = player(false);
        player.load_source(SyntheticSource::new(300, 30));
        player.set_speed(0.0);
        player.play();

        let mut sink = RecordingSink::default();
        assert!(run_until(&mut player, &mut sink, |p, _| {
            let stats = p.stats();
            stats.queue_depth == stats.queue_capacity
        }));
        let uploads = sink.presented.len();
        let skipped = player.stats().frames_skipped;

        // Jump the clock well past every queued frame
        player.set_speed(100.0);
        std::thread::sleep(Duration::from_millis(50));
        player.update(&mut sink);

        assert_eq!(sink.presented.len(), uploads + 1);
        assert!(player.stats().frames_skipped >= skipped + 2);
        assert!(strictly_increasing(&sink.presented));
    }

    #[test]
    fn test_end_of_stream_without_loop() {
        let mut player = player(false);
        player.load_source(SyntheticSource::new(10, 30));
        player.play();

        let mut sink = RecordingSink::default();
        assert!(run_until(&mut player, &mut sink, |p, _| !p.is_playing()));
        assert_eq!(sink.presented.last(), Some(&9));
        assert!(strictly_increasing(&sink.presented));
        assert_eq!(player.status(), PlaybackStatus::Paused);

        // Play after the end rewinds
        player.play();
        assert!(player.is_playing());
        assert!(player.current_time() < 0.1);
    }

    #[test]
    fn test_looping_wraps_to_start() {
        let mut player = player(true);
        player.load_source(SyntheticSource::new(10, 30));
        player.play();

        let mut sink = RecordingSink::default();
        assert!(run_until(&mut player, &mut sink, |_, s| {
            s.presented.windows(2).any(|w| w[1] < w[0]) && s.presented.len() > 12
        }));
        assert!(player.is_playing());

        // Within each pass frames only move forward
        let wrap = sink.presented.windows(2).position(|w| w[1] < w[0]).unwrap();
        assert!(strictly_increasing(&sink.presented[..=wrap]));
    }

    #[test]
    fn test_decode_errors_are_counted() {
        let mut player = player(false);
        player.load_source(SyntheticSource::new(300, 30).with_decode_error_at(2));
        player.play();

        let mut sink = RecordingSink::default();
        assert!(run_until(&mut player, &mut sink, |_, s| s.presented.iter().any(|&p| p >= 5)));
        let stats = player.stats();
        assert_eq!(stats.decode_errors, 1);
        assert!(!sink.presented.contains(&2));
        assert!(stats.frames_presented >= 1);
    }

    #[test]
    fn test_slow_decoder_keeps_presentation_ordered() {
        let mut player = player(false);
        player.load_source(SyntheticSource::new(300, 60).with_decode_delay(Duration::from_millis(25)));
        player.set_speed(2.0);
        player.play();

        let mut sink = RecordingSink::default();
        assert!(run_until(&mut player, &mut sink, |_, s| s.presented.len() >= 10));
        assert!(strictly_increasing(&sink.presented));
        assert!(player.stats().presentation_lag > -1e-3);
    }
}
