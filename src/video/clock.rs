//! Playback clock
//!
//! Maps wall-clock time onto media time. Every state transition re-bases the
//! clock so `offset` always holds the media time at the last transition:
//!
//! ```text
//! media_time = (now - anchor) * speed + offset     while playing
//! media_time = offset                              otherwise
//! ```

use std::time::Instant;

/// Transport state of a player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackStatus {
    #[default]
    Stopped,
    Playing,
    Paused,
}

/// Clamp a playback rate: negative freezes, non-finite falls back to 1.0
pub(crate) fn sanitize_speed(speed: f64) -> f64 {
    if speed.is_finite() {
        speed.max(0.0)
    } else {
        1.0
    }
}

/// Wall-clock to media-time mapping
#[derive(Debug, Clone)]
pub struct PlaybackClock {
    status: PlaybackStatus,
    /// Media time at the last transition, in seconds
    offset: f64,
    /// Playback rate multiplier
    speed: f64,
    /// Wall-clock instant of the last transition while playing
    anchor: Option<Instant>,
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackClock {
    pub fn new() -> Self {
        Self {
            status: PlaybackStatus::Stopped,
            offset: 0.0,
            speed: 1.0,
            anchor: None,
        }
    }

    /// Current media time in seconds
    pub fn current_time(&self) -> f64 {
        self.current_time_at(Instant::now())
    }

    /// Start or resume; media time continues from the current offset
    pub fn play(&mut self) {
        self.play_at(Instant::now());
    }

    /// Freeze media time. No-op unless playing.
    pub fn pause(&mut self) {
        self.pause_at(Instant::now());
    }

    /// Change the rate without a jump in reported time
    pub fn set_speed(&mut self, speed: f64) {
        self.set_speed_at(speed, Instant::now());
    }

    /// Jump to `seconds`, keeping the current transport state
    pub fn seek(&mut self, seconds: f64) {
        self.seek_at(seconds, Instant::now());
    }

    /// Back to `Stopped` at media time zero
    pub fn stop(&mut self) {
        self.status = PlaybackStatus::Stopped;
        self.offset = 0.0;
        self.anchor = None;
    }

    pub fn status(&self) -> PlaybackStatus {
        self.status
    }

    pub fn is_running(&self) -> bool {
        self.status == PlaybackStatus::Playing
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub(crate) fn current_time_at(&self, now: Instant) -> f64 {
        match self.anchor {
            Some(anchor) => {
                let elapsed = now.saturating_duration_since(anchor).as_secs_f64();
                elapsed * self.speed + self.offset
            }
            None => self.offset,
        }
    }

    pub(crate) fn play_at(&mut self, now: Instant) {
        if self.status == PlaybackStatus::Playing {
            return;
        }
        self.status = PlaybackStatus::Playing;
        self.anchor = Some(now);
    }

    pub(crate) fn pause_at(&mut self, now: Instant) {
        if self.status != PlaybackStatus::Playing {
            return;
        }
        self.offset = self.current_time_at(now);
        self.anchor = None;
        self.status = PlaybackStatus::Paused;
    }

    pub(crate) fn set_speed_at(&mut self, speed: f64, now: Instant) {
        let speed = sanitize_speed(speed);
        self.rebase(now);
        self.speed = speed;
    }

    pub(crate) fn seek_at(&mut self, seconds: f64, now: Instant) {
        self.offset = seconds.max(0.0);
        if self.anchor.is_some() {
            self.anchor = Some(now);
        }
    }

    fn rebase(&mut self, now: Instant) {
        self.offset = self.current_time_at(now);
        if self.anchor.is_some() {
            self.anchor = Some(now);
        }
    }
}
