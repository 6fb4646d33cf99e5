//! Background decode thread
//!
//! One thread per loaded player. It owns the codec session and shares the
//! frame pool, the frame queue and the playback state with the caller
//! through a single mutex + condvar pair. It sleeps while paused, while the
//! queue is full and at end of stream; a seek or cancellation wakes it.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use super::clock::PlaybackClock;
use super::codec::{Decoded, VideoSource};
use super::frame::{DecodedFrame, FramePool};
use super::ring::FrameRingBuffer;
use crate::telemetry::PlaybackStats;

/// Shutdown flag checked inside every wait predicate
#[derive(Debug, Clone, Default)]
pub(crate) struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Transport state guarded by the exchange mutex
#[derive(Debug)]
pub(crate) struct PlaybackState {
    pub playing: bool,
    pub looping: bool,
    /// Single-slot seek request; a newer request overwrites it
    pub seek: Option<f64>,
    /// Bumped on every seek so in-flight frames can be recognized as stale
    pub seek_generation: u64,
    /// Decoder ran out of frames and the queue has drained
    pub end_of_stream: bool,
    /// Decode one frame even while paused (after load or a seek)
    pub preroll: bool,
    /// Present the next queued frame without waiting for the clock
    pub reveal: bool,
    pub clock: PlaybackClock,
}

/// Everything shared between the caller and the decode thread
pub(crate) struct Exchange<F> {
    pub state: PlaybackState,
    pub ring: FrameRingBuffer<DecodedFrame<F>>,
    pub pool: FramePool<F>,
    pub stats: PlaybackStats,
}

impl<F> Exchange<F> {
    pub fn new(state: PlaybackState, ring_capacity: usize, pool: FramePool<F>) -> Self {
        Self {
            state,
            ring: FrameRingBuffer::new(ring_capacity),
            pool,
            stats: PlaybackStats::default(),
        }
    }

    /// Return every queued frame to the pool
    pub fn clear_ring(&mut self) -> usize {
        let mut discarded = 0;
        for frame in self.ring.drain() {
            self.pool.release(frame);
            discarded += 1;
        }
        self.stats.frames_discarded += discarded as u64;
        discarded
    }

    /// Record a seek: re-base the clock, drop queued frames and wake the decoder
    pub fn request_seek(&mut self, seconds: f64) {
        self.state.seek = Some(seconds);
        self.state.seek_generation += 1;
        self.state.end_of_stream = false;
        self.state.preroll = true;
        self.state.reveal = true;
        self.state.clock.seek(seconds);
        self.clear_ring();
    }

    /// Counter snapshot including the live queue figures
    pub fn stats_snapshot(&self) -> PlaybackStats {
        PlaybackStats {
            queue_depth: self.ring.len(),
            queue_high_water: self.ring.high_water(),
            queue_capacity: self.ring.capacity(),
            ..self.stats.clone()
        }
    }
}

/// Mutex + condvar pair plus the cancellation token
pub(crate) struct Shared<F> {
    exchange: Mutex<Exchange<F>>,
    signal: Condvar,
    cancel: CancellationToken,
}

impl<F> Shared<F> {
    pub fn new(exchange: Exchange<F>) -> Self {
        Self {
            exchange: Mutex::new(exchange),
            signal: Condvar::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Lock the exchange, recovering from a poisoned mutex
    pub fn lock(&self) -> MutexGuard<'_, Exchange<F>> {
        self.exchange.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block while `cond` holds and the token is not cancelled
    pub fn wait_while<'a>(
        &self,
        guard: MutexGuard<'a, Exchange<F>>,
        mut cond: impl FnMut(&mut Exchange<F>) -> bool,
    ) -> MutexGuard<'a, Exchange<F>> {
        let cancel = &self.cancel;
        self.signal
            .wait_while(guard, |ex| !cancel.is_cancelled() && cond(ex))
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn notify(&self) {
        self.signal.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Raise the token and wake every waiter
    pub fn cancel(&self) {
        self.cancel.cancel();
        // Take the lock so a waiter between its predicate check and sleep sees the flag
        let _guard = self.lock();
        self.notify();
    }
}

/// State owned by the decode thread
pub(crate) struct DecodeWorker<S: VideoSource> {
    source: S,
    shared: Arc<Shared<S::Frame>>,
    /// Frame checked out of the pool but not queued
    spare: Option<DecodedFrame<S::Frame>>,
    /// Frames before this pts are pre-roll from the keyframe and dropped
    min_pts: Option<i64>,
    /// Seek generation the frames being decoded belong to
    generation: u64,
}

impl<S: VideoSource> DecodeWorker<S> {
    pub fn new(source: S, shared: Arc<Shared<S::Frame>>) -> Self {
        Self {
            source,
            shared,
            spare: None,
            min_pts: None,
            generation: 0,
        }
    }

    /// Start the worker on a named thread
    pub fn spawn(self) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("video-decode".into())
            .spawn(move || self.run())
    }

    fn run(mut self) {
        tracing::debug!("Decode thread started");

        while self.step() {}

        if let Some(frame) = self.spare.take() {
            self.shared.lock().pool.release(frame);
        }
        tracing::debug!("Decode thread stopped");
    }

    /// One decode iteration. Returns false once cancelled.
    fn step(&mut self) -> bool {
        let shared = Arc::clone(&self.shared);

        let mut ex = shared.lock();
        ex = shared.wait_while(ex, |ex| {
            !ex.state.playing && ex.state.seek.is_none() && !ex.state.preroll
        });
        if shared.is_cancelled() {
            return false;
        }

        if let Some(target) = ex.state.seek.take() {
            self.generation = ex.state.seek_generation;
            ex.clear_ring();
            drop(ex);
            self.apply_seek(target);
            return true;
        }
        let generation = self.generation;

        let mut frame = match self.spare.take() {
            Some(frame) => frame,
            None => {
                ex = shared.wait_while(ex, |ex| ex.pool.available() == 0 && ex.state.seek.is_none());
                if shared.is_cancelled() {
                    return false;
                }
                match ex.pool.acquire() {
                    Some(frame) if ex.state.seek.is_none() => frame,
                    Some(frame) => {
                        self.spare = Some(frame);
                        return true;
                    }
                    None => return true,
                }
            }
        };
        drop(ex);

        // Decode without holding the lock
        let result = self.source.decode_next(&mut frame.storage);

        match result {
            Ok(Decoded::Frame { pts }) => {
                frame.pts = pts;
                let mut ex = shared.lock();
                ex.stats.frames_decoded += 1;

                if self.min_pts.is_some_and(|min| pts < min) {
                    ex.stats.frames_discarded += 1;
                    self.spare = Some(frame);
                    return true;
                }
                self.min_pts = None;

                ex = shared.wait_while(ex, |ex| ex.ring.is_full() && ex.state.seek_generation == generation);
                if shared.is_cancelled() {
                    self.spare = Some(frame);
                    return false;
                }
                if ex.state.seek_generation != generation {
                    // A seek arrived while decoding; this frame predates it
                    ex.stats.frames_discarded += 1;
                    self.spare = Some(frame);
                    return true;
                }

                if let Err(frame) = ex.ring.push_back(frame) {
                    self.spare = Some(frame);
                    return true;
                }
                ex.state.preroll = false;
                shared.notify();
            }
            Ok(Decoded::Pending) => {
                self.spare = Some(frame);
            }
            Ok(Decoded::EndOfStream) => {
                self.spare = Some(frame);
                return self.wait_at_end(generation);
            }
            Err(e) => {
                self.spare = Some(frame);
                tracing::warn!("Skipping undecodable packet: {}", e);
                shared.lock().stats.decode_errors += 1;
            }
        }
        true
    }

    fn apply_seek(&mut self, target: f64) {
        if let Err(e) = self.source.seek(target) {
            // The demuxer position is unchanged; keep decoding from there
            tracing::warn!("{}", e);
        }
        let time_base = self.source.info().time_base;
        self.min_pts = Some(time_base.seconds_to_ticks_ceil(target));
        tracing::debug!("Decoder seeked to {:.3}s", target);
        self.shared.notify();
    }

    /// Let the presentation side drain the queue, flag end of stream, then
    /// sleep until the next seek.
    fn wait_at_end(&mut self, generation: u64) -> bool {
        let shared = Arc::clone(&self.shared);
        let mut ex = shared.lock();

        ex = shared.wait_while(ex, |ex| !ex.ring.is_empty() && ex.state.seek_generation == generation);
        if shared.is_cancelled() {
            return false;
        }
        if ex.state.seek_generation != generation {
            return true;
        }

        ex.state.end_of_stream = true;
        ex.state.preroll = false;
        if !ex.state.looping {
            ex.state.playing = false;
            ex.state.clock.pause();
        }
        tracing::debug!("End of stream");
        shared.notify();

        let ex = shared.wait_while(ex, |ex| ex.state.seek.is_none());
        drop(ex);
        !shared.is_cancelled()
    }
}
