//! Frame exporter
//!
//! Records a capture target into a video file. The render loop draws into
//! the target between `bind()` and `unbind()`; every `unbind()` first
//! collects finished readbacks and encodes them in issue order, then starts
//! a readback of the frame just drawn. A readback that is not ready yet
//! simply waits for a later tick, one that failed is dropped. No frame is
//! ever duplicated to fill a gap.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use super::capture::{CaptureTarget, ReadbackStatus};
use super::codec::VideoSink;
use super::encoder::{EncodeSession, EncoderParams};
use super::ring::FrameRingBuffer;
use crate::settings::ExportSettings;
use crate::telemetry::ExportStats;

/// Records a `CaptureTarget` through a `VideoSink`
///
/// `K` is the encoder; `EncodeSession` (FFmpeg) unless a custom sink is
/// opened through `open_sink`.
pub struct VideoExporter<T: CaptureTarget, K: VideoSink = EncodeSession> {
    target: T,
    sink: Option<K>,
    settings: ExportSettings,
    /// Readback slots in flight, oldest first
    pending: FrameRingBuffer<usize>,
    /// Slot for the next readback
    next_slot: usize,
    /// Pts of the next encoded frame
    frame_index: i64,
    exporting: bool,
    /// Time budget for one encode
    frame_interval: Duration,
    /// Staging buffer for readbacks
    pixels: Vec<u8>,
    stats: ExportStats,
    path: Option<PathBuf>,
}

impl<T: CaptureTarget> VideoExporter<T, EncodeSession> {
    /// Resize the target and create the output file
    ///
    /// Returns false (and stays closed) if the encoder can't be opened.
    pub fn open(&mut self, width: u32, height: u32, fps: f64, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        self.close();

        let mut params = EncoderParams::from_settings(width, height, fps, &self.settings);
        params.input_format = self.target.pixel_format();

        match EncodeSession::open(path, &params) {
            Ok(session) => {
                let opened = self.open_sink(session, fps);
                if opened {
                    self.path = Some(path.to_path_buf());
                }
                opened
            }
            Err(e) => {
                tracing::error!("Failed to open export {}: {}", path.display(), e);
                false
            }
        }
    }
}

impl<T: CaptureTarget, K: VideoSink> VideoExporter<T, K> {
    pub fn new(target: T, settings: ExportSettings) -> Self {
        let slots = target.slot_count().max(1);
        Self {
            target,
            sink: None,
            settings,
            pending: FrameRingBuffer::new(slots),
            next_slot: 0,
            frame_index: 0,
            exporting: false,
            frame_interval: Duration::ZERO,
            pixels: Vec::new(),
            stats: ExportStats::default(),
            path: None,
        }
    }

    /// Attach an opened encoder, sizing the target to match it
    pub fn open_sink(&mut self, sink: K, fps: f64) -> bool {
        self.close();

        if sink.width() != self.target.width() || sink.height() != self.target.height() {
            self.target.resize(sink.width(), sink.height());
        }

        let slots = self.target.slot_count().max(1);
        self.pending = FrameRingBuffer::new(slots);
        self.next_slot = 0;
        self.frame_index = 0;
        self.exporting = false;
        self.frame_interval = if fps > 0.0 {
            Duration::from_secs_f64(1.0 / fps)
        } else {
            Duration::ZERO
        };
        self.pixels = Vec::with_capacity((sink.width() as usize) * (sink.height() as usize) * 4);
        self.stats = ExportStats::default();
        self.sink = Some(sink);

        tracing::info!(
            "VideoExporter: opened {}x{} @ {:.2}fps",
            self.target.width(),
            self.target.height(),
            fps
        );
        true
    }

    /// Start drawing into the capture target
    pub fn bind(&mut self) {
        self.target.bind();
    }

    /// Stop drawing, encode finished readbacks, then read back this frame
    pub fn unbind(&mut self) {
        self.target.unbind();
        if self.sink.is_none() {
            return;
        }

        self.collect_readbacks(false);

        if self.exporting {
            let slot = self.next_slot;
            if self.pending.is_full() {
                self.stats.frames_skipped += 1;
                tracing::debug!("All readback slots in flight, frame not captured");
            } else if self.target.begin_readback(slot) {
                // Cannot fail: the queue was checked above
                let _ = self.pending.push_back(slot);
                self.next_slot = (slot + 1) % self.target.slot_count().max(1);
                self.stats.frames_captured += 1;
            } else {
                self.stats.frames_skipped += 1;
                tracing::debug!("Readback slot {} busy, frame not captured", slot);
            }
        }
        self.stats.pending_readbacks = self.pending.len();
    }

    /// Begin capturing frames. Requires an open encoder.
    pub fn start(&mut self) {
        if self.sink.is_none() {
            tracing::warn!("VideoExporter: start() without an open encoder");
            return;
        }
        if !self.exporting {
            self.exporting = true;
            tracing::info!("VideoExporter: recording");
        }
    }

    /// Stop capturing; readbacks already in flight are still encoded
    pub fn stop(&mut self) {
        if self.exporting {
            self.exporting = false;
            tracing::info!("VideoExporter: paused at frame {}", self.frame_index);
        }
    }

    /// Encode every outstanding readback and finalize the file. No-op when closed.
    pub fn close(&mut self) {
        if self.sink.is_none() {
            return;
        }
        self.exporting = false;

        self.collect_readbacks(true);
        // Anything still queued could not be resolved
        for slot in self.pending.drain() {
            tracing::warn!("Dropping unresolved readback in slot {}", slot);
            self.stats.readbacks_failed += 1;
        }
        self.stats.pending_readbacks = 0;

        if let Some(mut sink) = self.sink.take() {
            if let Err(e) = sink.finish() {
                tracing::error!("Failed to finalize export: {}", e);
            }
        }

        tracing::info!(
            "VideoExporter: closed after {} frames ({} failed readbacks, {} encode errors)",
            self.stats.frames_encoded,
            self.stats.readbacks_failed,
            self.stats.encode_errors
        );
        self.path = None;
    }

    /// Drain completed readbacks from the front of the queue, in issue order
    fn collect_readbacks(&mut self, wait: bool) {
        while let Some(&slot) = self.pending.front() {
            match self.target.poll_readback(slot, &mut self.pixels, wait) {
                ReadbackStatus::Ready => {
                    self.pending.pop_front();
                    self.encode_pixels();
                }
                ReadbackStatus::Failed => {
                    self.pending.pop_front();
                    self.stats.readbacks_failed += 1;
                    tracing::warn!("Readback in slot {} failed, frame dropped", slot);
                }
                ReadbackStatus::Pending => break,
            }
        }
    }

    fn encode_pixels(&mut self) {
        let Some(sink) = self.sink.as_mut() else {
            return;
        };

        let pts = self.frame_index;
        let started = Instant::now();
        match sink.encode_frame(&self.pixels, pts) {
            Ok(packets) => {
                self.stats.frames_encoded += 1;
                self.stats.packets_written += packets as u64;
            }
            Err(e) => {
                self.stats.encode_errors += 1;
                tracing::warn!("Failed to encode frame {}: {}", pts, e);
            }
        }
        // Advance even on failure so timestamps stay strictly increasing
        self.frame_index += 1;

        let elapsed = started.elapsed();
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        self.stats.max_encode_ms = self.stats.max_encode_ms.max(elapsed_ms);
        if !self.frame_interval.is_zero() && elapsed > self.frame_interval {
            self.stats.slow_encodes += 1;
            if self.settings.warn_on_slow_encode {
                tracing::warn!(
                    "Encoding frame {} took {:.1}ms, longer than the {:.1}ms frame interval",
                    pts,
                    elapsed_ms,
                    self.frame_interval.as_secs_f64() * 1000.0
                );
            }
        }
    }

    /// Save the target's current contents as an image
    pub fn save_current_frame(&mut self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        let mut pixels = Vec::new();
        if !self.target.read_pixels(&mut pixels) {
            tracing::warn!("Failed to read back frame for {}", path.display());
            return false;
        }

        let width = self.target.width();
        let height = self.target.height();
        self.target.pixel_format().to_rgba_in_place(&mut pixels);
        if self.settings.vflip {
            flip_rows(&mut pixels, (width * self.target.pixel_format().bytes_per_pixel()) as usize);
        }

        let Some(image) = image::RgbaImage::from_raw(width, height, pixels) else {
            tracing::warn!("Readback size doesn't match {}x{}", width, height);
            return false;
        };
        match image.save(path) {
            Ok(()) => {
                tracing::info!("Saved frame to {}", path.display());
                true
            }
            Err(e) => {
                tracing::error!("Failed to save {}: {}", path.display(), e);
                false
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.sink.is_some()
    }

    pub fn is_exporting(&self) -> bool {
        self.exporting
    }

    /// Frames handed to the encoder since `open`
    pub fn recorded_frame_count(&self) -> u64 {
        self.frame_index as u64
    }

    pub fn stats(&self) -> ExportStats {
        self.stats.clone()
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    pub fn target_mut(&mut self) -> &mut T {
        &mut self.target
    }

    /// Output file of the current export
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl<T: CaptureTarget, K: VideoSink> Drop for VideoExporter<T, K> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Reverse row order in place
fn flip_rows(pixels: &mut [u8], row_bytes: usize) {
    if row_bytes == 0 {
        return;
    }
    let rows = pixels.len() / row_bytes;
    for y in 0..rows / 2 {
        let (top, bottom) = pixels.split_at_mut((rows - 1 - y) * row_bytes);
        top[y * row_bytes..(y + 1) * row_bytes].swap_with_slice(&mut bottom[..row_bytes]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::capture::{CaptureFormat, MemoryTarget};
    use crate::video::testing::{tagged_frame, RecordingVideoSink};

    type TestExporter = VideoExporter<MemoryTarget, RecordingVideoSink>;

    fn exporter(latency: u32) -> TestExporter {
        VideoExporter::new(
            MemoryTarget::new(4, 2, CaptureFormat::Rgba8).with_latency(latency),
            ExportSettings::default(),
        )
    }

    /// One render tick drawing `tag` into the target
    fn tick(exporter: &mut TestExporter, tag: u32) {
        exporter.bind();
        exporter.target_mut().draw(&tagged_frame(4, 2, tag));
        exporter.unbind();
    }

    fn strictly_increasing<T: PartialOrd>(values: &[T]) -> bool {
        values.windows(2).all(|w| w[0] < w[1])
    }

    #[test]
    fn test_toggled_export_has_increasing_unique_pts() {
        let mut exporter = exporter(1);
        let (sink, recording) = RecordingVideoSink::new(4, 2);
        assert!(exporter.open_sink(sink, 30.0));
        exporter.start();

        for t in 0..60 {
            match t {
                20 | 45 => exporter.stop(),
                30 | 50 => exporter.start(),
                _ => {}
            }
            tick(&mut exporter, t);
        }
        exporter.close();

        let recording = recording.lock().unwrap();
        let pts: Vec<i64> = recording.frames.iter().map(|(pts, _)| *pts).collect();
        let tags: Vec<u32> = recording.frames.iter().map(|(_, tag)| *tag).collect();

        assert!(strictly_increasing(&pts));
        assert!(strictly_increasing(&tags), "no frame duplicated or reordered");
        assert_eq!(pts, (0..pts.len() as i64).collect::<Vec<_>>());

        // Every tick while recording was captured, none while stopped
        let expected: Vec<u32> = (0..60).filter(|t| !(20..30).contains(t) && !(45..50).contains(t)).collect();
        assert_eq!(tags, expected);
        assert_eq!(recording.finish_calls, 1);
    }

    #[test]
    fn test_slow_readbacks_never_duplicate_frames() {
        let mut exporter = exporter(4);
        let (sink, recording) = RecordingVideoSink::new(4, 2);
        exporter.open_sink(sink, 30.0);
        exporter.start();

        for t in 0..40 {
            tick(&mut exporter, t);
        }
        let stats = exporter.stats();
        assert!(stats.pending_readbacks <= 2);
        assert!(stats.frames_skipped > 0);
        assert_eq!(stats.frames_captured + stats.frames_skipped, 40);
        exporter.close();

        let recording = recording.lock().unwrap();
        let tags: Vec<u32> = recording.frames.iter().map(|(_, tag)| *tag).collect();
        assert!(!tags.is_empty());
        assert!(tags.len() < 40, "a full readback queue drops ticks");
        assert!(strictly_increasing(&tags));
    }

    #[test]
    fn test_failed_readback_is_skipped() {
        let mut exporter = exporter(0);
        let (sink, recording) = RecordingVideoSink::new(4, 2);
        exporter.open_sink(sink, 30.0);
        exporter.start();

        for t in 0..10 {
            if t == 4 {
                exporter.target_mut().fail_next_readback();
            }
            tick(&mut exporter, t);
        }
        exporter.close();

        let recording = recording.lock().unwrap();
        let tags: Vec<u32> = recording.frames.iter().map(|(_, tag)| *tag).collect();
        assert_eq!(tags, vec![0, 1, 2, 3, 5, 6, 7, 8, 9]);
        let pts: Vec<i64> = recording.frames.iter().map(|(pts, _)| *pts).collect();
        assert_eq!(pts, (0..9).collect::<Vec<_>>());
        assert_eq!(exporter.stats().readbacks_failed, 1);
    }

    #[test]
    fn test_encode_error_keeps_timestamps_increasing() {
        let mut exporter = exporter(0);
        let (sink, recording) = RecordingVideoSink::new(4, 2);
        exporter.open_sink(sink.failing_on(3), 30.0);
        exporter.start();

        for t in 0..8 {
            tick(&mut exporter, t);
        }
        let stats_before_close = exporter.stats();
        exporter.close();

        assert_eq!(stats_before_close.encode_errors, 1);
        let recording = recording.lock().unwrap();
        let pts: Vec<i64> = recording.frames.iter().map(|(pts, _)| *pts).collect();
        assert_eq!(pts, vec![0, 1, 2, 4, 5, 6, 7]);
        assert_eq!(exporter.recorded_frame_count(), 8);
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut exporter = exporter(2);
        let (sink, recording) = RecordingVideoSink::new(4, 2);
        exporter.open_sink(sink, 30.0);
        exporter.start();
        tick(&mut exporter, 0);
        tick(&mut exporter, 1);

        exporter.close();
        exporter.close();
        assert!(!exporter.is_open());
        assert!(!exporter.is_exporting());

        let recording = recording.lock().unwrap();
        assert_eq!(recording.finish_calls, 1);
        // Both in-flight readbacks were drained on close
        assert_eq!(recording.frames.len(), 2);
    }

    #[test]
    fn test_unbind_without_encoder_does_nothing() {
        let mut exporter = exporter(0);
        exporter.start();
        assert!(!exporter.is_exporting());
        tick(&mut exporter, 1);
        assert_eq!(exporter.target().pending_readbacks(), 0);
        assert_eq!(exporter.stats().frames_captured, 0);
    }

    #[test]
    fn test_open_sink_resizes_target() {
        let mut exporter = exporter(0);
        let (sink, _recording) = RecordingVideoSink::new(16, 8);
        exporter.open_sink(sink, 25.0);
        assert_eq!(exporter.target().width(), 16);
        assert_eq!(exporter.target().pixels().len(), 16 * 8 * 4);
    }

    #[test]
    fn test_save_current_frame() {
        let mut exporter: TestExporter = VideoExporter::new(
            MemoryTarget::new(2, 2, CaptureFormat::Bgra8),
            ExportSettings::default(),
        );
        exporter.target_mut().draw(&[
            0, 0, 255, 255, 0, 255, 0, 255, //
            255, 0, 0, 255, 1, 2, 3, 255,
        ]);
        let path = std::env::temp_dir().join(format!("immersive-media-still-{}.png", std::process::id()));
        assert!(exporter.save_current_frame(&path));

        let saved = image::open(&path).unwrap().to_rgba8();
        assert_eq!(saved.get_pixel(0, 0).0, [255, 0, 0, 255]);
        assert_eq!(saved.get_pixel(1, 1).0, [3, 2, 1, 255]);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_flip_rows() {
        let mut pixels = vec![1, 1, 2, 2, 3, 3];
        flip_rows(&mut pixels, 2);
        assert_eq!(pixels, vec![3, 3, 2, 2, 1, 1]);
    }
}
