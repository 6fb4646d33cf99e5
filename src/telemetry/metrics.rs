//! Pipeline counters
//!
//! Snapshots returned by `VideoPlayer::stats()` and `VideoExporter::stats()`.
//! The render loop can poll them once per tick to tell a decoder that falls
//! behind (growing `frames_skipped`, empty queue) from one that keeps up.

/// Player statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybackStats {
    /// Frames produced by the decoder
    pub frames_decoded: u64,
    /// Frames converted and handed to the texture sink
    pub frames_presented: u64,
    /// Frames that became due but were replaced by a newer due frame
    pub frames_skipped: u64,
    /// Frames thrown away because a seek made them stale
    pub frames_discarded: u64,
    /// Packets that failed to decode
    pub decode_errors: u64,
    /// Frames currently queued for presentation
    pub queue_depth: usize,
    /// Highest queue depth observed
    pub queue_high_water: usize,
    /// Queue capacity
    pub queue_capacity: usize,
    /// Media time minus pts of the last presented frame, in seconds
    pub presentation_lag: f64,
}

impl PlaybackStats {
    /// Fraction of due frames that were skipped rather than shown
    pub fn skip_ratio(&self) -> f64 {
        let due = self.frames_presented + self.frames_skipped;
        if due == 0 {
            0.0
        } else {
            self.frames_skipped as f64 / due as f64
        }
    }
}

/// Exporter statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportStats {
    /// Readbacks issued
    pub frames_captured: u64,
    /// Frames rendered while every readback slot was still in flight
    pub frames_skipped: u64,
    /// Frames accepted by the encoder
    pub frames_encoded: u64,
    /// Readbacks that failed and were dropped
    pub readbacks_failed: u64,
    /// Frames the encoder rejected
    pub encode_errors: u64,
    /// Packets written to the container
    pub packets_written: u64,
    /// Frames whose encode took longer than one frame interval
    pub slow_encodes: u64,
    /// Longest single encode, in milliseconds
    pub max_encode_ms: f64,
    /// Readbacks in flight
    pub pending_readbacks: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_ratio() {
        let stats = PlaybackStats {
            frames_presented: 30,
            frames_skipped: 10,
            ..Default::default()
        };
        assert!((stats.skip_ratio() - 0.25).abs() < 1e-9);
        assert_eq!(PlaybackStats::default().skip_ratio(), 0.0);
    }
}
