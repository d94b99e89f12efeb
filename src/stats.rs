//! Accumulated per-session streaming statistics.

use std::time::Instant;

use serde::{Deserialize, Serialize};

/// A point-in-time snapshot of the engine's running statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamingStats {
    pub frames_processed: u64,
    pub frames_skipped: u64,
    pub total_bytes_sent: u64,
    pub last_frame_size_bytes: usize,
    pub last_encoding_time_ms: u32,
    pub current_bitrate_mbps: f32,
    pub average_change_percent: f32,
    pub encoding_errors: u64,
}

impl Default for StreamingStats {
    fn default() -> Self {
        Self {
            frames_processed: 0,
            frames_skipped: 0,
            total_bytes_sent: 0,
            last_frame_size_bytes: 0,
            last_encoding_time_ms: 0,
            current_bitrate_mbps: 0.0,
            average_change_percent: 0.0,
            encoding_errors: 0,
        }
    }
}

/// Mutable accumulator owned by the streaming engine.
///
/// `average_change_percent` and `current_bitrate_mbps` are both
/// cold-start-avoiding: the first sample seeds the average directly
/// rather than smoothing in from zero, per the design note in
/// `SPEC_FULL.md` §9.
#[derive(Debug)]
pub struct StatsAccumulator {
    stats: StreamingStats,
    session_start: Option<Instant>,
    has_change_sample: bool,
}

impl StatsAccumulator {
    pub fn new() -> Self {
        Self {
            stats: StreamingStats::default(),
            session_start: None,
            has_change_sample: false,
        }
    }

    /// Reset all counters and (re)start the session clock.
    pub fn start(&mut self) {
        self.stats = StreamingStats::default();
        self.has_change_sample = false;
        self.session_start = Some(Instant::now());
    }

    pub fn snapshot(&self) -> StreamingStats {
        self.stats.clone()
    }

    pub fn record_skip(&mut self) {
        self.stats.frames_skipped += 1;
    }

    pub fn record_error(&mut self) {
        self.stats.encoding_errors += 1;
    }

    /// Record a successfully encoded frame and refresh the smoothed
    /// aggregates. `elapsed_encode_ms` is the per-frame encode duration;
    /// the bitrate is derived from total bytes over total session time.
    pub fn record_frame(&mut self, bytes: usize, elapsed_encode_ms: u32, change_percent: f32) {
        self.stats.frames_processed += 1;
        self.stats.total_bytes_sent += bytes as u64;
        self.stats.last_frame_size_bytes = bytes;
        self.stats.last_encoding_time_ms = elapsed_encode_ms;

        self.stats.average_change_percent = if self.has_change_sample {
            0.9 * self.stats.average_change_percent + 0.1 * change_percent
        } else {
            self.has_change_sample = true;
            change_percent
        };

        let elapsed_s = self
            .session_start
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        if elapsed_s > 0.0 {
            let bits = self.stats.total_bytes_sent as f64 * 8.0;
            self.stats.current_bitrate_mbps = (bits / elapsed_s / 1_000_000.0) as f32;
        }
    }
}

impl Default for StatsAccumulator {
    fn default() -> Self {
        Self::new()
    }
}
