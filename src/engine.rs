//! Streaming engine: the single-producer orchestrator (component C5).
//!
//! Wires the buffer pool, delta encoder, compressor, and network adapter
//! into one `process_frame` call per captured frame. Callers push frames
//! in; the engine pushes encoded output out through an injected
//! [`FrameSink`] rather than an ambient callback, so a host can route
//! frames (and stats) wherever it likes — a channel, a broadcast list, a
//! test `Vec`.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::config::StreamingConfig;
use crate::error::StreamError;
use crate::pipeline::compressor::Compressor;
use crate::pipeline::network::NetworkAdapter;
use crate::pipeline::pool::BufferPool;
use crate::pipeline::types::Frame;
use crate::pipeline::delta::DeltaEncoder;
use crate::stats::{StatsAccumulator, StreamingStats};

/// Observer injected by the host to receive encoded frames and stats
/// updates. The engine never installs one itself.
pub trait FrameSink: Send + Sync {
    fn frame_ready(&self, frame: &EncodedFrame);
    fn stats_updated(&self, stats: &StreamingStats) {
        let _ = stats;
    }
}

/// A no-op sink used when the host has not wired one in.
pub struct NullSink;

impl FrameSink for NullSink {
    fn frame_ready(&self, _frame: &EncodedFrame) {}
}

/// A single encoded output frame, ready for a host to transmit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodedFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub frame_number: u64,
    pub is_key_frame: bool,
    pub quality_used: u8,
    pub change_percentage: f32,
    pub encoding_time_ms: u32,
    /// Present when only a sub-region of the frame was encoded.
    pub region_offset: Option<(u32, u32)>,
}

struct Pipeline {
    delta: DeltaEncoder,
    compressor: Compressor,
    network: NetworkAdapter,
}

/// Orchestrates the full pipeline for one logical stream.
pub struct StreamingEngine {
    config: StreamingConfig,
    pipeline: Mutex<Pipeline>,
    stats: Mutex<StatsAccumulator>,
    sink: Box<dyn FrameSink>,
    disposed: std::sync::atomic::AtomicBool,
}

impl StreamingEngine {
    pub fn new(config: StreamingConfig) -> Self {
        Self::with_sink(config, Box::new(NullSink))
    }

    pub fn with_sink(config: StreamingConfig, sink: Box<dyn FrameSink>) -> Self {
        let config = config.clamped();
        let pool = BufferPool::new(config.max_width, config.max_height, config.buffer_pool_size);
        let delta = DeltaEncoder::new(config.block_size, config.key_frame_interval);
        let compressor = Compressor::new(pool, config.min_quality, config.max_quality);
        let network = NetworkAdapter::new(
            config.base_quality,
            config.min_quality,
            config.max_quality,
            config.max_bitrate_mbps,
        );

        Self {
            config,
            pipeline: Mutex::new(Pipeline { delta, compressor, network }),
            stats: Mutex::new(StatsAccumulator::new()),
            sink,
            disposed: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Begin a streaming session: resets all statistics and starts the
    /// session clock used to compute bitrate.
    pub fn start(&self) {
        self.stats.lock().expect("stats mutex poisoned").start();
        info!("streaming engine started");
    }

    /// End the session without releasing pooled resources — a new
    /// `start()` may follow.
    pub fn stop(&self) {
        info!("streaming engine stopped");
    }

    /// Permanently release pooled resources. Subsequent `process_frame`
    /// calls return `Err(StreamError::Disposed)`.
    pub fn dispose(&self) {
        if self
            .disposed
            .swap(true, std::sync::atomic::Ordering::SeqCst)
        {
            return;
        }
        let pipeline = self.pipeline.lock().expect("pipeline mutex poisoned");
        pipeline.compressor_pool().dispose();
        info!("streaming engine disposed");
    }

    /// Force the next frame to be a keyframe.
    pub fn request_key_frame(&self) {
        self.pipeline
            .lock()
            .expect("pipeline mutex poisoned")
            .delta
            .request_key_frame();
    }

    /// Feed transport-observed latency and drop outcome into the network adapter.
    pub fn record_network_feedback(&self, latency_ms: u32, was_dropped: bool) {
        self.pipeline
            .lock()
            .expect("pipeline mutex poisoned")
            .network
            .record_feedback(latency_ms, was_dropped);
    }

    pub fn set_viewer_count(&self, count: u32) {
        self.pipeline
            .lock()
            .expect("pipeline mutex poisoned")
            .network
            .set_viewer_count(count);
    }

    pub fn stats(&self) -> StreamingStats {
        self.stats.lock().expect("stats mutex poisoned").snapshot()
    }

    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    /// Run one frame through the full pipeline: delta detection, quality
    /// selection, compression, and stats accounting.
    ///
    /// Returns `None` when the frame is dropped — either because
    /// `frame_number > 0` and the change fell below `min_change_threshold`,
    /// or because encoding failed. Frame 0 is never skipped on the
    /// change-percentage gate, regardless of what the delta encoder (which
    /// `start()` does not reset) reports for it. A dropped frame still
    /// updates `frames_skipped` or `encoding_errors` respectively, and the
    /// returned `EncodedFrame` (when present) is also delivered to the
    /// injected [`FrameSink`].
    pub fn process_frame(&self, frame: &Frame, frame_number: u64) -> Result<Option<EncodedFrame>, StreamError> {
        if self.disposed.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(StreamError::Disposed);
        }

        let start = std::time::Instant::now();
        let mut pipeline = self.pipeline.lock().expect("pipeline mutex poisoned");

        let delta = pipeline.delta.compute_delta(frame)?;

        if frame_number > 0 && delta.change_percentage < self.config.min_change_threshold {
            self.stats.lock().expect("stats mutex poisoned").record_skip();
            return Ok(None);
        }

        let current_bitrate = self.stats().current_bitrate_mbps;
        let quality = pipeline
            .network
            .optimal_quality(delta.change_percentage, delta.is_high_motion, current_bitrate);

        let compressed = pipeline.compressor.encode(frame, &delta, quality);
        drop(pipeline);

        let elapsed_ms = start.elapsed().as_millis() as u32;

        if compressed.data.is_empty() {
            self.stats.lock().expect("stats mutex poisoned").record_error();
            error!(frame_number, "compressor produced no output, dropping frame");
            return Ok(None);
        }

        let encoded = EncodedFrame {
            data: compressed.data,
            width: frame.width,
            height: frame.height,
            frame_number,
            is_key_frame: delta.is_key_frame,
            quality_used: compressed.quality_used,
            change_percentage: delta.change_percentage,
            encoding_time_ms: elapsed_ms,
            region_offset: compressed.region_offset,
        };

        {
            let mut stats = self.stats.lock().expect("stats mutex poisoned");
            stats.record_frame(encoded.data.len(), elapsed_ms, delta.change_percentage);
            self.sink.stats_updated(&stats.snapshot());
        }

        if delta.is_high_motion {
            warn!(frame_number, change = delta.change_percentage, "high motion content detected");
        }

        self.sink.frame_ready(&encoded);
        Ok(Some(encoded))
    }
}

impl Pipeline {
    fn compressor_pool(&self) -> &BufferPool {
        self.compressor.pool()
    }
}
