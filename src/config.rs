//! Frozen configuration for a [`crate::engine::StreamingEngine`].
//!
//! Mirrors the config-loading convention used elsewhere in this source
//! repository: a `serde`-deserializable struct (typically sourced from
//! host-owned TOML) with a [`Default`] impl and construction-time clamping
//! instead of a validation error — out-of-range values are corrected, not
//! rejected.

use serde::{Deserialize, Serialize};

/// Configuration frozen at engine construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Upper bound on frame width, used to size the bitmap pool tier.
    pub max_width: u32,
    /// Upper bound on frame height, used to size the bitmap pool tier.
    pub max_height: u32,

    /// Quality the compressor starts from before content adjustments.
    pub base_quality: u8,
    /// Floor for the clamped quality range.
    pub min_quality: u8,
    /// Ceiling for the clamped quality range.
    pub max_quality: u8,

    /// Percent of blocks changed below which a delta frame is dropped.
    pub min_change_threshold: f32,
    /// Frames between forced keyframes.
    pub key_frame_interval: u32,
    /// Pixels per side of a change-detection block.
    pub block_size: u32,

    /// Target outbound bitrate in megabits/second.
    pub target_bitrate_mbps: f32,
    /// Bitrate ceiling; the network adapter penalizes quality above 90% of this.
    pub max_bitrate_mbps: f32,
    /// Bitrate floor (informational; the adapter does not boost quality to reach it).
    pub min_bitrate_mbps: f32,

    /// Target frames per second (informational; the core does not pace itself).
    pub target_fps: u32,
    /// Canonical per-tier capacity for the buffer pool.
    pub buffer_pool_size: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            max_width: 3840,
            max_height: 2160,
            base_quality: 75,
            min_quality: 20,
            max_quality: 95,
            min_change_threshold: 0.1,
            key_frame_interval: 300,
            block_size: 16,
            target_bitrate_mbps: 4.0,
            max_bitrate_mbps: 8.0,
            min_bitrate_mbps: 0.5,
            target_fps: 60,
            buffer_pool_size: 8,
        }
    }
}

impl StreamingConfig {
    /// Clamp every bound into a self-consistent, in-range configuration.
    ///
    /// Called by [`crate::engine::StreamingEngine::new`]; `InvalidConfig`
    /// in the error taxonomy is this clamp, not a rejected construction.
    pub fn clamped(mut self) -> Self {
        self.min_quality = self.min_quality.min(100);
        self.max_quality = self.max_quality.min(100);
        if self.min_quality > self.max_quality {
            std::mem::swap(&mut self.min_quality, &mut self.max_quality);
        }
        self.base_quality = self.base_quality.clamp(self.min_quality, self.max_quality);

        self.min_change_threshold = self.min_change_threshold.clamp(0.0, 100.0);
        self.block_size = self.block_size.max(1);
        self.key_frame_interval = self.key_frame_interval.max(1);
        self.buffer_pool_size = self.buffer_pool_size.max(1);

        if self.max_bitrate_mbps < self.min_bitrate_mbps {
            std::mem::swap(&mut self.max_bitrate_mbps, &mut self.min_bitrate_mbps);
        }
        self.target_bitrate_mbps = self
            .target_bitrate_mbps
            .clamp(self.min_bitrate_mbps, self.max_bitrate_mbps);

        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_self_consistent() {
        let cfg = StreamingConfig::default().clamped();
        assert!(cfg.min_quality <= cfg.base_quality);
        assert!(cfg.base_quality <= cfg.max_quality);
    }

    #[test]
    fn clamp_reorders_swapped_quality_bounds() {
        let cfg = StreamingConfig {
            min_quality: 90,
            max_quality: 10,
            base_quality: 50,
            ..StreamingConfig::default()
        }
        .clamped();
        assert!(cfg.min_quality <= cfg.max_quality);
        assert!(cfg.base_quality >= cfg.min_quality);
        assert!(cfg.base_quality <= cfg.max_quality);
    }

    #[test]
    fn clamp_rejects_zero_block_size() {
        let cfg = StreamingConfig {
            block_size: 0,
            key_frame_interval: 0,
            buffer_pool_size: 0,
            ..StreamingConfig::default()
        }
        .clamped();
        assert_eq!(cfg.block_size, 1);
        assert_eq!(cfg.key_frame_interval, 1);
        assert_eq!(cfg.buffer_pool_size, 1);
    }
}
