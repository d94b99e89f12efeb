//! Network-conditioned quality adaptation (component C4).
//!
//! Takes the delta encoder's content signals plus transport feedback
//! (latency samples, drop/deliver outcomes, viewer count) and derives
//! the quality the compressor should target next. The network-derived
//! quality changes at most once per second and steps by at most 5
//! points per transition, so viewers never see it oscillate frame to
//! frame; a lightweight content adjustment rides on top of every call,
//! gated or not.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

const HISTORY_CAP: usize = 30;
const TRANSITION_GATE: Duration = Duration::from_millis(1000);
const MAX_STEP: i32 = 5;
const CONSECUTIVE_DROP_LIMIT: u32 = 3;

/// Adapts streaming quality to observed network conditions.
pub struct NetworkAdapter {
    base_quality: u8,
    min_quality: u8,
    max_quality: u8,
    max_bitrate_mbps: f32,

    current_quality: u8,
    last_transition: Option<Instant>,

    latency_history: VecDeque<u32>,
    drop_history: VecDeque<bool>,
    consecutive_drops: u32,

    viewer_count: u32,
}

impl NetworkAdapter {
    pub fn new(base_quality: u8, min_quality: u8, max_quality: u8, max_bitrate_mbps: f32) -> Self {
        let base_quality = base_quality.clamp(min_quality, max_quality);
        Self {
            base_quality,
            min_quality,
            max_quality,
            max_bitrate_mbps,
            current_quality: base_quality,
            last_transition: None,
            latency_history: VecDeque::with_capacity(HISTORY_CAP),
            drop_history: VecDeque::with_capacity(HISTORY_CAP),
            consecutive_drops: 0,
            viewer_count: 1,
        }
    }

    /// Record a transport-level outcome for one delivered (or dropped) frame.
    pub fn record_feedback(&mut self, latency_ms: u32, was_dropped: bool) {
        push_capped(&mut self.latency_history, latency_ms, HISTORY_CAP);
        push_capped(&mut self.drop_history, was_dropped, HISTORY_CAP);

        if was_dropped {
            self.consecutive_drops += 1;
        } else {
            self.consecutive_drops = 0;
        }

        if self.consecutive_drops > CONSECUTIVE_DROP_LIMIT {
            self.current_quality = (self.current_quality as i32 - 10)
                .clamp(self.min_quality as i32, self.max_quality as i32) as u8;
            self.last_transition = Some(Instant::now());
            self.consecutive_drops = 0;
        }
    }

    /// Set the number of connected viewers; above 5 viewers the quality
    /// ceiling is tightened to protect aggregate bandwidth.
    pub fn set_viewer_count(&mut self, count: u32) {
        self.viewer_count = count.max(1);
    }

    /// Compute the quality to use for the next frame, folding in content
    /// signals (`change_percent`, `is_high_motion`) and the transport
    /// history recorded via [`record_feedback`].
    ///
    /// When less than a second has passed since the last transition,
    /// only the content adjustment is applied on top of the current
    /// smoothed quality — the network-derived recomputation (steps
    /// 1-7 below) is skipped entirely.
    pub fn optimal_quality(&mut self, change_percent: f32, is_high_motion: bool, current_bitrate_mbps: f32) -> u8 {
        let gate_open = self
            .last_transition
            .is_none_or(|t| t.elapsed() >= TRANSITION_GATE);

        if !gate_open {
            return self.with_content_adjustment(change_percent, is_high_motion);
        }

        // 1. Start from base_quality.
        let mut target = self.base_quality as i32;

        // 2. Drop-rate penalty.
        let drop_rate = rate(&self.drop_history);
        if drop_rate > 0.10 {
            target -= 20;
        } else if drop_rate > 0.05 {
            target -= 10;
        }

        // 3. Latency penalty / reward.
        let avg_latency = average(&self.latency_history);
        if avg_latency > 200.0 {
            target -= 15;
        } else if avg_latency > 100.0 {
            target -= 5;
        } else if avg_latency < 50.0 && drop_rate < 0.02 {
            target += 10;
        }

        // 4. Bitrate ceiling penalty.
        if current_bitrate_mbps > self.max_bitrate_mbps * 0.9 {
            target -= 10;
        }

        // 5. Clamp -> network_quality.
        let network_quality = target.clamp(self.min_quality as i32, self.max_quality as i32);

        // 6. Viewer-count scaling -> viewer_adjusted.
        let viewer_adjusted = if self.viewer_count > 5 {
            let penalty = 2 * (self.viewer_count as i32 - 5);
            (network_quality - penalty).max(self.min_quality as i32)
        } else {
            network_quality
        };

        // 7. Smooth: step current_quality toward viewer_adjusted by at most ±5.
        let step = (viewer_adjusted - self.current_quality as i32).clamp(-MAX_STEP, MAX_STEP);
        self.current_quality = (self.current_quality as i32 + step)
            .clamp(self.min_quality as i32, self.max_quality as i32) as u8;
        self.last_transition = Some(Instant::now());

        // 8. Apply the content adjustment on top of the smoothed value for display.
        self.with_content_adjustment(change_percent, is_high_motion)
    }

    pub fn current_quality(&self) -> u8 {
        self.current_quality
    }

    fn with_content_adjustment(&self, change_percent: f32, is_high_motion: bool) -> u8 {
        let adjusted = self.current_quality as i32 + content_adjustment(change_percent, is_high_motion);
        adjusted.clamp(self.min_quality as i32, self.max_quality as i32) as u8
    }
}

fn content_adjustment(change_percent: f32, is_high_motion: bool) -> i32 {
    if is_high_motion {
        -15
    } else if change_percent < 2.0 {
        10
    } else {
        0
    }
}

fn push_capped<T>(q: &mut VecDeque<T>, value: T, cap: usize) {
    if q.len() == cap {
        q.pop_front();
    }
    q.push_back(value);
}

fn rate(history: &VecDeque<bool>) -> f32 {
    if history.is_empty() {
        return 0.0;
    }
    history.iter().filter(|&&d| d).count() as f32 / history.len() as f32
}

fn average(history: &VecDeque<u32>) -> f32 {
    if history.is_empty() {
        return 0.0;
    }
    history.iter().sum::<u32>() as f32 / history.len() as f32
}
