//! Block-level delta detection between consecutive frames (component C2).
//!
//! Divides the frame into `block_size × block_size` tiles, hashes a
//! subsample of each tile's pixels, and compares against the previous
//! frame's checksums to produce a [`DeltaResult`]: a change percentage,
//! a bounding box, and a non-overlapping cover of changed regions.
//!
//! # Subsampling
//!
//! Hashing every other pixel in both axes is roughly 4× faster than a
//! full-pixel hash and still surfaces the overwhelming majority of block
//! changes; an occasional missed change is resynchronized by the next
//! periodic keyframe, so hash collisions are tolerated rather than
//! guarded against.

use std::collections::VecDeque;

use crate::error::StreamError;
use crate::pipeline::types::{Frame, Rect};

const CHANGE_HISTORY_CAP: usize = 10;
const HIGH_MOTION_THRESHOLD: f32 = 15.0;
const HIGH_MOTION_MIN_SAMPLES: usize = 3;

const FNV_OFFSET_BASIS: u32 = 0x811C_9DC5;
const FNV_PRIME: u32 = 0x0100_0193;

/// Result of a single `compute_delta` call.
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaResult {
    pub is_key_frame: bool,
    pub change_percentage: f32,
    pub is_high_motion: bool,
    pub bounding_box: Rect,
    pub changed_regions: Vec<Rect>,
}

/// Previous-frame reference state owned exclusively by the encoder.
///
/// The checksum array is replaced wholesale each call rather than
/// mutated in place — a double-buffered rotation that keeps the
/// previous frame's data from ever being aliased by the new write.
struct PreviousFrameState {
    checksums: Vec<u32>,
    width: u32,
    height: u32,
    blocks_x: u32,
    blocks_y: u32,
}

/// Stateful block-change detector.
pub struct DeltaEncoder {
    block_size: u32,
    key_frame_interval: u32,
    previous: Option<PreviousFrameState>,
    frames_since_keyframe: u32,
    force_keyframe: bool,
    change_history: VecDeque<f32>,
}

impl DeltaEncoder {
    pub fn new(block_size: u32, key_frame_interval: u32) -> Self {
        Self {
            block_size: block_size.max(1),
            key_frame_interval: key_frame_interval.max(1),
            previous: None,
            frames_since_keyframe: 0,
            force_keyframe: false,
            change_history: VecDeque::with_capacity(CHANGE_HISTORY_CAP),
        }
    }

    /// Force the next `compute_delta` call to emit a keyframe.
    pub fn request_key_frame(&mut self) {
        self.force_keyframe = true;
    }

    /// Drop all previous-frame state and motion history. The next call
    /// emits a keyframe.
    pub fn reset(&mut self) {
        self.previous = None;
        self.frames_since_keyframe = 0;
        self.force_keyframe = false;
        self.change_history.clear();
    }

    /// Run the detector on `frame`.
    pub fn compute_delta(&mut self, frame: &Frame) -> Result<DeltaResult, StreamError> {
        if let Err((required, actual)) = frame.validate() {
            return Err(StreamError::FrameAccess { required, actual });
        }

        let dims_changed = self
            .previous
            .as_ref()
            .is_some_and(|p| p.width != frame.width || p.height != frame.height);
        let need_keyframe = self.previous.is_none()
            || self.force_keyframe
            || dims_changed
            || self.frames_since_keyframe >= self.key_frame_interval;
        self.force_keyframe = false;

        let blocks_x = frame.width.div_ceil(self.block_size).max(1);
        let blocks_y = frame.height.div_ceil(self.block_size).max(1);
        let current_checksums = self.hash_all_blocks(frame, blocks_x, blocks_y);

        let result = if need_keyframe {
            let bounding_box = Rect {
                x: 0,
                y: 0,
                width: frame.width,
                height: frame.height,
            };
            self.frames_since_keyframe = 0;
            DeltaResult {
                is_key_frame: true,
                change_percentage: 100.0,
                is_high_motion: false, // filled in below
                bounding_box,
                changed_regions: vec![bounding_box],
            }
        } else {
            let prev = self.previous.as_ref().expect("checked above");
            let changed = self.diff_blocks(&current_checksums, prev, blocks_x, blocks_y);
            let total_blocks = (blocks_x * blocks_y) as f32;
            let changed_count = changed.iter().filter(|&&c| c).count() as f32;
            let change_percentage = 100.0 * changed_count / total_blocks;
            let bounding_box =
                bounding_box_of(&changed, blocks_x, blocks_y, self.block_size, frame.width, frame.height);
            let changed_regions =
                merge_regions(&changed, blocks_x, blocks_y, self.block_size, frame.width, frame.height);
            self.frames_since_keyframe += 1;
            DeltaResult {
                is_key_frame: false,
                change_percentage,
                is_high_motion: false,
                bounding_box,
                changed_regions,
            }
        };

        self.previous = Some(PreviousFrameState {
            checksums: current_checksums,
            width: frame.width,
            height: frame.height,
            blocks_x,
            blocks_y,
        });

        if self.change_history.len() == CHANGE_HISTORY_CAP {
            self.change_history.pop_front();
        }
        self.change_history.push_back(result.change_percentage);
        let is_high_motion = self.change_history.len() >= HIGH_MOTION_MIN_SAMPLES
            && mean(&self.change_history) > HIGH_MOTION_THRESHOLD;

        Ok(DeltaResult {
            is_high_motion,
            ..result
        })
    }

    fn hash_all_blocks(&self, frame: &Frame, blocks_x: u32, blocks_y: u32) -> Vec<u32> {
        let mut out = Vec::with_capacity((blocks_x * blocks_y) as usize);
        for by in 0..blocks_y {
            for bx in 0..blocks_x {
                out.push(hash_block(frame, bx, by, self.block_size));
            }
        }
        out
    }

    fn diff_blocks(
        &self,
        current: &[u32],
        prev: &PreviousFrameState,
        blocks_x: u32,
        blocks_y: u32,
    ) -> Vec<bool> {
        let total = (blocks_x * blocks_y) as usize;
        let prev_len_ok =
            prev.checksums.len() >= total && prev.blocks_x == blocks_x && prev.blocks_y == blocks_y;
        (0..total)
            .map(|i| !prev_len_ok || current[i] != prev.checksums[i])
            .collect()
    }
}

fn mean(values: &VecDeque<f32>) -> f32 {
    values.iter().sum::<f32>() / values.len() as f32
}

/// FNV-1a over a subsample (every other pixel in x and y) of one block's
/// RGB bytes, in R, G, B order.
fn hash_block(frame: &Frame, bx: u32, by: u32, block_size: u32) -> u32 {
    let start_x = bx * block_size;
    let start_y = by * block_size;
    let end_x = (start_x + block_size).min(frame.width);
    let end_y = (start_y + block_size).min(frame.height);

    let mut hash = FNV_OFFSET_BASIS;
    let mut y = start_y;
    while y < end_y {
        let mut x = start_x;
        while x < end_x {
            let px = frame.pixel(x, y);
            for &byte in &px[..3] {
                hash ^= byte as u32;
                hash = hash.wrapping_mul(FNV_PRIME);
            }
            x += 2;
        }
        y += 2;
    }
    hash
}

fn bounding_box_of(
    changed: &[bool],
    blocks_x: u32,
    blocks_y: u32,
    block_size: u32,
    width: u32,
    height: u32,
) -> Rect {
    let mut min_bx = blocks_x;
    let mut min_by = blocks_y;
    let mut max_bx = 0u32;
    let mut max_by = 0u32;
    let mut any = false;

    for by in 0..blocks_y {
        for bx in 0..blocks_x {
            if changed[(by * blocks_x + bx) as usize] {
                any = true;
                min_bx = min_bx.min(bx);
                min_by = min_by.min(by);
                max_bx = max_bx.max(bx);
                max_by = max_by.max(by);
            }
        }
    }

    if !any {
        return Rect::EMPTY;
    }

    let x0 = min_bx * block_size;
    let y0 = min_by * block_size;
    let x1 = ((max_bx + 1) * block_size).min(width);
    let y1 = ((max_by + 1) * block_size).min(height);
    Rect {
        x: x0,
        y: y0,
        width: x1 - x0,
        height: y1 - y0,
    }
}

/// Greedy row-major rectangular merge: expand right, then down, marking
/// visited blocks, producing a deterministic non-overlapping cover of
/// every changed block.
fn merge_regions(
    changed: &[bool],
    blocks_x: u32,
    blocks_y: u32,
    block_size: u32,
    width: u32,
    height: u32,
) -> Vec<Rect> {
    let bx_n = blocks_x as usize;
    let by_n = blocks_y as usize;
    let mut visited = vec![false; bx_n * by_n];
    let mut regions = Vec::new();

    let idx = |bx: usize, by: usize| by * bx_n + bx;

    for by in 0..by_n {
        for bx in 0..bx_n {
            if !changed[idx(bx, by)] || visited[idx(bx, by)] {
                continue;
            }

            // Expand right.
            let mut w = 1usize;
            while bx + w < bx_n && changed[idx(bx + w, by)] && !visited[idx(bx + w, by)] {
                w += 1;
            }

            // Expand down while the whole candidate row is changed & unvisited.
            let mut h = 1usize;
            'expand: while by + h < by_n {
                for dx in 0..w {
                    let i = idx(bx + dx, by + h);
                    if !changed[i] || visited[i] {
                        break 'expand;
                    }
                }
                h += 1;
            }

            for dy in 0..h {
                for dx in 0..w {
                    visited[idx(bx + dx, by + dy)] = true;
                }
            }

            let x0 = (bx as u32) * block_size;
            let y0 = (by as u32) * block_size;
            let x1 = ((bx + w) as u32 * block_size).min(width);
            let y1 = ((by + h) as u32 * block_size).min(height);
            regions.push(Rect {
                x: x0,
                y: y0,
                width: x1 - x0,
                height: y1 - y0,
            });
        }
    }

    regions
}
