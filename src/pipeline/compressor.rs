//! Content-aware still-image compressor (component C3).
//!
//! Selects a per-frame JPEG quality from the delta encoder's signals,
//! then encodes either the full frame or — when motion is concentrated
//! in a small region — just the changed bounding box. Scratch buffers
//! are always borrowed from and returned to the pool, on every code
//! path including errors.

use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, ImageEncoder};
use tracing::{debug, warn};

use crate::pipeline::delta::DeltaResult;
use crate::pipeline::pool::BufferPool;
use crate::pipeline::types::Frame;

/// Quality used when no JPEG backend is available.
const FALLBACK_QUALITY: u8 = 50;

/// Result of a single `encode` call.
pub struct CompressedFrame {
    pub data: Vec<u8>,
    pub quality_used: u8,
    /// Present when the regional-crop path was taken: the top-left
    /// offset, in pixels, of the encoded sub-image within the full frame.
    pub region_offset: Option<(u32, u32)>,
}

pub struct Compressor {
    pool: BufferPool,
    min_quality: u8,
    max_quality: u8,
    /// Whether a JPEG-capable backend is available. Always `true` in
    /// this build; exposed so the `EncoderUnavailable` fallback path is
    /// exercisable in tests without feature-gating the `image` crate.
    backend_available: bool,
}

impl Compressor {
    pub fn new(pool: BufferPool, min_quality: u8, max_quality: u8) -> Self {
        Self {
            pool,
            min_quality,
            max_quality,
            backend_available: true,
        }
    }

    /// The pool backing this compressor's scratch buffers, exposed so
    /// the engine can dispose of it alongside the rest of the pipeline.
    pub(crate) fn pool(&self) -> &BufferPool {
        &self.pool
    }

    #[cfg(test)]
    fn without_backend(pool: BufferPool, min_quality: u8, max_quality: u8) -> Self {
        Self {
            pool,
            min_quality,
            max_quality,
            backend_available: false,
        }
    }

    /// Select and encode a frame. Never fails: on an internal encoder
    /// error the returned `data` is empty and the caller (the engine)
    /// counts it as an encoding error.
    pub fn encode(&self, frame: &Frame, delta: &DeltaResult, requested_quality: u8) -> CompressedFrame {
        if !self.backend_available {
            warn!("compressor: no encoder backend available, falling back to default quality");
            return self.encode_full_frame(frame, FALLBACK_QUALITY);
        }

        let quality = select_quality(requested_quality, delta, self.min_quality, self.max_quality);

        if delta.is_high_motion
            && !delta.changed_regions.is_empty()
            && delta.changed_regions.len() < 10
            && delta.bounding_box.area() * 10 <= 7 * (frame.width as u64 * frame.height as u64)
        {
            if let Some(region) = self.encode_region(frame, delta, quality) {
                return region;
            }
        }

        self.encode_full_frame(frame, quality)
    }

    fn encode_full_frame(&self, frame: &Frame, quality: u8) -> CompressedFrame {
        let needed = frame.width as usize * frame.height as usize * 3;
        let mut packed = self.pool.rent_buffer(needed);
        repack_rgb(frame, 0, 0, frame.width, frame.height, &mut packed[..needed]);

        let data = jpeg_encode(&self.pool, &packed[..needed], frame.width, frame.height, round_to_5(quality));
        self.pool.return_buffer(packed);

        debug!(quality, bytes = data.len(), "compressor: full-frame encode");
        CompressedFrame {
            data,
            quality_used: quality,
            region_offset: None,
        }
    }

    fn encode_region(&self, frame: &Frame, delta: &DeltaResult, quality: u8) -> Option<CompressedFrame> {
        let r = delta.bounding_box;
        if r.is_empty() {
            return None;
        }
        let needed = r.width as usize * r.height as usize * 3;
        let mut packed = self.pool.rent_buffer(needed);
        repack_rgb(frame, r.x, r.y, r.width, r.height, &mut packed[..needed]);

        let data = jpeg_encode(&self.pool, &packed[..needed], r.width, r.height, round_to_5(quality));
        self.pool.return_buffer(packed);

        if data.is_empty() {
            return None;
        }
        debug!(quality, bytes = data.len(), x = r.x, y = r.y, "compressor: regional encode");
        Some(CompressedFrame {
            data,
            quality_used: quality,
            region_offset: Some((r.x, r.y)),
        })
    }
}

/// Quality ladder from the requested baseline: high motion darkens
/// (lower quality, smaller frames), near-static content brightens
/// (higher quality since bandwidth is available), keyframes get a
/// further boost, then the whole thing clamps to the configured range.
fn select_quality(requested: u8, delta: &DeltaResult, min_quality: u8, max_quality: u8) -> u8 {
    let mut q = requested as i32;
    if delta.is_high_motion {
        q -= 20;
    } else if delta.change_percentage < 5.0 {
        q += 15;
    }
    if delta.is_key_frame {
        q += 10;
    }
    q.clamp(min_quality as i32, max_quality as i32) as u8
}

/// Memoize quality at 5-unit granularity, clamped to the range the JPEG
/// backend's quantization tables are tuned for — avoids rebuilding
/// encoder state for every small quality wobble.
fn round_to_5(quality: u8) -> u8 {
    let clamped = quality.clamp(30, 95);
    let rounded = ((clamped as i32 + 2) / 5 * 5) as u8;
    rounded.clamp(30, 95)
}

/// Copy a `width x height` RGB sub-image starting at `(x0, y0)` out of
/// `frame` into a tightly-packed buffer (no stride padding).
fn repack_rgb(frame: &Frame, x0: u32, y0: u32, width: u32, height: u32, out: &mut [u8]) {
    let row_bytes = width as usize * 3;
    for row in 0..height {
        let src_row = frame.row(y0 + row);
        let src_start = x0 as usize * 3;
        let dst_start = row as usize * row_bytes;
        out[dst_start..dst_start + row_bytes]
            .copy_from_slice(&src_row[src_start..src_start + row_bytes]);
    }
}

/// Encode into a scratch stream borrowed from the pool rather than a fresh
/// heap allocation; the stream is reset (length 0) on rent and always
/// returned, on both the success and the encode-failure path.
fn jpeg_encode(pool: &BufferPool, rgb: &[u8], width: u32, height: u32, quality: u8) -> Vec<u8> {
    let mut stream = pool.rent_stream();
    let encoder = JpegEncoder::new_with_quality(stream.as_vec(), quality);
    let result = encoder.write_image(rgb, width, height, ColorType::Rgb8);
    let data = match result {
        Ok(()) => stream.as_vec().clone(),
        Err(_) => Vec::new(),
    };
    pool.return_stream(stream);
    data
}
