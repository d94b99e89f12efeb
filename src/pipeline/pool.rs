//! Tiered, lock-free buffer pool (component C1).
//!
//! Reusable byte/short/bitmap/stream buffers, sized in canonical tiers so
//! the engine's steady-state allocation rate stays near zero once the
//! pool is warm. Every tier is a bounded [`crossbeam::queue::ArrayQueue`]
//! — safe to rent from and return to concurrently, from any thread.
//!
//! # Bitmap ownership
//!
//! [`rent_bitmap`](BufferPool::rent_bitmap) hands out a [`BitmapHandle`]
//! rather than a bare `Vec<u8>`: the handle returns its buffer to the
//! pool on drop. [`BitmapHandle::release`] is the escape hatch for
//! callers that need to hold the buffer past the scope that rented it
//! (e.g. handing it to another thread) without an automatic return.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam::queue::ArrayQueue;
use tracing::warn;

const SMALL_SIZE: usize = 8 * 1024;
const MEDIUM_SIZE: usize = 256 * 1024;
const PCM_SAMPLES: usize = 960;

/// Counters exposed by [`BufferPool::counters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolCounters {
    pub total_rented: u64,
    pub total_returned: u64,
    pub allocations_avoided: u64,
}

/// Per-tier population snapshot from [`BufferPool::snapshot`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolSnapshot {
    pub small: usize,
    pub medium: usize,
    pub large: usize,
    pub short: usize,
    pub bitmap: usize,
    pub stream: usize,
}

/// A single size-class tier: a bounded queue of same-capacity buffers.
struct Tier<T> {
    queue: ArrayQueue<Vec<T>>,
    canonical_len: usize,
    cap: usize,
}

impl<T: Clone + Default> Tier<T> {
    fn new(canonical_len: usize, cap: usize) -> Self {
        Self {
            queue: ArrayQueue::new(cap),
            canonical_len,
            cap,
        }
    }

    /// Pop a pooled buffer, or allocate fresh at `effective_len` (which
    /// equals `canonical_len` for every tier except the large byte tier,
    /// which may flex above it for an oversized request).
    fn rent(&self, effective_len: usize) -> (Vec<T>, bool) {
        if let Some(buf) = self.queue.pop() {
            (buf, true)
        } else {
            (vec![T::default(); effective_len], false)
        }
    }

    fn give_back(&self, buf: Vec<T>) -> bool {
        if buf.len() != self.canonical_len {
            return false;
        }
        self.queue.push(buf).is_ok()
    }

    fn len(&self) -> usize {
        self.queue.len()
    }

    fn drain(&self) {
        while self.queue.pop().is_some() {}
    }
}

struct Inner {
    small: Tier<u8>,
    medium: Tier<u8>,
    large: Tier<u8>,
    short: Tier<i16>,
    bitmap: Tier<u8>,
    stream_cap: usize,
    stream: ArrayQueue<Vec<u8>>,

    rented: AtomicU64,
    returned: AtomicU64,
    avoided: AtomicU64,
    disposed: std::sync::atomic::AtomicBool,
}

/// A cheaply-cloneable handle to the tiered buffer pool.
///
/// Every tier's hard cap is `buffer_pool_size * 2` (`* 4` for the small
/// tier, which churns fastest). Disposal drains every tier and is
/// idempotent; renting after disposal degrades to a direct, unpooled
/// allocation rather than failing.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<Inner>,
}

impl BufferPool {
    /// Create a pool sized for frames up to `max_width * max_height` and
    /// a canonical per-tier capacity of `pool_size` entries.
    pub fn new(max_width: u32, max_height: u32, pool_size: usize) -> Self {
        let pool_size = pool_size.max(1);
        let large_canonical = (max_width as usize) * (max_height as usize) * 4;

        Self {
            inner: Arc::new(Inner {
                small: Tier::new(SMALL_SIZE, pool_size * 4),
                medium: Tier::new(MEDIUM_SIZE, pool_size * 2),
                large: Tier::new(large_canonical, pool_size * 2),
                short: Tier::new(PCM_SAMPLES, pool_size * 2),
                bitmap: Tier::new(large_canonical, pool_size * 2),
                stream_cap: pool_size * 2,
                stream: ArrayQueue::new(pool_size * 2),
                rented: AtomicU64::new(0),
                returned: AtomicU64::new(0),
                avoided: AtomicU64::new(0),
                disposed: std::sync::atomic::AtomicBool::new(false),
            }),
        }
    }

    fn disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    fn on_rent(&self, hit: bool) {
        self.inner.rented.fetch_add(1, Ordering::Relaxed);
        if hit {
            self.inner.avoided.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Rent a byte buffer of at least `min_size` bytes, routed to the
    /// smallest tier that fits. Never fails.
    pub fn rent_buffer(&self, min_size: usize) -> Vec<u8> {
        if self.disposed() {
            self.inner.rented.fetch_add(1, Ordering::Relaxed);
            return vec![0u8; min_size];
        }
        let (buf, hit) = if min_size <= SMALL_SIZE {
            self.inner.small.rent(SMALL_SIZE)
        } else if min_size <= MEDIUM_SIZE {
            self.inner.medium.rent(MEDIUM_SIZE)
        } else {
            let effective = min_size.max(self.inner.large.canonical_len);
            self.inner.large.rent(effective)
        };
        self.on_rent(hit);
        buf
    }

    /// Return a byte buffer previously obtained from [`rent_buffer`](Self::rent_buffer).
    ///
    /// Byte buffers are not cleared on return — callers must not rely on
    /// residual contents.
    pub fn return_buffer(&self, buf: Vec<u8>) {
        if self.disposed() {
            return;
        }
        self.inner.returned.fetch_add(1, Ordering::Relaxed);
        let accepted = match buf.len() {
            n if n == SMALL_SIZE => self.inner.small.give_back(buf),
            n if n == MEDIUM_SIZE => self.inner.medium.give_back(buf),
            n if n == self.inner.large.canonical_len => self.inner.large.give_back(buf),
            _ => false,
        };
        if !accepted {
            warn!(len = buf.len(), "buffer pool: discarding mismatched return");
        }
    }

    /// Rent a 16-bit sample buffer of at least `min_size` elements.
    pub fn rent_short_buffer(&self, min_size: usize) -> Vec<i16> {
        if self.disposed() || min_size > self.inner.short.canonical_len {
            self.inner.rented.fetch_add(1, Ordering::Relaxed);
            return vec![0i16; min_size];
        }
        let (buf, hit) = self.inner.short.rent(self.inner.short.canonical_len);
        self.on_rent(hit);
        buf
    }

    /// Return a short buffer, zeroed before reinsertion.
    pub fn return_short_buffer(&self, mut buf: Vec<i16>) {
        if self.disposed() {
            return;
        }
        self.inner.returned.fetch_add(1, Ordering::Relaxed);
        buf.fill(0);
        if !self.inner.short.give_back(buf) {
            warn!("buffer pool: discarding mismatched short-buffer return");
        }
    }

    /// Rent a bitmap buffer sized to the pool's configured maximum
    /// dimensions, as a scoped [`BitmapHandle`] that returns itself to
    /// the pool on drop. `width`/`height` are carried for the caller's
    /// convenience; the underlying buffer may be larger.
    pub fn rent_bitmap(&self, width: u32, height: u32) -> BitmapHandle {
        let (buf, hit) = if self.disposed() {
            (vec![0u8; self.inner.bitmap.canonical_len], false)
        } else {
            self.inner.bitmap.rent(self.inner.bitmap.canonical_len)
        };
        self.on_rent(hit);
        BitmapHandle {
            pool: self.clone(),
            buf: Some(buf),
            width,
            height,
        }
    }

    fn return_bitmap(&self, buf: Vec<u8>) {
        if self.disposed() {
            return;
        }
        self.inner.returned.fetch_add(1, Ordering::Relaxed);
        if !self.inner.bitmap.give_back(buf) {
            warn!("buffer pool: discarding mismatched bitmap return");
        }
    }

    /// Rent a growable scratch stream (reset to empty) for the compressor.
    pub fn rent_stream(&self) -> ScratchStream {
        if !self.disposed() {
            if let Some(mut buf) = self.inner.stream.pop() {
                self.on_rent(true);
                buf.clear();
                return ScratchStream { buf };
            }
        }
        self.on_rent(false);
        ScratchStream { buf: Vec::new() }
    }

    /// Return a scratch stream, resetting it for the next rent.
    pub fn return_stream(&self, mut stream: ScratchStream) {
        if self.disposed() {
            return;
        }
        self.inner.returned.fetch_add(1, Ordering::Relaxed);
        stream.buf.clear();
        if self.inner.stream.push(stream.buf).is_err() {
            // Over the stream tier's cap — drop it.
        }
        let _ = self.inner.stream_cap; // capacity is enforced by ArrayQueue itself
    }

    /// Drain every tier and switch the pool into its degraded,
    /// direct-allocation mode. Idempotent.
    pub fn dispose(&self) {
        self.inner.disposed.store(true, Ordering::Release);
        self.inner.small.drain();
        self.inner.medium.drain();
        self.inner.large.drain();
        self.inner.short.drain();
        self.inner.bitmap.drain();
        while self.inner.stream.pop().is_some() {}
    }

    pub fn counters(&self) -> PoolCounters {
        PoolCounters {
            total_rented: self.inner.rented.load(Ordering::Relaxed),
            total_returned: self.inner.returned.load(Ordering::Relaxed),
            allocations_avoided: self.inner.avoided.load(Ordering::Relaxed),
        }
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            small: self.inner.small.len(),
            medium: self.inner.medium.len(),
            large: self.inner.large.len(),
            short: self.inner.short.len(),
            bitmap: self.inner.bitmap.len(),
            stream: self.inner.stream.len(),
        }
    }
}

/// A growable byte sink rented from the pool's stream tier.
///
/// Must be reset (length zero) before every encode — [`BufferPool::rent_stream`]
/// and [`BufferPool::return_stream`] both do this automatically.
pub struct ScratchStream {
    buf: Vec<u8>,
}

impl ScratchStream {
    pub fn as_vec(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }
}

/// A scoped rental of a bitmap-tier buffer. Returns itself to the pool
/// on drop; call [`release`](Self::release) to take ownership instead.
pub struct BitmapHandle {
    pool: BufferPool,
    buf: Option<Vec<u8>>,
    width: u32,
    height: u32,
}

impl BitmapHandle {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        self.buf.as_deref().expect("buffer taken")
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().expect("buffer taken")
    }

    /// Take ownership of the underlying buffer without returning it to
    /// the pool. Use for non-scope-bound hand-off (e.g. across threads).
    pub fn release(mut self) -> Vec<u8> {
        self.buf.take().expect("buffer taken")
    }
}

impl Drop for BitmapHandle {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.return_bitmap(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rent_then_return_is_reused() {
        let pool = BufferPool::new(1920, 1080, 4);
        let buf = pool.rent_buffer(1024);
        assert_eq!(buf.len(), SMALL_SIZE);
        pool.return_buffer(buf);
        let before = pool.counters();
        let _buf2 = pool.rent_buffer(1024);
        let after = pool.counters();
        assert_eq!(after.allocations_avoided, before.allocations_avoided + 1);
    }

    #[test]
    fn mismatched_return_is_discarded() {
        let pool = BufferPool::new(1920, 1080, 2);
        pool.return_buffer(vec![0u8; 123]);
        assert_eq!(pool.snapshot().small, 0);
    }

    #[test]
    fn routes_to_smallest_fitting_tier() {
        let pool = BufferPool::new(1920, 1080, 2);
        assert_eq!(pool.rent_buffer(100).len(), SMALL_SIZE);
        assert_eq!(pool.rent_buffer(SMALL_SIZE + 1).len(), MEDIUM_SIZE);
        assert_eq!(
            pool.rent_buffer(MEDIUM_SIZE + 1).len(),
            1920 * 1080 * 4
        );
    }

    #[test]
    fn pool_has_a_hard_cap_above_which_returns_are_dropped() {
        let pool = BufferPool::new(1920, 1080, 1); // small cap = 4
        for _ in 0..8 {
            pool.return_buffer(vec![0u8; SMALL_SIZE]);
        }
        assert!(pool.snapshot().small <= 4);
    }

    #[test]
    fn short_buffers_are_zeroed_before_reinsertion() {
        let pool = BufferPool::new(1920, 1080, 2);
        let mut buf = pool.rent_short_buffer(PCM_SAMPLES);
        buf.fill(7);
        pool.return_short_buffer(buf);
        let back = pool.rent_short_buffer(PCM_SAMPLES);
        assert!(back.iter().all(|&s| s == 0));
    }

    #[test]
    fn bitmap_handle_returns_on_drop() {
        let pool = BufferPool::new(64, 64, 2);
        {
            let _h = pool.rent_bitmap(64, 64);
        }
        assert_eq!(pool.snapshot().bitmap, 1);
    }

    #[test]
    fn bitmap_handle_release_skips_the_pool() {
        let pool = BufferPool::new(64, 64, 2);
        let h = pool.rent_bitmap(64, 64);
        let raw = h.release();
        assert_eq!(raw.len(), 64 * 64 * 4);
        assert_eq!(pool.snapshot().bitmap, 0);
    }

    #[test]
    fn dispose_drains_and_degrades_to_direct_allocation() {
        let pool = BufferPool::new(64, 64, 2);
        pool.return_buffer(vec![0u8; SMALL_SIZE]);
        pool.dispose();
        assert_eq!(pool.snapshot().small, 0);
        // Renting after dispose still succeeds, unpooled.
        let buf = pool.rent_buffer(10);
        assert_eq!(buf.len(), 10);
    }

    #[test]
    fn stream_round_trips_and_resets() {
        let pool = BufferPool::new(64, 64, 2);
        let mut s = pool.rent_stream();
        s.as_vec().extend_from_slice(b"hello");
        pool.return_stream(s);
        let s2 = pool.rent_stream();
        assert!(s2.into_vec().is_empty());
    }
}
