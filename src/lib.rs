//! Adaptive screen-streaming encoder core.
//!
//! A synchronous, single-producer pipeline that turns captured raster
//! frames into quality-adapted JPEG output: block-level delta detection
//! ([`pipeline::delta`]), content-aware compression ([`pipeline::compressor`]),
//! network-conditioned quality adaptation ([`pipeline::network`]), all
//! backed by a pooled buffer layer ([`pipeline::pool`]) and orchestrated
//! by [`engine::StreamingEngine`].
//!
//! This crate does not capture the screen, open a socket, or ship a
//! video codec — it is the encoder core that sits between a capture
//! source and a transport, both supplied by the host.

pub mod config;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod stats;

pub use config::StreamingConfig;
pub use engine::{EncodedFrame, FrameSink, StreamingEngine};
pub use error::StreamError;
pub use pipeline::types::{Frame, Rect};
pub use stats::StreamingStats;
