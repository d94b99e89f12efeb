//! The four pipeline stages driven by [`crate::engine::StreamingEngine`],
//! always exercised in this order:
//!
//! | Stage | Module | Responsibility |
//! |---|---|---|
//! | C1 | [`pool`] | Reusable scratch buffers, bitmaps, and streams |
//! | C2 | [`delta`] | Block-level change detection between frames |
//! | C3 | [`compressor`] | Quality selection and JPEG encoding |
//! | C4 | [`network`] | Quality adaptation from transport feedback |
//!
//! [`types`] holds the `Frame`/`Rect` values passed between them.

pub mod compressor;
pub mod delta;
pub mod network;
pub mod pool;
pub mod types;
