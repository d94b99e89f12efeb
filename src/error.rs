//! Error taxonomy for the streaming core.
//!
//! All fallible operations return `Result<T, StreamError>`. Per the
//! pipeline's failure policy most of these never reach the host: the
//! engine absorbs them into counters and a `None` return rather than
//! propagating a panic or bubbling an `Err` out of `process_frame`.

use thiserror::Error;

/// The canonical error type for the streaming core.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The delta encoder could not read the frame's pixel data: the
    /// buffer is shorter than `stride * height` requires.
    #[error("frame access error: buffer has {actual} bytes, need at least {required}")]
    FrameAccess { required: usize, actual: usize },

    /// No JPEG-capable encoder backend was available; the compressor
    /// falls back to a default quality rather than failing outright.
    #[error("no encoder backend available, falling back to default quality")]
    EncoderUnavailable,

    /// A runtime encode error occurred; the compressor returns an empty
    /// byte slice and the engine counts it as a dropped frame.
    #[error("encode failed: {0}")]
    EncodeFailed(String),

    /// An operation was attempted after the engine was disposed.
    #[error("engine has been disposed")]
    Disposed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = StreamError::FrameAccess {
            required: 100,
            actual: 40,
        };
        assert!(e.to_string().contains("100"));
        assert!(e.to_string().contains("40"));
    }

    #[test]
    fn encode_failed_carries_message() {
        let e = StreamError::EncodeFailed("jpeg: bad quality".into());
        assert!(e.to_string().contains("bad quality"));
    }
}
