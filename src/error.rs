//! Failure taxonomy for the decode pipeline
//!
//! Every failure surfaces to the caller that issued the request; one
//! request's failure never affects other in-flight requests or the
//! worker pool. Errors are `Clone` so a single result can be delivered
//! to every waiter sharing a cached decode future.

/// Errors produced while decoding a KTX2 container.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The buffer does not start with the KTX2 identifier.
    #[error("not a KTX2 container (bad identifier)")]
    MalformedContainer,

    /// The buffer is shorter than the header plus declared level data.
    #[error("truncated container: {0}")]
    TruncatedContainer(String),

    /// The declared vkFormat has no direct GPU-native mapping.
    #[error("unsupported pixel format: vkFormat {0}")]
    UnsupportedPixelFormat(u32),

    /// The container uses a supercompression scheme we cannot decode.
    #[error("unsupported supercompression scheme: {0}")]
    UnsupportedSupercompression(u32),

    /// Decompressed level data did not match the declared length.
    #[error("decompressed size mismatch: expected {expected} bytes, got {actual}")]
    DecompressionSizeMismatch { expected: u64, actual: u64 },

    /// The worker rejected the payload as not transcodable.
    #[error("invalid transcode input: {0}")]
    InvalidTranscodeInput(String),

    /// The transcoding engine failed mid-task.
    #[error("transcode failed: {0}")]
    TranscodeFailed(String),

    /// A task was submitted after `dispose()`.
    #[error("worker pool already disposed")]
    PoolDisposed,

    /// Decode was requested before capabilities were declared.
    #[error("capabilities not set; call detect_support() before decoding")]
    PoolUninitialized,

    /// The transcoding engine or its artifacts could not be loaded.
    #[error("transcoder engine: {0}")]
    Engine(String),
}
