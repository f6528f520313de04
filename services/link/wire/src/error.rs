//! Codec error types.

use thiserror::Error;

/// Boxed error carried by decode and encode failures
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    /// Clean end of stream (peer closed before a new message started)
    #[error("end of stream")]
    Eof,

    /// Malformed input or a stream failure while decoding
    #[error("decode failed: {0}")]
    Decode(#[source] BoxError),

    /// Message could not be encoded or flushed
    #[error("encode failed: {0}")]
    Encode(#[source] BoxError),

    /// The codec's stream has been closed
    #[error("stream closed")]
    Closed,

    /// Raw stream I/O failure outside of message decoding
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Stream cannot be used with this codec
    #[error("unsupported stream: {0}")]
    Unsupported(String),
}

impl CodecError {
    /// Whether this is a clean end of stream rather than a failure
    pub fn is_eof(&self) -> bool {
        matches!(self, CodecError::Eof)
    }

    /// Whether the stream was closed locally
    pub fn is_closed(&self) -> bool {
        matches!(self, CodecError::Closed)
    }

    /// Classify an I/O error raised while decoding.
    ///
    /// End-of-file (including a truncated message) maps to [`CodecError::Eof`],
    /// a locally closed stream to [`CodecError::Closed`].
    pub fn from_read(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof => CodecError::Eof,
            std::io::ErrorKind::NotConnected => CodecError::Closed,
            _ => CodecError::Decode(Box::new(err)),
        }
    }

    /// Classify an I/O error raised while encoding or flushing
    pub fn from_write(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotConnected => CodecError::Closed,
            _ => CodecError::Encode(Box::new(err)),
        }
    }
}
