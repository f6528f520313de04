//! Session and link error types.

use link_wire::CodecError;
use std::net::SocketAddr;
use thiserror::Error;

/// Errors surfaced by sessions and the link orchestrator
#[derive(Error, Debug)]
pub enum LinkError {
    /// Address could not be resolved
    #[error("failed to resolve address {addr:?}: {source}")]
    AddressResolution {
        /// Address as given by the caller
        addr: String,
        /// Underlying resolver error
        #[source]
        source: std::io::Error,
    },

    /// Outbound connection attempt failed
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        /// Remote address
        addr: SocketAddr,
        /// Underlying socket error
        #[source]
        source: std::io::Error,
    },

    /// Listener could not be bound
    #[error("failed to listen on {addr}: {source}")]
    Listen {
        /// Local address
        addr: SocketAddr,
        /// Underlying socket error
        #[source]
        source: std::io::Error,
    },

    /// Protocol refused to bind a codec to the stream
    #[error("failed to construct codec: {0}")]
    CodecConstruction(#[source] CodecError),

    /// Read failed; the session has been closed
    #[error("session {id} read failed: {source}")]
    Decode {
        /// Session id
        id: u64,
        /// Codec failure
        #[source]
        source: CodecError,
    },

    /// Write failed; the session has been closed
    #[error("session {id} write failed: {source}")]
    Encode {
        /// Session id
        id: u64,
        /// Codec failure
        #[source]
        source: CodecError,
    },

    /// Peer ended the stream cleanly; the session is left open
    #[error("end of stream")]
    EndOfStream,

    /// Operation attempted on a closed session
    #[error("session closed")]
    SessionClosed,

    /// Outbound queue was full; the session has been closed
    #[error("session blocked")]
    SessionOverload,

    /// Handler returned an error
    #[error(transparent)]
    Handler(#[from] anyhow::Error),

    /// Handler task ended without reporting (panicked or was cancelled)
    #[error("link task aborted before the handler finished")]
    Aborted,
}

impl LinkError {
    /// Whether the peer ended the stream cleanly
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, LinkError::EndOfStream)
    }

    /// Whether this error was raised before any handler ran
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self,
            LinkError::AddressResolution { .. }
                | LinkError::Connect { .. }
                | LinkError::Listen { .. }
                | LinkError::CodecConstruction(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(LinkError::SessionClosed.to_string(), "session closed");
        assert_eq!(LinkError::SessionOverload.to_string(), "session blocked");

        let err = LinkError::Decode {
            id: 7,
            source: CodecError::Closed,
        };
        assert_eq!(err.to_string(), "session 7 read failed: stream closed");
    }

    #[test]
    fn test_handler_error_is_transparent() {
        let err = LinkError::from(anyhow::anyhow!("bad payload"));
        assert_eq!(err.to_string(), "bad payload");
        assert!(!err.is_setup_error());
    }

    #[test]
    fn test_setup_classification() {
        let err = LinkError::CodecConstruction(CodecError::Unsupported("pipe".into()));
        assert!(err.is_setup_error());
        assert!(LinkError::EndOfStream.is_end_of_stream());
    }
}
