//! The codec contract.
//!
//! A [`Protocol`] binds a [`Codec`] to a freshly established stream. The codec
//! decodes one logical message per [`Codec::read`] and encodes one per
//! [`Codec::write`]. Sessions only ever talk to these two traits, so adding a
//! codec never touches the session layer.

use async_trait::async_trait;

use crate::error::CodecError;
use crate::stream::{Duplex, RawStream};

/// Encode/decode strategy bound to one raw stream
#[async_trait]
pub trait Codec: Send + Sync + 'static {
    /// What a single read decodes into
    type Receiver: ?Sized + Send;
    /// What a single write encodes
    type Message: Send + Sync + 'static;

    /// Decode exactly one message into `receiver`.
    ///
    /// Returns [`CodecError::Eof`] when the stream ends cleanly.
    ///
    /// Must be cancel safe: bytes consumed by a read that is dropped before
    /// completing stay buffered in the codec for the next read.
    async fn read(&self, receiver: &mut Self::Receiver) -> Result<(), CodecError>;

    /// Encode and flush exactly one message. A failed write closes the stream.
    async fn write(&self, message: &Self::Message) -> Result<(), CodecError>;

    /// Raw stream underneath this codec, valid until the codec is closed
    fn hijack(&self) -> RawStream;

    /// Close the underlying stream. Idempotent.
    async fn close(&self) -> Result<(), CodecError>;
}

/// Factory producing a codec for each new stream
pub trait Protocol: Send + Sync + 'static {
    /// Codec produced by this protocol
    type Codec: Codec;

    /// Bind a codec to an already wrapped stream
    fn new_codec(&self, stream: RawStream) -> Result<Self::Codec, CodecError>;

    /// Wrap `stream` and bind a codec to it
    fn codec_for<S: Duplex>(&self, stream: S) -> Result<Self::Codec, CodecError>
    where
        Self: Sized,
    {
        self.new_codec(RawStream::new(stream))
    }
}
