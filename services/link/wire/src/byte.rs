//! Byte passthrough codec.
//!
//! No framing: a read fills the caller's buffer completely, a write sends the
//! message bytes as they are.
//!
//! Bytes of a read that is cancelled halfway are kept by the codec and
//! delivered by the next read.

use async_trait::async_trait;
use bytes::{BufMut, Bytes};
use tokio::io::AsyncReadExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::codec::{Codec, Protocol};
use crate::error::CodecError;
use crate::stream::RawStream;

/// Protocol producing [`ByteCodec`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct ByteProtocol;

impl ByteProtocol {
    /// Create a new byte protocol
    pub fn new() -> Self {
        Self
    }
}

impl Protocol for ByteProtocol {
    type Codec = ByteCodec;

    fn new_codec(&self, stream: RawStream) -> Result<ByteCodec, CodecError> {
        Ok(ByteCodec {
            stream,
            pending: Mutex::new(Vec::new()),
        })
    }
}

/// Codec reading into fixed-size byte buffers and writing raw bytes
#[derive(Debug)]
pub struct ByteCodec {
    stream: RawStream,
    /// Bytes received for a read that has not completed yet
    pending: Mutex<Vec<u8>>,
}

#[async_trait]
impl Codec for ByteCodec {
    type Receiver = [u8];
    type Message = Bytes;

    async fn read(&self, receiver: &mut [u8]) -> Result<(), CodecError> {
        if receiver.is_empty() {
            return Ok(());
        }

        let need = receiver.len();
        let mut pending = self.pending.lock().await;
        let result = self
            .stream
            .until_closed(async {
                let mut reader = self.stream.reader().await;
                while pending.len() < need {
                    let want = need - pending.len();
                    let mut limited = BufMut::limit(&mut *pending, want);
                    if reader.read_buf(&mut limited).await? == 0 {
                        return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof));
                    }
                }
                Ok::<(), std::io::Error>(())
            })
            .await;

        match result {
            Ok(()) => {
                receiver.copy_from_slice(&pending[..need]);
                pending.clear();
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof && !pending.is_empty() => {
                debug!("Stream ended after {} of {} bytes", pending.len(), need);
                Err(CodecError::Eof)
            }
            Err(e) => Err(CodecError::from_read(e)),
        }
    }

    async fn write(&self, message: &Bytes) -> Result<(), CodecError> {
        if let Err(e) = self.stream.write_all(message).await {
            let err = CodecError::from_write(e);
            if !err.is_closed() {
                let _ = self.stream.close().await;
            }
            return Err(err);
        }
        Ok(())
    }

    fn hijack(&self) -> RawStream {
        self.stream.clone()
    }

    async fn close(&self) -> Result<(), CodecError> {
        self.stream.close().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_read_fills_caller_buffer() {
        let (a, b) = tokio::io::duplex(64);
        let codec = ByteProtocol::new().codec_for(a).unwrap();
        let peer = RawStream::new(b);

        // Two partial writes must still land in one caller-owned buffer.
        peer.write_all(&[1, 2]).await.unwrap();
        peer.write_all(&[3, 4, 5]).await.unwrap();

        let mut buf = vec![0u8; 5];
        codec.read(&mut buf).await.unwrap();
        assert_eq!(buf, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_cancelled_read_keeps_partial_bytes() {
        let (a, b) = tokio::io::duplex(64);
        let codec = ByteProtocol::new().codec_for(a).unwrap();
        let peer = RawStream::new(b);

        peer.write_all(&[1, 2]).await.unwrap();
        let mut buf = [0u8; 4];
        let timed_out = tokio::time::timeout(Duration::from_millis(50), codec.read(&mut buf)).await;
        assert!(timed_out.is_err());

        peer.write_all(&[3, 4]).await.unwrap();
        codec.read(&mut buf).await.unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_write_then_hijacked_read() {
        let (a, b) = tokio::io::duplex(64);
        let codec = ByteProtocol::new().codec_for(a).unwrap();
        let peer = ByteProtocol::new().codec_for(b).unwrap();

        codec.write(&Bytes::from_static(&[9, 8, 7])).await.unwrap();

        let raw = peer.hijack();
        let mut buf = [0u8; 3];
        raw.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [9, 8, 7]);
    }

    #[tokio::test]
    async fn test_eof_is_distinguished() {
        let (a, b) = tokio::io::duplex(64);
        let codec = ByteProtocol::new().codec_for(a).unwrap();
        drop(b);

        let mut buf = [0u8; 4];
        assert!(codec.read(&mut buf).await.unwrap_err().is_eof());
    }

    #[tokio::test]
    async fn test_write_after_close_fails() {
        let (a, _b) = tokio::io::duplex(64);
        let codec = ByteProtocol::new().codec_for(a).unwrap();

        codec.close().await.unwrap();
        codec.close().await.unwrap();

        let err = codec.write(&Bytes::from_static(b"x")).await.unwrap_err();
        assert!(err.is_closed());
        assert!(codec.hijack().is_closed());
    }
}
