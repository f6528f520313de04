//! Self-describing JSON codec.
//!
//! Messages are newline-delimited JSON documents: each write emits one
//! document followed by `\n`, each read consumes one line. Blank lines are
//! skipped. A trailing document without a newline is still decoded when the
//! stream ends.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io;
use std::marker::PhantomData;
use tokio::io::AsyncBufReadExt;
use tokio::sync::Mutex;

use crate::codec::{Codec, Protocol};
use crate::error::CodecError;
use crate::stream::RawStream;

/// Default upper bound on one encoded message, newline included
pub const DEFAULT_MAX_LINE_LEN: usize = 16 * 1024 * 1024;

/// Protocol producing [`JsonCodec`]s for messages of type `T`
#[derive(Debug)]
pub struct JsonProtocol<T> {
    max_line_len: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonProtocol<T> {
    /// Create a new JSON protocol
    pub fn new() -> Self {
        Self {
            max_line_len: DEFAULT_MAX_LINE_LEN,
            _marker: PhantomData,
        }
    }

    /// Limit the size of one incoming message
    pub fn with_max_line_len(mut self, max_line_len: usize) -> Self {
        self.max_line_len = max_line_len.max(1);
        self
    }

    /// Upper bound on one incoming message
    pub fn max_line_len(&self) -> usize {
        self.max_line_len
    }
}

impl<T> Default for JsonProtocol<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonProtocol<T> {
    fn clone(&self) -> Self {
        Self::new().with_max_line_len(self.max_line_len)
    }
}

impl<T> Protocol for JsonProtocol<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    type Codec = JsonCodec<T>;

    fn new_codec(&self, stream: RawStream) -> Result<JsonCodec<T>, CodecError> {
        Ok(JsonCodec {
            stream,
            line: Mutex::new(Vec::new()),
            max_line_len: self.max_line_len,
            _marker: PhantomData,
        })
    }
}

/// Codec encoding and decoding `T` as newline-delimited JSON
#[derive(Debug)]
pub struct JsonCodec<T> {
    stream: RawStream,
    /// Line assembled so far; survives a cancelled read
    line: Mutex<Vec<u8>>,
    max_line_len: usize,
    _marker: PhantomData<fn() -> T>,
}

#[async_trait]
impl<T> Codec for JsonCodec<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    type Receiver = T;
    type Message = T;

    async fn read(&self, receiver: &mut T) -> Result<(), CodecError> {
        let mut line = self.line.lock().await;

        loop {
            let complete = self
                .stream
                .until_closed(fill_line(&self.stream, &mut line, self.max_line_len))
                .await
                .map_err(CodecError::from_read)?;

            if line.iter().all(u8::is_ascii_whitespace) {
                line.clear();
                if !complete {
                    return Err(CodecError::Eof);
                }
                continue;
            }
            break;
        }

        let line = std::mem::take(&mut *line);
        *receiver = serde_json::from_slice(&line).map_err(|e| CodecError::Decode(Box::new(e)))?;
        Ok(())
    }

    async fn write(&self, message: &T) -> Result<(), CodecError> {
        let mut buf = match serde_json::to_vec(message) {
            Ok(buf) => buf,
            Err(e) => {
                let _ = self.stream.close().await;
                return Err(CodecError::Encode(Box::new(e)));
            }
        };
        buf.push(b'\n');

        if let Err(e) = self.stream.write_all(&buf).await {
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

/// Append bytes up to and including the next newline to `line`.
///
/// Returns `false` if the stream ended first. Bytes are only consumed from the
/// reader once they are in `line`, so dropping this future loses nothing.
async fn fill_line(stream: &RawStream, line: &mut Vec<u8>, max_len: usize) -> io::Result<bool> {
    let mut reader = stream.reader().await;

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(false);
        }

        let (taken, complete) = match available.iter().position(|&b| b == b'\n') {
            Some(i) => (i + 1, true),
            None => (available.len(), false),
        };
        line.extend_from_slice(&available[..taken]);
        reader.consume(taken);

        if line.len() > max_len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("message exceeds {} bytes", max_len),
            ));
        }
        if complete {
            return Ok(true);
        }
    }
}
