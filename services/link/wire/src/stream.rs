//! Raw duplex streams shared between a codec and whoever hijacks it.
//!
//! A [`RawStream`] splits the underlying connection into independently locked
//! read and write halves, so one reader and one writer can make progress at
//! the same time. Closing the handle aborts every in-flight operation on every
//! clone and shuts the write direction down; afterwards all operations fail
//! with [`std::io::ErrorKind::NotConnected`].

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{
    AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter, ReadHalf, WriteHalf,
};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex, MutexGuard};
use tracing::debug;

/// A reliable, ordered, bidirectional byte stream a codec can be bound to
pub trait Duplex: AsyncRead + AsyncWrite + Send + Unpin + 'static {
    /// Remote address, if the stream has one
    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }

    /// Local address, if the stream has one
    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }
}

impl Duplex for TcpStream {
    fn peer_addr(&self) -> Option<SocketAddr> {
        TcpStream::peer_addr(self).ok()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        TcpStream::local_addr(self).ok()
    }
}

impl Duplex for tokio::io::DuplexStream {}

type BoxedDuplex = Box<dyn Duplex>;

/// Buffered read half of a [`RawStream`]
pub type StreamReader = BufReader<ReadHalf<BoxedDuplex>>;
/// Buffered write half of a [`RawStream`]
pub type StreamWriter = BufWriter<WriteHalf<BoxedDuplex>>;

struct Shared {
    reader: Mutex<StreamReader>,
    writer: Mutex<StreamWriter>,
    peer_addr: Option<SocketAddr>,
    local_addr: Option<SocketAddr>,
    closed: watch::Sender<bool>,
}

/// Cloneable handle to a raw duplex stream
#[derive(Clone)]
pub struct RawStream {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for RawStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawStream")
            .field("peer_addr", &self.shared.peer_addr)
            .field("local_addr", &self.shared.local_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl RawStream {
    /// Wrap a duplex stream
    pub fn new<S: Duplex>(stream: S) -> Self {
        let peer_addr = stream.peer_addr();
        let local_addr = stream.local_addr();
        let (read_half, write_half) = tokio::io::split(Box::new(stream) as BoxedDuplex);
        let (closed, _) = watch::channel(false);

        Self {
            shared: Arc::new(Shared {
                reader: Mutex::new(BufReader::new(read_half)),
                writer: Mutex::new(BufWriter::new(write_half)),
                peer_addr,
                local_addr,
                closed,
            }),
        }
    }

    /// Remote address of the underlying stream
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.shared.peer_addr
    }

    /// Local address of the underlying stream
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared.local_addr
    }

    /// Whether [`RawStream::close`] has been called on any clone
    pub fn is_closed(&self) -> bool {
        *self.shared.closed.borrow()
    }

    /// Resolves once the stream is closed
    pub fn closed(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.shared.closed.subscribe();
        async move { wait_closed(&mut rx).await }
    }

    /// Read whatever is available, up to `buf.len()` bytes. Returns 0 at end of stream.
    pub async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.until_closed(async {
            let mut reader = self.shared.reader.lock().await;
            reader.read(buf).await
        })
        .await
    }

    /// Fill `buf` completely
    pub async fn read_exact(&self, buf: &mut [u8]) -> io::Result<()> {
        self.until_closed(async {
            let mut reader = self.shared.reader.lock().await;
            reader.read_exact(buf).await.map(|_| ())
        })
        .await
    }

    /// Write all of `buf` and flush
    pub async fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        self.until_closed(async {
            let mut writer = self.shared.writer.lock().await;
            writer.write_all(buf).await?;
            writer.flush().await
        })
        .await
    }

    /// Close the stream. Idempotent.
    ///
    /// In-flight operations are aborted before the write direction is shut
    /// down. Streams that cannot shut down are left for the peer to close.
    pub async fn close(&self) -> io::Result<()> {
        if self.shared.closed.send_replace(true) {
            return Ok(());
        }

        let mut writer = self.shared.writer.lock().await;
        // Skip the BufWriter flush: a peer that stopped reading must not stall close.
        match writer.get_mut().shutdown().await {
            Ok(()) => Ok(()),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::Unsupported | io::ErrorKind::NotConnected
                ) =>
            {
                debug!("Stream shutdown not supported ({}), leaving it to the peer", e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Lock the buffered read half.
    ///
    /// Wrap any I/O on the guard in [`RawStream::until_closed`].
    pub async fn reader(&self) -> MutexGuard<'_, StreamReader> {
        self.shared.reader.lock().await
    }

    /// Lock the buffered write half.
    ///
    /// Wrap any I/O on the guard in [`RawStream::until_closed`].
    pub async fn writer(&self) -> MutexGuard<'_, StreamWriter> {
        self.shared.writer.lock().await
    }

    /// Run `op` unless the stream is, or becomes, closed first
    pub async fn until_closed<F, T>(&self, op: F) -> io::Result<T>
    where
        F: Future<Output = io::Result<T>>,
    {
        let mut closed = self.shared.closed.subscribe();
        tokio::select! {
            biased;
            _ = wait_closed(&mut closed) => Err(closed_error()),
            result = op => result,
        }
    }
}

async fn wait_closed(rx: &mut watch::Receiver<bool>) {
    loop {
        let closed = *rx.borrow_and_update();
        if closed {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "stream closed")
}
