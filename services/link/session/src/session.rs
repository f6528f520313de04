//! Core session implementation.
//!
//! A [`Session`] wraps one codec and makes it safe to share between tasks:
//!
//! - reads are serialized against each other but run alongside writes
//! - buffered writes go through a bounded queue drained by a per-session
//!   write loop, so callers never wait on the network
//! - synchronous writes go straight to the codec and bypass the queue
//! - close runs exactly once, whoever triggers it
//!
//! A `write_sync` may overtake messages still waiting in the queue. Use one
//! style per session when ordering between them matters.

use link_wire::{Codec, CodecError, Protocol, RawStream};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Mutex, OnceCell, RwLock};
use tracing::{debug, warn};

use crate::error::LinkError;

/// Default capacity of the outbound queue
pub const DEFAULT_SEND_QUEUE_SIZE: usize = 2048;

/// Process-wide session id source. Starts at 1 and is never reset.
static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Configuration for a session
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Capacity of the outbound queue used by [`Session::write`]
    pub send_queue_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            send_queue_size: DEFAULT_SEND_QUEUE_SIZE,
        }
    }
}

/// Thread-safe handle for reading and writing messages over one connection
pub struct Session<C: Codec> {
    id: u64,
    codec: C,
    /// Serializes readers
    read_lock: Mutex<()>,
    /// Writers take the shared side, close takes the exclusive side
    send_tx: RwLock<Option<mpsc::Sender<C::Message>>>,
    /// Held by the write loop while it waits for the next message
    send_rx: Mutex<mpsc::Receiver<C::Message>>,
    closed: AtomicBool,
    overloaded: AtomicBool,
    shutdown: watch::Sender<bool>,
    close_once: OnceCell<()>,
}

impl<C: Codec> std::fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<C: Codec> Session<C> {
    /// Bind a codec to `stream` and start the session.
    ///
    /// Must be called from within a tokio runtime; the write loop is spawned here.
    pub fn new<P>(protocol: &P, stream: RawStream, config: &SessionConfig) -> Result<Arc<Self>, LinkError>
    where
        P: Protocol<Codec = C>,
    {
        let codec = protocol
            .new_codec(stream)
            .map_err(LinkError::CodecConstruction)?;
        Ok(Self::with_codec(codec, config))
    }

    /// Start a session over an existing codec.
    ///
    /// The spawned write loop holds a reference to the session until
    /// [`Session::close`] runs, so every session must be closed explicitly to
    /// be freed. Sessions started by [`crate::Link`] are closed when their
    /// handler returns.
    pub fn with_codec(codec: C, config: &SessionConfig) -> Arc<Self> {
        let (send_tx, send_rx) = mpsc::channel(config.send_queue_size.max(1));
        let (shutdown, _) = watch::channel(false);
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);

        let session = Arc::new(Self {
            id,
            codec,
            read_lock: Mutex::new(()),
            send_tx: RwLock::new(Some(send_tx)),
            send_rx: Mutex::new(send_rx),
            closed: AtomicBool::new(false),
            overloaded: AtomicBool::new(false),
            shutdown,
            close_once: OnceCell::new(),
        });

        debug!(session = id, "Session created");
        tokio::spawn(Arc::clone(&session).write_loop());
        session
    }

    /// Process-unique session id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether the session has been closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Remote address of the underlying stream, if it has one
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.codec.hijack().peer_addr()
    }

    /// Raw stream underneath the codec.
    ///
    /// Bypasses the session's locking: writes on it may interleave with the
    /// write loop. The handle stops working once the session is closed.
    pub fn hijack(&self) -> RawStream {
        self.codec.hijack()
    }

    /// Decode one message into `receiver`.
    ///
    /// A clean end of stream returns [`LinkError::EndOfStream`] and leaves the
    /// session open. Any other decode failure closes the session, as does a
    /// stream closed underneath it.
    ///
    /// Cancel safe: a read dropped halfway, e.g. by `tokio::time::timeout`,
    /// leaves its bytes for the next read.
    pub async fn read(&self, receiver: &mut C::Receiver) -> Result<(), LinkError> {
        let _guard = self.read_lock.lock().await;
        if self.is_closed() {
            return Err(LinkError::SessionClosed);
        }

        match self.codec.read(receiver).await {
            Ok(()) => Ok(()),
            Err(CodecError::Eof) => Err(LinkError::EndOfStream),
            Err(CodecError::Closed) => {
                debug!(session = self.id, "Stream closed under read");
                self.close().await;
                Err(LinkError::SessionClosed)
            }
            Err(e) => {
                debug!(session = self.id, "Read failed: {}", e);
                self.close().await;
                Err(LinkError::Decode {
                    id: self.id,
                    source: e,
                })
            }
        }
    }

    /// Encode and flush `message` right away, bypassing the outbound queue.
    ///
    /// A failure closes the session.
    pub async fn write_sync(&self, message: &C::Message) -> Result<(), LinkError> {
        let send_tx = self.send_tx.read().await;
        if self.is_closed() || send_tx.is_none() {
            return Err(LinkError::SessionClosed);
        }

        let result = self.codec.write(message).await;
        drop(send_tx);

        match result {
            Ok(()) => Ok(()),
            Err(CodecError::Closed) => {
                self.close().await;
                Err(LinkError::SessionClosed)
            }
            Err(e) => {
                debug!(session = self.id, "Synchronous write failed: {}", e);
                self.close().await;
                Err(LinkError::Encode {
                    id: self.id,
                    source: e,
                })
            }
        }
    }

    /// Queue `message` for the write loop without waiting on the network.
    ///
    /// A full queue means the peer cannot keep up: the session is closed and
    /// [`LinkError::SessionOverload`] is returned.
    pub async fn write(&self, message: C::Message) -> Result<(), LinkError> {
        let send_tx = self.send_tx.read().await;
        if self.is_closed() {
            return Err(LinkError::SessionClosed);
        }
        let Some(tx) = send_tx.as_ref() else {
            return Err(LinkError::SessionClosed);
        };

        match tx.try_send(message) {
            Ok(()) => Ok(()),
            Err(TrySendError::Closed(_)) => Err(LinkError::SessionClosed),
            Err(TrySendError::Full(_)) => {
                drop(send_tx);
                if self.overloaded.swap(true, Ordering::AcqRel) {
                    return Err(LinkError::SessionClosed);
                }
                warn!(session = self.id, "Outbound queue full; closing session");
                self.close().await;
                Err(LinkError::SessionOverload)
            }
        }
    }

    /// Close the session. Idempotent.
    ///
    /// Concurrent callers wait for the single close procedure; later callers
    /// return immediately. Messages still queued are discarded.
    pub async fn close(&self) {
        self.close_once.get_or_init(|| self.close_inner()).await;
    }

    async fn close_inner(&self) {
        self.closed.store(true, Ordering::Release);
        self.shutdown.send_replace(true);

        // Aborts in-flight codec I/O, which releases any write_sync holding the shared side.
        if let Err(e) = self.codec.close().await {
            debug!(session = self.id, "Codec close failed: {}", e);
        }

        self.send_tx.write().await.take();

        let mut send_rx = self.send_rx.lock().await;
        send_rx.close();
        let mut dropped = 0usize;
        while send_rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!(session = self.id, dropped, "Discarded queued messages");
        }

        debug!(session = self.id, "Session closed");
    }

    async fn write_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();

        loop {
            let next = {
                let mut send_rx = self.send_rx.lock().await;
                tokio::select! {
                    biased;
                    _ = wait_shutdown(&mut shutdown) => None,
                    message = send_rx.recv() => message,
                }
            };

            let Some(message) = next else {
                break;
            };

            if let Err(e) = self.codec.write(&message).await {
                if !e.is_closed() {
                    warn!(session = self.id, "Write loop failed: {}", e);
                }
                break;
            }
        }

        self.close().await;
    }
}

async fn wait_shutdown(rx: &mut watch::Receiver<bool>) {
    loop {
        let shutdown = *rx.borrow_and_update();
        if shutdown {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}
