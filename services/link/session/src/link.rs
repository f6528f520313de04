//! Dial/accept orchestration.
//!
//! A [`Link`] pairs a [`Protocol`] with a [`Handler`]. Every connection it
//! establishes, whether dialed, accepted, or handed in, becomes a [`Session`]
//! served by the handler on its own task. The session is closed as soon as
//! the handler returns.
//!
//! Each entry point comes in two flavours: the plain one returns a
//! [`Completion`] once the handler has been started, the `_and_wait` one
//! resolves with the handler's result.

use link_wire::{Codec, Duplex, Protocol, RawStream};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::error::LinkError;
use crate::handler::Handler;
use crate::session::{Session, SessionConfig};
use crate::transport::{self, Listener};

/// Pause after a failed accept before trying again
const ACCEPT_ERROR_PAUSE: Duration = Duration::from_millis(50);

/// Pending outcome of one connection's handler
#[derive(Debug)]
pub struct Completion {
    session_id: u64,
    rx: oneshot::Receiver<Result<(), LinkError>>,
}

impl Completion {
    /// Id of the session being served
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// Wait for the handler to finish and the session to close
    pub async fn wait(self) -> Result<(), LinkError> {
        self.rx.await.unwrap_or(Err(LinkError::Aborted))
    }
}

/// Protocol plus handler, ready to serve connections
pub struct Link<P, H> {
    protocol: Arc<P>,
    handler: Arc<H>,
    config: SessionConfig,
}

impl<P, H> Clone for Link<P, H> {
    fn clone(&self) -> Self {
        Self {
            protocol: Arc::clone(&self.protocol),
            handler: Arc::clone(&self.handler),
            config: self.config.clone(),
        }
    }
}

impl<P, H> Link<P, H>
where
    P: Protocol,
    H: Handler<P::Codec>,
{
    /// Create a link with the default session configuration
    pub fn new(protocol: P, handler: H) -> Self {
        Self {
            protocol: Arc::new(protocol),
            handler: Arc::new(handler),
            config: SessionConfig::default(),
        }
    }

    /// Replace the session configuration
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Session configuration applied to every new session
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Connect to `raddr` and start serving the connection.
    ///
    /// `laddr` may be empty to let the OS choose the local address. Returns
    /// once the handler is running; resolution, connect, and codec errors are
    /// returned directly and the handler never runs.
    pub async fn dial(&self, laddr: &str, raddr: &str) -> Result<Completion, LinkError> {
        let local = transport::resolve_local(laddr).await?;
        let remote = transport::resolve(raddr).await?;
        let stream = transport::connect_tcp(local, remote).await?;

        info!("Connected to {}", remote);
        self.serve_conn(stream)
    }

    /// Connect to `raddr` and wait for the handler to finish
    pub async fn dial_and_wait(&self, laddr: &str, raddr: &str) -> Result<(), LinkError> {
        self.dial(laddr, raddr).await?.wait().await
    }

    /// Serve an already established stream.
    ///
    /// Must be called from within a tokio runtime.
    pub fn serve_conn<S: Duplex>(&self, stream: S) -> Result<Completion, LinkError> {
        let session = Session::new(self.protocol.as_ref(), RawStream::new(stream), &self.config)?;
        let session_id = session.id();
        let handler = Arc::clone(&self.handler);
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let guard = CloseOnDrop(Arc::clone(&session));

            let result = handler
                .handle(Arc::clone(&session))
                .await
                .map_err(LinkError::Handler);
            session.close().await;
            drop(guard);

            match &result {
                Ok(()) => debug!(session = session_id, "Handler finished"),
                Err(e) => debug!(session = session_id, "Handler failed: {:#}", e),
            }
            let _ = tx.send(result);
        });

        Ok(Completion { session_id, rx })
    }

    /// Serve an already established stream and wait for the handler to finish
    pub async fn serve_conn_and_wait<S: Duplex>(&self, stream: S) -> Result<(), LinkError> {
        self.serve_conn(stream)?.wait().await
    }

    /// Bind `addr` and serve every inbound connection.
    ///
    /// Only returns if the listener cannot be bound.
    pub async fn listen_and_accept(&self, addr: &str) -> Result<(), LinkError> {
        let listener = Listener::bind(addr).await?;
        self.serve(listener).await
    }

    /// Serve every connection accepted by `listener`, each on its own task.
    ///
    /// Accept failures are logged and the loop keeps going. Handler errors
    /// are logged and never stop the listener.
    pub async fn serve(&self, listener: Listener) -> Result<(), LinkError> {
        info!("Accepting connections on {}", listener.local_addr());

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    tokio::time::sleep(ACCEPT_ERROR_PAUSE).await;
                    continue;
                }
            };

            debug!("Accepted connection from {}", peer);
            let link = self.clone();
            tokio::spawn(async move {
                if let Err(e) = link.serve_conn_and_wait(stream).await {
                    error!("Connection from {} failed: {:#}", peer, e);
                }
            });
        }
    }
}

/// Closes the session if the handler task unwinds before closing it
struct CloseOnDrop<C: Codec>(Arc<Session<C>>);

impl<C: Codec> Drop for CloseOnDrop<C> {
    fn drop(&mut self) {
        if self.0.is_closed() {
            return;
        }
        warn!(session = self.0.id(), "Handler task ended abnormally; closing session");
        let session = Arc::clone(&self.0);
        tokio::spawn(async move { session.close().await });
    }
}

/// Connect to `raddr` with the default configuration and start serving the connection
pub async fn dial<P, H>(laddr: &str, raddr: &str, protocol: P, handler: H) -> Result<Completion, LinkError>
where
    P: Protocol,
    H: Handler<P::Codec>,
{
    Link::new(protocol, handler).dial(laddr, raddr).await
}

/// Connect to `raddr` with the default configuration and wait for the handler
pub async fn dial_and_wait<P, H>(laddr: &str, raddr: &str, protocol: P, handler: H) -> Result<(), LinkError>
where
    P: Protocol,
    H: Handler<P::Codec>,
{
    Link::new(protocol, handler).dial_and_wait(laddr, raddr).await
}

/// Serve an established stream with the default configuration
pub fn serve_conn<P, H, S>(stream: S, protocol: P, handler: H) -> Result<Completion, LinkError>
where
    P: Protocol,
    H: Handler<P::Codec>,
    S: Duplex,
{
    Link::new(protocol, handler).serve_conn(stream)
}

/// Serve an established stream with the default configuration and wait for the handler
pub async fn serve_conn_and_wait<P, H, S>(stream: S, protocol: P, handler: H) -> Result<(), LinkError>
where
    P: Protocol,
    H: Handler<P::Codec>,
    S: Duplex,
{
    Link::new(protocol, handler).serve_conn_and_wait(stream).await
}

/// Bind `addr` and serve every inbound connection with the default configuration
pub async fn listen_and_accept<P, H>(addr: &str, protocol: P, handler: H) -> Result<(), LinkError>
where
    P: Protocol,
    H: Handler<P::Codec>,
{
    Link::new(protocol, handler).listen_and_accept(addr).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;
    use bytes::Bytes;
    use link_wire::{ByteCodec, ByteProtocol, CodecError, JsonCodec, JsonProtocol};
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::time::timeout;

    const TEST_TIMEOUT: Duration = Duration::from_secs(5);

    #[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
    struct Student {
        name: String,
        age: u32,
    }

    async fn spawn_server<P, H>(link: Link<P, H>) -> std::net::SocketAddr
    where
        P: Protocol,
        H: Handler<P::Codec>,
    {
        let listener = Listener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr();
        tokio::spawn(async move { link.serve(listener).await });
        addr
    }

    #[tokio::test]
    async fn test_byte_echo_with_hijack() {
        let server = Link::new(
            ByteProtocol::new(),
            handler_fn(|session: Arc<Session<ByteCodec>>| async move {
                let mut buf = vec![0u8; 9];
                session.read(&mut buf).await?;
                anyhow::ensure!(buf == (1..=9).collect::<Vec<u8>>(), "unexpected request {:?}", buf);
                session.hijack().write_all(&[2, 3, 4]).await?;
                Ok(())
            }),
        );
        let addr = spawn_server(server).await;

        let client = handler_fn(|session: Arc<Session<ByteCodec>>| async move {
            session
                .write_sync(&Bytes::from_static(&[1, 2, 3, 4, 5, 6, 7, 8, 9]))
                .await?;
            let mut reply = vec![0u8; 3];
            session.read(&mut reply).await?;
            anyhow::ensure!(reply == vec![2, 3, 4], "unexpected reply {:?}", reply);
            Ok(())
        });

        timeout(TEST_TIMEOUT, dial_and_wait("", &addr.to_string(), ByteProtocol::new(), client))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_json_round_trip() {
        let server = Link::new(
            JsonProtocol::<Student>::new(),
            handler_fn(|session: Arc<Session<JsonCodec<Student>>>| async move {
                let mut student = Student::default();
                session.read(&mut student).await?;
                session.write(student).await?;

                // Keep the session open until the client hangs up.
                let mut next = Student::default();
                match session.read(&mut next).await {
                    Err(e) if e.is_end_of_stream() => Ok(()),
                    Err(e) => Err(e.into()),
                    Ok(()) => anyhow::bail!("unexpected second message"),
                }
            }),
        );
        let addr = spawn_server(server).await;

        let sent = Student {
            name: "foobar".to_string(),
            age: 999,
        };
        let expected = sent.clone();
        let client = handler_fn(move |session: Arc<Session<JsonCodec<Student>>>| {
            let sent = sent.clone();
            let expected = expected.clone();
            async move {
                session.write(sent).await?;
                let mut received = Student::default();
                session.read(&mut received).await?;
                anyhow::ensure!(received == expected, "echo mismatch: {:?}", received);
                Ok(())
            }
        });

        timeout(
            TEST_TIMEOUT,
            dial_and_wait("127.0.0.1:0", &addr.to_string(), JsonProtocol::<Student>::new(), client),
        )
        .await
        .unwrap()
        .unwrap();
    }

    #[tokio::test]
    async fn test_setup_failures_skip_handler() {
        let invoked = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&invoked);
        let link = Link::new(
            ByteProtocol::new(),
            handler_fn(move |_session: Arc<Session<ByteCodec>>| {
                flag.store(true, Ordering::SeqCst);
                async { anyhow::Ok(()) }
            }),
        );

        let err = link.dial("", "not-an-address").await.unwrap_err();
        assert!(matches!(err, LinkError::AddressResolution { .. }));

        let listener = Listener::bind("127.0.0.1:0").await.unwrap();
        let closed_port = listener.local_addr().to_string();
        drop(listener);
        let err = link.dial_and_wait("", &closed_port).await.unwrap_err();
        assert!(matches!(err, LinkError::Connect { .. }));

        assert!(!invoked.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_codec_construction_failure_skips_handler() {
        struct RefusingProtocol;

        impl Protocol for RefusingProtocol {
            type Codec = ByteCodec;

            fn new_codec(&self, _stream: RawStream) -> Result<ByteCodec, CodecError> {
                Err(CodecError::Unsupported("refused".to_string()))
            }
        }

        let invoked = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&invoked);
        let (a, _b) = tokio::io::duplex(64);

        let err = serve_conn(
            a,
            RefusingProtocol,
            handler_fn(move |_session: Arc<Session<ByteCodec>>| {
                flag.store(true, Ordering::SeqCst);
                async { anyhow::Ok(()) }
            }),
        )
        .unwrap_err();

        assert!(matches!(err, LinkError::CodecConstruction(_)));
        assert!(!invoked.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_serve_conn_returns_before_handler_finishes() {
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let release_rx = Arc::new(tokio::sync::Mutex::new(Some(release_rx)));
        let (a, b) = tokio::io::duplex(64);
        let peer = RawStream::new(b);

        let completion = serve_conn(
            a,
            ByteProtocol::new(),
            handler_fn(move |_session: Arc<Session<ByteCodec>>| {
                let release_rx = Arc::clone(&release_rx);
                async move {
                    if let Some(rx) = release_rx.lock().await.take() {
                        let _ = rx.await;
                    }
                    anyhow::Ok(())
                }
            }),
        )
        .unwrap();

        assert!(completion.session_id() > 0);
        release_tx.send(()).unwrap();
        timeout(TEST_TIMEOUT, completion.wait()).await.unwrap().unwrap();

        // Handler return closes the session, which the peer sees as end of stream.
        let mut buf = [0u8; 1];
        assert_eq!(peer.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_handler_error_reaches_waiter() {
        let (a, _b) = tokio::io::duplex(64);
        let err = serve_conn_and_wait(
            a,
            ByteProtocol::new(),
            handler_fn(|_session: Arc<Session<ByteCodec>>| async {
                Err(anyhow::anyhow!("handler gave up"))
            }),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, LinkError::Handler(_)));
        assert_eq!(err.to_string(), "handler gave up");
    }

    #[tokio::test]
    async fn test_handler_panic_closes_session() {
        let (a, b) = tokio::io::duplex(64);
        let peer = RawStream::new(b);

        let err = serve_conn_and_wait(
            a,
            ByteProtocol::new(),
            handler_fn(|session: Arc<Session<ByteCodec>>| async move {
                if session.id() > 0 {
                    panic!("handler blew up");
                }
                anyhow::Ok(())
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, LinkError::Aborted));

        let mut buf = [0u8; 1];
        let n = timeout(TEST_TIMEOUT, peer.read(&mut buf)).await.unwrap().unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_peer_hangup_surfaces_as_end_of_stream() {
        let (report_tx, mut report_rx) = tokio::sync::mpsc::channel(1);
        let server = Link::new(
            ByteProtocol::new(),
            handler_fn(move |session: Arc<Session<ByteCodec>>| {
                let report_tx = report_tx.clone();
                async move {
                    let mut buf = [0u8; 4];
                    let err = session.read(&mut buf).await.unwrap_err();
                    let _ = report_tx
                        .send((err.is_end_of_stream(), session.is_closed()))
                        .await;
                    anyhow::Ok(())
                }
            }),
        );
        let addr = spawn_server(server).await;

        dial_and_wait(
            "",
            &addr.to_string(),
            ByteProtocol::new(),
            handler_fn(|_session: Arc<Session<ByteCodec>>| async { anyhow::Ok(()) }),
        )
        .await
        .unwrap();

        let (end_of_stream, closed) = timeout(TEST_TIMEOUT, report_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(end_of_stream);
        assert!(!closed);
    }

    #[tokio::test]
    async fn test_listener_serves_many_connections() {
        let served = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&served);
        let server = Link::new(
            ByteProtocol::new(),
            handler_fn(move |session: Arc<Session<ByteCodec>>| {
                let counter = Arc::clone(&counter);
                async move {
                    let mut buf = [0u8; 1];
                    session.read(&mut buf).await?;
                    counter.fetch_add(1, Ordering::SeqCst);
                    session.write_sync(&Bytes::copy_from_slice(&buf)).await?;
                    Ok(())
                }
            }),
        )
        .with_config(SessionConfig { send_queue_size: 8 });
        assert_eq!(server.config().send_queue_size, 8);
        let addr = spawn_server(server).await;

        let client = Link::new(
            ByteProtocol::new(),
            handler_fn(|session: Arc<Session<ByteCodec>>| async move {
                session.write_sync(&Bytes::from_static(b"x")).await?;
                let mut buf = [0u8; 1];
                session.read(&mut buf).await?;
                Ok(())
            }),
        );

        for _ in 0..3 {
            timeout(TEST_TIMEOUT, client.dial_and_wait("", &addr.to_string()))
                .await
                .unwrap()
                .unwrap();
        }
        assert_eq!(served.load(Ordering::SeqCst), 3);
    }
}
