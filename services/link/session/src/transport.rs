//! TCP transport for link sessions.
//!
//! Address resolution, outbound connects with an optional local bind, and a
//! thin listener wrapper. Every failure here is a setup error: no session
//! exists yet and no handler has run.

use std::io;
use std::net::SocketAddr;
use tokio::net::{lookup_host, TcpListener, TcpSocket, TcpStream};
use tracing::{debug, info};

use crate::error::LinkError;

/// Resolve `addr` (`host:port`) to its first socket address
pub async fn resolve(addr: &str) -> Result<SocketAddr, LinkError> {
    let mut addrs = lookup_host(addr)
        .await
        .map_err(|source| LinkError::AddressResolution {
            addr: addr.to_string(),
            source,
        })?;

    addrs.next().ok_or_else(|| LinkError::AddressResolution {
        addr: addr.to_string(),
        source: io::Error::new(io::ErrorKind::NotFound, "no addresses found"),
    })
}

/// Resolve an optional local address. An empty string means "let the OS pick".
pub async fn resolve_local(addr: &str) -> Result<Option<SocketAddr>, LinkError> {
    let addr = addr.trim();
    if addr.is_empty() {
        return Ok(None);
    }
    resolve(addr).await.map(Some)
}

/// Connect to `remote`, binding the local end to `local` when given
pub async fn connect_tcp(
    local: Option<SocketAddr>,
    remote: SocketAddr,
) -> Result<TcpStream, LinkError> {
    let connect_err = |source| LinkError::Connect {
        addr: remote,
        source,
    };

    let stream = match local {
        None => TcpStream::connect(remote).await.map_err(connect_err)?,
        Some(local) => {
            let socket = if remote.is_ipv4() {
                TcpSocket::new_v4()
            } else {
                TcpSocket::new_v6()
            }
            .map_err(connect_err)?;
            socket.bind(local).map_err(connect_err)?;
            socket.connect(remote).await.map_err(connect_err)?
        }
    };

    debug!(
        "Connected {} -> {}",
        stream
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "?".to_string()),
        remote
    );
    Ok(stream)
}

/// TCP listener accepting inbound link connections
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
    local_addr: SocketAddr,
}

impl Listener {
    /// Resolve `addr` and bind a listener to it. Port 0 picks an ephemeral port.
    pub async fn bind(addr: &str) -> Result<Self, LinkError> {
        let addr = resolve(addr).await?;
        let inner = TcpListener::bind(addr)
            .await
            .map_err(|source| LinkError::Listen { addr, source })?;
        let local_addr = inner
            .local_addr()
            .map_err(|source| LinkError::Listen { addr, source })?;

        info!("Listening on {}", local_addr);
        Ok(Self { inner, local_addr })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept the next inbound connection
    pub async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        self.inner.accept().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_literal_address() {
        let addr = resolve("127.0.0.1:10086").await.unwrap();
        assert_eq!(addr, "127.0.0.1:10086".parse::<SocketAddr>().unwrap());
    }

    #[tokio::test]
    async fn test_resolve_rejects_missing_port() {
        let err = resolve("not-an-address").await.unwrap_err();
        assert!(matches!(err, LinkError::AddressResolution { .. }));
        assert!(err.is_setup_error());
    }

    #[tokio::test]
    async fn test_empty_local_address_is_unbound() {
        assert_eq!(resolve_local("").await.unwrap(), None);
        assert_eq!(resolve_local("   ").await.unwrap(), None);
        assert!(resolve_local("127.0.0.1:0").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_connect_with_local_bind() {
        let listener = Listener::bind("127.0.0.1:0").await.unwrap();
        let remote = listener.local_addr();
        assert_ne!(remote.port(), 0);

        let local = "127.0.0.1:0".parse().unwrap();
        let (stream, accepted) = tokio::join!(connect_tcp(Some(local), remote), listener.accept());

        let stream = stream.unwrap();
        let (_server_side, peer) = accepted.unwrap();
        assert_eq!(stream.local_addr().unwrap(), peer);
        assert_eq!(stream.peer_addr().unwrap(), remote);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = Listener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr();
        drop(listener);

        let err = connect_tcp(None, addr).await.unwrap_err();
        assert!(matches!(err, LinkError::Connect { .. }));
    }
}
