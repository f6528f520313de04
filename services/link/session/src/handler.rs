//! Per-connection handler contract.

use async_trait::async_trait;
use link_wire::Codec;
use std::future::Future;
use std::sync::Arc;

use crate::session::Session;

/// Application logic run once per established session.
///
/// The session is closed after `handle` returns, whatever the outcome. Its
/// error, if any, is what the connection's waiter receives.
#[async_trait]
pub trait Handler<C: Codec>: Send + Sync + 'static {
    /// Drive one session until the conversation is over
    async fn handle(&self, session: Arc<Session<C>>) -> anyhow::Result<()>;
}

/// [`Handler`] backed by an async closure, see [`handler_fn`]
#[derive(Clone)]
pub struct HandlerFn<F> {
    f: F,
}

/// Build a handler from an async closure
///
/// ```rust,no_run
/// use link_session::handler_fn;
/// use link_wire::ByteCodec;
/// use std::sync::Arc;
///
/// let echo = handler_fn(|session: Arc<link_session::Session<ByteCodec>>| async move {
///     let mut buf = [0u8; 4];
///     session.read(&mut buf).await?;
///     session.write_sync(&bytes::Bytes::copy_from_slice(&buf)).await?;
///     anyhow::Ok(())
/// });
/// # let _ = echo;
/// ```
pub fn handler_fn<F>(f: F) -> HandlerFn<F> {
    HandlerFn { f }
}

#[async_trait]
impl<C, F, Fut> Handler<C> for HandlerFn<F>
where
    C: Codec,
    F: Fn(Arc<Session<C>>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, session: Arc<Session<C>>) -> anyhow::Result<()> {
        (self.f)(session).await
    }
}
