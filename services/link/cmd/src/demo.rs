//! Demo handlers: a byte echo with a hijacked reply and a JSON round trip.

use anyhow::{ensure, Context, Result};
use bytes::Bytes;
use link_session::{LinkError, Session};
use link_wire::{ByteCodec, JsonCodec};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Request the byte client sends
pub const BYTE_REQUEST: [u8; 9] = [1, 2, 3, 4, 5, 6, 7, 8, 9];
/// Reply the byte server sends back
pub const BYTE_REPLY: [u8; 3] = [2, 3, 4];

/// Record exchanged by the JSON demo
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Age")]
    pub age: u32,
}

impl Student {
    /// The record both sides expect
    pub fn sample() -> Self {
        Self {
            name: "foobar".to_string(),
            age: 999,
        }
    }
}

pub async fn byte_server(session: Arc<Session<ByteCodec>>) -> Result<()> {
    let mut request = [0u8; BYTE_REQUEST.len()];
    session.read(&mut request).await.context("reading request")?;
    ensure!(request == BYTE_REQUEST, "unexpected request {:?}", request);

    info!(
        session = session.id(),
        "Request from {}",
        session
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|| "unknown peer".to_string())
    );

    // Reply on the raw stream, skipping the session's write path.
    session
        .hijack()
        .write_all(&BYTE_REPLY)
        .await
        .context("writing reply")?;
    Ok(())
}

pub async fn byte_client(session: Arc<Session<ByteCodec>>) -> Result<()> {
    session
        .write_sync(&Bytes::from_static(&BYTE_REQUEST))
        .await
        .context("sending request")?;

    let mut reply = [0u8; BYTE_REPLY.len()];
    session.read(&mut reply).await.context("reading reply")?;
    ensure!(reply == BYTE_REPLY, "unexpected reply {:?}", reply);

    info!(session = session.id(), "Received reply {:?}", reply);
    Ok(())
}

pub async fn json_server(session: Arc<Session<JsonCodec<Student>>>) -> Result<()> {
    let mut student = Student::default();
    session.read(&mut student).await.context("reading student")?;
    ensure!(student == Student::sample(), "unexpected student {:?}", student);

    info!(session = session.id(), "Echoing {:?}", student);
    session.write(student).await?;

    // Queued writes are dropped on close, so hold the session until the client hangs up.
    wait_for_hangup(&session).await
}

pub async fn json_client(session: Arc<Session<JsonCodec<Student>>>) -> Result<()> {
    session.write(Student::sample()).await?;

    let mut echoed = Student::default();
    session.read(&mut echoed).await.context("reading echo")?;
    ensure!(echoed == Student::sample(), "unexpected echo {:?}", echoed);

    info!(session = session.id(), "Received echo {:?}", echoed);
    Ok(())
}

async fn wait_for_hangup(session: &Session<JsonCodec<Student>>) -> Result<()> {
    let mut extra = Student::default();
    loop {
        match session.read(&mut extra).await {
            Ok(()) => info!(session = session.id(), "Ignoring extra message {:?}", extra),
            Err(LinkError::EndOfStream | LinkError::SessionClosed) => return Ok(()),
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use link_session::{Link, Listener};
    use link_wire::{ByteProtocol, JsonProtocol};
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_byte_demo_end_to_end() {
        let listener = Listener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().to_string();
        let server = Link::new(ByteProtocol::new(), link_session::handler_fn(byte_server));
        tokio::spawn(async move { server.serve(listener).await });

        let client = Link::new(ByteProtocol::new(), link_session::handler_fn(byte_client));
        timeout(Duration::from_secs(5), client.dial_and_wait("", &addr))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_json_demo_end_to_end() {
        let listener = Listener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().to_string();
        let server = Link::new(
            JsonProtocol::<Student>::new(),
            link_session::handler_fn(json_server),
        );
        tokio::spawn(async move { server.serve(listener).await });

        let client = Link::new(
            JsonProtocol::<Student>::new(),
            link_session::handler_fn(json_client),
        );
        timeout(Duration::from_secs(5), client.dial_and_wait("", &addr))
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_student_wire_names() {
        let json = serde_json::to_string(&Student::sample()).unwrap();
        assert_eq!(json, r#"{"Name":"foobar","Age":999}"#);
    }
}
