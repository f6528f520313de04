//! Concurrent sessions and dial/accept orchestration for net-link.
//!
//! This crate turns a codec from `link-wire` into a [`Session`] that many
//! tasks can share, and runs application [`Handler`]s over TCP connections
//! that are dialed, accepted, or handed in.
//!
//! ## Features
//!
//! - **Sessions**: serialized reads, queued writes with overload detection,
//!   synchronous writes, idempotent close, raw stream hijacking
//! - **Handlers**: one handler run per connection, session closed on return
//! - **Orchestration**: async and blocking variants of dial, serve-conn, and
//!   listen-and-accept
//!
//! ## Example
//!
//! ```rust,no_run
//! use link_session::{handler_fn, Link, Session};
//! use link_wire::{JsonCodec, JsonProtocol};
//! use serde::{Deserialize, Serialize};
//! use std::sync::Arc;
//!
//! #[derive(Debug, Default, Serialize, Deserialize)]
//! struct Student {
//!     name: String,
//!     age: u32,
//! }
//!
//! # async fn example() -> Result<(), link_session::LinkError> {
//! let echo = Link::new(
//!     JsonProtocol::<Student>::new(),
//!     handler_fn(|session: Arc<Session<JsonCodec<Student>>>| async move {
//!         let mut student = Student::default();
//!         session.read(&mut student).await?;
//!         session.write_sync(&student).await?;
//!         anyhow::Ok(())
//!     }),
//! );
//!
//! // Runs until the process exits
//! echo.listen_and_accept("127.0.0.1:10086").await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod handler;
pub mod link;
pub mod session;
pub mod transport;

// Re-export main types
pub use error::LinkError;
pub use handler::{handler_fn, Handler, HandlerFn};
pub use link::{
    dial, dial_and_wait, listen_and_accept, serve_conn, serve_conn_and_wait, Completion, Link,
};
pub use session::{Session, SessionConfig, DEFAULT_SEND_QUEUE_SIZE};
pub use transport::{connect_tcp, resolve, resolve_local, Listener};
