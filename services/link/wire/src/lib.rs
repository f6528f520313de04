//! Codec contract, raw stream handle, and byte/JSON codecs for net-link.
//!
//! This crate decides *how bytes are encoded*; it knows nothing about how a
//! connection is shared between tasks. A [`Protocol`] turns a raw stream into
//! a [`Codec`], and a codec reads or writes exactly one logical message per
//! call.
//!
//! ## Codecs
//!
//! - **Byte** ([`ByteProtocol`]): passthrough, reads fill a caller-owned
//!   `[u8]` buffer, writes send [`bytes::Bytes`] unchanged
//! - **JSON** ([`JsonProtocol`]): newline-delimited JSON documents for any
//!   `serde` type
//!
//! ## Example
//!
//! ```rust,no_run
//! use bytes::Bytes;
//! use link_wire::{ByteProtocol, Codec, Protocol};
//!
//! # async fn example() -> Result<(), link_wire::CodecError> {
//! let stream = tokio::net::TcpStream::connect("127.0.0.1:10086").await?;
//! let codec = ByteProtocol::new().codec_for(stream)?;
//!
//! codec.write(&Bytes::from_static(&[1, 2, 3])).await?;
//!
//! let mut reply = [0u8; 3];
//! codec.read(&mut reply).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod byte;
pub mod codec;
pub mod error;
pub mod json;
pub mod stream;

// Re-export main types
pub use byte::{ByteCodec, ByteProtocol};
pub use codec::{Codec, Protocol};
pub use error::{BoxError, CodecError};
pub use json::{JsonCodec, JsonProtocol, DEFAULT_MAX_LINE_LEN};
pub use stream::{Duplex, RawStream, StreamReader, StreamWriter};
