//! Typewire - typed, length-prefixed messages over any byte stream
//!
//! Two endpoints exchange strongly typed values as JSON bodies behind a
//! 6-byte header (type code + payload length). Type codes come from a
//! [`TypeRegistry`]; both endpoints must register the same types in the same
//! order. Request/response correlation is layered on top by wrapping values in
//! an [`Envelope`] carrying a 16-bit correlation id.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::net::TcpStream;
//! use std::sync::Arc;
//!
//! use serde::{Deserialize, Serialize};
//! use typewire::{Client, TypeRegistry};
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct Item {
//!     name: String,
//!     id: i64,
//! }
//!
//! let registry = TypeRegistry::new();
//! registry.register::<Item>()?;
//!
//! let stream = TcpStream::connect("127.0.0.1:5000")?;
//! let client = Client::new(stream, Arc::new(registry))?;
//!
//! client
//!     .request(&Item { name: "ping".into(), id: 1 })?
//!     .on_response::<Item, _>(|reply| println!("got {reply:?}"));
//! # Ok::<(), typewire::Error>(())
//! ```
//!
//! # Limitations
//!
//! - No timeouts: an unanswered request keeps its pending entry until
//!   [`Client::forget`] is called.
//! - Correlation ids are 16 bits and wrap silently.
//! - Plain (non-envelope) values received by a [`Client`] are dropped.
//! - No reconnection, acknowledgement, flow control or transport security.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod protocol;
pub mod transport;

pub use protocol::{
    CorrelationId, Decoded, ENVELOPE_CODE, Envelope, Error, FrameHeader, HEADER_SIZE,
    MAX_PAYLOAD_SIZE, Result, TypeCode, TypeRegistry,
};
pub use transport::{Client, ClientConfig, ConnectionState, Request, SplitStream, StreamWriter};

/// Typewire protocol version
pub const VERSION: &str = "1.0.0";
