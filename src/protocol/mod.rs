//! Typewire protocol core
//!
//! This module provides the wire format, type registry, envelope and codec.

pub(crate) mod codec;
mod envelope;
mod error;
mod header;
pub mod metrics;
pub(crate) mod registry;

pub use codec::{encode, encode_envelope, encode_with_code, read_next, read_next_limited};
pub use envelope::{CorrelationId, Envelope};
pub use error::{Error, Result};
pub use header::FrameHeader;
pub use registry::{Decoded, TypeCode, TypeRegistry};

/// Type code permanently bound to [`Envelope`]
pub const ENVELOPE_CODE: TypeCode = 0;

/// Frame header size in bytes: type code (2) + payload length (4)
pub const HEADER_SIZE: usize = 6;

/// Default maximum inbound payload size (16 MB)
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;
