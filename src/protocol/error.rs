//! Typewire error types

use thiserror::Error;

/// Typewire errors
#[derive(Error, Debug)]
pub enum Error {
    /// Value type was never registered with the type registry
    #[error("type not registered: {type_name}")]
    UnregisteredType {
        /// Rust name of the offending type
        type_name: &'static str,
    },

    /// Type code has no registered decoder
    #[error("type code not allocated: {code}")]
    UnknownCode {
        /// Requested code
        code: u16,
    },

    /// Every 16-bit type code has been allocated
    #[error("type registry full")]
    RegistryFull,

    /// Payload too large for the frame length field or the configured limit
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge {
        /// Payload size
        size: usize,
        /// Maximum allowed
        max: usize,
    },

    /// IO error, including short reads at end of stream
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Structured encoding of an outbound value failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether the error came from the underlying stream
    #[must_use]
    pub const fn is_io(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
