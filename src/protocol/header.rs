//! Typewire frame header
//!
//! Every frame starts with a fixed 6-byte header.

use bytes::{Buf, BufMut};

use super::{Error, HEADER_SIZE, TypeCode};

/// Typewire frame header (6 bytes)
///
/// # Wire Format
///
/// ```text
/// 0                   1                   2                   3
/// 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |        Type Code (2)          |                               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+                               +
/// |                     Payload Length (4)                        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// Both fields are little-endian. The body that follows is exactly
/// `payload_len` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    type_code: TypeCode,
    payload_len: u32,
}

impl FrameHeader {
    /// Create a new frame header
    #[must_use]
    pub const fn new(type_code: TypeCode, payload_len: u32) -> Self {
        Self {
            type_code,
            payload_len,
        }
    }

    /// Build a header for a body of `len` bytes, rejecting bodies the
    /// 32-bit length field cannot describe
    pub fn for_body(type_code: TypeCode, len: usize) -> super::Result<Self> {
        let payload_len = u32::try_from(len).map_err(|_| Error::PayloadTooLarge {
            size: len,
            max: u32::MAX as usize,
        })?;
        Ok(Self::new(type_code, payload_len))
    }

    /// Get type code
    #[must_use]
    pub const fn type_code(&self) -> TypeCode {
        self.type_code
    }

    /// Get payload length
    #[must_use]
    pub const fn payload_len(&self) -> u32 {
        self.payload_len
    }

    /// Write the header into `buf` (little-endian)
    pub fn put(&self, buf: &mut impl BufMut) {
        buf.put_u16_le(self.type_code);
        buf.put_u32_le(self.payload_len);
    }

    /// Convert to bytes (little-endian)
    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        self.put(&mut &mut bytes[..]);
        bytes
    }

    /// Parse from bytes (little-endian)
    pub fn from_bytes(bytes: &[u8]) -> super::Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("frame header needs {HEADER_SIZE} bytes, got {}", bytes.len()),
            )));
        }

        let mut cursor = &bytes[..HEADER_SIZE];
        let type_code = cursor.get_u16_le();
        let payload_len = cursor.get_u32_le();

        Ok(Self::new(type_code, payload_len))
    }
}
