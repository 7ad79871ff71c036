//! Uncorrelated writer bound to a single value type.

use std::fmt;
use std::io::Write;
use std::marker::PhantomData;

use serde::Serialize;
use tracing::instrument;

use crate::protocol::codec;
use crate::protocol::metrics::{FrameDirection, Metrics};
use crate::protocol::{Result, TypeCode, TypeRegistry};

/// Frames values of one type onto a stream.
///
/// The type code is resolved once at construction, so writes skip the
/// registry and the envelope entirely. There is no read path and no
/// correlation. To share a writer between threads, put it behind a lock.
pub struct StreamWriter<T, W> {
    writer: W,
    type_code: TypeCode,
    _marker: PhantomData<fn(&T)>,
}

impl<T, W> StreamWriter<T, W>
where
    T: Serialize + 'static,
    W: Write,
{
    /// Bind `writer` to the code `T` has in `registry`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnregisteredType`](crate::Error::UnregisteredType) if
    /// `T` was never registered.
    pub fn new(writer: W, registry: &TypeRegistry) -> Result<Self> {
        let type_code = registry.require_code::<T>()?;
        Ok(Self {
            writer,
            type_code,
            _marker: PhantomData,
        })
    }

    /// Encode `value` and write it as one frame.
    #[instrument(level = "trace", skip_all, fields(type_code = self.type_code))]
    pub fn write(&mut self, value: &T) -> Result<()> {
        let frame = codec::encode_with_code(value, self.type_code)?;
        self.writer.write_all(&frame)?;
        Metrics::record_frame(FrameDirection::Sent, frame.len());
        Ok(())
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Type code every frame is written under
    #[must_use]
    pub const fn type_code(&self) -> TypeCode {
        self.type_code
    }

    /// Borrow the underlying stream
    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    /// Give back the underlying stream
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<T, W> fmt::Debug for StreamWriter<T, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamWriter")
            .field("type_code", &self.type_code)
            .finish_non_exhaustive()
    }
}
