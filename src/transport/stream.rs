//! Duplex byte streams that split into owned read and write halves.

use std::io::{self, Read, Write};
use std::net::TcpStream;

/// A blocking duplex byte stream.
///
/// The client hands the read half to its decode loop and keeps the write
/// half behind a lock, so a stream has to be separable into two owned halves.
/// Establishing the connection, securing it and tearing it down stay with the
/// caller.
pub trait SplitStream {
    /// Read half, owned by the decode loop.
    type Reader: Read + Send + 'static;
    /// Write half, shared by senders.
    type Writer: Write + Send + 'static;

    /// Separate the stream into its halves.
    fn split(self) -> io::Result<(Self::Reader, Self::Writer)>;
}

impl SplitStream for TcpStream {
    type Reader = TcpStream;
    type Writer = TcpStream;

    fn split(self) -> io::Result<(Self::Reader, Self::Writer)> {
        let reader = self.try_clone()?;
        Ok((reader, self))
    }
}

#[cfg(unix)]
impl SplitStream for std::os::unix::net::UnixStream {
    type Reader = Self;
    type Writer = Self;

    fn split(self) -> io::Result<(Self::Reader, Self::Writer)> {
        let reader = self.try_clone()?;
        Ok((reader, self))
    }
}

impl<R, W> SplitStream for (R, W)
where
    R: Read + Send + 'static,
    W: Write + Send + 'static,
{
    type Reader = R;
    type Writer = W;

    fn split(self) -> io::Result<(R, W)> {
        Ok(self)
    }
}
