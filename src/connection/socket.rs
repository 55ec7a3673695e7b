//! Non-blocking socket seam.
//!
//! The state machine never awaits. It only attempts reads and writes and
//! interprets `io::ErrorKind::WouldBlock` as "not ready yet"; waiting for
//! readiness is the driver's job.

use std::io;

/// A non-blocking byte stream.
pub trait Socket {
    /// Reads into `buf`. `Ok(0)` means the peer closed its side.
    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Writes from `buf`, returning how many bytes the kernel accepted.
    fn try_write(&self, buf: &[u8]) -> io::Result<usize>;
}

impl Socket for tokio::net::TcpStream {
    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        tokio::net::TcpStream::try_read(self, buf)
    }

    fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
        tokio::net::TcpStream::try_write(self, buf)
    }
}

