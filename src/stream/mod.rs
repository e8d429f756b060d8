//! # Byte streams
//!
//! Every D4 component talks to storage through two small traits:
//!
//! * [`ByteStream`] - random-access, read-only positioned reads. Implementations must
//!   tolerate concurrent `read_at` calls from many workers, so they never keep a shared
//!   cursor.
//! * [`AppendStream`] - append-only output with in-place patching of bytes that were
//!   already written (used by the framer to fix up chunk headers on close).
//!
//! Local files are read through [`MmapStream`] and written through [`Appender`].
//! In-memory buffers (`Vec<u8>`, `[u8]`) are also readable, which keeps tests free of
//! the filesystem. With the `http` feature, [`HttpStream`] reads remote files using
//! HTTP range requests.

mod append;
#[cfg(feature = "http")]
mod http;
mod mmap;

pub use append::{AppendStream, Appender};
#[cfg(feature = "http")]
pub use http::HttpStream;
pub use mmap::MmapStream;

use auto_impl::auto_impl;

use crate::error::{ReadError, Result};

/// Random-access read-only byte source
#[auto_impl(&, Box, Arc)]
pub trait ByteStream: Send + Sync {
    /// Total number of bytes in the stream
    fn len(&self) -> u64;

    /// Checks if the stream holds no bytes
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fills `buf` with the bytes starting at `offset`
    ///
    /// Fails with [`ReadError::Bounds`] if the range extends past the end of the stream.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Reads `len` bytes starting at `offset` into a new buffer
    fn read_vec(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0; len];
        self.read_at(offset, &mut buf)?;
        Ok(buf)
    }
}

/// Validates that `[offset, offset + len)` lies within a stream of `size` bytes
pub(crate) fn check_bounds(offset: u64, len: usize, size: u64) -> Result<()> {
    match offset.checked_add(len as u64) {
        Some(end) if end <= size => Ok(()),
        _ => Err(ReadError::Bounds { offset, len, size }.into()),
    }
}

impl ByteStream for [u8] {
    fn len(&self) -> u64 {
        <[u8]>::len(self) as u64
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_bounds(offset, buf.len(), ByteStream::len(self))?;
        let start = offset as usize;
        buf.copy_from_slice(&self[start..start + buf.len()]);
        Ok(())
    }
}

impl ByteStream for Vec<u8> {
    fn len(&self) -> u64 {
        self.as_slice().len() as u64
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        ByteStream::read_at(self.as_slice(), offset, buf)
    }
}
