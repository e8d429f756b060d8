use std::io::{Seek, SeekFrom, Write};

use crate::error::Result;

/// Append-only byte sink that may rewrite bytes it already emitted
pub trait AppendStream {
    /// Current length of the stream, which is also the offset of the next append
    fn position(&self) -> u64;

    /// Appends `buf` and returns the offset it was written at
    fn append(&mut self, buf: &[u8]) -> Result<u64>;

    /// Overwrites already-written bytes at `offset`
    fn patch_at(&mut self, offset: u64, buf: &[u8]) -> Result<()>;

    /// Flushes buffered bytes to the underlying sink
    fn flush(&mut self) -> Result<()>;
}

/// [`AppendStream`] adapter over any seekable writer
///
/// Appends always land at the logical end of the stream, even right after a patch.
pub struct Appender<W: Write + Seek> {
    /// Underlying writer
    inner: W,

    /// Logical end of the stream
    end: u64,
}
impl<W: Write + Seek> Appender<W> {
    /// Wraps a writer, positioning appends after its existing content
    pub fn new(mut inner: W) -> Result<Self> {
        let end = inner.seek(SeekFrom::End(0))?;
        Ok(Self { inner, end })
    }

    /// Mutable access to the inner writer
    pub fn by_ref(&mut self) -> &mut W {
        &mut self.inner
    }

    /// Consumes the appender and returns the inner writer
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write + Seek> AppendStream for Appender<W> {
    fn position(&self) -> u64 {
        self.end
    }

    fn append(&mut self, buf: &[u8]) -> Result<u64> {
        let offset = self.end;
        self.inner.write_all(buf)?;
        self.end += buf.len() as u64;
        Ok(offset)
    }

    fn patch_at(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        if offset + buf.len() as u64 > self.end {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("patch at {offset} extends past the end of the stream"),
            )
            .into());
        }
        self.inner.seek(SeekFrom::Start(offset))?;
        self.inner.write_all(buf)?;
        self.inner.seek(SeekFrom::Start(self.end))?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod testing {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn test_append_and_patch() -> Result<()> {
        let mut stream = Appender::new(Cursor::new(Vec::new()))?;
        assert_eq!(stream.append(b"abcd")?, 0);
        assert_eq!(stream.append(b"efgh")?, 4);
        stream.patch_at(2, b"XY")?;
        assert_eq!(stream.append(b"ij")?, 8);
        assert_eq!(stream.into_inner().into_inner(), b"abXYefghij");
        Ok(())
    }

    #[test]
    fn test_patch_past_end() -> Result<()> {
        let mut stream = Appender::new(Cursor::new(Vec::new()))?;
        stream.append(b"abc")?;
        assert!(stream.patch_at(2, b"xy").is_err());
        Ok(())
    }

    #[test]
    fn test_resume_existing() -> Result<()> {
        let mut stream = Appender::new(Cursor::new(b"head".to_vec()))?;
        assert_eq!(stream.position(), 4);
        stream.append(b"tail")?;
        assert_eq!(stream.into_inner().into_inner(), b"headtail");
        Ok(())
    }
}
