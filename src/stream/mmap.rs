use std::fs::File;
use std::io;
use std::path::Path;

use memmap2::Mmap;

use super::{check_bounds, ByteStream};
use crate::error::{ReadError, Result};

/// A memory-mapped local file
///
/// Positioned reads copy straight out of the mapping, so any number of threads may read
/// from one `MmapStream` (usually shared behind an `Arc`) at the same time.
pub struct MmapStream {
    /// Memory mapped file contents
    mmap: Mmap,
}
impl MmapStream {
    /// Maps the file at `path` for reading
    ///
    /// # Errors
    ///
    /// Returns [`ReadError::BadPath`] if the path does not exist or is not a regular file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ReadError::BadPath(path.display().to_string()).into())
            }
            Err(e) => return Err(e.into()),
        };
        if !file.metadata()?.is_file() {
            return Err(ReadError::BadPath(path.display().to_string()).into());
        }

        // Safety: the file is open and is not modified by this process while mapped
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self { mmap })
    }

    /// Returns the whole mapping
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.mmap
    }
}

impl ByteStream for MmapStream {
    fn len(&self) -> u64 {
        self.mmap.len() as u64
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_bounds(offset, buf.len(), self.mmap.len() as u64)?;
        let start = offset as usize;
        buf.copy_from_slice(&self.mmap[start..start + buf.len()]);
        Ok(())
    }
}

#[cfg(test)]
mod testing {
    use std::io::Write;

    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_mmap_read() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(b"dense depth data dump")?;
        file.flush()?;

        let stream = MmapStream::open(file.path())?;
        assert_eq!(stream.len(), 21);
        let mut buf = [0u8; 5];
        stream.read_at(6, &mut buf)?;
        assert_eq!(&buf, b"depth");
        Ok(())
    }

    #[test]
    fn test_missing_path() {
        let err = MmapStream::open("/definitely/not/a/file.d4")
            .err()
            .expect("open should fail");
        assert_eq!(err.kind(), ErrorKind::BadPath);
    }

    #[test]
    fn test_directory_is_bad_path() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let err = MmapStream::open(dir.path()).err().expect("open should fail");
        assert_eq!(err.kind(), ErrorKind::BadPath);
        Ok(())
    }
}
