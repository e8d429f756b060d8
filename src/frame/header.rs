use std::io::Write;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{FrameError, ReadError, Result};
use crate::stream::ByteStream;

/// Magic bytes opening every chunk header
pub const CHUNK_MAGIC: [u8; 8] = *b"D4FCHNK\x01";

/// Payload length marking a chunk whose size is not yet known
pub const STREAMING_LEN: u64 = u64::MAX;

/// Header of one named chunk in the container
///
/// Layout (little-endian):
///
/// ```text
/// magic (8) | name_len (u16) | name | zero padding | payload_len (u64) | next_offset (u64)
/// ```
///
/// The padding aligns `2 + name_len + padding` to a multiple of 8 bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkHeader {
    /// UTF-8 chunk name, such as `.ptab`
    pub name: String,

    /// Payload length in bytes, [`STREAMING_LEN`] while the chunk is open
    pub payload_len: u64,

    /// Absolute offset of the next chunk header, 0 for the last chunk
    pub next_offset: u64,
}
impl ChunkHeader {
    /// Creates the header of a chunk that is still being written
    pub fn streaming(name: &str) -> Result<Self> {
        if name.len() > usize::from(u16::MAX) {
            return Err(FrameError::NameTooLong(name.len()).into());
        }
        Ok(Self {
            name: name.to_string(),
            payload_len: STREAMING_LEN,
            next_offset: 0,
        })
    }

    /// Checks if the payload length has not been recorded
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.payload_len == STREAMING_LEN
    }

    /// Size of the padded name area, including its `u16` length prefix
    fn name_area(name_len: usize) -> usize {
        (2 + name_len).div_ceil(8) * 8
    }

    /// Total header size in bytes
    #[must_use]
    pub fn size(&self) -> u64 {
        (8 + Self::name_area(self.name.len()) + 16) as u64
    }

    /// Offset of the `payload_len` field relative to the header start
    #[must_use]
    pub fn payload_len_field(&self) -> u64 {
        (8 + Self::name_area(self.name.len())) as u64
    }

    /// Offset of the `next_offset` field relative to the header start
    #[must_use]
    pub fn next_offset_field(&self) -> u64 {
        self.payload_len_field() + 8
    }

    /// Serializes the header
    pub fn write_bytes<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.to_bytes())?;
        Ok(())
    }

    /// Serializes the header into a new buffer
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let name_end = 10 + self.name.len();
        let len_field = self.payload_len_field() as usize;
        let mut buf = vec![0u8; self.size() as usize];
        buf[..8].copy_from_slice(&CHUNK_MAGIC);
        LittleEndian::write_u16(&mut buf[8..10], self.name.len() as u16);
        buf[10..name_end].copy_from_slice(self.name.as_bytes());
        LittleEndian::write_u64(&mut buf[len_field..len_field + 8], self.payload_len);
        LittleEndian::write_u64(&mut buf[len_field + 8..], self.next_offset);
        buf
    }

    /// Parses the header stored at `offset`
    ///
    /// # Errors
    ///
    /// * [`FrameError::InvalidMagic`] if the magic bytes do not match
    /// * [`FrameError::InvalidChain`] if the header is cut off by the end of the stream
    pub fn read_from<S: ByteStream + ?Sized>(stream: &S, offset: u64) -> Result<Self> {
        let truncated = || FrameError::InvalidChain {
            offset,
            next: stream.len(),
        };

        let mut prefix = [0u8; 10];
        if offset + 10 > stream.len() {
            return Err(truncated().into());
        }
        stream.read_at(offset, &mut prefix)?;
        if prefix[..8] != CHUNK_MAGIC {
            return Err(FrameError::InvalidMagic(offset).into());
        }

        let name_len = usize::from(LittleEndian::read_u16(&prefix[8..]));
        let rest_len = Self::name_area(name_len) - 2 + 16;
        let mut rest = vec![0u8; rest_len];
        match stream.read_at(offset + 10, &mut rest) {
            Ok(()) => {}
            Err(crate::Error::ReadError(ReadError::Bounds { .. })) => {
                return Err(truncated().into())
            }
            Err(e) => return Err(e),
        }

        let name = std::str::from_utf8(&rest[..name_len])?.to_string();
        let fields = &rest[rest_len - 16..];
        Ok(Self {
            name,
            payload_len: LittleEndian::read_u64(&fields[..8]),
            next_offset: LittleEndian::read_u64(&fields[8..]),
        })
    }
}

#[cfg(test)]
mod testing {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_header_layout() -> Result<()> {
        let mut header = ChunkHeader::streaming(".ptab")?;
        header.payload_len = 42;
        header.next_offset = 1024;

        // 2 + 5 name bytes pad up to 8
        assert_eq!(header.size(), 32);
        assert_eq!(header.payload_len_field(), 16);
        assert_eq!(header.next_offset_field(), 24);

        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), 32);
        assert_eq!(&bytes[..8], &CHUNK_MAGIC);
        assert_eq!(LittleEndian::read_u16(&bytes[8..10]), 5);
        assert_eq!(&bytes[10..15], b".ptab");
        assert_eq!(&bytes[15..16], &[0]);
        assert_eq!(LittleEndian::read_u64(&bytes[16..24]), 42);
        assert_eq!(LittleEndian::read_u64(&bytes[24..32]), 1024);

        let parsed = ChunkHeader::read_from(&bytes, 0)?;
        assert_eq!(parsed, header);
        Ok(())
    }

    #[test]
    fn test_write_bytes_matches_buffer() -> Result<()> {
        let mut header = ChunkHeader::streaming(".metadata")?;
        header.next_offset = 77;
        let mut out = Vec::new();
        header.write_bytes(&mut out)?;
        assert_eq!(out, header.to_bytes());
        assert_eq!(out.len() as u64, header.size());
        assert_eq!(ChunkHeader::read_from(&out, 0)?, header);
        Ok(())
    }

    #[test]
    fn test_name_alignment() -> Result<()> {
        // 2 + 6 is already aligned
        let header = ChunkHeader::streaming("abcdef")?;
        assert_eq!(header.size(), 8 + 8 + 16);
        let header = ChunkHeader::streaming(".metadata")?;
        assert_eq!(header.size(), 8 + 16 + 16);
        assert!(header.is_streaming());
        Ok(())
    }

    #[test]
    fn test_bad_magic() {
        let bytes = vec![0u8; 64];
        let err = ChunkHeader::read_from(&bytes, 0).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::FrameError(FrameError::InvalidMagic(0))
        ));
        assert_eq!(err.kind(), ErrorKind::Corrupt);
    }

    #[test]
    fn test_truncated_header() -> Result<()> {
        let header = ChunkHeader::streaming(".stab")?;
        let bytes = header.to_bytes();
        let err = ChunkHeader::read_from(&bytes[..20].to_vec(), 0).unwrap_err();
        assert!(err.is_corrupt());
        Ok(())
    }
}
