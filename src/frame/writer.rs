use byteorder::{ByteOrder, LittleEndian};

use super::{ChunkHeader, DirEntry, Directory, DIRECTORY_CHUNK};
use crate::error::{FrameError, Result};
use crate::stream::AppendStream;

/// Chunk currently receiving streamed bytes
struct OpenChunk {
    header: ChunkHeader,
    header_offset: u64,
    payload_offset: u64,
}

/// Point at which an existing, finalized container can be extended
#[derive(Clone, Debug)]
pub struct ResumePoint {
    /// Directory of the finalized container
    pub directory: Directory,

    /// Absolute offset of the `next_offset` field of the last chunk header
    pub link_field: u64,
}

/// Appends named chunks to a byte sink and finalizes them with a directory
///
/// Chunks are either written whole with [`FrameWriter::write_chunk`] or streamed with
/// [`FrameWriter::begin_chunk`], [`FrameWriter::append`] and [`FrameWriter::end_chunk`].
/// Streaming chunks carry [`super::STREAMING_LEN`] until they are ended, at which point
/// their length is patched in place.
pub struct FrameWriter<S: AppendStream> {
    stream: S,

    /// Location of the `next_offset` field that the next chunk must be linked from
    link_field: Option<u64>,

    /// Chunk currently being streamed
    open: Option<OpenChunk>,

    /// Entries collected so far
    directory: Directory,
}
impl<S: AppendStream> FrameWriter<S> {
    /// Starts a new container on an empty sink
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            link_field: None,
            open: None,
            directory: Directory::default(),
        }
    }

    /// Continues a finalized container
    ///
    /// `stream` must be positioned at the end of the existing file. New chunks are linked
    /// from the last existing chunk and [`FrameWriter::finish`] writes a fresh directory
    /// that supersedes the old one.
    pub fn resume(stream: S, resume: ResumePoint) -> Self {
        Self {
            stream,
            link_field: Some(resume.link_field),
            open: None,
            directory: resume.directory,
        }
    }

    /// Current end of the sink
    #[must_use]
    pub fn position(&self) -> u64 {
        self.stream.position()
    }

    /// Opens a streaming chunk and returns the offset of its payload
    pub fn begin_chunk(&mut self, name: &str) -> Result<u64> {
        if let Some(open) = &self.open {
            return Err(FrameError::ChunkStillOpen(open.header.name.clone()).into());
        }

        let header = ChunkHeader::streaming(name)?;
        let header_offset = self.stream.append(&header.to_bytes())?;
        if let Some(field) = self.link_field.take() {
            let mut buf = [0u8; 8];
            LittleEndian::write_u64(&mut buf, header_offset);
            self.stream.patch_at(field, &buf)?;
        }
        self.link_field = Some(header_offset + header.next_offset_field());

        let payload_offset = header_offset + header.size();
        tracing::debug!("begin chunk {name} at {header_offset}");
        self.open = Some(OpenChunk {
            header,
            header_offset,
            payload_offset,
        });
        Ok(payload_offset)
    }

    /// Appends bytes to the open chunk and returns their absolute offset
    pub fn append(&mut self, buf: &[u8]) -> Result<u64> {
        if self.open.is_none() {
            return Err(FrameError::NoOpenChunk.into());
        }
        self.stream.append(buf)
    }

    /// Overwrites bytes of the open chunk, `offset` is relative to the payload start
    pub fn patch(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        let Some(open) = &self.open else {
            return Err(FrameError::NoOpenChunk.into());
        };
        self.stream.patch_at(open.payload_offset + offset, buf)
    }

    /// Closes the open chunk, records its length and returns its directory entry
    pub fn end_chunk(&mut self) -> Result<DirEntry> {
        let Some(open) = self.open.take() else {
            return Err(FrameError::NoOpenChunk.into());
        };
        let len = self.stream.position() - open.payload_offset;
        let mut buf = [0u8; 8];
        LittleEndian::write_u64(&mut buf, len);
        self.stream
            .patch_at(open.header_offset + open.header.payload_len_field(), &buf)?;

        tracing::debug!("end chunk {} ({len} bytes)", open.header.name);
        let entry = DirEntry {
            name: open.header.name,
            offset: open.payload_offset,
            len,
        };
        self.directory.insert(entry.clone());
        Ok(entry)
    }

    /// Writes a complete chunk in one call
    pub fn write_chunk(&mut self, name: &str, payload: &[u8]) -> Result<DirEntry> {
        self.begin_chunk(name)?;
        self.append(payload)?;
        self.end_chunk()
    }

    /// Writes the directory chunk and flushes the sink
    pub fn finish(mut self) -> Result<S> {
        if let Some(open) = &self.open {
            return Err(FrameError::ChunkStillOpen(open.header.name.clone()).into());
        }
        let payload = self.directory.to_bytes();
        self.begin_chunk(DIRECTORY_CHUNK)?;
        self.append(&payload)?;
        // The directory does not list itself
        let Some(open) = self.open.take() else {
            return Err(FrameError::NoOpenChunk.into());
        };
        let mut buf = [0u8; 8];
        LittleEndian::write_u64(&mut buf, payload.len() as u64);
        self.stream
            .patch_at(open.header_offset + open.header.payload_len_field(), &buf)?;
        self.stream.flush()?;
        Ok(self.stream)
    }
}

#[cfg(test)]
mod testing {
    use std::io::Cursor;

    use super::*;
    use crate::stream::Appender;

    #[test]
    fn test_nested_begin_fails() -> Result<()> {
        let mut writer = FrameWriter::new(Appender::new(Cursor::new(Vec::new()))?);
        writer.begin_chunk(".ptab")?;
        assert!(writer.begin_chunk(".stab").is_err());
        writer.end_chunk()?;
        assert!(writer.end_chunk().is_err());
        assert!(writer.append(b"x").is_err());
        Ok(())
    }

    #[test]
    fn test_finish_with_open_chunk_fails() -> Result<()> {
        let mut writer = FrameWriter::new(Appender::new(Cursor::new(Vec::new()))?);
        writer.begin_chunk(".ptab")?;
        assert!(writer.finish().is_err());
        Ok(())
    }

    #[test]
    fn test_streamed_length() -> Result<()> {
        let mut writer = FrameWriter::new(Appender::new(Cursor::new(Vec::new()))?);
        let start = writer.begin_chunk(".ptab")?;
        writer.append(&[1, 2, 3])?;
        writer.append(&[4, 5])?;
        writer.patch(0, &[9])?;
        let entry = writer.end_chunk()?;
        assert_eq!(entry.offset, start);
        assert_eq!(entry.len, 5);

        let bytes = writer.finish()?.into_inner().into_inner();
        assert_eq!(&bytes[start as usize..start as usize + 5], &[9, 2, 3, 4, 5]);
        Ok(())
    }
}
