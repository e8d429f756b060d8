use std::sync::Arc;

use super::{ChunkHeader, DirEntry, Directory, ResumePoint, DIRECTORY_CHUNK};
use crate::error::{FrameError, Result};
use crate::stream::ByteStream;

/// One chunk found while walking the container chain
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkInfo {
    /// Parsed chunk header
    pub header: ChunkHeader,

    /// Absolute offset of the chunk header
    pub header_offset: u64,

    /// Absolute offset of the chunk payload
    pub payload_offset: u64,
}

/// Parses the chunk chain of a finalized container
///
/// Opening walks every chunk header once, following `next_offset` links from the start
/// of the stream. The last directory chunk in the chain is authoritative.
pub struct FrameReader {
    stream: Arc<dyn ByteStream>,
    chunks: Vec<ChunkInfo>,
    directory: Directory,
}
impl FrameReader {
    /// Walks the chunk chain and loads the directory
    ///
    /// # Errors
    ///
    /// * [`FrameError::UnfinishedChunk`] if a chunk was never closed
    /// * [`FrameError::MissingDirectory`] if the file was never finalized
    /// * [`FrameError::InvalidChain`] and [`FrameError::EntryOutOfRange`] for offsets
    ///   that point outside of the file or backwards
    pub fn open(stream: Arc<dyn ByteStream>) -> Result<Self> {
        let size = stream.len();
        if size == 0 {
            return Err(FrameError::MissingDirectory.into());
        }

        let mut chunks = Vec::new();
        let mut directory = None;
        let mut offset = 0;
        loop {
            let header = ChunkHeader::read_from(stream.as_ref(), offset)?;
            if header.is_streaming() {
                return Err(FrameError::UnfinishedChunk(header.name).into());
            }
            let payload_offset = offset + header.size();
            let payload_end = payload_offset
                .checked_add(header.payload_len)
                .filter(|&end| end <= size)
                .ok_or_else(|| FrameError::EntryOutOfRange {
                    name: header.name.clone(),
                    offset: payload_offset,
                    len: header.payload_len,
                    size,
                })?;

            if header.name == DIRECTORY_CHUNK {
                let payload = stream.read_vec(payload_offset, header.payload_len as usize)?;
                directory = Some(Directory::from_bytes(&payload)?);
            }

            let next = header.next_offset;
            chunks.push(ChunkInfo {
                header,
                header_offset: offset,
                payload_offset,
            });
            if next == 0 {
                break;
            }
            if next < payload_end || next >= size {
                return Err(FrameError::InvalidChain { offset, next }.into());
            }
            offset = next;
        }

        let directory = directory.ok_or(FrameError::MissingDirectory)?;
        for entry in directory.entries() {
            if entry.offset.saturating_add(entry.len) > size {
                return Err(FrameError::EntryOutOfRange {
                    name: entry.name.clone(),
                    offset: entry.offset,
                    len: entry.len,
                    size,
                }
                .into());
            }
        }
        tracing::debug!(
            "parsed {} chunks, {} directory entries",
            chunks.len(),
            directory.entries().len()
        );

        Ok(Self {
            stream,
            chunks,
            directory,
        })
    }

    /// The underlying byte stream
    #[must_use]
    pub fn stream(&self) -> &Arc<dyn ByteStream> {
        &self.stream
    }

    /// All chunks in chain order, including superseded directories
    #[must_use]
    pub fn chunks(&self) -> &[ChunkInfo] {
        &self.chunks
    }

    /// The authoritative directory
    #[must_use]
    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    /// Checks if a chunk is listed in the directory
    #[must_use]
    pub fn has_chunk(&self, name: &str) -> bool {
        self.directory.get(name).is_some()
    }

    /// Looks up a chunk payload location
    pub fn chunk(&self, name: &str) -> Result<&DirEntry> {
        self.directory
            .get(name)
            .ok_or_else(|| FrameError::MissingChunk(name.to_string()).into())
    }

    /// Reads a whole chunk payload
    pub fn read_chunk(&self, name: &str) -> Result<Vec<u8>> {
        let entry = self.chunk(name)?;
        self.stream.read_vec(entry.offset, entry.len as usize)
    }

    /// Where a [`super::FrameWriter`] may continue this container
    #[must_use]
    pub fn resume_point(&self) -> ResumePoint {
        // The chain always holds at least the directory chunk
        let link_field = self
            .chunks
            .last()
            .map_or(0, |c| c.header_offset + c.header.next_offset_field());
        ResumePoint {
            directory: self.directory.clone(),
            link_field,
        }
    }
}
