use byteorder::{ByteOrder, LittleEndian};

use crate::error::{FrameError, Result};

/// Name of the directory chunk
pub const DIRECTORY_CHUNK: &str = ".dir";

/// Location of one chunk payload
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    /// Chunk name
    pub name: String,

    /// Absolute offset of the payload
    pub offset: u64,

    /// Payload length in bytes
    pub len: u64,
}

/// Table of chunk payload locations written at the end of a file
///
/// Payload layout: `entry_count: u32`, then per entry
/// `name_len: u16 | name | payload_offset: u64 | payload_len: u64`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Directory {
    entries: Vec<DirEntry>,
}
impl Directory {
    #[must_use]
    pub fn new(entries: Vec<DirEntry>) -> Self {
        Self { entries }
    }

    /// Looks up a chunk by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&DirEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Inserts an entry, replacing any entry with the same name
    pub fn insert(&mut self, entry: DirEntry) {
        self.entries.retain(|e| e.name != entry.name);
        self.entries.push(entry);
    }

    #[must_use]
    pub fn entries(&self) -> &[DirEntry] {
        &self.entries
    }

    #[must_use]
    pub fn into_entries(self) -> Vec<DirEntry> {
        self.entries
    }

    /// Encodes the directory payload
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut scratch = [0u8; 8];

        LittleEndian::write_u32(&mut scratch, self.entries.len() as u32);
        buf.extend_from_slice(&scratch[..4]);
        for entry in &self.entries {
            LittleEndian::write_u16(&mut scratch, entry.name.len() as u16);
            buf.extend_from_slice(&scratch[..2]);
            buf.extend_from_slice(entry.name.as_bytes());
            LittleEndian::write_u64(&mut scratch, entry.offset);
            buf.extend_from_slice(&scratch);
            LittleEndian::write_u64(&mut scratch, entry.len);
            buf.extend_from_slice(&scratch);
        }
        buf
    }

    /// Decodes a directory payload
    pub fn from_bytes(buffer: &[u8]) -> Result<Self> {
        let malformed = || FrameError::MissingChunk(format!("{DIRECTORY_CHUNK} (truncated)"));

        if buffer.len() < 4 {
            return Err(malformed().into());
        }
        let count = LittleEndian::read_u32(&buffer[..4]) as usize;
        let mut pos = 4;
        let mut entries = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            if pos + 2 > buffer.len() {
                return Err(malformed().into());
            }
            let name_len = usize::from(LittleEndian::read_u16(&buffer[pos..]));
            pos += 2;
            if pos + name_len + 16 > buffer.len() {
                return Err(malformed().into());
            }
            let name = std::str::from_utf8(&buffer[pos..pos + name_len])?.to_string();
            pos += name_len;
            let offset = LittleEndian::read_u64(&buffer[pos..]);
            let len = LittleEndian::read_u64(&buffer[pos + 8..]);
            pos += 16;
            entries.push(DirEntry { name, offset, len });
        }
        Ok(Self { entries })
    }
}

#[cfg(test)]
mod testing {
    use super::*;

    #[test]
    fn test_directory_bytes() -> Result<()> {
        let mut dir = Directory::default();
        dir.insert(DirEntry {
            name: ".metadata".into(),
            offset: 40,
            len: 120,
        });
        dir.insert(DirEntry {
            name: ".ptab".into(),
            offset: 192,
            len: 5000,
        });

        let bytes = dir.to_bytes();
        assert_eq!(bytes.len(), 4 + (2 + 9 + 16) + (2 + 5 + 16));
        let parsed = Directory::from_bytes(&bytes)?;
        assert_eq!(parsed, dir);
        assert_eq!(parsed.get(".ptab").map(|e| e.len), Some(5000));
        assert!(parsed.get(".sfi").is_none());
        Ok(())
    }

    #[test]
    fn test_insert_replaces() {
        let mut dir = Directory::default();
        dir.insert(DirEntry {
            name: ".sfi".into(),
            offset: 10,
            len: 1,
        });
        dir.insert(DirEntry {
            name: ".sfi".into(),
            offset: 20,
            len: 2,
        });
        assert_eq!(dir.entries().len(), 1);
        assert_eq!(dir.get(".sfi").map(|e| e.offset), Some(20));
    }

    #[test]
    fn test_truncated_directory() {
        let dir = Directory::new(vec![DirEntry {
            name: ".stab".into(),
            offset: 1,
            len: 2,
        }]);
        let bytes = dir.to_bytes();
        assert!(Directory::from_bytes(&bytes[..bytes.len() - 3]).is_err());
    }
}
