//! # Container framing
//!
//! A D4 file is a flat chain of named chunks. Each chunk header records the payload
//! length and the absolute offset of the next header, so the chain can be walked without
//! parsing payloads. A `.dir` chunk at the end lists `(name, offset, length)` for every
//! payload, giving one-seek access to any logical stream.
//!
//! Chunks written by the engine:
//!
//! | Name        | Payload                                   |
//! |-------------|-------------------------------------------|
//! | `.metadata` | JSON descriptor (chromosomes, dictionary) |
//! | `.ptab`     | bit-packed primary codes                  |
//! | `.stab`     | secondary `(virtual_pos, value)` records  |
//! | `.sfi`      | fixed-interval summary index (optional)   |
//! | `.dir`      | chunk directory                           |

mod directory;
mod header;
mod reader;
mod writer;

pub use directory::{DirEntry, Directory, DIRECTORY_CHUNK};
pub use header::{ChunkHeader, CHUNK_MAGIC, STREAMING_LEN};
pub use reader::{ChunkInfo, FrameReader};
pub use writer::{FrameWriter, ResumePoint};

/// Chunk holding the JSON metadata descriptor
pub const METADATA_CHUNK: &str = ".metadata";

/// Chunk holding the primary table
pub const PRIMARY_CHUNK: &str = ".ptab";

/// Chunk holding the secondary table
pub const SECONDARY_CHUNK: &str = ".stab";

/// Chunk holding the fixed-interval summary index
pub const SFI_CHUNK: &str = ".sfi";

/// Reserved name for a stored histogram
pub const HISTOGRAM_CHUNK: &str = ".hist";
