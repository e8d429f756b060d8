use std::fmt;

/// Custom Result type for d4 operations, wrapping the custom [`Error`] type
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for the d4 library, encompassing all possible error cases
/// that can occur while framing, encoding, decoding, or scheduling work over a D4 file.
#[derive(thiserror::Error, Debug)]
#[error(transparent)]
pub enum Error {
    /// Errors related to the chunked container layout
    FrameError(#[from] FrameError),

    /// Errors related to the file metadata descriptor
    MetadataError(#[from] MetadataError),

    /// Errors related to the value dictionary
    DictError(#[from] DictError),

    /// Errors that occur during read operations
    ReadError(#[from] ReadError),

    /// Errors that occur during write operations
    WriteError(#[from] WriteError),

    /// Errors related to the summary index
    IndexError(#[from] IndexError),

    /// Errors raised by the partition scheduler
    TaskError(#[from] TaskError),

    /// Standard I/O errors
    IoError(#[from] std::io::Error),

    /// Malformed JSON in the metadata chunk
    JsonError(#[from] serde_json::Error),

    /// UTF-8 conversion errors
    Utf8Error(#[from] std::str::Utf8Error),

    /// Transport errors from the remote byte stream
    #[cfg(feature = "http")]
    HttpError(#[from] reqwest::Error),

    /// Errors raised from user task code
    AnyhowError(#[from] anyhow::Error),
}
impl Error {
    /// Classifies the error into one of the coarse kinds exposed by the error surface
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::FrameError(e) => e.kind(),
            Self::MetadataError(e) => e.kind(),
            Self::DictError(e) => e.kind(),
            Self::ReadError(e) => e.kind(),
            Self::WriteError(e) => e.kind(),
            Self::IndexError(e) => e.kind(),
            Self::TaskError(e) => e.kind(),
            Self::IoError(_) => ErrorKind::Io,
            #[cfg(feature = "http")]
            Self::HttpError(_) => ErrorKind::Io,
            Self::JsonError(_) | Self::Utf8Error(_) => ErrorKind::Corrupt,
            Self::AnyhowError(_) => ErrorKind::Internal,
        }
    }

    /// Checks if the error signals a damaged or unfinished file
    #[must_use]
    pub fn is_corrupt(&self) -> bool {
        self.kind() == ErrorKind::Corrupt
    }
}

/// Coarse error classes shared by every failure in the library
///
/// The numeric code of each kind is stable and is what [`crate::last_error::error_num`]
/// reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Io,
    BadPath,
    BadMode,
    Corrupt,
    OutOfBounds,
    BackwardSeek,
    MetadataFrozen,
    DictMismatch,
    NoSuchChromosome,
    UnsupportedIndex,
    Cancelled,
    Internal,
}
impl ErrorKind {
    /// Stable positive error number
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            Self::Io => 1,
            Self::BadPath => 2,
            Self::BadMode => 3,
            Self::Corrupt => 4,
            Self::OutOfBounds => 5,
            Self::BackwardSeek => 6,
            Self::MetadataFrozen => 7,
            Self::DictMismatch => 8,
            Self::NoSuchChromosome => 9,
            Self::UnsupportedIndex => 10,
            Self::Cancelled => 11,
            Self::Internal => 12,
        }
    }
}
impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Io => "IO",
            Self::BadPath => "BadPath",
            Self::BadMode => "BadMode",
            Self::Corrupt => "Corrupt",
            Self::OutOfBounds => "OutOfBounds",
            Self::BackwardSeek => "BackwardSeek",
            Self::MetadataFrozen => "MetadataFrozen",
            Self::DictMismatch => "DictMismatch",
            Self::NoSuchChromosome => "NoSuchChromosome",
            Self::UnsupportedIndex => "UnsupportedIndex",
            Self::Cancelled => "Cancelled",
            Self::Internal => "Internal",
        };
        f.write_str(name)
    }
}

/// Errors specific to the chunk container
#[derive(thiserror::Error, Debug)]
pub enum FrameError {
    /// The magic bytes of a chunk header do not match
    ///
    /// # Arguments
    /// * `u64` - The byte offset of the offending chunk header
    #[error("Invalid chunk magic at offset {0}")]
    InvalidMagic(u64),

    /// A chunk name is too long to be encoded in a `u16` length prefix
    #[error("Chunk name is too long ({0} bytes)")]
    NameTooLong(usize),

    /// The chunk chain points outside of the file or loops
    #[error("Invalid next-chunk offset {next} after chunk at {offset}")]
    InvalidChain { offset: u64, next: u64 },

    /// No directory chunk was found, the file was never finalized
    #[error("Missing chunk directory - the file was not finalized")]
    MissingDirectory,

    /// A streaming chunk was never closed
    #[error("Chunk {0} has no recorded length - the file was not finalized")]
    UnfinishedChunk(String),

    /// A named chunk is absent from the directory
    #[error("Missing chunk: {0}")]
    MissingChunk(String),

    /// A directory entry points outside of the file
    #[error("Directory entry {name} ({offset}+{len}) exceeds the file size ({size})")]
    EntryOutOfRange {
        name: String,
        offset: u64,
        len: u64,
        size: u64,
    },

    /// Attempted to stream into a chunk while another one is open
    #[error("Chunk {0} is still open")]
    ChunkStillOpen(String),

    /// Attempted to append to a chunk that has not been opened
    #[error("No chunk is open for streaming")]
    NoOpenChunk,
}
impl FrameError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::NameTooLong(_) | Self::ChunkStillOpen(_) | Self::NoOpenChunk => {
                ErrorKind::Internal
            }
            _ => ErrorKind::Corrupt,
        }
    }
}

/// Errors specific to the metadata descriptor
#[derive(thiserror::Error, Debug)]
pub enum MetadataError {
    /// Two chromosomes share a name
    #[error("Duplicate chromosome name: {0}")]
    DuplicateChrom(String),

    /// A chromosome has a zero length
    #[error("Chromosome {0} has zero length")]
    EmptyChrom(String),

    /// No chromosome has been declared
    #[error("No chromosomes are defined")]
    NoChroms,

    /// The denominator is negative or not a finite number
    #[error("Invalid denominator: {0}")]
    InvalidDenominator(f64),

    /// The metadata format version is not understood
    #[error("Unsupported metadata version: {0}")]
    UnsupportedVersion(u32),

    /// A lookup by chromosome name failed
    #[error("No such chromosome: {0}")]
    NoSuchChrom(String),
}
impl MetadataError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::NoSuchChrom(_) => ErrorKind::NoSuchChromosome,
            Self::UnsupportedVersion(_) => ErrorKind::Corrupt,
            _ => ErrorKind::Internal,
        }
    }
}

/// Errors specific to the value dictionary
#[derive(thiserror::Error, Debug)]
pub enum DictError {
    /// A simple range must hold at least one value
    #[error("Invalid dictionary range [{low}, {high})")]
    EmptyRange { low: i32, high: i32 },

    /// A value map must hold at least one value
    #[error("The value map is empty")]
    EmptyValueMap,

    /// A value occurs more than once in a value map
    #[error("Duplicate value {0} in the value map")]
    DuplicateValue(i32),

    /// The code width needed by the dictionary exceeds the supported maximum
    #[error("Code width of {0} bits exceeds the maximum of 16")]
    WidthTooLarge(u32),

    /// A dictionary file line is not an integer
    #[error("Invalid dictionary value: {0}")]
    InvalidValue(String),

    /// A value cannot be represented and the writer refuses to spill it
    #[error("Value {0} is not representable by the dictionary")]
    Unrepresentable(i32),
}
impl DictError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Unrepresentable(_) => ErrorKind::DictMismatch,
            _ => ErrorKind::Internal,
        }
    }
}

/// Errors that can occur while reading D4 data
#[derive(thiserror::Error, Debug)]
pub enum ReadError {
    /// The path does not exist or is not a regular file
    #[error("Cannot open {0} for reading")]
    BadPath(String),

    /// The file mode string is not understood
    #[error("Invalid file mode: {0}")]
    BadMode(String),

    /// A positioned read went past the end of the stream
    ///
    /// # Fields
    /// * `offset` - The requested start offset
    /// * `len` - The number of requested bytes
    /// * `size` - The size of the stream
    #[error("Read of {len} bytes at offset {offset} exceeds the stream size ({size})")]
    Bounds { offset: u64, len: usize, size: u64 },

    /// A position lies outside of its chromosome
    #[error("Position {pos} is out of range for {chrom} (size {size})")]
    OutOfRange { chrom: String, pos: u64, size: u64 },

    /// An escaped primary code has no matching secondary record
    #[error("Missing secondary record at virtual position {0}")]
    MissingSecondary(u64),

    /// A primary code is neither a value nor the escape code
    #[error("Invalid primary code {code} at virtual position {pos}")]
    InvalidCode { code: u32, pos: u64 },

    /// The primary table size does not match the chromosome list
    #[error("Primary table holds {got} bytes, expected {expected}")]
    PrimarySizeMismatch { expected: u64, got: u64 },

    /// The secondary table length is not a multiple of the record size
    #[error("Secondary table length {0} is not a multiple of the record size")]
    SecondaryTruncated(u64),

    /// Secondary records are not strictly increasing
    #[error("Secondary records are out of order at virtual position {0}")]
    SecondaryUnordered(u64),

    /// The operation needs a reader handle
    #[error("The handle is not open for reading")]
    NotReadable,
}
impl ReadError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::BadPath(_) => ErrorKind::BadPath,
            Self::BadMode(_) | Self::NotReadable => ErrorKind::BadMode,
            Self::Bounds { .. } | Self::OutOfRange { .. } => ErrorKind::OutOfBounds,
            _ => ErrorKind::Corrupt,
        }
    }
}

/// Errors that can occur while writing D4 data
#[derive(thiserror::Error, Debug)]
pub enum WriteError {
    /// Metadata may only change before the first sample is written
    #[error("Metadata cannot be updated after data has been written")]
    MetadataFrozen,

    /// A write or interval starts before the current write position
    #[error("Backward write to virtual position {target} (write position is {current})")]
    BackwardWrite { target: u64, current: u64 },

    /// Intervals handed to the writer must be non-empty
    #[error("Invalid interval [{left}, {right})")]
    InvalidInterval { left: u32, right: u32 },

    /// A write goes past the end of its chromosome
    #[error("Write to {chrom}:{pos} exceeds the chromosome size ({size})")]
    PastChromEnd { chrom: String, pos: u64, size: u64 },

    /// The handle has already been closed
    #[error("The writer has already been closed")]
    Closed,

    /// The operation needs a writer handle
    #[error("The handle is not open for writing")]
    NotWritable,

    /// Attempted to build a writer without chromosomes
    #[error("Missing chromosome list in writer builder")]
    MissingChroms,

    /// Partitioned writes require a writer that has not received data
    #[error("A write task needs a fresh writer, {0} samples were already written")]
    TaskAfterData(u64),
}
impl WriteError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::MetadataFrozen => ErrorKind::MetadataFrozen,
            Self::BackwardWrite { .. } | Self::TaskAfterData(_) => ErrorKind::BackwardSeek,
            Self::InvalidInterval { .. } | Self::PastChromEnd { .. } => ErrorKind::OutOfBounds,
            Self::Closed | Self::NotWritable => ErrorKind::BadMode,
            Self::MissingChroms => ErrorKind::Internal,
        }
    }
}

/// Errors related to the summary index
#[derive(thiserror::Error, Debug)]
pub enum IndexError {
    /// The requested index kind is not stored in the file
    #[error("The file has no {0} index")]
    Missing(&'static str),

    /// The index payload cannot be parsed
    #[error("Malformed index: {0}")]
    Malformed(String),

    /// A bucket count disagrees with the chromosome layout
    #[error("Bucket {bucket} of chromosome {chrom} has count {got}, expected {expected}")]
    BucketMismatch {
        chrom: usize,
        bucket: usize,
        expected: u32,
        got: u32,
    },

    /// The query range is empty or inverted
    #[error("Invalid query range [{start}, {end})")]
    InvalidRange { start: u32, end: u32 },
}
impl IndexError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Missing(_) => ErrorKind::UnsupportedIndex,
            Self::InvalidRange { .. } => ErrorKind::OutOfBounds,
            _ => ErrorKind::Corrupt,
        }
    }
}

/// Errors raised by the partition scheduler
#[derive(thiserror::Error, Debug)]
pub enum TaskError {
    /// The partition size limit must be positive
    #[error("Partition size limit must be greater than zero")]
    InvalidPartSize,

    /// The task mode does not match the handle it runs on
    #[error("Task mode {0} does not match the file handle")]
    ModeMismatch(&'static str),

    /// A task region is empty or extends past its chromosome
    #[error("Invalid task region {chrom}:{start}-{end}")]
    InvalidRegion { chrom: String, start: u32, end: u32 },

    /// Write tasks always cover every chromosome in full
    #[error("Write tasks cannot be restricted to regions")]
    RegionsInWriteTask,

    /// A write was issued outside of the partition range
    #[error("Offset {offset} is outside of the partition range [{start}, {end})")]
    OutsidePartition { offset: u32, start: u32, end: u32 },

    /// The partition was not executed because the task was cancelled
    #[error("The partition was skipped after cancellation")]
    Cancelled,

    /// A worker thread panicked
    #[error("A worker thread panicked")]
    WorkerPanic,
}
impl TaskError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidPartSize => ErrorKind::Internal,
            Self::ModeMismatch(_) | Self::RegionsInWriteTask => ErrorKind::BadMode,
            Self::OutsidePartition { .. } | Self::InvalidRegion { .. } => ErrorKind::OutOfBounds,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::WorkerPanic => ErrorKind::Internal,
        }
    }
}
