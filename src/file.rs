use std::fs::File;
use std::path::Path;

use crate::error::{ReadError, Result, WriteError};
use crate::index::{IndexKind, IndexResult};
use crate::interval::Interval;
use crate::metadata::Metadata;
use crate::policy::SpillPolicy;
use crate::reader::D4Reader;
use crate::task::{PartitionTask, TaskDesc, TaskOutcome};
use crate::writer::{create_file, D4Writer, SeekOutcome};

/// A D4 file opened by mode
///
/// Wraps either a [`D4Reader`] or a [`D4Writer`] behind one set of operations. Calling a
/// reader-only operation on a writer fails with [`ReadError::NotReadable`] and the other
/// way around with [`WriteError::NotWritable`].
pub enum D4File {
    Reader(D4Reader),
    Writer(D4Writer<File>),
}
impl D4File {
    /// Opens `path` for reading (`"r"`) or writing (`"w"`)
    ///
    /// A file opened for writing has no chromosomes until
    /// [`D4File::update_metadata`] is called.
    pub fn open<P: AsRef<Path>>(path: P, mode: &str) -> Result<Self> {
        match mode {
            "r" => Ok(Self::Reader(D4Reader::open(path)?)),
            "w" => {
                let file = create_file(path.as_ref())?;
                Ok(Self::Writer(D4Writer::new(file, None, SpillPolicy::default())?))
            }
            _ => Err(ReadError::BadMode(mode.to_string()).into()),
        }
    }

    #[must_use]
    pub fn is_reader(&self) -> bool {
        matches!(self, Self::Reader(_))
    }

    fn reader(&mut self) -> Result<&mut D4Reader> {
        match self {
            Self::Reader(r) => Ok(r),
            Self::Writer(_) => Err(ReadError::NotReadable.into()),
        }
    }

    fn writer(&mut self) -> Result<&mut D4Writer<File>> {
        match self {
            Self::Writer(w) => Ok(w),
            Self::Reader(_) => Err(WriteError::NotWritable.into()),
        }
    }

    /// Returns a copy of the metadata
    pub fn load_metadata(&self) -> Result<Metadata> {
        match self {
            Self::Reader(r) => Ok(r.load_metadata()),
            Self::Writer(w) => w.load_metadata(),
        }
    }

    pub fn update_metadata(&mut self, metadata: Metadata) -> Result<()> {
        self.writer()?.update_metadata(metadata)
    }

    pub fn tell(&self) -> Result<(&str, u32)> {
        match self {
            Self::Reader(r) => Ok(r.tell()),
            Self::Writer(w) => w.tell(),
        }
    }

    /// Moves the cursor, see [`D4Reader::seek`] and [`D4Writer::seek`]
    pub fn seek(&mut self, chrom: &str, pos: u32) -> Result<SeekOutcome> {
        match self {
            Self::Reader(r) => r.seek(chrom, pos).map(|()| SeekOutcome::Moved),
            Self::Writer(w) => w.seek(chrom, pos),
        }
    }

    pub fn read_values(&mut self, buf: &mut [i32]) -> Result<usize> {
        self.reader()?.read_values(buf)
    }

    pub fn read_intervals(&mut self, buf: &mut [Interval]) -> Result<usize> {
        self.reader()?.read_intervals(buf)
    }

    pub fn write_values(&mut self, values: &[i32]) -> Result<usize> {
        self.writer()?.write_values(values)
    }

    pub fn write_intervals(&mut self, intervals: &[Interval]) -> Result<usize> {
        self.writer()?.write_intervals(intervals)
    }

    /// Checks for an index, always false for writers
    #[must_use]
    pub fn index_check(&self, kind: IndexKind) -> bool {
        match self {
            Self::Reader(r) => r.index_check(kind),
            Self::Writer(_) => false,
        }
    }

    pub fn index_query(
        &mut self,
        kind: IndexKind,
        chrom: &str,
        start: u32,
        end: u32,
    ) -> Result<IndexResult> {
        self.reader()?.index_query(kind, chrom, start, end)
    }

    /// Runs a partitioned task in the mode matching the handle
    pub fn run_task<T: PartitionTask>(
        &mut self,
        task: &T,
        desc: &TaskDesc,
    ) -> Result<TaskOutcome<T::Output>> {
        match self {
            Self::Reader(r) => r.run_task(task, desc),
            Self::Writer(w) => w.run_task(task, desc),
        }
    }

    /// Releases the handle, finalizing the file for writers
    pub fn close(self) -> Result<()> {
        match self {
            Self::Reader(_) => Ok(()),
            Self::Writer(mut w) => w.close(),
        }
    }
}
