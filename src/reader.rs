use std::path::Path;
use std::sync::{Arc, OnceLock};

use crate::error::{Result, TaskError};
use crate::frame::{FrameReader, SFI_CHUNK};
use crate::index::{IndexKind, IndexResult, SfiIndex};
use crate::interval::Interval;
use crate::metadata::{ChromPos, Metadata};
use crate::stream::{ByteStream, MmapStream};
use crate::task::{self, PartitionTask, TaskDesc, TaskMode, TaskOutcome};
use crate::track::TrackReader;

/// Random-access reader of a finalized D4 file
///
/// The reader keeps a `(chromosome, offset)` cursor. Value and interval reads start at
/// the cursor, advance it, and stop at the end of the current chromosome. Moving on to
/// the next chromosome takes an explicit [`D4Reader::seek`].
pub struct D4Reader {
    frame: FrameReader,
    track: Arc<TrackReader>,
    cursor: ChromPos,

    /// Summary index, parsed on first use
    sfi: OnceLock<SfiIndex>,
}
impl D4Reader {
    /// Opens a local file
    ///
    /// # Errors
    ///
    /// * [`crate::error::ReadError::BadPath`] if the path is not a regular file
    /// * a `Corrupt` error if the file is not a finalized D4 container
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let stream = MmapStream::open(path)?;
        Self::from_stream(Arc::new(stream))
    }

    /// Opens a remote file through HTTP range requests
    #[cfg(feature = "http")]
    pub fn open_url(url: &str) -> Result<Self> {
        let stream = crate::stream::HttpStream::open(url)?;
        Self::from_stream(Arc::new(stream))
    }

    /// Opens a file from any byte stream
    pub fn from_stream(stream: Arc<dyn ByteStream>) -> Result<Self> {
        let frame = FrameReader::open(stream)?;
        let track = Arc::new(TrackReader::open(&frame)?);
        Ok(Self {
            frame,
            track,
            cursor: ChromPos::default(),
            sfi: OnceLock::new(),
        })
    }

    /// The parsed container, for inspection
    #[must_use]
    pub fn frame(&self) -> &FrameReader {
        &self.frame
    }

    /// The shared decoder
    #[must_use]
    pub fn track(&self) -> &Arc<TrackReader> {
        &self.track
    }

    /// Returns a copy of the file metadata
    #[must_use]
    pub fn load_metadata(&self) -> Metadata {
        self.track.metadata().clone()
    }

    #[must_use]
    pub fn metadata(&self) -> &Metadata {
        self.track.metadata()
    }

    /// Current cursor as `(chromosome name, offset)`
    #[must_use]
    pub fn tell(&self) -> (&str, u32) {
        let chrom = &self.metadata().chroms()[self.cursor.chrom];
        (chrom.name.as_str(), self.cursor.offset)
    }

    /// Moves the cursor anywhere within the file
    ///
    /// `pos` may equal the chromosome size.
    pub fn seek(&mut self, chrom: &str, pos: u32) -> Result<()> {
        let metadata = self.track.metadata();
        let target = ChromPos::new(metadata.chrom_index(chrom)?, pos);
        metadata.to_virtual(target)?;
        self.cursor = target;
        Ok(())
    }

    /// Reads values at the cursor and advances it
    ///
    /// Returns the number of values read, 0 at the end of the chromosome.
    pub fn read_values(&mut self, buf: &mut [i32]) -> Result<usize> {
        let n = self
            .track
            .read_values(self.cursor.chrom, self.cursor.offset, buf)?;
        self.cursor.offset += n as u32;
        Ok(n)
    }

    /// Reads values divided by the denominator
    pub fn read_real_values(&mut self, buf: &mut [f64]) -> Result<usize> {
        let mut values = vec![0i32; buf.len()];
        let n = self.read_values(&mut values)?;
        let denominator = self.metadata().denominator();
        for (out, &v) in buf.iter_mut().zip(&values[..n]) {
            *out = f64::from(v) / denominator;
        }
        Ok(n)
    }

    /// Reads runs of equal values at the cursor
    ///
    /// The cursor advances to the end of the last returned run.
    pub fn read_intervals(&mut self, buf: &mut [Interval]) -> Result<usize> {
        let n = self
            .track
            .read_intervals(self.cursor.chrom, self.cursor.offset, buf)?;
        if n > 0 {
            self.cursor.offset = buf[n - 1].right;
        }
        Ok(n)
    }

    /// Checks if the file carries an index of the given kind
    #[must_use]
    pub fn index_check(&self, kind: IndexKind) -> bool {
        match kind {
            IndexKind::Sum => self.frame.has_chunk(SFI_CHUNK),
        }
    }

    fn sfi(&self) -> Result<&SfiIndex> {
        if let Some(index) = self.sfi.get() {
            return Ok(index);
        }
        let index = SfiIndex::load(&self.frame, self.metadata())?;
        Ok(self.sfi.get_or_init(|| index))
    }

    /// Answers an aggregate over `[start, end)` of a chromosome from the index
    ///
    /// # Errors
    ///
    /// * [`crate::error::IndexError::Missing`] if the file has no such index
    /// * [`crate::error::IndexError::InvalidRange`] for an inverted range or one past the
    ///   chromosome end
    pub fn index_query(
        &self,
        kind: IndexKind,
        chrom: &str,
        start: u32,
        end: u32,
    ) -> Result<IndexResult> {
        let chrom = self.metadata().chrom_index(chrom)?;
        match kind {
            IndexKind::Sum => {
                let sum = self.sfi()?.query_sum(&self.track, chrom, start, end)?;
                Ok(IndexResult::Sum(sum))
            }
        }
    }

    /// Runs a partitioned read task over the whole file
    pub fn run_task<T: PartitionTask>(
        &self,
        task: &T,
        desc: &TaskDesc,
    ) -> Result<TaskOutcome<T::Output>> {
        if desc.mode != TaskMode::Read {
            return Err(TaskError::ModeMismatch("write").into());
        }
        task::run_read_task(&self.track, task, desc)
    }
}
