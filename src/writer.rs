use std::fs::File;
use std::io::{self, Seek, Write};
use std::path::Path;

use crate::dict::Dictionary;
use crate::error::{ReadError, Result, WriteError};
use crate::frame::{FrameWriter, METADATA_CHUNK, PRIMARY_CHUNK, SECONDARY_CHUNK};
use crate::interval::Interval;
use crate::metadata::{Chrom, ChromPos, Metadata, VirtualPos};
use crate::policy::SpillPolicy;
use crate::ptab::BitPacker;
use crate::stab::{encode_records, SecondaryRecord};
use crate::stream::{AppendStream, Appender};
use crate::task::{self, PartitionTask, TaskDesc, TaskMode, TaskOutcome};

/// Packed primary bytes are handed to the container once this many are pending
const FLUSH_THRESHOLD: usize = 1 << 20;

/// Lifecycle of a writer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    /// Metadata may still change, nothing has been written
    Configured,

    /// Sample data is being written, metadata is frozen
    Streaming,

    /// The container has been finalized
    Closed,
}

/// Result of a writer seek
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekOutcome {
    /// The cursor now points at the requested position
    Moved,

    /// The target lies before the write position, which is left unchanged
    Refused {
        /// Current write position
        position: VirtualPos,
    },
}

/// Builder for creating configured `D4Writer` instances
///
/// # Examples
///
/// ```
/// # use d4::{Chrom, D4WriterBuilder, Dictionary, Result};
/// # fn main() -> Result<()> {
/// let mut writer = D4WriterBuilder::default()
///     .chroms(vec![Chrom::new("chr1", 1000)])
///     .dictionary(Dictionary::simple_range(0, 64)?)
///     .build(std::io::Cursor::new(Vec::new()))?;
/// writer.write_values(&[1, 2, 3])?;
/// writer.close()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct D4WriterBuilder {
    /// Ordered chromosome list, may also be supplied later through `update_metadata`
    chroms: Option<Vec<Chrom>>,
    /// Optional dictionary, defaults to `SimpleRange(0, 64)`
    dictionary: Option<Dictionary>,
    /// Optional denominator, defaults to 1
    denominator: Option<f64>,
    /// Optional policy for unrepresentable values
    spill_policy: Option<SpillPolicy>,
}
impl D4WriterBuilder {
    #[must_use]
    pub fn chroms(mut self, chroms: Vec<Chrom>) -> Self {
        self.chroms = Some(chroms);
        self
    }

    #[must_use]
    pub fn dictionary(mut self, dictionary: Dictionary) -> Self {
        self.dictionary = Some(dictionary);
        self
    }

    #[must_use]
    pub fn denominator(mut self, denominator: f64) -> Self {
        self.denominator = Some(denominator);
        self
    }

    #[must_use]
    pub fn spill_policy(mut self, policy: SpillPolicy) -> Self {
        self.spill_policy = Some(policy);
        self
    }

    /// Builds a writer over any seekable sink
    pub fn build<W: Write + Seek>(self, inner: W) -> Result<D4Writer<W>> {
        let metadata = match self.chroms {
            Some(chroms) => {
                let dictionary = match self.dictionary {
                    Some(dict) => dict,
                    None => default_dictionary()?,
                };
                Some(Metadata::new(
                    chroms,
                    dictionary,
                    self.denominator.unwrap_or(1.0),
                )?)
            }
            None => None,
        };
        D4Writer::new(inner, metadata, self.spill_policy.unwrap_or_default())
    }

    /// Creates (or truncates) the file at `path` and builds a writer over it
    pub fn create<P: AsRef<Path>>(self, path: P) -> Result<D4Writer<File>> {
        self.build(create_file(path.as_ref())?)
    }
}

fn default_dictionary() -> Result<Dictionary> {
    Dictionary::simple_range(0, 64)
}

pub(crate) fn create_file(path: &Path) -> Result<File> {
    match File::create(path) {
        Ok(file) => Ok(file),
        Err(e) if matches!(e.kind(), io::ErrorKind::NotFound | io::ErrorKind::IsADirectory) => {
            Err(ReadError::BadPath(path.display().to_string()).into())
        }
        Err(e) => Err(e.into()),
    }
}

/// Forward-only writer of a D4 file
///
/// Values are written at a single write position `W` that only moves forward. Seeking
/// ahead fills the skipped positions with the dictionary default value, seeking behind
/// `W` is refused. The primary table streams into the container as it is written while
/// secondary records are buffered until [`D4Writer::close`].
pub struct D4Writer<W: Write + Seek> {
    /// Output container, `None` once closed
    frame: Option<FrameWriter<Appender<W>>>,

    /// The finalized sink, available after closing
    sink: Option<W>,

    /// File metadata, required before any data is written
    metadata: Option<Metadata>,

    policy: SpillPolicy,
    state: WriterState,

    /// Primary code packer, created when streaming starts
    packer: Option<BitPacker>,

    /// Buffered secondary records
    secondary: Vec<SecondaryRecord>,

    /// Next virtual position to be written
    write_pos: u64,

    /// Chromosome the cursor is labeled with
    chrom: usize,
}
impl<W: Write + Seek> D4Writer<W> {
    /// Creates a writer over `inner`
    ///
    /// For a more convenient way to create a writer, use [`D4WriterBuilder`].
    pub fn new(inner: W, metadata: Option<Metadata>, policy: SpillPolicy) -> Result<Self> {
        Ok(Self {
            frame: Some(FrameWriter::new(Appender::new(inner)?)),
            sink: None,
            metadata,
            policy,
            state: WriterState::Configured,
            packer: None,
            secondary: Vec::new(),
            write_pos: 0,
            chrom: 0,
        })
    }

    #[must_use]
    pub fn state(&self) -> WriterState {
        self.state
    }

    #[must_use]
    pub fn policy(&self) -> SpillPolicy {
        self.policy
    }

    /// Number of samples written so far, including gap fills
    #[must_use]
    pub fn position(&self) -> VirtualPos {
        VirtualPos(self.write_pos)
    }

    /// Number of buffered secondary records
    #[must_use]
    pub fn secondary_len(&self) -> usize {
        self.secondary.len()
    }

    /// Returns a copy of the current metadata
    pub fn load_metadata(&self) -> Result<Metadata> {
        self.metadata().cloned()
    }

    pub(crate) fn metadata(&self) -> Result<&Metadata> {
        self.metadata
            .as_ref()
            .ok_or_else(|| WriteError::MissingChroms.into())
    }

    /// Replaces the metadata
    ///
    /// # Errors
    ///
    /// Returns [`WriteError::MetadataFrozen`] once any sample has been written.
    pub fn update_metadata(&mut self, metadata: Metadata) -> Result<()> {
        match self.state {
            WriterState::Configured => {
                tracing::debug!(
                    "writer metadata set: {} chromosomes",
                    metadata.chroms().len()
                );
                self.metadata = Some(metadata);
                self.chrom = 0;
                Ok(())
            }
            WriterState::Streaming => Err(WriteError::MetadataFrozen.into()),
            WriterState::Closed => Err(WriteError::Closed.into()),
        }
    }

    /// Current cursor as `(chromosome name, offset)`
    pub fn tell(&self) -> Result<(&str, u32)> {
        let metadata = self.metadata()?;
        let (start, _) = metadata.chrom_bounds(self.chrom);
        let name = metadata.chroms()[self.chrom].name.as_str();
        Ok((name, (self.write_pos - start) as u32))
    }

    /// Moves the write position forward
    ///
    /// * A target behind the write position is refused and reported through
    ///   [`SeekOutcome::Refused`], nothing changes.
    /// * A target equal to the write position only relabels the cursor, which moves from
    ///   the end of one chromosome to the start of the next.
    /// * A target ahead fills the skipped positions with the default value.
    pub fn seek(&mut self, chrom: &str, pos: u32) -> Result<SeekOutcome> {
        self.check_open()?;
        let metadata = self.metadata()?;
        let index = metadata.chrom_index(chrom)?;
        let target = metadata.to_virtual(ChromPos::new(index, pos))?.0;

        if target < self.write_pos {
            tracing::warn!(
                "refused backward seek to {chrom}:{pos}, write position is {}",
                self.write_pos
            );
            return Ok(SeekOutcome::Refused {
                position: VirtualPos(self.write_pos),
            });
        }
        if target > self.write_pos {
            self.fill(target - self.write_pos)?;
        }
        self.chrom = index;
        Ok(SeekOutcome::Moved)
    }

    fn check_open(&self) -> Result<()> {
        if self.state == WriterState::Closed {
            return Err(WriteError::Closed.into());
        }
        Ok(())
    }

    /// Writes the metadata chunk and opens the primary table on the first data write
    fn begin_streaming(&mut self) -> Result<()> {
        if self.state != WriterState::Configured {
            return Ok(());
        }
        let metadata = self
            .metadata
            .as_ref()
            .ok_or(WriteError::MissingChroms)?;
        let json = metadata.to_json()?;
        let width = metadata.dictionary().bit_width();

        let frame = self.frame.as_mut().ok_or(WriteError::Closed)?;
        frame.write_chunk(METADATA_CHUNK, &json)?;
        frame.begin_chunk(PRIMARY_CHUNK)?;
        self.packer = Some(BitPacker::new(width));
        self.state = WriterState::Streaming;
        tracing::debug!("writer streaming with {width}-bit codes");
        Ok(())
    }

    /// Hands complete primary bytes to the container
    fn flush_primary(&mut self, force: bool) -> Result<()> {
        let (Some(packer), Some(frame)) = (self.packer.as_mut(), self.frame.as_mut()) else {
            return Ok(());
        };
        if force || packer.pending() >= FLUSH_THRESHOLD {
            let bytes = packer.take_bytes();
            frame.append(&bytes)?;
        }
        Ok(())
    }

    /// Writes `count` default values
    fn fill(&mut self, count: u64) -> Result<()> {
        self.begin_streaming()?;
        let code = self.metadata()?.dictionary().default_code();
        self.push_run(code, count)
    }

    /// Packs `count` copies of `code`
    ///
    /// Long runs are packed in slices of at most [`FLUSH_THRESHOLD`] bytes, each handed to
    /// the container before the next one is packed.
    fn push_run(&mut self, code: u32, mut count: u64) -> Result<()> {
        while count > 0 {
            let packer = self.packer.as_mut().ok_or(WriteError::Closed)?;
            let step = count.min(FLUSH_THRESHOLD as u64 * 8 / u64::from(packer.width()));
            packer.push_repeat(code, step);
            self.write_pos += step;
            count -= step;
            self.flush_primary(false)?;
        }
        Ok(())
    }

    /// Encodes one run of a value
    fn emit(&mut self, value: i32, count: u64) -> Result<()> {
        let (code, escaped) = self.metadata()?.dictionary().encode(value);
        if escaped {
            self.secondary.extend(
                (self.write_pos..self.write_pos + count).map(|p| SecondaryRecord::new(p, value)),
            );
        }
        if count != 1 {
            return self.push_run(code, count);
        }
        let packer = self.packer.as_mut().ok_or(WriteError::Closed)?;
        packer.push(code);
        self.write_pos += count;
        Ok(())
    }

    /// Room left in the labeled chromosome
    fn remaining_in_chrom(&self) -> Result<u64> {
        let (_, end) = self.metadata()?.chrom_bounds(self.chrom);
        Ok(end.saturating_sub(self.write_pos))
    }

    /// Writes values at the cursor
    ///
    /// Writing stops at the end of the current chromosome. Returns the number of values
    /// written, 0 if the cursor already sits at the chromosome end.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::DictError::Unrepresentable`] if the spill policy rejects a
    /// value, in which case nothing is written.
    pub fn write_values(&mut self, values: &[i32]) -> Result<usize> {
        self.check_open()?;
        let count = (values.len() as u64).min(self.remaining_in_chrom()?) as usize;
        if count == 0 {
            return Ok(0);
        }
        let values = &values[..count];
        self.policy
            .check(self.metadata()?.dictionary(), values.iter().copied())?;

        self.begin_streaming()?;
        for &value in values {
            self.emit(value, 1)?;
        }
        self.flush_primary(false)?;
        Ok(count)
    }

    /// Writes runs of values on the current chromosome
    ///
    /// Runs must be non-empty, ascending, non-overlapping and start at or after the
    /// cursor. Gaps are filled with the default value. The batch is validated before
    /// anything is written. Returns the number of intervals written.
    pub fn write_intervals(&mut self, intervals: &[Interval]) -> Result<usize> {
        self.check_open()?;
        if intervals.is_empty() {
            return Ok(0);
        }
        let metadata = self.metadata()?;
        let chrom = &metadata.chroms()[self.chrom];
        let (start, _) = metadata.chrom_bounds(self.chrom);

        let mut cursor = self.write_pos - start;
        for iv in intervals {
            if iv.left >= iv.right {
                return Err(WriteError::InvalidInterval {
                    left: iv.left,
                    right: iv.right,
                }
                .into());
            }
            if u64::from(iv.left) < cursor {
                return Err(WriteError::BackwardWrite {
                    target: start + u64::from(iv.left),
                    current: start + cursor,
                }
                .into());
            }
            if iv.right > chrom.size {
                return Err(WriteError::PastChromEnd {
                    chrom: chrom.name.clone(),
                    pos: u64::from(iv.right),
                    size: u64::from(chrom.size),
                }
                .into());
            }
            cursor = u64::from(iv.right);
        }
        self.policy
            .check(metadata.dictionary(), intervals.iter().map(|iv| iv.value))?;

        self.begin_streaming()?;
        for iv in intervals {
            let left = start + u64::from(iv.left);
            if left > self.write_pos {
                self.fill(left - self.write_pos)?;
            }
            self.emit(iv.value, u64::from(iv.len()))?;
            self.flush_primary(false)?;
        }
        Ok(intervals.len())
    }

    /// Finalizes the file
    ///
    /// The remainder of the genome is filled with the default value, then the primary
    /// table is closed and the secondary table and the directory are written.
    pub fn close(&mut self) -> Result<()> {
        self.check_open()?;
        self.begin_streaming()?;
        let total = self.metadata()?.total_size();
        if total > self.write_pos {
            self.fill(total - self.write_pos)?;
        }

        let tail = self.packer.take().map(BitPacker::finish).unwrap_or_default();
        let mut frame = self.frame.take().ok_or(WriteError::Closed)?;
        frame.append(&tail)?;
        frame.end_chunk()?;
        frame.write_chunk(SECONDARY_CHUNK, &encode_records(&self.secondary))?;
        let stream = frame.finish()?;
        self.state = WriterState::Closed;

        tracing::info!(
            "finalized d4 file: {} bytes, {} samples, {} secondary records",
            stream.position(),
            total,
            self.secondary.len()
        );
        self.secondary = Vec::new();
        self.sink = Some(stream.into_inner());
        Ok(())
    }

    /// Closes the writer if needed and returns the underlying sink
    ///
    /// This is useful to get at the bytes of an in-memory file, such as a
    /// `Cursor<Vec<u8>>`.
    pub fn into_inner(mut self) -> Result<W> {
        if self.state != WriterState::Closed {
            self.close()?;
        }
        self.sink.take().ok_or_else(|| WriteError::Closed.into())
    }

    /// Runs a partitioned write task
    ///
    /// Partition stagings are committed in enumeration order, so the output is identical
    /// to writing the partitions one after another. The writer must not have received
    /// any data before.
    pub fn run_task<T: PartitionTask>(
        &mut self,
        task: &T,
        desc: &TaskDesc,
    ) -> Result<TaskOutcome<T::Output>> {
        self.check_open()?;
        if desc.mode != TaskMode::Write {
            return Err(crate::error::TaskError::ModeMismatch("read").into());
        }
        if self.write_pos != 0 || self.state != WriterState::Configured {
            return Err(WriteError::TaskAfterData(self.write_pos).into());
        }
        task::run_write_task(self, task, desc)
    }
}

impl<W: Write + Seek> Drop for D4Writer<W> {
    fn drop(&mut self) {
        if self.state == WriterState::Closed || self.metadata.is_none() {
            return;
        }
        if let Err(e) = self.close() {
            tracing::error!("failed to finalize d4 file on drop: {e}");
        }
    }
}

#[cfg(test)]
mod testing {
    use std::io::{Cursor, SeekFrom};
    use std::sync::Arc;

    use super::*;
    use crate::error::ErrorKind;
    use crate::reader::D4Reader;

    fn builder() -> Result<D4WriterBuilder> {
        Ok(D4WriterBuilder::default()
            .chroms(vec![Chrom::new("chr1", 100), Chrom::new("chr2", 50)])
            .dictionary(Dictionary::simple_range(0, 4)?))
    }

    fn reopen(writer: D4Writer<Cursor<Vec<u8>>>) -> Result<D4Reader> {
        let bytes = writer.into_inner()?.into_inner();
        D4Reader::from_stream(Arc::new(bytes))
    }

    #[test]
    fn test_state_machine() -> Result<()> {
        let mut writer = builder()?.build(Cursor::new(Vec::new()))?;
        assert_eq!(writer.state(), WriterState::Configured);

        let meta = Metadata::new(
            vec![Chrom::new("chrA", 10)],
            Dictionary::simple_range(0, 2)?,
            1.0,
        )?;
        writer.update_metadata(meta.clone())?;
        assert_eq!(writer.tell()?, ("chrA", 0));

        writer.write_values(&[1])?;
        assert_eq!(writer.state(), WriterState::Streaming);
        let err = writer.update_metadata(meta).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MetadataFrozen);

        writer.close()?;
        assert_eq!(writer.state(), WriterState::Closed);
        assert_eq!(writer.close().unwrap_err().kind(), ErrorKind::BadMode);
        assert_eq!(writer.write_values(&[1]).unwrap_err().kind(), ErrorKind::BadMode);
        Ok(())
    }

    #[test]
    fn test_missing_metadata() -> Result<()> {
        let mut writer = D4WriterBuilder::default().build(Cursor::new(Vec::new()))?;
        assert!(writer.write_values(&[1]).is_err());
        assert!(writer.tell().is_err());
        Ok(())
    }

    #[test]
    fn test_seek_rules() -> Result<()> {
        let mut writer = builder()?.build(Cursor::new(Vec::new()))?;
        writer.write_values(&[1, 2, 3])?;
        assert_eq!(
            writer.seek("chr1", 1)?,
            SeekOutcome::Refused {
                position: VirtualPos(3)
            }
        );
        assert_eq!(writer.tell()?, ("chr1", 3));
        assert_eq!(writer.seek("chr1", 3)?, SeekOutcome::Moved);
        assert_eq!(writer.seek("chr1", 10)?, SeekOutcome::Moved);
        assert_eq!(writer.position(), VirtualPos(10));

        assert_eq!(
            writer.seek("chrX", 0).unwrap_err().kind(),
            ErrorKind::NoSuchChromosome
        );
        assert_eq!(
            writer.seek("chr2", 51).unwrap_err().kind(),
            ErrorKind::OutOfBounds
        );
        Ok(())
    }

    #[test]
    fn test_write_stops_at_chrom_end() -> Result<()> {
        let mut writer = builder()?.build(Cursor::new(Vec::new()))?;
        writer.seek("chr1", 98)?;
        assert_eq!(writer.write_values(&[1, 2, 3, 0])?, 2);
        assert_eq!(writer.write_values(&[1])?, 0);
        assert_eq!(writer.tell()?, ("chr1", 100));

        // The end of chr1 is the start of chr2
        assert_eq!(writer.seek("chr2", 0)?, SeekOutcome::Moved);
        assert_eq!(writer.tell()?, ("chr2", 0));
        assert_eq!(writer.write_values(&[3])?, 1);
        Ok(())
    }

    #[test]
    fn test_reject_policy() -> Result<()> {
        let mut writer = builder()?
            .spill_policy(SpillPolicy::Reject)
            .build(Cursor::new(Vec::new()))?;
        writer.write_values(&[0, 1])?;
        let err = writer.write_values(&[2, 9, 3]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DictMismatch);
        // Nothing of the rejected batch was written
        assert_eq!(writer.position(), VirtualPos(2));
        Ok(())
    }

    #[test]
    fn test_interval_validation() -> Result<()> {
        let mut writer = builder()?.build(Cursor::new(Vec::new()))?;
        writer.write_intervals(&[Interval::new(10, 20, 1)])?;

        let backward = writer.write_intervals(&[Interval::new(15, 30, 2)]);
        assert_eq!(backward.unwrap_err().kind(), ErrorKind::BackwardSeek);

        let empty = writer.write_intervals(&[Interval::new(30, 30, 2)]);
        assert_eq!(empty.unwrap_err().kind(), ErrorKind::OutOfBounds);

        let past_end = writer.write_intervals(&[Interval::new(30, 101, 2)]);
        assert_eq!(past_end.unwrap_err().kind(), ErrorKind::OutOfBounds);

        let overlapping = [Interval::new(30, 40, 1), Interval::new(35, 45, 2)];
        assert!(writer.write_intervals(&overlapping).is_err());
        assert_eq!(writer.position(), VirtualPos(20));
        Ok(())
    }

    /// Discards its input and remembers the largest single write
    #[derive(Default)]
    struct PeakSink {
        pos: u64,
        len: u64,
        peak: usize,
    }
    impl Write for PeakSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.peak = self.peak.max(buf.len());
            self.pos += buf.len() as u64;
            self.len = self.len.max(self.pos);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
    impl Seek for PeakSink {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.pos = match pos {
                SeekFrom::Start(p) => p,
                SeekFrom::End(d) => self.len.saturating_add_signed(d),
                SeekFrom::Current(d) => self.pos.saturating_add_signed(d),
            };
            Ok(self.pos)
        }
    }

    #[test]
    fn test_large_gaps_stream_in_bounded_writes() -> Result<()> {
        let mut writer = D4WriterBuilder::default()
            .chroms(vec![Chrom::new("chr1", 50_000_000)])
            .dictionary(Dictionary::simple_range(0, 2)?)
            .build(PeakSink::default())?;
        writer.write_values(&[1])?;
        writer.seek("chr1", 20_000_000)?;
        writer.write_intervals(&[Interval::new(20_000_000, 45_000_000, 1)])?;
        let sink = writer.into_inner()?;

        // 50M one-bit codes pack to 6.25 MB
        assert!(sink.len > 6_000_000);
        assert!(
            sink.peak <= 2 * FLUSH_THRESHOLD,
            "largest write was {} bytes",
            sink.peak
        );
        Ok(())
    }

    #[test]
    fn test_round_trip() -> Result<()> {
        let mut writer = builder()?.build(Cursor::new(Vec::new()))?;
        writer.write_values(&[0, 1, 2, 3, 4, 5])?;
        writer.seek("chr1", 40)?;
        writer.write_intervals(&[Interval::new(50, 60, 7), Interval::new(60, 70, 3)])?;
        writer.seek("chr2", 10)?;
        writer.write_values(&[-1])?;
        assert_eq!(writer.secondary_len(), 10 + 1 + 2);

        let mut reader = reopen(writer)?;
        let mut values = vec![0; 100];
        assert_eq!(reader.read_values(&mut values)?, 100);
        assert_eq!(&values[..7], &[0, 1, 2, 3, 4, 5, 0]);
        assert!(values[6..50].iter().all(|&v| v == 0));
        assert!(values[50..60].iter().all(|&v| v == 7));
        assert!(values[60..70].iter().all(|&v| v == 3));
        assert!(values[70..].iter().all(|&v| v == 0));

        reader.seek("chr2", 9)?;
        let mut values = [9; 3];
        assert_eq!(reader.read_values(&mut values)?, 3);
        assert_eq!(values, [0, -1, 0]);
        Ok(())
    }
}
