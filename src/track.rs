//! # Track decoding
//!
//! [`TrackReader`] merges the primary and secondary tables back into dense values. It is
//! immutable after opening and is shared behind an `Arc` by the cursor reader and by
//! every partition of a running task.
//!
//! All positions taken by this module are chromosome-local. Reads are clipped at the end
//! of the chromosome and never cross into the next one.

use crate::dict::{Decoded, Dictionary};
use crate::error::{ReadError, Result};
use crate::frame::{FrameReader, METADATA_CHUNK, PRIMARY_CHUNK, SECONDARY_CHUNK};
use crate::interval::{Interval, RunCoalescer};
use crate::metadata::Metadata;
use crate::ptab::PrimaryTable;
use crate::stab::SecondaryTable;

/// Number of samples decoded per block
const DECODE_BLOCK: usize = 1 << 16;

/// Shared decoder for the values of a finalized file
pub struct TrackReader {
    metadata: Metadata,
    primary: PrimaryTable,
    secondary: SecondaryTable,
}
impl TrackReader {
    /// Loads the metadata and opens the primary and secondary tables of a container
    pub fn open(frame: &FrameReader) -> Result<Self> {
        let metadata = Metadata::from_json(&frame.read_chunk(METADATA_CHUNK)?)?;
        let stream = frame.stream().clone();

        let ptab = frame.chunk(PRIMARY_CHUNK)?;
        let primary = PrimaryTable::new(
            stream.clone(),
            ptab.offset,
            ptab.len,
            metadata.dictionary().bit_width(),
            metadata.total_size(),
        )?;

        let stab = frame.chunk(SECONDARY_CHUNK)?;
        let secondary = SecondaryTable::new(stream, stab.offset, stab.len, metadata.all_bounds())?;

        tracing::debug!(
            "opened track: {} chromosomes, {} bp, {}-bit codes, {} secondary records",
            metadata.chroms().len(),
            metadata.total_size(),
            primary.bit_width(),
            secondary.len()
        );
        Ok(Self {
            metadata,
            primary,
            secondary,
        })
    }

    #[must_use]
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    #[must_use]
    pub fn dictionary(&self) -> &Dictionary {
        self.metadata.dictionary()
    }

    /// Size of a chromosome
    #[must_use]
    pub fn chrom_size(&self, chrom: usize) -> u32 {
        self.metadata.chroms()[chrom].size
    }

    fn check_offset(&self, chrom: usize, offset: u32) -> Result<()> {
        let info = &self.metadata.chroms()[chrom];
        if offset > info.size {
            return Err(ReadError::OutOfRange {
                chrom: info.name.clone(),
                pos: u64::from(offset),
                size: u64::from(info.size),
            }
            .into());
        }
        Ok(())
    }

    /// Decodes values starting at `offset` into `out`
    ///
    /// Returns the number of values decoded, which is short when the chromosome ends
    /// first.
    pub fn read_values(&self, chrom: usize, offset: u32, out: &mut [i32]) -> Result<usize> {
        self.check_offset(chrom, offset)?;
        let count = out
            .len()
            .min((self.chrom_size(chrom) - offset) as usize);
        if count == 0 {
            return Ok(0);
        }

        let dict = self.dictionary();
        let records = self.secondary.records(chrom)?;
        let (chrom_start, _) = self.metadata.chrom_bounds(chrom);
        let start = chrom_start + u64::from(offset);
        let mut next = records.partition_point(|r| r.pos < start);

        let mut codes = vec![0u32; count.min(DECODE_BLOCK)];
        let mut done = 0;
        while done < count {
            let block = (count - done).min(DECODE_BLOCK);
            let block_start = start + done as u64;
            self.primary.read_codes(block_start, &mut codes[..block])?;

            for (i, &code) in codes[..block].iter().enumerate() {
                let pos = block_start + i as u64;
                let value = match records.get(next) {
                    Some(record) if record.pos == pos => {
                        next += 1;
                        record.value
                    }
                    _ => match dict.decode(code) {
                        Decoded::Value(v) => v,
                        Decoded::Escape => return Err(ReadError::MissingSecondary(pos).into()),
                        Decoded::Unused => return Err(ReadError::InvalidCode { code, pos }.into()),
                    },
                };
                out[done + i] = value;
            }
            done += block;
        }
        Ok(count)
    }

    /// Decodes runs of equal values starting at `offset` into `out`
    ///
    /// Every returned run is complete: it either ends at a value change or at the end of
    /// the chromosome. Returns the number of runs written.
    pub fn read_intervals(&self, chrom: usize, offset: u32, out: &mut [Interval]) -> Result<usize> {
        self.check_offset(chrom, offset)?;
        let size = self.chrom_size(chrom);
        if out.is_empty() || offset == size {
            return Ok(0);
        }

        let mut values = vec![0i32; ((size - offset) as usize).min(DECODE_BLOCK)];
        let mut coalescer = RunCoalescer::default();
        let mut filled = 0;
        let mut pos = offset;
        while pos < size {
            let n = self.read_values(chrom, pos, &mut values)?;
            let consumed = coalescer.feed(pos, &values[..n], |iv| {
                out[filled] = iv;
                filled += 1;
                filled < out.len()
            });
            if filled == out.len() {
                return Ok(filled);
            }
            pos += consumed as u32;
        }
        if let Some(iv) = coalescer.finish() {
            out[filled] = iv;
            filled += 1;
        }
        Ok(filled)
    }

    /// Sum of the values in `[start, end)`
    pub fn sum_range(&self, chrom: usize, start: u32, end: u32) -> Result<i64> {
        self.check_offset(chrom, end)?;
        let mut values = vec![0i32; (end.saturating_sub(start) as usize).min(DECODE_BLOCK)];
        let mut sum = 0i64;
        let mut pos = start;
        while pos < end {
            let want = ((end - pos) as usize).min(values.len());
            let n = self.read_values(chrom, pos, &mut values[..want])?;
            sum += values[..n].iter().map(|&v| i64::from(v)).sum::<i64>();
            pos += n as u32;
        }
        Ok(sum)
    }
}

#[cfg(test)]
mod testing {
    use std::io::Cursor;
    use std::sync::Arc;

    use super::*;
    use crate::frame::FrameWriter;
    use crate::metadata::Chrom;
    use crate::ptab::pack;
    use crate::stab::{encode_records, SecondaryRecord};
    use crate::stream::Appender;

    /// Builds a container by hand, bypassing the writer
    fn container(
        metadata: &Metadata,
        codes: &[u32],
        records: &[SecondaryRecord],
    ) -> Result<Arc<FrameReader>> {
        let mut frame = FrameWriter::new(Appender::new(Cursor::new(Vec::new()))?);
        frame.write_chunk(METADATA_CHUNK, &metadata.to_json()?)?;
        frame.write_chunk(
            PRIMARY_CHUNK,
            &pack(codes, metadata.dictionary().bit_width()),
        )?;
        frame.write_chunk(SECONDARY_CHUNK, &encode_records(records))?;
        let bytes = frame.finish()?.into_inner().into_inner();
        Ok(Arc::new(FrameReader::open(Arc::new(bytes))?))
    }

    fn two_chroms() -> Result<Metadata> {
        Metadata::new(
            vec![Chrom::new("a", 6), Chrom::new("b", 4)],
            Dictionary::simple_range(0, 4)?,
            1.0,
        )
    }

    #[test]
    fn test_merge_secondary() -> Result<()> {
        let meta = two_chroms()?;
        // a: 0 1 E 3 E 0 | b: 2 E 2 2
        let codes = [0, 1, 7, 3, 7, 0, 2, 7, 2, 2];
        let records = [
            SecondaryRecord::new(2, 100),
            SecondaryRecord::new(4, -5),
            SecondaryRecord::new(7, 9),
        ];
        let frame = container(&meta, &codes, &records)?;
        let track = TrackReader::open(&frame)?;

        let mut out = [0; 10];
        assert_eq!(track.read_values(0, 0, &mut out)?, 6);
        assert_eq!(&out[..6], &[0, 1, 100, 3, -5, 0]);
        assert_eq!(track.read_values(1, 1, &mut out)?, 3);
        assert_eq!(&out[..3], &[9, 2, 2]);
        assert_eq!(track.read_values(0, 3, &mut out[..2])?, 2);
        assert_eq!(&out[..2], &[3, -5]);
        assert_eq!(track.read_values(0, 6, &mut out)?, 0);
        assert!(track.read_values(0, 7, &mut out).is_err());
        Ok(())
    }

    #[test]
    fn test_intervals_cross_escape() -> Result<()> {
        let meta = two_chroms()?;
        // a: 1 1 E(1) 2 2 2 -> one run of 1 spanning the escape
        let codes = [1, 1, 7, 2, 2, 2, 0, 0, 0, 0];
        let records = [SecondaryRecord::new(2, 1)];
        let frame = container(&meta, &codes, &records)?;
        let track = TrackReader::open(&frame)?;

        let mut out = [Interval::default(); 8];
        let n = track.read_intervals(0, 0, &mut out)?;
        assert_eq!(&out[..n], &[Interval::new(0, 3, 1), Interval::new(3, 6, 2)]);

        let n = track.read_intervals(0, 0, &mut out[..1])?;
        assert_eq!(&out[..n], &[Interval::new(0, 3, 1)]);

        let n = track.read_intervals(1, 2, &mut out)?;
        assert_eq!(&out[..n], &[Interval::new(2, 4, 0)]);
        Ok(())
    }

    #[test]
    fn test_missing_secondary() -> Result<()> {
        let meta = two_chroms()?;
        let codes = [0, 7, 0, 0, 0, 0, 0, 0, 0, 0];
        let frame = container(&meta, &codes, &[])?;
        let track = TrackReader::open(&frame)?;
        let mut out = [0; 4];
        let err = track.read_values(0, 0, &mut out).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::ReadError(ReadError::MissingSecondary(1))
        ));
        Ok(())
    }

    #[test]
    fn test_unused_code() -> Result<()> {
        let meta = two_chroms()?;
        let codes = [5, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        let frame = container(&meta, &codes, &[])?;
        let track = TrackReader::open(&frame)?;
        let mut out = [0; 1];
        assert!(track.read_values(0, 0, &mut out).unwrap_err().is_corrupt());
        Ok(())
    }

    #[test]
    fn test_sum_range() -> Result<()> {
        let meta = two_chroms()?;
        let codes = [0, 1, 7, 3, 7, 0, 2, 7, 2, 2];
        let records = [
            SecondaryRecord::new(2, 100),
            SecondaryRecord::new(4, -5),
            SecondaryRecord::new(7, 9),
        ];
        let frame = container(&meta, &codes, &records)?;
        let track = TrackReader::open(&frame)?;
        assert_eq!(track.sum_range(0, 0, 6)?, 99);
        assert_eq!(track.sum_range(0, 2, 4)?, 103);
        assert_eq!(track.sum_range(1, 0, 4)?, 15);
        assert_eq!(track.sum_range(1, 2, 2)?, 0);
        Ok(())
    }
}
