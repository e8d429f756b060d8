use crate::error::{Result, TaskError};
use crate::interval::{Interval, RunCoalescer};
use crate::track::TrackReader;

use super::Partition;

/// Number of values decoded per step when reading intervals
const INTERVAL_BLOCK: usize = 4096;

enum Access<'a> {
    Read(&'a TrackReader),
    Write { staging: Vec<i32> },
}

/// View of one partition handed to [`super::PartitionTask::process`]
///
/// Offsets are chromosome coordinates. Reads and writes are clipped to the partition
/// range, and an offset outside of `[start, end]` is an error.
pub struct PartitionHandle<'a> {
    partition: &'a Partition,
    access: Access<'a>,
}
impl<'a> PartitionHandle<'a> {
    pub(crate) fn reader(partition: &'a Partition, track: &'a TrackReader) -> Self {
        Self {
            partition,
            access: Access::Read(track),
        }
    }

    pub(crate) fn writer(partition: &'a Partition, default: i32) -> Self {
        Self {
            partition,
            access: Access::Write {
                staging: vec![default; partition.len() as usize],
            },
        }
    }

    #[must_use]
    pub fn partition(&self) -> &Partition {
        self.partition
    }

    /// Name of the chromosome
    #[must_use]
    pub fn chrom(&self) -> &str {
        &self.partition.chrom_name
    }

    /// Covered range as `(start, end)`
    #[must_use]
    pub fn range(&self) -> (u32, u32) {
        (self.partition.start, self.partition.end)
    }

    fn check(&self, offset: u32) -> Result<()> {
        let (start, end) = self.range();
        if offset < start || offset > end {
            return Err(TaskError::OutsidePartition { offset, start, end }.into());
        }
        Ok(())
    }

    /// Reads the values at `offset` into `buf`
    ///
    /// In write mode this returns what has been staged so far. Returns the number of
    /// values read, which stops at the partition end.
    pub fn read_values(&self, offset: u32, buf: &mut [i32]) -> Result<usize> {
        self.check(offset)?;
        let n = buf.len().min((self.partition.end - offset) as usize);
        match &self.access {
            Access::Read(track) => track.read_values(self.partition.chrom, offset, &mut buf[..n]),
            Access::Write { staging } => {
                let from = (offset - self.partition.start) as usize;
                buf[..n].copy_from_slice(&staging[from..from + n]);
                Ok(n)
            }
        }
    }

    /// Reads runs of equal values at `offset`, clipped to the partition end
    pub fn read_intervals(&self, offset: u32, buf: &mut [Interval]) -> Result<usize> {
        self.check(offset)?;
        let end = self.partition.end;
        let mut values = [0i32; INTERVAL_BLOCK];
        let mut coalescer = RunCoalescer::default();
        let mut filled = 0;
        let mut pos = offset;
        while pos < end && filled < buf.len() {
            let n = self.read_values(pos, &mut values)?;
            let consumed = coalescer.feed(pos, &values[..n], |iv| {
                buf[filled] = iv;
                filled += 1;
                filled < buf.len()
            });
            pos += consumed as u32;
        }
        if filled < buf.len() {
            if let Some(iv) = coalescer.finish() {
                buf[filled] = iv;
                filled += 1;
            }
        }
        Ok(filled)
    }

    /// Stages values at `offset`
    ///
    /// Returns the number of values staged, which stops at the partition end.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::ModeMismatch`] for read tasks.
    pub fn write_values(&mut self, offset: u32, data: &[i32]) -> Result<usize> {
        self.check(offset)?;
        let (start, end) = self.range();
        let Access::Write { staging } = &mut self.access else {
            return Err(TaskError::ModeMismatch("read").into());
        };
        let n = data.len().min((end - offset) as usize);
        let from = (offset - start) as usize;
        staging[from..from + n].copy_from_slice(&data[..n]);
        Ok(n)
    }

    pub(crate) fn into_staging(self) -> Option<Vec<i32>> {
        match self.access {
            Access::Read(_) => None,
            Access::Write { staging } => Some(staging),
        }
    }
}
