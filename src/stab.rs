//! # Secondary table
//!
//! Escaped samples are stored as `(virtual_pos: u64, value: i32)` records, packed without
//! padding in strictly increasing position order.
//!
//! Readers load records lazily, one chromosome at a time. The chromosome's record range
//! is located by binary search over the on-disk records, so opening a file never scans
//! the whole table.

use std::sync::{Arc, OnceLock};

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{ReadError, Result};
use crate::stream::ByteStream;

/// Size of one encoded record in bytes
pub const RECORD_SIZE: usize = 12;

/// One escaped sample
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SecondaryRecord {
    /// Virtual position of the sample
    pub pos: u64,

    /// Sample value
    pub value: i32,
}
impl SecondaryRecord {
    #[must_use]
    pub fn new(pos: u64, value: i32) -> Self {
        Self { pos, value }
    }

    /// Appends the encoded record to `buf`
    pub fn write_bytes(&self, buf: &mut Vec<u8>) {
        let mut raw = [0u8; RECORD_SIZE];
        LittleEndian::write_u64(&mut raw[..8], self.pos);
        LittleEndian::write_i32(&mut raw[8..], self.value);
        buf.extend_from_slice(&raw);
    }

    /// Decodes a record from exactly [`RECORD_SIZE`] bytes
    #[must_use]
    pub fn from_bytes(raw: &[u8]) -> Self {
        Self {
            pos: LittleEndian::read_u64(&raw[..8]),
            value: LittleEndian::read_i32(&raw[8..RECORD_SIZE]),
        }
    }
}

/// Encodes an ordered record list into a chunk payload
#[must_use]
pub fn encode_records(records: &[SecondaryRecord]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(records.len() * RECORD_SIZE);
    for record in records {
        record.write_bytes(&mut buf);
    }
    buf
}

/// Lazily loaded view over the secondary table chunk
pub struct SecondaryTable {
    stream: Arc<dyn ByteStream>,
    offset: u64,
    count: u64,

    /// Virtual `[start, end)` of every chromosome
    bounds: Vec<(u64, u64)>,

    /// Records of each chromosome, loaded on first use
    loaded: Vec<OnceLock<Vec<SecondaryRecord>>>,
}
impl SecondaryTable {
    /// Wraps the secondary table payload
    ///
    /// # Errors
    ///
    /// Returns [`ReadError::SecondaryTruncated`] if `len` is not a multiple of the
    /// record size.
    pub fn new(
        stream: Arc<dyn ByteStream>,
        offset: u64,
        len: u64,
        bounds: Vec<(u64, u64)>,
    ) -> Result<Self> {
        if len % RECORD_SIZE as u64 != 0 {
            return Err(ReadError::SecondaryTruncated(len).into());
        }
        let loaded = bounds.iter().map(|_| OnceLock::new()).collect();
        Ok(Self {
            stream,
            offset,
            count: len / RECORD_SIZE as u64,
            bounds,
            loaded,
        })
    }

    /// Total number of records
    #[must_use]
    pub fn len(&self) -> u64 {
        self.count
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn record_at(&self, index: u64) -> Result<SecondaryRecord> {
        let mut raw = [0u8; RECORD_SIZE];
        self.stream
            .read_at(self.offset + index * RECORD_SIZE as u64, &mut raw)?;
        Ok(SecondaryRecord::from_bytes(&raw))
    }

    /// Index of the first record whose position is at least `pos`
    fn lower_bound(&self, pos: u64) -> Result<u64> {
        let (mut lo, mut hi) = (0, self.count);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.record_at(mid)?.pos < pos {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo)
    }

    fn load(&self, chrom: usize) -> Result<Vec<SecondaryRecord>> {
        let (start, end) = self.bounds[chrom];
        let first = self.lower_bound(start)?;
        let last = self.lower_bound(end)?;
        let raw = self.stream.read_vec(
            self.offset + first * RECORD_SIZE as u64,
            ((last - first) as usize) * RECORD_SIZE,
        )?;

        let records: Vec<_> = raw
            .chunks_exact(RECORD_SIZE)
            .map(SecondaryRecord::from_bytes)
            .collect();
        if let Some(w) = records.windows(2).find(|w| w[0].pos >= w[1].pos) {
            return Err(ReadError::SecondaryUnordered(w[1].pos).into());
        }
        tracing::debug!("loaded {} secondary records for chromosome {chrom}", records.len());
        Ok(records)
    }

    /// Records of one chromosome, in position order
    pub fn records(&self, chrom: usize) -> Result<&[SecondaryRecord]> {
        let cell = &self.loaded[chrom];
        if let Some(records) = cell.get() {
            return Ok(records);
        }
        let records = self.load(chrom)?;
        // Another thread may have won the race, both loads are identical
        Ok(cell.get_or_init(|| records))
    }
}
