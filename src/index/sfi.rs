use byteorder::{ByteOrder, LittleEndian};

use crate::error::{IndexError, Result};
use crate::frame::{FrameReader, SFI_CHUNK};
use crate::metadata::Metadata;
use crate::task::{Partition, PartitionHandle, PartitionResult, PartitionTask};
use crate::track::TrackReader;

/// Width of an index bucket in base pairs
pub const SFI_BUCKET_BP: u32 = 65536;

/// Partition size used while building the index, a whole number of buckets
pub(crate) const SFI_PART_SIZE: u32 = SFI_BUCKET_BP * 64;

/// Size of a sub-block header: chromosome index and bucket count
const BLOCK_HEADER: usize = 8;

/// Number of buckets covering a chromosome of `size` base pairs
fn bucket_count(size: u32) -> usize {
    size.div_ceil(SFI_BUCKET_BP) as usize
}

/// Number of samples in bucket `bucket` of a chromosome of `size` base pairs
fn bucket_width(size: u32, bucket: usize) -> u32 {
    let start = u64::from(SFI_BUCKET_BP) * bucket as u64;
    (u64::from(size) - start).min(u64::from(SFI_BUCKET_BP)) as u32
}

/// Fixed-interval summary index
///
/// Holds the exact sum of every [`SFI_BUCKET_BP`] wide bucket of every chromosome.
#[derive(Debug, Clone)]
pub struct SfiIndex {
    sums: Vec<Vec<i64>>,
}
impl SfiIndex {
    /// Parses and validates the `.sfi` chunk of a container
    ///
    /// # Errors
    ///
    /// * [`IndexError::Missing`] if the container has no summary index
    /// * [`IndexError::BucketMismatch`] if a bucket count disagrees with the chromosome size
    pub fn load(frame: &FrameReader, metadata: &Metadata) -> Result<Self> {
        if !frame.has_chunk(SFI_CHUNK) {
            return Err(IndexError::Missing("sum").into());
        }
        let payload = frame.read_chunk(SFI_CHUNK)?;
        let index = Self::from_bytes(&payload, metadata)?;
        tracing::debug!(
            "loaded summary index with {} buckets",
            index.sums.iter().map(Vec::len).sum::<usize>()
        );
        Ok(index)
    }

    fn from_bytes(payload: &[u8], metadata: &Metadata) -> Result<Self> {
        let chroms = metadata.chroms();
        let mut sums: Vec<Option<Vec<i64>>> = vec![None; chroms.len()];
        let mut pos = 0;
        while pos < payload.len() {
            if pos + BLOCK_HEADER > payload.len() {
                return Err(IndexError::Malformed("truncated block header".to_string()).into());
            }
            let chrom = LittleEndian::read_u32(&payload[pos..]) as usize;
            let count = LittleEndian::read_u32(&payload[pos + 4..]) as usize;
            pos += BLOCK_HEADER;

            let Some(info) = chroms.get(chrom) else {
                return Err(IndexError::Malformed(format!("unknown chromosome {chrom}")).into());
            };
            if count != bucket_count(info.size) {
                return Err(IndexError::Malformed(format!(
                    "{} has {count} buckets, expected {}",
                    info.name,
                    bucket_count(info.size)
                ))
                .into());
            }
            let block_len = count * 12;
            if pos + block_len > payload.len() {
                return Err(IndexError::Malformed(format!("truncated block for {}", info.name)).into());
            }

            let mut chrom_sums = vec![0i64; count];
            LittleEndian::read_i64_into(&payload[pos..pos + count * 8], &mut chrom_sums);
            pos += count * 8;
            for bucket in 0..count {
                let got = LittleEndian::read_u32(&payload[pos + bucket * 4..]);
                let expected = bucket_width(info.size, bucket);
                if got != expected {
                    return Err(IndexError::BucketMismatch {
                        chrom,
                        bucket,
                        expected,
                        got,
                    }
                    .into());
                }
            }
            pos += count * 4;
            sums[chrom] = Some(chrom_sums);
        }

        let sums = sums
            .into_iter()
            .zip(chroms)
            .map(|(s, info)| {
                s.ok_or_else(|| IndexError::Malformed(format!("no block for {}", info.name)).into())
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { sums })
    }

    /// Serializes per-chromosome bucket sums into a `.sfi` payload
    pub(crate) fn encode(metadata: &Metadata, sums: &[Vec<i64>]) -> Vec<u8> {
        let mut payload = Vec::new();
        let mut buf = [0u8; 8];
        for (chrom, (info, chrom_sums)) in metadata.chroms().iter().zip(sums).enumerate() {
            LittleEndian::write_u32(&mut buf, chrom as u32);
            payload.extend_from_slice(&buf[..4]);
            LittleEndian::write_u32(&mut buf, chrom_sums.len() as u32);
            payload.extend_from_slice(&buf[..4]);
            for &sum in chrom_sums {
                LittleEndian::write_i64(&mut buf, sum);
                payload.extend_from_slice(&buf);
            }
            for bucket in 0..chrom_sums.len() {
                LittleEndian::write_u32(&mut buf, bucket_width(info.size, bucket));
                payload.extend_from_slice(&buf[..4]);
            }
        }
        payload
    }

    /// Sum of the decoded values of `[start, end)` on a chromosome
    ///
    /// Whole buckets come from the index, partial buckets at either end are decoded.
    ///
    /// # Arguments
    /// * `track` - Decoder used for the partial head and tail buckets
    /// * `chrom` - Chromosome index
    /// * `start` - First position of the range
    /// * `end` - One past the last position, at most the chromosome size
    pub fn query_sum(&self, track: &TrackReader, chrom: usize, start: u32, end: u32) -> Result<i64> {
        if start > end || end > track.chrom_size(chrom) {
            return Err(IndexError::InvalidRange { start, end }.into());
        }
        let first_full = start.div_ceil(SFI_BUCKET_BP);
        let last_full = end / SFI_BUCKET_BP;
        if first_full >= last_full {
            return track.sum_range(chrom, start, end);
        }

        let head = track.sum_range(chrom, start, first_full * SFI_BUCKET_BP)?;
        let interior: i64 = self.sums[chrom][first_full as usize..last_full as usize]
            .iter()
            .sum();
        let tail = track.sum_range(chrom, last_full * SFI_BUCKET_BP, end)?;
        Ok(head + interior + tail)
    }
}

/// Read task computing every bucket sum
pub(crate) struct SfiBuilder;
impl PartitionTask for SfiBuilder {
    type Context = Vec<i64>;
    type Output = Vec<Vec<i64>>;

    fn create_context(&self, partition: &Partition) -> Result<Vec<i64>> {
        Ok(vec![0; bucket_count(partition.len())])
    }

    fn process(&self, handle: &mut PartitionHandle<'_>, sums: &mut Vec<i64>) -> Result<()> {
        let (start, end) = handle.range();
        let mut buf = vec![0i32; SFI_BUCKET_BP as usize];
        for (bucket, sum) in sums.iter_mut().enumerate() {
            let left = start + bucket as u32 * SFI_BUCKET_BP;
            let right = left.saturating_add(SFI_BUCKET_BP).min(end);
            let n = handle.read_values(left, &mut buf[..(right - left) as usize])?;
            *sum = buf[..n].iter().map(|&v| i64::from(v)).sum();
        }
        Ok(())
    }

    fn finalize(&self, results: Vec<PartitionResult<Vec<i64>>>) -> Result<Vec<Vec<i64>>> {
        let mut out: Vec<Vec<i64>> = Vec::new();
        let mut last_chrom = None;
        for result in results {
            result.status.into_result()?;
            if last_chrom != Some(result.partition.chrom) {
                out.push(Vec::new());
                last_chrom = Some(result.partition.chrom);
            }
            if let (Some(chrom_sums), Some(sums)) = (out.last_mut(), result.context) {
                chrom_sums.extend(sums);
            }
        }
        Ok(out)
    }
}
