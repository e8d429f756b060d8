use super::{Partition, PartitionHandle, PartitionResult, PartitionTask, Region};
use crate::error::Result;

/// Number of values decoded per step
const BLOCK_SIZE: usize = 1 << 16;

/// Feeds every value of the partition to `f`
fn for_each_block<F>(handle: &PartitionHandle<'_>, mut f: F) -> Result<()>
where
    F: FnMut(&[i32]),
{
    let (start, end) = handle.range();
    let mut buf = vec![0; BLOCK_SIZE.min((end - start) as usize)];
    let mut pos = start;
    while pos < end {
        let n = handle.read_values(pos, &mut buf)?;
        if n == 0 {
            break;
        }
        f(&buf[..n]);
        pos += n as u32;
    }
    Ok(())
}

/// Groups partition contexts by region, in region order
///
/// Fails with the first partition error, skipped partitions are reported as cancelled.
fn per_region<C, A, F>(results: Vec<PartitionResult<C>>, mut fold: F) -> Result<Vec<(Region, A)>>
where
    A: Default,
    F: FnMut(&mut A, &Partition, C),
{
    let mut out: Vec<(Region, A)> = Vec::new();
    let mut last_region = None;
    for result in results {
        result.status.into_result()?;
        let partition = result.partition;
        if last_region != Some(partition.region) {
            let region = Region::new(&partition.chrom_name, partition.start, partition.end);
            out.push((region, A::default()));
            last_region = Some(partition.region);
        }
        if let Some((region, acc)) = out.last_mut() {
            region.end = partition.end;
            if let Some(context) = result.context {
                fold(acc, &partition, context);
            }
        }
    }
    Ok(out)
}

/// [`per_region`] keyed by chromosome name
fn per_chrom<C, A, F>(results: Vec<PartitionResult<C>>, fold: F) -> Result<Vec<(String, A)>>
where
    A: Default,
    F: FnMut(&mut A, &Partition, C),
{
    Ok(per_region(results, fold)?
        .into_iter()
        .map(|(region, acc)| (region.chrom, acc))
        .collect())
}

/// Sum of the raw values of each chromosome, or of each region of a scoped task
#[derive(Debug, Clone, Copy, Default)]
pub struct Sum;
impl PartitionTask for Sum {
    type Context = i64;
    type Output = Vec<(String, i64)>;

    fn create_context(&self, _partition: &Partition) -> Result<i64> {
        Ok(0)
    }

    fn process(&self, handle: &mut PartitionHandle<'_>, sum: &mut i64) -> Result<()> {
        for_each_block(handle, |values| {
            *sum += values.iter().map(|&v| i64::from(v)).sum::<i64>();
        })
    }

    fn finalize(&self, results: Vec<PartitionResult<i64>>) -> Result<Self::Output> {
        per_chrom(results, |acc: &mut i64, _, sum| *acc += sum)
    }
}

/// Mean raw value of each chromosome, or of each region of a scoped task
#[derive(Debug, Clone, Copy, Default)]
pub struct MeanDepth;
impl PartitionTask for MeanDepth {
    type Context = i64;
    type Output = Vec<(String, f64)>;

    fn create_context(&self, _partition: &Partition) -> Result<i64> {
        Ok(0)
    }

    fn process(&self, handle: &mut PartitionHandle<'_>, sum: &mut i64) -> Result<()> {
        Sum.process(handle, sum)
    }

    #[allow(clippy::cast_precision_loss)]
    fn finalize(&self, results: Vec<PartitionResult<i64>>) -> Result<Self::Output> {
        let totals = per_chrom(results, |acc: &mut (i64, u64), partition, sum| {
            acc.0 += sum;
            acc.1 += u64::from(partition.len());
        })?;
        Ok(totals
            .into_iter()
            .map(|(name, (sum, len))| (name, sum as f64 / len as f64))
            .collect())
    }
}

/// Counts of values falling in `[min, max)`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistogramCounts {
    /// Lowest value with its own bin
    pub min: i32,

    /// One count per value of `[min, max)`
    pub counts: Vec<u64>,

    /// Number of values below `min`
    pub below: u64,

    /// Number of values at or above `max`
    pub above: u64,
}
impl HistogramCounts {
    fn new(min: i32, max: i32) -> Self {
        let bins = usize::try_from(i64::from(max) - i64::from(min)).unwrap_or(0);
        Self {
            min,
            counts: vec![0; bins],
            below: 0,
            above: 0,
        }
    }

    fn add(&mut self, value: i32) {
        if value < self.min {
            self.below += 1;
            return;
        }
        let bin = (i64::from(value) - i64::from(self.min)) as usize;
        match self.counts.get_mut(bin) {
            Some(count) => *count += 1,
            None => self.above += 1,
        }
    }

    fn merge(&mut self, other: &Self) {
        for (a, b) in self.counts.iter_mut().zip(&other.counts) {
            *a += b;
        }
        self.below += other.below;
        self.above += other.above;
    }

    /// Total number of counted values
    #[must_use]
    pub fn total(&self) -> u64 {
        self.counts.iter().sum::<u64>() + self.below + self.above
    }
}

/// Genome-wide histogram of raw values
#[derive(Debug, Clone, Copy)]
pub struct Histogram {
    pub min: i32,
    pub max: i32,
}
impl Histogram {
    #[must_use]
    pub fn new(min: i32, max: i32) -> Self {
        Self { min, max }
    }
}
impl PartitionTask for Histogram {
    type Context = HistogramCounts;
    type Output = HistogramCounts;

    fn create_context(&self, _partition: &Partition) -> Result<HistogramCounts> {
        Ok(HistogramCounts::new(self.min, self.max))
    }

    fn process(&self, handle: &mut PartitionHandle<'_>, hist: &mut HistogramCounts) -> Result<()> {
        for_each_block(handle, |values| {
            for &v in values {
                hist.add(v);
            }
        })
    }

    fn finalize(&self, results: Vec<PartitionResult<HistogramCounts>>) -> Result<HistogramCounts> {
        let mut total = HistogramCounts::new(self.min, self.max);
        for result in results {
            result.status.into_result()?;
            if let Some(hist) = result.context {
                total.merge(&hist);
            }
        }
        Ok(total)
    }
}

/// Smallest and largest raw value of each region
#[derive(Debug, Clone, Copy, Default)]
pub struct ValueRange;
impl PartitionTask for ValueRange {
    type Context = (i32, i32);
    type Output = Vec<(Region, (i32, i32))>;

    fn create_context(&self, _partition: &Partition) -> Result<(i32, i32)> {
        Ok((i32::MAX, i32::MIN))
    }

    fn process(&self, handle: &mut PartitionHandle<'_>, range: &mut (i32, i32)) -> Result<()> {
        for_each_block(handle, |values| {
            for &v in values {
                range.0 = range.0.min(v);
                range.1 = range.1.max(v);
            }
        })
    }

    fn finalize(&self, results: Vec<PartitionResult<(i32, i32)>>) -> Result<Self::Output> {
        let ranges = per_region(results, |acc: &mut Option<(i32, i32)>, _, (min, max)| {
            *acc = Some(match *acc {
                Some((lo, hi)) => (lo.min(min), hi.max(max)),
                None => (min, max),
            });
        })?;
        Ok(ranges
            .into_iter()
            .map(|(region, range)| (region, range.unwrap_or((i32::MAX, i32::MIN))))
            .collect())
    }
}

/// Fraction of each region at or above every threshold
#[derive(Debug, Clone, Default)]
pub struct PercentCov {
    pub thresholds: Vec<i32>,
}
impl PercentCov {
    #[must_use]
    pub fn new(thresholds: Vec<i32>) -> Self {
        Self { thresholds }
    }
}
impl PartitionTask for PercentCov {
    type Context = Vec<u64>;
    type Output = Vec<(Region, Vec<f64>)>;

    fn create_context(&self, _partition: &Partition) -> Result<Vec<u64>> {
        Ok(vec![0; self.thresholds.len()])
    }

    fn process(&self, handle: &mut PartitionHandle<'_>, counts: &mut Vec<u64>) -> Result<()> {
        for_each_block(handle, |values| {
            for &v in values {
                for (count, &t) in counts.iter_mut().zip(&self.thresholds) {
                    if v >= t {
                        *count += 1;
                    }
                }
            }
        })
    }

    #[allow(clippy::cast_precision_loss)]
    fn finalize(&self, results: Vec<PartitionResult<Vec<u64>>>) -> Result<Self::Output> {
        let totals = per_region(results, |acc: &mut Vec<u64>, _, counts| {
            acc.resize(counts.len(), 0);
            for (a, c) in acc.iter_mut().zip(counts) {
                *a += c;
            }
        })?;
        Ok(totals
            .into_iter()
            .map(|(region, counts)| {
                let len = f64::from(region.len());
                let fractions = (0..self.thresholds.len())
                    .map(|i| counts.get(i).map_or(0.0, |&c| c as f64 / len))
                    .collect();
                (region, fractions)
            })
            .collect())
    }
}

#[cfg(test)]
mod testing {
    use std::io::Cursor;
    use std::sync::Arc;

    use super::*;
    use crate::dict::Dictionary;
    use crate::metadata::Chrom;
    use crate::reader::D4Reader;
    use crate::task::{TaskDesc, TaskMode};

    fn brute(reader: &mut D4Reader, region: &Region) -> Result<Vec<i32>> {
        reader.seek(&region.chrom, region.start)?;
        let mut values = vec![0; region.len() as usize];
        reader.read_values(&mut values)?;
        Ok(values)
    }

    fn regions() -> Vec<Region> {
        vec![
            Region::new("chr2", 40, 100),
            Region::new("chr1", 100, 200),
            Region::new("chr1", 0, 300),
            Region::new("chr1", 290, 300),
        ]
    }
    use crate::writer::D4WriterBuilder;

    fn sample() -> Result<D4Reader> {
        let mut writer = D4WriterBuilder::default()
            .chroms(vec![Chrom::new("chr1", 300), Chrom::new("chr2", 100)])
            .dictionary(Dictionary::simple_range(0, 4)?)
            .build(Cursor::new(Vec::new()))?;
        writer.write_values(&[2; 150])?;
        writer.write_values(&[1000; 10])?;
        writer.seek("chr2", 50)?;
        writer.write_values(&[-3; 50])?;
        let bytes = writer.into_inner()?.into_inner();
        D4Reader::from_stream(Arc::new(bytes))
    }

    fn desc() -> TaskDesc {
        TaskDesc::new(TaskMode::Read).part_size_limit(64).num_cpus(3)
    }

    #[test]
    fn test_sum() -> Result<()> {
        let reader = sample()?;
        let sums = reader.run_task(&Sum, &desc())?.output;
        assert_eq!(
            sums,
            [("chr1".to_string(), 300 + 10_000), ("chr2".to_string(), -150)]
        );
        Ok(())
    }

    #[test]
    fn test_mean_depth() -> Result<()> {
        let reader = sample()?;
        let means = reader.run_task(&MeanDepth, &desc())?.output;
        assert_eq!(means.len(), 2);
        assert!((means[0].1 - 10_300.0 / 300.0).abs() < 1e-9);
        assert!((means[1].1 + 1.5).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn test_histogram() -> Result<()> {
        let reader = sample()?;
        let hist = reader.run_task(&Histogram::new(0, 4), &desc())?.output;
        assert_eq!(hist.counts, [140 + 50, 0, 150, 0]);
        assert_eq!(hist.below, 50);
        assert_eq!(hist.above, 10);
        assert_eq!(hist.total(), 400);
        Ok(())
    }

    #[test]
    fn test_value_range() -> Result<()> {
        let mut reader = sample()?;
        let desc = desc().part_size_limit(16).regions(regions());
        let ranges = reader.run_task(&ValueRange, &desc)?.output;
        assert_eq!(ranges.len(), 4);
        for ((region, range), expected) in ranges.iter().zip(regions()) {
            assert_eq!(region, &expected);
            let values = brute(&mut reader, region)?;
            let min = values.iter().copied().min().unwrap_or(i32::MAX);
            let max = values.iter().copied().max().unwrap_or(i32::MIN);
            assert_eq!(*range, (min, max), "{region:?}");
        }
        assert_eq!(ranges[1].1, (0, 1000));
        assert_eq!(ranges[3].1, (0, 0));
        Ok(())
    }

    #[test]
    #[allow(clippy::cast_precision_loss)]
    fn test_percent_cov() -> Result<()> {
        let mut reader = sample()?;
        let thresholds = vec![-3, 0, 1, 3, 1000];
        let task = PercentCov::new(thresholds.clone());
        let desc = desc().part_size_limit(16).regions(regions());
        let covs = reader.run_task(&task, &desc)?.output;
        assert_eq!(covs.len(), 4);
        for (region, fractions) in &covs {
            let values = brute(&mut reader, region)?;
            let expected: Vec<f64> = thresholds
                .iter()
                .map(|&t| values.iter().filter(|&&v| v >= t).count() as f64 / values.len() as f64)
                .collect();
            assert_eq!(fractions, &expected, "{region:?}");
        }
        assert_eq!(covs[0].1, [1.0, 10.0 / 60.0, 0.0, 0.0, 0.0]);
        Ok(())
    }

    #[test]
    fn test_scoped_sum() -> Result<()> {
        let mut reader = sample()?;
        let desc = desc().part_size_limit(7).regions(regions());
        let sums = reader.run_task(&Sum, &desc)?.output;
        let names: Vec<_> = sums.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, ["chr2", "chr1", "chr1", "chr1"]);
        for ((_, sum), region) in sums.iter().zip(regions()) {
            let values = brute(&mut reader, &region)?;
            assert_eq!(*sum, values.iter().map(|&v| i64::from(v)).sum::<i64>());
        }
        Ok(())
    }
}
