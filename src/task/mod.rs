//! # Partitioned tasks
//!
//! A task splits the genome into partitions of at most `part_size_limit` base pairs
//! (never crossing a chromosome boundary) and runs a [`PartitionTask`] strategy over them
//! on a pool of worker threads:
//!
//! 1. [`PartitionTask::create_context`] builds a per-partition context
//! 2. [`PartitionTask::process`] does the work through a [`PartitionHandle`]
//! 3. [`PartitionTask::finalize`] receives every context with its status, in partition
//!    order, exactly once on the calling thread
//!
//! If a partition fails, workers stop picking up new partitions. Partitions that never
//! ran are reported as [`PartStatus::Skipped`].
//!
//! A task may also be scoped to a list of [`Region`]s, each split into partitions on its
//! own. Read tasks only.
//!
//! Write tasks stage each partition in memory, pre-filled with the default value. Stagings
//! are committed to the writer in partition order, which makes the output identical to a
//! sequential writer.

mod builtin;
mod partition;
mod scheduler;

pub use builtin::{Histogram, HistogramCounts, MeanDepth, PercentCov, Sum, ValueRange};
pub use partition::PartitionHandle;
pub(crate) use scheduler::{run_read_task, run_write_task};

use crate::error::{Error, ErrorKind, Result, TaskError};
use crate::metadata::Metadata;

/// Whether a task reads an existing file or produces a new one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskMode {
    Read,
    Write,
}

/// A half-open range `[start, end)` of one chromosome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub chrom: String,
    pub start: u32,
    pub end: u32,
}
impl Region {
    #[must_use]
    pub fn new(chrom: &str, start: u32, end: u32) -> Self {
        Self {
            chrom: chrom.to_string(),
            start,
            end,
        }
    }

    #[must_use]
    pub fn len(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Configuration of a partitioned task
#[derive(Debug, Clone)]
pub struct TaskDesc {
    pub mode: TaskMode,

    /// Largest partition size in base pairs
    pub part_size_limit: u32,

    /// Number of worker threads, 0 for one per CPU
    pub num_cpus: usize,

    /// Regions to cover, every chromosome in full if empty
    pub regions: Vec<Region>,
}
impl TaskDesc {
    /// Default partition size limit
    pub const DEFAULT_PART_SIZE: u32 = 10_000_000;

    #[must_use]
    pub fn new(mode: TaskMode) -> Self {
        Self {
            mode,
            part_size_limit: Self::DEFAULT_PART_SIZE,
            num_cpus: 0,
            regions: Vec::new(),
        }
    }

    #[must_use]
    pub fn regions(mut self, regions: Vec<Region>) -> Self {
        self.regions = regions;
        self
    }

    #[must_use]
    pub fn part_size_limit(mut self, limit: u32) -> Self {
        self.part_size_limit = limit;
        self
    }

    #[must_use]
    pub fn num_cpus(mut self, num_cpus: usize) -> Self {
        self.num_cpus = num_cpus;
        self
    }

    /// Resolves the worker count for `num_parts` partitions
    #[must_use]
    pub fn worker_count(&self, num_parts: usize) -> usize {
        let requested = if self.num_cpus == 0 {
            num_cpus::get()
        } else {
            self.num_cpus
        };
        requested.min(num_parts).max(1)
    }

    /// Enumerates the partitions this task covers
    pub fn partitions(&self, metadata: &Metadata) -> Result<Vec<Partition>> {
        if self.regions.is_empty() {
            enumerate_partitions(metadata, self.part_size_limit)
        } else {
            enumerate_region_partitions(metadata, &self.regions, self.part_size_limit)
        }
    }
}

/// A contiguous slice of one chromosome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    /// Position in the enumeration order
    pub index: usize,

    /// Chromosome index in the metadata
    pub chrom: usize,

    /// Chromosome name
    pub chrom_name: String,

    /// Index of the region the partition belongs to, the chromosome index when the task
    /// covers whole chromosomes
    pub region: usize,

    /// First position covered
    pub start: u32,

    /// One past the last position covered
    pub end: u32,
}
impl Partition {
    #[must_use]
    pub fn len(&self) -> u32 {
        self.end - self.start
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }
}

/// Splits every chromosome into partitions of at most `limit` base pairs
///
/// Partitions come in chromosome declaration order, then ascending start.
pub fn enumerate_partitions(metadata: &Metadata, limit: u32) -> Result<Vec<Partition>> {
    let regions: Vec<Region> = metadata
        .chroms()
        .iter()
        .map(|c| Region::new(&c.name, 0, c.size))
        .collect();
    enumerate_region_partitions(metadata, &regions, limit)
}

/// Splits each region into partitions of at most `limit` base pairs
///
/// Partitions come in region order, then ascending start. Regions may overlap.
///
/// # Errors
///
/// * [`TaskError::InvalidPartSize`] if `limit` is 0
/// * [`TaskError::InvalidRegion`] if a region is empty or extends past its chromosome
pub fn enumerate_region_partitions(
    metadata: &Metadata,
    regions: &[Region],
    limit: u32,
) -> Result<Vec<Partition>> {
    if limit == 0 {
        return Err(TaskError::InvalidPartSize.into());
    }
    let mut parts = Vec::new();
    for (region, r) in regions.iter().enumerate() {
        let chrom = metadata.chrom_index(&r.chrom)?;
        if r.is_empty() || r.end > metadata.chroms()[chrom].size {
            return Err(TaskError::InvalidRegion {
                chrom: r.chrom.clone(),
                start: r.start,
                end: r.end,
            }
            .into());
        }
        let mut start = r.start;
        while start < r.end {
            let end = start.saturating_add(limit).min(r.end);
            parts.push(Partition {
                index: parts.len(),
                chrom,
                chrom_name: r.chrom.clone(),
                region,
                start,
                end,
            });
            start = end;
        }
    }
    tracing::debug!(
        "enumerated {} partitions of at most {limit} bp over {} regions",
        parts.len(),
        regions.len()
    );
    Ok(parts)
}

/// Outcome of one partition
#[derive(Debug)]
pub enum PartStatus {
    /// `process` returned successfully
    Done,

    /// Context creation or `process` failed
    Failed(Error),

    /// The partition never ran because the task was cancelled
    Skipped,
}
impl PartStatus {
    /// Numeric status, 0 for success
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::Done => 0,
            Self::Failed(e) => e.kind().code(),
            Self::Skipped => ErrorKind::Cancelled.code(),
        }
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// Converts the status into a result, skipped partitions become [`TaskError::Cancelled`]
    pub fn into_result(self) -> Result<()> {
        match self {
            Self::Done => Ok(()),
            Self::Failed(e) => Err(e),
            Self::Skipped => Err(TaskError::Cancelled.into()),
        }
    }
}

/// Context and status of one partition, as handed to [`PartitionTask::finalize`]
#[derive(Debug)]
pub struct PartitionResult<C> {
    pub partition: Partition,

    /// The partition context, `None` if it was never created
    pub context: Option<C>,

    pub status: PartStatus,
}

/// Summary of a finished task
#[derive(Debug)]
pub struct TaskOutcome<O> {
    /// Value returned by [`PartitionTask::finalize`]
    pub output: O,

    /// Number of partitions enumerated
    pub partitions: usize,

    /// Number of partitions that failed
    pub failed: usize,

    /// Number of partitions skipped after a failure
    pub skipped: usize,
}

/// A strategy run over every partition of a file
///
/// The strategy object itself carries any data shared by all partitions.
pub trait PartitionTask: Sync {
    /// Per-partition state
    type Context: Send;

    /// Result of the whole task
    type Output;

    /// Creates the context of a partition
    fn create_context(&self, partition: &Partition) -> Result<Self::Context>;

    /// Processes a partition
    ///
    /// Returning an error marks the partition as failed and cancels partitions that have
    /// not started yet.
    fn process(&self, handle: &mut PartitionHandle<'_>, context: &mut Self::Context)
        -> Result<()>;

    /// Combines the results of every partition, given in partition order
    fn finalize(&self, results: Vec<PartitionResult<Self::Context>>) -> Result<Self::Output>;
}
