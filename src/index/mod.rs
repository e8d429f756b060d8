//! # Summary index
//!
//! The SFI (simple fixed-interval) index stores the sum of every fixed-width bucket of
//! every chromosome in a `.sfi` chunk. Range sums then only decode the partial buckets
//! at either end of the range.
//!
//! The index is appended to an already finalized file by [`build_sfi`], which links a
//! new `.sfi` chunk and a fresh directory after the existing chain.

mod sfi;

use std::fs::OpenOptions;
use std::path::Path;

pub use sfi::{SfiIndex, SFI_BUCKET_BP};

use crate::error::Result;
use crate::frame::{FrameWriter, SFI_CHUNK};
use crate::reader::D4Reader;
use crate::stream::{AppendStream, Appender};
use crate::task::{TaskDesc, TaskMode};
use sfi::{SfiBuilder, SFI_PART_SIZE};

/// Kinds of summary index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexKind {
    /// Range sums of decoded values
    Sum,
}

/// Result of an index query, tagged by index kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexResult {
    Sum(i64),
}
impl IndexResult {
    /// The result divided by the file denominator
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn scaled(&self, denominator: f64) -> f64 {
        match self {
            Self::Sum(sum) => *sum as f64 / denominator,
        }
    }
}

/// Builds the summary index of a finalized file and appends it to the file
///
/// Bucket sums are computed with a partitioned read task using `num_cpus` workers (0 for
/// one per CPU). Building again replaces the previous index.
pub fn build_sfi<P: AsRef<Path>>(path: P, num_cpus: usize) -> Result<()> {
    let path = path.as_ref();
    let reader = D4Reader::open(path)?;
    let desc = TaskDesc::new(TaskMode::Read)
        .part_size_limit(SFI_PART_SIZE)
        .num_cpus(num_cpus);
    let sums = reader.run_task(&SfiBuilder, &desc)?.output;
    let payload = SfiIndex::encode(reader.metadata(), &sums);
    let resume = reader.frame().resume_point();
    drop(reader);

    let file = OpenOptions::new().read(true).write(true).open(path)?;
    let mut frame = FrameWriter::resume(Appender::new(file)?, resume);
    frame.write_chunk(SFI_CHUNK, &payload)?;
    let stream = frame.finish()?;

    tracing::info!(
        "built summary index for {}: {} buckets, file is now {} bytes",
        path.display(),
        sums.iter().map(Vec::len).sum::<usize>(),
        stream.position()
    );
    Ok(())
}
