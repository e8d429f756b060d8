//! # Return-code interface
//!
//! Thin wrappers over [`D4File`] for callers that want C-style results instead of
//! [`Result`](crate::Result): counts are returned as non-negative integers and failures
//! as `-1`, with the error itself left in the per-thread slot of [`crate::last_error`].
//! Every function clears that slot on entry, except for a refused writer seek which
//! leaves it as it was.

use std::path::Path;

use crate::file::D4File;
use crate::index::{build_sfi, IndexKind, IndexResult};
use crate::interval::Interval;
use crate::last_error::{guard, last_error, restore};
use crate::metadata::Metadata;
use crate::task::{PartitionTask, TaskDesc, TaskOutcome};
use crate::writer::SeekOutcome;

fn count(result: Option<usize>) -> isize {
    result
        .and_then(|n| isize::try_from(n).ok())
        .unwrap_or(-1)
}

fn status(result: Option<()>) -> i32 {
    if result.is_some() {
        0
    } else {
        -1
    }
}

/// Opens a file, `None` on failure
pub fn open<P: AsRef<Path>>(path: P, mode: &str) -> Option<D4File> {
    guard(|| D4File::open(path, mode))
}

/// Closes a file, finalizing it for writers
pub fn close(file: D4File) -> i32 {
    status(guard(|| file.close()))
}

pub fn load_metadata(file: &D4File) -> Option<Metadata> {
    guard(|| file.load_metadata())
}

pub fn update_metadata(file: &mut D4File, metadata: Metadata) -> i32 {
    status(guard(|| file.update_metadata(metadata)))
}

/// Current cursor as `(chromosome name, offset)`
pub fn tell(file: &D4File) -> Option<(String, u32)> {
    guard(|| file.tell().map(|(chrom, pos)| (chrom.to_string(), pos)))
}

/// Moves the cursor
///
/// Returns 0 when the cursor moved. A writer refusing a backward seek is not a failure:
/// the current write position is returned and the error slot is left unchanged.
pub fn seek(file: &mut D4File, chrom: &str, pos: u32) -> i64 {
    let previous = last_error();
    match guard(|| file.seek(chrom, pos)) {
        Some(SeekOutcome::Moved) => 0,
        Some(SeekOutcome::Refused { position }) => {
            restore(previous);
            i64::try_from(position.0).unwrap_or(i64::MAX)
        }
        None => -1,
    }
}

pub fn read_values(file: &mut D4File, buf: &mut [i32]) -> isize {
    count(guard(|| file.read_values(buf)))
}

pub fn read_intervals(file: &mut D4File, buf: &mut [Interval]) -> isize {
    count(guard(|| file.read_intervals(buf)))
}

pub fn write_values(file: &mut D4File, values: &[i32]) -> isize {
    count(guard(|| file.write_values(values)))
}

pub fn write_intervals(file: &mut D4File, intervals: &[Interval]) -> isize {
    count(guard(|| file.write_intervals(intervals)))
}

/// 1 if the index is present, 0 otherwise
pub fn index_check(file: &D4File, kind: IndexKind) -> i32 {
    i32::from(file.index_check(kind))
}

pub fn index_query(
    file: &mut D4File,
    kind: IndexKind,
    chrom: &str,
    start: u32,
    end: u32,
) -> Option<IndexResult> {
    guard(|| file.index_query(kind, chrom, start, end))
}

/// Builds and appends the summary index of a finalized file
pub fn index_build_sfi<P: AsRef<Path>>(path: P) -> i32 {
    status(guard(|| build_sfi(path, 0)))
}

/// Runs a partitioned task, `None` if the task could not run or finalize failed
pub fn run_task<T: PartitionTask>(
    file: &mut D4File,
    task: &T,
    desc: &TaskDesc,
) -> Option<TaskOutcome<T::Output>> {
    guard(|| file.run_task(task, desc))
}
