use std::collections::BTreeMap;
use std::io::{Seek, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread;

use parking_lot::{Condvar, Mutex};

use super::{
    enumerate_partitions, PartStatus, Partition, PartitionHandle, PartitionResult,
    PartitionTask, TaskDesc, TaskOutcome,
};
use crate::error::{Error, Result, TaskError, WriteError};
use crate::track::TrackReader;
use crate::writer::{D4Writer, SeekOutcome};

/// Where partition handles get their data from
#[derive(Clone, Copy)]
enum Source<'a> {
    Read(&'a TrackReader),
    Write { default: i32 },
}

/// Staged values of a finished write partition, `None` if it failed
type Staged = (usize, Option<Vec<i32>>);

/// Shared state of the worker pool
struct Pool<'a> {
    parts: &'a [Partition],
    next: AtomicUsize,
    cancelled: AtomicBool,
    source: Source<'a>,

    /// How many partitions past the commit point may be claimed, unbounded if `None`
    window: Option<usize>,

    /// Number of partitions committed so far
    committed: Mutex<usize>,
    advanced: Condvar,
}
impl Pool<'_> {
    /// Claims the next partition unless the task has been cancelled
    ///
    /// With a window, the claim blocks until the partition is within `window` of the
    /// commit point, which bounds the number of stagings held in memory.
    fn claim(&self) -> Option<&Partition> {
        if self.cancelled.load(Ordering::Acquire) {
            return None;
        }
        let index = self.next.fetch_add(1, Ordering::AcqRel);
        let partition = self.parts.get(index)?;
        if let Some(window) = self.window {
            let mut committed = self.committed.lock();
            while index >= *committed + window {
                if self.cancelled.load(Ordering::Acquire) {
                    return None;
                }
                self.advanced.wait(&mut committed);
            }
        }
        Some(partition)
    }

    /// Stops further claims and wakes workers blocked on the window
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        let _committed = self.committed.lock();
        self.advanced.notify_all();
    }

    /// Moves the commit point forward
    fn advance(&self, committed: usize) {
        *self.committed.lock() = committed;
        self.advanced.notify_all();
    }

    fn handle<'p>(&'p self, partition: &'p Partition) -> PartitionHandle<'p> {
        match self.source {
            Source::Read(track) => PartitionHandle::reader(partition, track),
            Source::Write { default } => PartitionHandle::writer(partition, default),
        }
    }
}

/// Cancels the pool if a worker unwinds, so no other worker waits on its partition
struct PanicGuard<'p, 'a>(&'p Pool<'a>);
impl Drop for PanicGuard<'_, '_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.cancel();
        }
    }
}

/// Processes partitions until the queue is drained or the task is cancelled
fn worker<T: PartitionTask>(
    task: &T,
    pool: &Pool<'_>,
    tx: Option<Sender<Staged>>,
) -> Vec<PartitionResult<T::Context>> {
    let _guard = PanicGuard(pool);
    let mut results = Vec::new();
    while let Some(partition) = pool.claim() {
        let mut handle = pool.handle(partition);
        let (context, status) = match task.create_context(partition) {
            Ok(mut context) => match task.process(&mut handle, &mut context) {
                Ok(()) => (Some(context), PartStatus::Done),
                Err(e) => (Some(context), PartStatus::Failed(e)),
            },
            Err(e) => (None, PartStatus::Failed(e)),
        };

        if let PartStatus::Failed(e) = &status {
            tracing::error!(
                "partition {}:{}-{} failed: {e}",
                partition.chrom_name,
                partition.start,
                partition.end
            );
            pool.cancel();
        }
        if let Some(tx) = &tx {
            let staging = if status.is_done() {
                handle.into_staging()
            } else {
                None
            };
            // The receiver only hangs up after every worker has finished
            let _ = tx.send((partition.index, staging));
        }
        results.push(PartitionResult {
            partition: partition.clone(),
            context,
            status,
        });
    }
    results
}

/// Runs `task` over `parts` and commits write stagings through `commit`
///
/// `commit` is called on the calling thread, in partition order, for every partition
/// that finished successfully.
fn execute<T, F>(
    task: &T,
    parts: &[Partition],
    desc: &TaskDesc,
    source: Source<'_>,
    mut commit: F,
) -> Result<Vec<PartitionResult<T::Context>>>
where
    T: PartitionTask,
    F: FnMut(&Partition, Vec<i32>) -> Result<()>,
{
    let num_workers = desc.worker_count(parts.len());
    let staged = matches!(source, Source::Write { .. });
    let pool = Pool {
        parts,
        next: AtomicUsize::new(0),
        cancelled: AtomicBool::new(false),
        source,
        window: staged.then_some(num_workers),
        committed: Mutex::new(0),
        advanced: Condvar::new(),
    };
    tracing::debug!(
        "running task over {} partitions with {num_workers} workers",
        parts.len()
    );

    let mut slots: Vec<Option<PartitionResult<T::Context>>> =
        parts.iter().map(|_| None).collect();
    let mut commit_error = None;
    let mut panicked = false;

    thread::scope(|scope| {
        let (tx, rx) = mpsc::channel::<Staged>();
        let pool = &pool;
        let handles: Vec<_> = (0..num_workers)
            .map(|_| {
                let tx = staged.then(|| tx.clone());
                scope.spawn(move || worker(task, pool, tx))
            })
            .collect();
        drop(tx);

        // Commit stagings as soon as all earlier partitions are done
        let mut pending = BTreeMap::new();
        let mut next_commit = 0;
        for (index, staging) in rx {
            pending.insert(index, staging);
            let before = next_commit;
            while let Some(staging) = pending.remove(&next_commit) {
                commit_one(
                    &mut commit,
                    &parts[next_commit],
                    staging,
                    &mut commit_error,
                    pool,
                );
                next_commit += 1;
            }
            if next_commit > before {
                pool.advance(next_commit);
            }
        }
        // Partitions after a skipped one are committed in ascending order
        for (index, staging) in pending {
            commit_one(&mut commit, &parts[index], staging, &mut commit_error, pool);
        }

        for handle in handles {
            match handle.join() {
                Ok(results) => {
                    for result in results {
                        let index = result.partition.index;
                        slots[index] = Some(result);
                    }
                }
                Err(_) => panicked = true,
            }
        }
    });

    if panicked {
        return Err(TaskError::WorkerPanic.into());
    }
    if let Some(e) = commit_error {
        return Err(e);
    }

    let results: Vec<_> = slots
        .into_iter()
        .zip(parts)
        .map(|(slot, partition)| {
            slot.unwrap_or_else(|| PartitionResult {
                partition: partition.clone(),
                context: None,
                status: PartStatus::Skipped,
            })
        })
        .collect();
    let skipped = results
        .iter()
        .filter(|r| matches!(r.status, PartStatus::Skipped))
        .count();
    if skipped > 0 {
        tracing::warn!("task cancelled, {skipped} partitions were skipped");
    }
    Ok(results)
}

fn commit_one<F>(
    commit: &mut F,
    partition: &Partition,
    staging: Option<Vec<i32>>,
    error: &mut Option<Error>,
    pool: &Pool<'_>,
) where
    F: FnMut(&Partition, Vec<i32>) -> Result<()>,
{
    let Some(staging) = staging else {
        return;
    };
    if error.is_some() {
        return;
    }
    if let Err(e) = commit(partition, staging) {
        pool.cancel();
        *error = Some(e);
    }
}

fn outcome<T: PartitionTask>(
    task: &T,
    results: Vec<PartitionResult<T::Context>>,
) -> Result<TaskOutcome<T::Output>> {
    let partitions = results.len();
    let failed = results
        .iter()
        .filter(|r| matches!(r.status, PartStatus::Failed(_)))
        .count();
    let skipped = results
        .iter()
        .filter(|r| matches!(r.status, PartStatus::Skipped))
        .count();
    let output = task.finalize(results)?;
    Ok(TaskOutcome {
        output,
        partitions,
        failed,
        skipped,
    })
}

/// Runs a read task over every partition of a track
pub(crate) fn run_read_task<T: PartitionTask>(
    track: &Arc<TrackReader>,
    task: &T,
    desc: &TaskDesc,
) -> Result<TaskOutcome<T::Output>> {
    let parts = desc.partitions(track.metadata())?;
    let results = execute(task, &parts, desc, Source::Read(track), |_, _| Ok(()))?;
    outcome(task, results)
}

/// Runs a write task and commits every partition to `writer`
///
/// Failed and skipped partitions are left to the default value the writer fills gaps
/// with.
pub(crate) fn run_write_task<W, T>(
    writer: &mut D4Writer<W>,
    task: &T,
    desc: &TaskDesc,
) -> Result<TaskOutcome<T::Output>>
where
    W: Write + Seek,
    T: PartitionTask,
{
    if !desc.regions.is_empty() {
        return Err(TaskError::RegionsInWriteTask.into());
    }
    let metadata = writer.metadata()?.clone();
    let parts = enumerate_partitions(&metadata, desc.part_size_limit)?;
    let source = Source::Write {
        default: metadata.dictionary().default_value(),
    };
    let results = execute(task, &parts, desc, source, |partition, staging| {
        match writer.seek(&partition.chrom_name, partition.start)? {
            SeekOutcome::Moved => {}
            SeekOutcome::Refused { position } => {
                let target = metadata
                    .chrom_bounds(partition.chrom)
                    .0
                    .saturating_add(u64::from(partition.start));
                return Err(WriteError::BackwardWrite {
                    target,
                    current: position.0,
                }
                .into());
            }
        }
        writer.write_values(&staging)?;
        Ok(())
    })?;
    outcome(task, results)
}

#[cfg(test)]
mod testing {
    use std::io::Cursor;

    use super::*;
    use crate::dict::Dictionary;
    use crate::error::ErrorKind;
    use crate::metadata::Chrom;
    use crate::reader::D4Reader;
    use crate::task::{Region, TaskMode};
    use crate::writer::D4WriterBuilder;

    /// Writes `start + i` at every position, failing on a chosen chromosome
    struct Ramp {
        fail_on: Option<&'static str>,
    }
    impl PartitionTask for Ramp {
        type Context = usize;
        type Output = Vec<(usize, i32)>;

        fn create_context(&self, _partition: &Partition) -> Result<usize> {
            Ok(0)
        }

        fn process(&self, handle: &mut PartitionHandle<'_>, written: &mut usize) -> Result<()> {
            if Some(handle.chrom()) == self.fail_on {
                return Err(anyhow::anyhow!("refusing {}", handle.chrom()).into());
            }
            let (start, end) = handle.range();
            let values: Vec<i32> = (start..end).map(|p| (p % 7) as i32).collect();
            *written = handle.write_values(start, &values)?;
            Ok(())
        }

        fn finalize(&self, results: Vec<PartitionResult<usize>>) -> Result<Self::Output> {
            Ok(results
                .into_iter()
                .map(|r| (r.partition.index, r.status.code()))
                .collect())
        }
    }

    /// Collects the partition ranges it sees
    struct Ranges;
    impl PartitionTask for Ranges {
        type Context = Vec<i32>;
        type Output = Vec<i32>;

        fn create_context(&self, partition: &Partition) -> Result<Vec<i32>> {
            Ok(Vec::with_capacity(partition.len() as usize))
        }

        fn process(&self, handle: &mut PartitionHandle<'_>, values: &mut Vec<i32>) -> Result<()> {
            let (start, end) = handle.range();
            values.resize((end - start) as usize, 0);
            handle.read_values(start, values)?;
            Ok(())
        }

        fn finalize(&self, results: Vec<PartitionResult<Vec<i32>>>) -> Result<Vec<i32>> {
            let mut out = Vec::new();
            for r in results {
                r.status.into_result()?;
                out.extend(r.context.unwrap_or_default());
            }
            Ok(out)
        }
    }

    fn writer() -> Result<D4Writer<Cursor<Vec<u8>>>> {
        D4WriterBuilder::default()
            .chroms(vec![Chrom::new("chr1", 1000), Chrom::new("chr2", 333)])
            .dictionary(Dictionary::simple_range(0, 8)?)
            .build(Cursor::new(Vec::new()))
    }

    #[test]
    fn test_parallel_write_matches_sequential() -> Result<()> {
        let mut parallel = writer()?;
        let desc = TaskDesc::new(TaskMode::Write)
            .part_size_limit(64)
            .num_cpus(4);
        let outcome = parallel.run_task(&Ramp { fail_on: None }, &desc)?;
        assert_eq!(outcome.partitions, 16 + 6);
        assert_eq!(outcome.failed, 0);
        assert!(outcome.output.iter().all(|&(_, code)| code == 0));
        let parallel = parallel.into_inner()?.into_inner();

        let mut sequential = writer()?;
        for (name, size) in [("chr1", 1000u32), ("chr2", 333)] {
            sequential.seek(name, 0)?;
            let values: Vec<i32> = (0..size).map(|p| (p % 7) as i32).collect();
            sequential.write_values(&values)?;
        }
        let sequential = sequential.into_inner()?.into_inner();
        assert_eq!(parallel, sequential);
        Ok(())
    }

    #[test]
    fn test_read_task_sees_every_value() -> Result<()> {
        let mut w = writer()?;
        w.run_task(
            &Ramp { fail_on: None },
            &TaskDesc::new(TaskMode::Write).part_size_limit(100),
        )?;
        let reader = D4Reader::from_stream(Arc::new(w.into_inner()?.into_inner()))?;

        let desc = TaskDesc::new(TaskMode::Read).part_size_limit(77).num_cpus(3);
        let outcome = reader.run_task(&Ranges, &desc)?;
        let expected: Vec<i32> = (0..1000u32)
            .chain(0..333)
            .map(|p| (p % 7) as i32)
            .collect();
        assert_eq!(outcome.output, expected);
        Ok(())
    }

    #[test]
    fn test_failed_partitions_keep_default() -> Result<()> {
        let mut w = writer()?;
        let desc = TaskDesc::new(TaskMode::Write).part_size_limit(500).num_cpus(1);
        let outcome = w.run_task(
            &Ramp {
                fail_on: Some("chr2"),
            },
            &desc,
        )?;
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.output[0], (0, 0));
        assert_eq!(outcome.output[2].1, ErrorKind::Internal.code());

        let mut reader = D4Reader::from_stream(Arc::new(w.into_inner()?.into_inner()))?;
        reader.seek("chr1", 999)?;
        let mut buf = [9; 1];
        reader.read_values(&mut buf)?;
        assert_eq!(buf, [999 % 7]);
        reader.seek("chr2", 0)?;
        let mut buf = [9; 8];
        reader.read_values(&mut buf)?;
        assert_eq!(buf, [0; 8]);
        Ok(())
    }

    #[test]
    fn test_cancellation_skips_remaining() -> Result<()> {
        let mut w = D4WriterBuilder::default()
            .chroms(vec![Chrom::new("bad", 10), Chrom::new("chr1", 1000)])
            .build(Cursor::new(Vec::new()))?;
        let desc = TaskDesc::new(TaskMode::Write).part_size_limit(10).num_cpus(1);
        let outcome = w.run_task(&Ramp { fail_on: Some("bad") }, &desc)?;
        assert_eq!(outcome.partitions, 101);
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.skipped, 100);
        assert!(outcome.output[1..]
            .iter()
            .all(|&(_, code)| code == ErrorKind::Cancelled.code()));
        Ok(())
    }

    /// Stalls partition 0 and records the furthest partition started meanwhile
    struct SlowFirst {
        first_done: AtomicBool,
        furthest: AtomicUsize,
    }
    impl PartitionTask for SlowFirst {
        type Context = ();
        type Output = ();

        fn create_context(&self, _partition: &Partition) -> Result<()> {
            Ok(())
        }

        fn process(&self, handle: &mut PartitionHandle<'_>, _ctx: &mut ()) -> Result<()> {
            let index = handle.partition().index;
            if index == 0 {
                thread::sleep(std::time::Duration::from_millis(200));
                self.first_done.store(true, Ordering::SeqCst);
            } else if !self.first_done.load(Ordering::SeqCst) {
                self.furthest.fetch_max(index, Ordering::SeqCst);
            }
            let (start, end) = handle.range();
            handle.write_values(start, &vec![1; (end - start) as usize])?;
            Ok(())
        }

        fn finalize(&self, _results: Vec<PartitionResult<()>>) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_workers_stay_within_commit_window() -> Result<()> {
        let mut w = writer()?;
        let task = SlowFirst {
            first_done: AtomicBool::new(false),
            furthest: AtomicUsize::new(0),
        };
        let desc = TaskDesc::new(TaskMode::Write)
            .part_size_limit(10)
            .num_cpus(4);
        let outcome = w.run_task(&task, &desc)?;
        assert_eq!(outcome.partitions, 100 + 34);
        assert_eq!(outcome.failed, 0);
        assert!(task.furthest.load(Ordering::SeqCst) < 4);

        let mut reader = D4Reader::from_stream(Arc::new(w.into_inner()?.into_inner()))?;
        reader.seek("chr2", 300)?;
        let mut buf = [0; 33];
        assert_eq!(reader.read_values(&mut buf)?, 33);
        assert_eq!(buf, [1; 33]);
        Ok(())
    }

    #[test]
    fn test_mode_checks() -> Result<()> {
        let mut w = writer()?;
        let err = w
            .run_task(&Ranges, &TaskDesc::new(TaskMode::Read))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadMode);
        let regional = TaskDesc::new(TaskMode::Write).regions(vec![Region::new("chr1", 0, 10)]);
        let err = w.run_task(&Ramp { fail_on: None }, &regional).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadMode);

        // Writing through a read task handle is refused
        let reader = D4Reader::from_stream(Arc::new(w.into_inner()?.into_inner()))?;
        let outcome = reader.run_task(
            &Ramp { fail_on: None },
            &TaskDesc::new(TaskMode::Read).num_cpus(2),
        )?;
        assert!(outcome
            .output
            .iter()
            .all(|&(_, code)| code == ErrorKind::BadMode.code() || code == ErrorKind::Cancelled.code()));
        assert!(outcome.failed >= 1);
        Ok(())
    }
}
