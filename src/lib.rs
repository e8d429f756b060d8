//! # d4
//!
//! Storage engine for D4 (Dense Depth Data Dump) files: one integer sample per base pair
//! of a genome, stored as fixed-width dictionary codes with a sparse table of exceptions.
//!
//! * [`D4WriterBuilder`] / [`D4Writer`] write a file forward-only
//! * [`D4Reader`] reads values and runs of values at a `(chromosome, offset)` cursor
//! * [`task`] runs strategies over genome partitions on a pool of worker threads
//! * [`index`] builds and queries the fixed-interval summary index
//! * [`D4File`] and [`compat`] expose the same operations by open mode and with C-style
//!   return codes

pub mod bedgraph;
pub mod compat;
mod dict;
mod error;
mod file;
pub mod frame;
pub mod index;
mod interval;
pub mod last_error;
mod metadata;
mod policy;
pub mod ptab;
mod reader;
pub mod stab;
pub mod stream;
pub mod task;
mod track;
mod writer;

pub use dict::{Decoded, Dictionary, DictionaryKind, MAX_CODE_WIDTH};
pub use error::{
    DictError, Error, ErrorKind, FrameError, IndexError, MetadataError, ReadError, Result,
    TaskError, WriteError,
};
pub use file::D4File;
pub use index::{build_sfi, IndexKind, IndexResult, SfiIndex, SFI_BUCKET_BP};
pub use interval::Interval;
pub use metadata::{Chrom, ChromPos, Metadata, VirtualPos, FORMAT_VERSION};
pub use policy::SpillPolicy;
pub use reader::D4Reader;
pub use task::{PartitionTask, Region, TaskDesc, TaskMode, TaskOutcome};
pub use track::TrackReader;
pub use writer::{D4Writer, D4WriterBuilder, SeekOutcome, WriterState};
