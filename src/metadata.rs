//! # File metadata
//!
//! The metadata descriptor holds the ordered chromosome list, the value dictionary and
//! the denominator. It is stored as JSON in the `.metadata` chunk:
//!
//! ```json
//! {"format_version":2,"chroms":[{"name":"chr1","size":1000}],
//!  "dictionary":{"simple_range":{"low":0,"high":64}},"denominator":1.0}
//! ```
//!
//! Version 1 descriptors carry no denominator and read back with a denominator of 1.
//!
//! Chromosomes are concatenated in declaration order into one virtual coordinate space.
//! [`VirtualPos`] and [`ChromPos`] are kept as distinct types so that arithmetic never
//! silently crosses a chromosome boundary.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::dict::Dictionary;
use crate::error::{Error, MetadataError, ReadError, Result};

/// Metadata format version emitted by writers
pub const FORMAT_VERSION: u32 = 2;

/// A named reference sequence
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chrom {
    /// Sequence name
    pub name: String,

    /// Length in base pairs
    pub size: u32,
}
impl Chrom {
    pub fn new(name: impl Into<String>, size: u32) -> Self {
        Self {
            name: name.into(),
            size,
        }
    }
}

/// Position in the concatenation of all chromosomes
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtualPos(pub u64);

/// Position within one chromosome
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChromPos {
    /// Index of the chromosome in the metadata
    pub chrom: usize,

    /// 0-based offset within the chromosome
    pub offset: u32,
}
impl ChromPos {
    #[must_use]
    pub fn new(chrom: usize, offset: u32) -> Self {
        Self { chrom, offset }
    }
}

/// On-disk JSON form
#[derive(Serialize, Deserialize)]
struct MetadataRepr {
    format_version: u32,
    chroms: Vec<Chrom>,
    dictionary: Dictionary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    denominator: Option<f64>,
}

/// Validated file metadata
#[derive(Clone, Debug, PartialEq)]
pub struct Metadata {
    chroms: Vec<Chrom>,
    dictionary: Dictionary,
    denominator: f64,

    /// Virtual start of every chromosome, plus the total size at the end
    starts: Vec<u64>,
}
impl Metadata {
    /// Validates and builds a descriptor
    ///
    /// A denominator of 0 marks an integer file and is stored as 1.
    ///
    /// # Errors
    ///
    /// * [`MetadataError::NoChroms`] for an empty chromosome list
    /// * [`MetadataError::EmptyChrom`] for a zero-length chromosome
    /// * [`MetadataError::DuplicateChrom`] for a repeated name
    /// * [`MetadataError::InvalidDenominator`] for a negative or non-finite denominator
    pub fn new(chroms: Vec<Chrom>, dictionary: Dictionary, denominator: f64) -> Result<Self> {
        if chroms.is_empty() {
            return Err(MetadataError::NoChroms.into());
        }
        let mut seen = HashSet::with_capacity(chroms.len());
        for chrom in &chroms {
            if chrom.size == 0 {
                return Err(MetadataError::EmptyChrom(chrom.name.clone()).into());
            }
            if !seen.insert(chrom.name.as_str()) {
                return Err(MetadataError::DuplicateChrom(chrom.name.clone()).into());
            }
        }
        if !denominator.is_finite() || denominator < 0.0 {
            return Err(MetadataError::InvalidDenominator(denominator).into());
        }
        let denominator = if denominator == 0.0 { 1.0 } else { denominator };

        let mut starts = Vec::with_capacity(chroms.len() + 1);
        let mut acc = 0u64;
        for chrom in &chroms {
            starts.push(acc);
            acc += u64::from(chrom.size);
        }
        starts.push(acc);

        Ok(Self {
            chroms,
            dictionary,
            denominator,
            starts,
        })
    }

    /// Parses the JSON payload of a `.metadata` chunk
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let repr: MetadataRepr = serde_json::from_slice(bytes)?;
        if repr.format_version == 0 || repr.format_version > FORMAT_VERSION {
            return Err(MetadataError::UnsupportedVersion(repr.format_version).into());
        }
        Self::new(repr.chroms, repr.dictionary, repr.denominator.unwrap_or(1.0))
    }

    /// Serializes the descriptor at the current format version
    pub fn to_json(&self) -> Result<Vec<u8>> {
        let repr = MetadataRepr {
            format_version: FORMAT_VERSION,
            chroms: self.chroms.clone(),
            dictionary: self.dictionary.clone(),
            denominator: Some(self.denominator),
        };
        Ok(serde_json::to_vec(&repr)?)
    }

    #[must_use]
    pub fn chroms(&self) -> &[Chrom] {
        &self.chroms
    }

    #[must_use]
    pub fn dictionary(&self) -> &Dictionary {
        &self.dictionary
    }

    #[must_use]
    pub fn denominator(&self) -> f64 {
        self.denominator
    }

    /// Sum of all chromosome sizes
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.starts[self.chroms.len()]
    }

    /// Index of a chromosome by name
    pub fn chrom_index(&self, name: &str) -> Result<usize> {
        self.chroms
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| MetadataError::NoSuchChrom(name.to_string()).into())
    }

    /// Virtual `[start, end)` of a chromosome
    #[must_use]
    pub fn chrom_bounds(&self, chrom: usize) -> (u64, u64) {
        (self.starts[chrom], self.starts[chrom + 1])
    }

    /// Virtual bounds of all chromosomes in order
    #[must_use]
    pub fn all_bounds(&self) -> Vec<(u64, u64)> {
        self.starts.windows(2).map(|w| (w[0], w[1])).collect()
    }

    /// Validates a position and converts it to virtual coordinates
    ///
    /// The offset may equal the chromosome size, which denotes its end.
    pub fn to_virtual(&self, pos: ChromPos) -> Result<VirtualPos> {
        let chrom = self
            .chroms
            .get(pos.chrom)
            .ok_or_else(|| MetadataError::NoSuchChrom(format!("#{}", pos.chrom)))?;
        if pos.offset > chrom.size {
            return Err(Error::from(ReadError::OutOfRange {
                chrom: chrom.name.clone(),
                pos: u64::from(pos.offset),
                size: u64::from(chrom.size),
            }));
        }
        Ok(VirtualPos(self.starts[pos.chrom] + u64::from(pos.offset)))
    }

    /// Converts a virtual position to the chromosome holding it
    ///
    /// A position on a chromosome boundary maps to the start of the later chromosome,
    /// and the total size maps to the end of the last chromosome.
    #[must_use]
    pub fn to_chrom_pos(&self, pos: VirtualPos) -> ChromPos {
        let last = self.chroms.len() - 1;
        let chrom = match self.starts[..=last].binary_search(&pos.0) {
            Ok(idx) => idx,
            Err(idx) => idx - 1,
        };
        let chrom = chrom.min(last);
        ChromPos::new(chrom, (pos.0 - self.starts[chrom]) as u32)
    }
}
