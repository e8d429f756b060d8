//! # Value dictionary
//!
//! The dictionary maps every sample value onto a fixed-width primary code. Values that
//! have no code are stored as the reserved ESCAPE code (always the largest code of the
//! width) and spill to the secondary table.
//!
//! Two dictionary kinds exist:
//!
//! * `SimpleRange { low, high }` - values in `[low, high)` map to `value - low`
//! * `ValueMap { values }` - the value at list index `i` maps to code `i`
//!
//! For `n` representable values the code width is `ceil(log2(n + 1))` bits, leaving room
//! for the ESCAPE code. Widths above 16 bits are rejected.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read};

use serde::{Deserialize, Serialize};

use crate::error::{DictError, Error, Result};

/// Largest supported primary code width in bits
pub const MAX_CODE_WIDTH: u32 = 16;

/// Serialized description of a dictionary
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DictionaryKind {
    /// Every value in the half-open range `[low, high)`
    SimpleRange { low: i32, high: i32 },

    /// An explicit list of values, coded in list order
    ValueMap { values: Vec<i32> },
}

/// Result of decoding one primary code
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decoded {
    /// The code stands for a value
    Value(i32),

    /// The value lives in the secondary table
    Escape,

    /// The code lies between the last value code and ESCAPE
    Unused,
}

/// Validated dictionary with its encode and decode tables
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "DictionaryKind", into = "DictionaryKind")]
pub struct Dictionary {
    kind: DictionaryKind,

    /// Code width in bits
    width: u32,

    /// Number of representable values
    num_values: u32,

    /// Value to code lookup for value maps
    lookup: HashMap<i32, u32>,
}
impl PartialEq for Dictionary {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}
impl Eq for Dictionary {}

fn code_width(num_values: u64) -> Result<u32> {
    // n values plus one escape code
    let codes = num_values + 1;
    let width = 64 - (codes - 1).leading_zeros();
    if width > MAX_CODE_WIDTH {
        return Err(DictError::WidthTooLarge(width).into());
    }
    Ok(width)
}

impl Dictionary {
    /// Creates a dictionary for every value in `[low, high)`
    ///
    /// # Errors
    ///
    /// * [`DictError::EmptyRange`] if `low >= high`
    /// * [`DictError::WidthTooLarge`] if the range needs more than 16 bits
    pub fn simple_range(low: i32, high: i32) -> Result<Self> {
        if low >= high {
            return Err(DictError::EmptyRange { low, high }.into());
        }
        let num_values = (i64::from(high) - i64::from(low)) as u64;
        let width = code_width(num_values)?;
        Ok(Self {
            kind: DictionaryKind::SimpleRange { low, high },
            width,
            num_values: num_values as u32,
            lookup: HashMap::new(),
        })
    }

    /// Creates a dictionary from an explicit value list
    ///
    /// # Errors
    ///
    /// * [`DictError::EmptyValueMap`] if `values` is empty
    /// * [`DictError::DuplicateValue`] if a value is listed twice
    /// * [`DictError::WidthTooLarge`] if the list needs more than 16 bits
    pub fn value_map(values: Vec<i32>) -> Result<Self> {
        if values.is_empty() {
            return Err(DictError::EmptyValueMap.into());
        }
        let width = code_width(values.len() as u64)?;
        let mut lookup = HashMap::with_capacity(values.len());
        for (code, &value) in values.iter().enumerate() {
            if lookup.insert(value, code as u32).is_some() {
                return Err(DictError::DuplicateValue(value).into());
            }
        }
        Ok(Self {
            num_values: values.len() as u32,
            kind: DictionaryKind::ValueMap { values },
            width,
            lookup,
        })
    }

    /// Creates a dictionary from a value list, preferring a simple range
    ///
    /// A list of consecutive ascending integers becomes a `SimpleRange`, anything else a
    /// `ValueMap` in list order.
    pub fn from_values(values: Vec<i32>) -> Result<Self> {
        let contiguous = values.windows(2).all(|w| w[0].checked_add(1) == Some(w[1]));
        match (values.first(), values.last()) {
            (Some(&low), Some(&high)) if contiguous && high < i32::MAX => {
                Self::simple_range(low, high + 1)
            }
            _ => Self::value_map(values),
        }
    }

    /// Parses a dictionary file holding one value per line
    ///
    /// Blank lines are ignored. The parsed list goes through [`Dictionary::from_values`].
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut values = Vec::new();
        for line in BufReader::new(reader).lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let value = line
                .parse::<i32>()
                .map_err(|_| DictError::InvalidValue(line.to_string()))?;
            values.push(value);
        }
        Self::from_values(values)
    }

    /// Renders the dictionary as indented JSON
    pub fn pretty_print(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.kind)?)
    }

    /// The serialized description
    #[must_use]
    pub fn kind(&self) -> &DictionaryKind {
        &self.kind
    }

    /// Primary code width in bits
    #[must_use]
    pub fn bit_width(&self) -> u32 {
        self.width
    }

    /// The reserved ESCAPE code
    #[must_use]
    pub fn escape_code(&self) -> u32 {
        (1 << self.width) - 1
    }

    /// Number of representable values
    #[must_use]
    pub fn num_values(&self) -> u32 {
        self.num_values
    }

    /// Encodes a value as `(code, escaped)`
    ///
    /// Representable values never produce the ESCAPE code.
    #[must_use]
    pub fn encode(&self, value: i32) -> (u32, bool) {
        let code = match &self.kind {
            DictionaryKind::SimpleRange { low, high } => (value >= *low && value < *high)
                .then(|| (i64::from(value) - i64::from(*low)) as u32),
            DictionaryKind::ValueMap { .. } => self.lookup.get(&value).copied(),
        };
        match code {
            Some(code) => (code, false),
            None => (self.escape_code(), true),
        }
    }

    /// Checks if a value has a primary code
    #[must_use]
    pub fn is_representable(&self, value: i32) -> bool {
        !self.encode(value).1
    }

    /// Decodes a primary code
    #[must_use]
    pub fn decode(&self, code: u32) -> Decoded {
        if code == self.escape_code() {
            return Decoded::Escape;
        }
        if code >= self.num_values {
            return Decoded::Unused;
        }
        match &self.kind {
            DictionaryKind::SimpleRange { low, .. } => {
                Decoded::Value((i64::from(*low) + i64::from(code)) as i32)
            }
            DictionaryKind::ValueMap { values } => Decoded::Value(values[code as usize]),
        }
    }

    /// Value observed at positions that were never written
    ///
    /// This is the representable value closest to zero. For value maps, the earliest
    /// listed value wins ties.
    #[must_use]
    pub fn default_value(&self) -> i32 {
        match &self.kind {
            DictionaryKind::SimpleRange { low, high } => 0i32.clamp(*low, *high - 1),
            DictionaryKind::ValueMap { values } => values
                .iter()
                .copied()
                .min_by_key(|v| i64::from(*v).abs())
                .unwrap_or(0),
        }
    }

    /// Primary code of [`Dictionary::default_value`]
    #[must_use]
    pub fn default_code(&self) -> u32 {
        self.encode(self.default_value()).0
    }
}

impl TryFrom<DictionaryKind> for Dictionary {
    type Error = Error;

    fn try_from(kind: DictionaryKind) -> Result<Self> {
        match kind {
            DictionaryKind::SimpleRange { low, high } => Self::simple_range(low, high),
            DictionaryKind::ValueMap { values } => Self::value_map(values),
        }
    }
}

impl From<Dictionary> for DictionaryKind {
    fn from(dict: Dictionary) -> Self {
        dict.kind
    }
}

#[cfg(test)]
mod testing {
    use super::*;

    #[test]
    fn test_simple_range_width() -> Result<()> {
        let dict = Dictionary::simple_range(0, 4)?;
        assert_eq!(dict.bit_width(), 3);
        assert_eq!(dict.escape_code(), 7);

        let dict = Dictionary::simple_range(0, 1)?;
        assert_eq!(dict.bit_width(), 1);

        let dict = Dictionary::simple_range(0, 64)?;
        assert_eq!(dict.bit_width(), 7);

        let dict = Dictionary::simple_range(0, 65535)?;
        assert_eq!(dict.bit_width(), 16);
        assert!(Dictionary::simple_range(0, 65536).is_err());
        Ok(())
    }

    #[test]
    fn test_simple_range_codes() -> Result<()> {
        let dict = Dictionary::simple_range(-2, 6)?;
        assert_eq!(dict.encode(-2), (0, false));
        assert_eq!(dict.encode(5), (7, false));
        assert_eq!(dict.encode(6), (dict.escape_code(), true));
        assert_eq!(dict.encode(-3), (dict.escape_code(), true));
        assert_eq!(dict.decode(0), Decoded::Value(-2));
        assert_eq!(dict.decode(7), Decoded::Value(5));
        assert_eq!(dict.decode(dict.escape_code()), Decoded::Escape);
        assert_eq!(dict.decode(8), Decoded::Unused);
        Ok(())
    }

    #[test]
    fn test_invalid_dictionaries() {
        assert!(Dictionary::simple_range(5, 5).is_err());
        assert!(Dictionary::simple_range(5, 1).is_err());
        assert!(Dictionary::value_map(vec![]).is_err());
        assert!(matches!(
            Dictionary::value_map(vec![1, 2, 1]),
            Err(Error::DictError(DictError::DuplicateValue(1)))
        ));
    }

    #[test]
    fn test_value_map() -> Result<()> {
        let dict = Dictionary::value_map(vec![10, -3, 7])?;
        assert_eq!(dict.bit_width(), 2);
        assert_eq!(dict.encode(10), (0, false));
        assert_eq!(dict.encode(7), (2, false));
        assert_eq!(dict.encode(0), (3, true));
        assert_eq!(dict.decode(1), Decoded::Value(-3));
        assert_eq!(dict.decode(3), Decoded::Escape);
        Ok(())
    }

    #[test]
    fn test_default_value() -> Result<()> {
        assert_eq!(Dictionary::simple_range(0, 4)?.default_value(), 0);
        assert_eq!(Dictionary::simple_range(3, 9)?.default_value(), 3);
        assert_eq!(Dictionary::simple_range(-9, -3)?.default_value(), -4);
        assert_eq!(Dictionary::value_map(vec![5, -2, 2])?.default_value(), -2);
        assert_eq!(Dictionary::value_map(vec![5, 2, -2])?.default_value(), 2);

        let dict = Dictionary::value_map(vec![9, 4])?;
        assert_eq!(dict.default_code(), 1);
        Ok(())
    }

    #[test]
    fn test_from_values() -> Result<()> {
        let dict = Dictionary::from_values(vec![0, 1, 2, 3])?;
        assert_eq!(dict.kind(), &DictionaryKind::SimpleRange { low: 0, high: 4 });

        let dict = Dictionary::from_values(vec![0, 2, 3])?;
        assert_eq!(
            dict.kind(),
            &DictionaryKind::ValueMap {
                values: vec![0, 2, 3]
            }
        );
        Ok(())
    }

    #[test]
    fn test_from_reader() -> Result<()> {
        let text = "4\n5\n\n6\n";
        let dict = Dictionary::from_reader(text.as_bytes())?;
        assert_eq!(dict.kind(), &DictionaryKind::SimpleRange { low: 4, high: 7 });

        let err = Dictionary::from_reader("1\nabc\n".as_bytes()).unwrap_err();
        assert!(matches!(err, Error::DictError(DictError::InvalidValue(_))));
        Ok(())
    }

    #[test]
    fn test_json_form() -> Result<()> {
        let dict = Dictionary::simple_range(0, 64)?;
        let json = serde_json::to_string(&dict)?;
        assert_eq!(json, r#"{"simple_range":{"low":0,"high":64}}"#);
        let parsed: Dictionary = serde_json::from_str(&json)?;
        assert_eq!(parsed, dict);
        assert_eq!(parsed.bit_width(), 7);

        let bad = r#"{"value_map":{"values":[1,1]}}"#;
        assert!(serde_json::from_str::<Dictionary>(bad).is_err());
        assert!(dict.pretty_print()?.contains("simple_range"));
        Ok(())
    }
}
