use crate::dict::Dictionary;
use crate::error::{DictError, Result};

/// Policy for handling values the dictionary cannot represent
///
/// The policy is a writer-side setting and is not stored in the file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SpillPolicy {
    /// Store the value in the secondary table under the ESCAPE code
    #[default]
    Spill,

    /// Refuse the write with a dictionary mismatch
    Reject,
}
impl SpillPolicy {
    /// Checks a batch of values against the dictionary before anything is written
    ///
    /// # Arguments
    /// * `dict` - The dictionary of the file being written
    /// * `values` - The values about to be written
    ///
    /// # Returns
    /// * `Ok(())` if every value may be written
    /// * `Err(DictError::Unrepresentable)` for the first value rejected by the policy
    pub fn check<I>(&self, dict: &Dictionary, values: I) -> Result<()>
    where
        I: IntoIterator<Item = i32>,
    {
        match self {
            Self::Spill => Ok(()),
            Self::Reject => values
                .into_iter()
                .find(|&v| !dict.is_representable(v))
                .map_or(Ok(()), |v| Err(DictError::Unrepresentable(v).into())),
        }
    }
}

#[cfg(test)]
mod testing {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_spill_accepts_everything() -> Result<()> {
        let dict = Dictionary::simple_range(0, 4)?;
        SpillPolicy::Spill.check(&dict, [0, 100, -7])?;
        Ok(())
    }

    #[test]
    fn test_reject() -> Result<()> {
        let dict = Dictionary::simple_range(0, 4)?;
        SpillPolicy::Reject.check(&dict, [0, 1, 3])?;
        let err = SpillPolicy::Reject.check(&dict, [0, 9, 12]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DictMismatch);
        assert!(matches!(
            err,
            crate::Error::DictError(DictError::Unrepresentable(9))
        ));
        Ok(())
    }
}
