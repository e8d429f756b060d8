use std::fmt;

/// A run of equal values over the chromosome-local range `[left, right)`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Interval {
    /// First position of the run
    pub left: u32,

    /// One past the last position of the run
    pub right: u32,

    /// Value shared by every position of the run
    pub value: i32,
}
impl Interval {
    #[must_use]
    pub fn new(left: u32, right: u32, value: i32) -> Self {
        Self { left, right, value }
    }

    /// Number of positions covered
    #[must_use]
    pub fn len(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.right <= self.left
    }
}
impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}) = {}", self.left, self.right, self.value)
    }
}

/// Coalesces a stream of consecutive values into runs
#[derive(Debug, Default)]
pub(crate) struct RunCoalescer {
    current: Option<Interval>,
}
impl RunCoalescer {
    /// Feeds the values of positions `[start, start + values.len())`
    ///
    /// Completed runs are passed to `emit`. Feeding stops early when `emit` returns
    /// `false`, and the number of consumed values is returned.
    pub fn feed<F>(&mut self, start: u32, values: &[i32], mut emit: F) -> usize
    where
        F: FnMut(Interval) -> bool,
    {
        for (i, &value) in values.iter().enumerate() {
            let pos = start + i as u32;
            if let Some(run) = self.current.as_mut() {
                if run.value == value && run.right == pos {
                    run.right += 1;
                    continue;
                }
            }
            if let Some(done) = self.current.replace(Interval::new(pos, pos + 1, value)) {
                if !emit(done) {
                    // The new run is not consumed yet
                    self.current = None;
                    return i;
                }
            }
        }
        values.len()
    }

    /// Returns the open run, if any
    pub fn finish(&mut self) -> Option<Interval> {
        self.current.take()
    }
}

#[cfg(test)]
mod testing {
    use super::*;

    #[test]
    fn test_coalesce_runs() {
        let mut runs = Vec::new();
        let mut coalescer = RunCoalescer::default();
        coalescer.feed(10, &[1, 1, 2, 2, 2], |iv| {
            runs.push(iv);
            true
        });
        coalescer.feed(15, &[2, 0], |iv| {
            runs.push(iv);
            true
        });
        runs.extend(coalescer.finish());
        assert_eq!(
            runs,
            vec![
                Interval::new(10, 12, 1),
                Interval::new(12, 17, 2),
                Interval::new(17, 18, 0)
            ]
        );
    }

    #[test]
    fn test_stop_early() {
        let mut runs = Vec::new();
        let mut coalescer = RunCoalescer::default();
        let consumed = coalescer.feed(0, &[5, 5, 6, 7, 7], |iv| {
            runs.push(iv);
            false
        });
        // The run of 5 completes at position 2, which is left unconsumed
        assert_eq!(consumed, 2);
        assert_eq!(runs, vec![Interval::new(0, 2, 5)]);
        assert!(coalescer.finish().is_none());
    }

    #[test]
    fn test_interval_len() {
        let iv = Interval::new(100, 150, 3);
        assert_eq!(iv.len(), 50);
        assert!(!iv.is_empty());
        assert_eq!(iv.to_string(), "[100, 150) = 3");
    }
}
