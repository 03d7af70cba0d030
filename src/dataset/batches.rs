use std::{num::NonZeroUsize, ops::Range};

/// A contiguous run of samples inside a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Batch {
    pub offset: usize,
    pub n_data: usize,
}

impl Batch {
    /// The indices of the samples covered by this batch.
    #[inline]
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.n_data
    }
}

/// Partitions `[0, total)` into consecutive batches of `batch_size` samples, the last one may be
/// shorter. The partition can be walked any amount of times.
#[derive(Debug, Clone, Copy)]
pub struct Batches {
    batch_size: NonZeroUsize,
    total: usize,
}

impl Batches {
    pub fn new(batch_size: NonZeroUsize, total: usize) -> Self {
        Self { batch_size, total }
    }

    /// The amount of batches in the partition.
    pub fn len(&self) -> usize {
        self.total.div_ceil(self.batch_size.get())
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Starts a new walk over the partition.
    pub fn iter(&self) -> BatchIter {
        BatchIter {
            batch_size: self.batch_size.get(),
            total: self.total,
            cursor: 0,
        }
    }
}

impl IntoIterator for &Batches {
    type Item = Batch;
    type IntoIter = BatchIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// A single walk over a `Batches` partition.
#[derive(Debug, Clone)]
pub struct BatchIter {
    batch_size: usize,
    total: usize,
    cursor: usize,
}

impl Iterator for BatchIter {
    type Item = Batch;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.total {
            return None;
        }

        let end = (self.cursor + self.batch_size).min(self.total);
        let batch = Batch {
            offset: self.cursor,
            n_data: end - self.cursor,
        };

        self.cursor = end;
        Some(batch)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.total - self.cursor.min(self.total)).div_ceil(self.batch_size);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for BatchIter {}

#[cfg(test)]
mod tests {
    use super::*;

    fn batches(batch_size: usize, total: usize) -> Batches {
        Batches::new(NonZeroUsize::new(batch_size).unwrap(), total)
    }

    #[test]
    fn last_batch_is_shorter() {
        let got: Vec<_> = batches(32, 100)
            .iter()
            .map(|b| (b.offset, b.n_data))
            .collect();

        assert_eq!(got, [(0, 32), (32, 32), (64, 32), (96, 4)]);
    }

    #[test]
    fn covers_every_sample_once() {
        for total in 0..70 {
            for batch_size in 1..12 {
                let batches = batches(batch_size, total);
                let indices: Vec<_> = batches.iter().flat_map(|b| b.range()).collect();

                assert_eq!(indices, (0..total).collect::<Vec<_>>());
                assert_eq!(batches.iter().count(), batches.len());
                assert!(batches.iter().all(|b| b.n_data >= 1 && b.n_data <= batch_size));
            }
        }
    }

    #[test]
    fn empty_partition() {
        let batches = batches(8, 0);

        assert!(batches.is_empty());
        assert_eq!(batches.iter().next(), None);
    }

    #[test]
    fn walks_are_restartable() {
        let batches = batches(3, 7);

        let first: Vec<_> = batches.iter().collect();
        let second: Vec<_> = (&batches).into_iter().collect();

        assert_eq!(first, second);
        assert_eq!(batches.iter().len(), 3);
    }
}
