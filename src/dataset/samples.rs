use std::{
    collections::BTreeMap,
    fs::File,
    io::{BufRead, BufReader},
    num::NonZeroUsize,
    path::Path,
};

use log::info;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, ArrayViewMut2, Axis, s};

use super::{Batch, Batches};
use crate::{MlErr, Result};

/// An in-memory labeled dataset, one sample per row.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    x: Array2<f32>,
    y: Array1<usize>,
}

impl Dataset {
    /// Creates a new `Dataset`.
    ///
    /// # Arguments
    /// * `x` - The features, one sample per row.
    /// * `y` - The class of each sample.
    ///
    /// # Returns
    /// A size mismatch error if `x` and `y` don't have the same amount of samples.
    pub fn new(x: Array2<f32>, y: Array1<usize>) -> Result<Self> {
        if x.nrows() != y.len() {
            return Err(MlErr::SizeMismatch {
                what: "dataset labels",
                got: y.len(),
                expected: x.nrows(),
            });
        }

        Ok(Self { x, y })
    }

    /// Reads a dataset from a text file.
    ///
    /// Each line holds a label followed by either `input_dim` values (`label v1 v2 ...`) or
    /// sparse `index:value` pairs with 1-based indices (`label 3:0.5 17:1`). Blank lines and
    /// lines starting with `#` are skipped.
    ///
    /// # Arguments
    /// * `path` - The file to read.
    /// * `input_dim` - The dimension of every sample.
    /// * `base` - The value of the first class label, subtracted from every label.
    ///
    /// # Returns
    /// The dataset or an error naming the first malformed line.
    pub fn load<P: AsRef<Path>>(path: P, input_dim: usize, base: usize) -> Result<Self> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        let mut x = Vec::new();
        let mut y = Vec::new();

        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (label, values) = parse_line(line, input_dim, base)
                .map_err(|msg| MlErr::Dataset { line: i + 1, msg })?;

            x.extend(values);
            y.push(label);
        }

        let x = Array2::from_shape_vec((y.len(), input_dim), x)?;
        Self::new(x, Array1::from(y))
    }

    /// The amount of samples.
    pub fn len(&self) -> usize {
        self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }

    /// The dimension of every sample.
    pub fn dim(&self) -> usize {
        self.x.ncols()
    }

    /// The amount of classes, that is, the largest label plus one.
    pub fn n_classes(&self) -> usize {
        self.y.iter().max().map_or(0, |&c| c + 1)
    }

    pub fn features(&self) -> ArrayView2<'_, f32> {
        self.x.view()
    }

    pub fn labels(&self) -> ArrayView1<'_, usize> {
        self.y.view()
    }

    pub(super) fn features_mut(&mut self) -> ArrayViewMut2<'_, f32> {
        self.x.view_mut()
    }

    /// Partitions this dataset into batches of `batch_size` samples.
    pub fn batches(&self, batch_size: NonZeroUsize) -> Batches {
        Batches::new(batch_size, self.len())
    }

    /// Borrows the samples covered by `batch`.
    ///
    /// # Returns
    /// The features and labels of the batch, or a size mismatch error if the batch runs past
    /// the end of the dataset.
    pub fn batch(&self, batch: Batch) -> Result<(ArrayView2<'_, f32>, ArrayView1<'_, usize>)> {
        let end = batch.offset + batch.n_data;
        if end > self.len() {
            return Err(MlErr::SizeMismatch {
                what: "batch end",
                got: end,
                expected: self.len(),
            });
        }

        let range = batch.range();
        Ok((
            self.x.slice(s![range.clone(), ..]),
            self.y.slice(s![range]),
        ))
    }

    /// Splits this dataset into a training and a validation set.
    ///
    /// The samples with index `i % ratio == ratio - 1` go to validation, the rest to training,
    /// both keep their order.
    ///
    /// # Arguments
    /// * `ratio` - One every `ratio` samples is kept for validation, must be at least 2.
    pub fn split(&self, ratio: usize) -> Result<(Self, Self)> {
        if ratio < 2 {
            return Err(MlErr::InvalidConfig(format!(
                "the validation ratio must be at least 2, got {ratio}"
            )));
        }

        let (valid, train): (Vec<usize>, Vec<usize>) =
            (0..self.len()).partition(|i| i % ratio == ratio - 1);

        Ok((self.select(&train), self.select(&valid)))
    }

    /// Logs the size, dimension and class histogram of this dataset.
    pub fn summary(&self, name: &str) {
        let mut histogram = BTreeMap::new();
        for &c in &self.y {
            *histogram.entry(c).or_insert(0usize) += 1;
        }

        info!(
            "{name}: {} samples of dimension {}, {} classes",
            self.len(),
            self.dim(),
            histogram.len()
        );

        for (c, count) in histogram {
            info!("  class {c:>3}: {count}");
        }
    }

    fn select(&self, indices: &[usize]) -> Self {
        Self {
            x: self.x.select(Axis(0), indices),
            y: self.y.select(Axis(0), indices),
        }
    }
}

fn parse_line(
    line: &str,
    input_dim: usize,
    base: usize,
) -> std::result::Result<(usize, Vec<f32>), String> {
    let mut tokens = line.split_whitespace();

    let label = tokens.next().ok_or("missing label")?;
    let label: i64 = label
        .parse()
        .map_err(|_| format!("invalid label `{label}`"))?;
    let label = usize::try_from(label - base as i64)
        .map_err(|_| format!("label {label} is below the base {base}"))?;

    let tokens: Vec<&str> = tokens.collect();
    let sparse = tokens.first().is_some_and(|t| t.contains(':'));

    if !sparse {
        if tokens.len() != input_dim {
            return Err(format!("expected {input_dim} values, got {}", tokens.len()));
        }

        let values = tokens
            .iter()
            .map(|t| parse_value(t))
            .collect::<std::result::Result<_, _>>()?;

        return Ok((label, values));
    }

    let mut values = vec![0.; input_dim];
    for token in tokens {
        let (index, value) = token
            .split_once(':')
            .ok_or_else(|| format!("expected `index:value`, got `{token}`"))?;
        let index: usize = index
            .parse()
            .map_err(|_| format!("invalid index `{index}`"))?;

        if index == 0 || index > input_dim {
            return Err(format!("index {index} out of range 1..={input_dim}"));
        }

        values[index - 1] = parse_value(value)?;
    }

    Ok((label, values))
}

fn parse_value(token: &str) -> std::result::Result<f32, String> {
    token
        .parse()
        .map_err(|_| format!("invalid value `{token}`"))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use ndarray::array;

    use super::*;

    fn write_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_dense_and_sparse_lines() {
        let file = write_file("# header\n1 0.5 1 0\n\n2 2:3 3:-1\n");
        let dataset = Dataset::load(file.path(), 3, 1).unwrap();

        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.dim(), 3);
        assert_eq!(dataset.features(), array![[0.5, 1., 0.], [0., 3., -1.]]);
        assert_eq!(dataset.labels(), array![0, 1]);
        assert_eq!(dataset.n_classes(), 2);
    }

    #[test]
    fn reports_malformed_line() {
        let file = write_file("0 1 2\n1 1\n");
        let err = Dataset::load(file.path(), 2, 0).unwrap_err();

        assert!(matches!(err, MlErr::Dataset { line: 2, .. }));
    }

    #[test]
    fn rejects_labels_below_base() {
        let file = write_file("0 1:1\n");
        let err = Dataset::load(file.path(), 2, 1).unwrap_err();

        assert!(matches!(err, MlErr::Dataset { line: 1, .. }));
    }

    #[test]
    fn rejects_out_of_range_index() {
        let file = write_file("0 3:1\n");
        assert!(Dataset::load(file.path(), 2, 0).is_err());
    }

    #[test]
    fn batches_are_views() {
        let x = Array2::from_shape_fn((5, 2), |(i, j)| (i * 2 + j) as f32);
        let dataset = Dataset::new(x, Array1::from(vec![0, 1, 0, 1, 0])).unwrap();

        let (x, y) = dataset
            .batch(Batch {
                offset: 3,
                n_data: 2,
            })
            .unwrap();

        assert_eq!(x, array![[6., 7.], [8., 9.]]);
        assert_eq!(y, array![1, 0]);

        let past_end = Batch {
            offset: 4,
            n_data: 2,
        };
        assert!(dataset.batch(past_end).is_err());
    }

    #[test]
    fn split_keeps_every_ratio_th_sample() {
        let x = Array2::from_shape_fn((10, 1), |(i, _)| i as f32);
        let dataset = Dataset::new(x, Array1::zeros(10)).unwrap();

        let (train, valid) = dataset.split(5).unwrap();

        assert_eq!(valid.features().column(0), array![4., 9.]);
        assert_eq!(train.len(), 8);
        assert_eq!(train.features()[[4, 0]], 5.);
        assert!(dataset.split(1).is_err());
    }

    #[test]
    fn mismatched_labels() {
        assert!(Dataset::new(Array2::zeros((3, 2)), Array1::zeros(2)).is_err());
    }
}
