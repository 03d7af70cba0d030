use std::{
    fs,
    path::{Path, PathBuf},
};

use log::info;
use ndarray::{Array1, ArrayView2, Axis, Zip};

use super::Dataset;
use crate::{MlErr, Result};

/// How features are normalized before training.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Normalization {
    #[default]
    None,
    /// Rescales every dimension into `[0, 1]`.
    Rescale,
    /// Standard score of every dimension.
    ZScore,
    /// Standard score with the means and deviations read from a file.
    ZScoreFrom(PathBuf),
}

/// A per-dimension affine map `x' = (x - shift) / scale`.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalizer {
    shift: Array1<f32>,
    scale: Array1<f32>,
}

impl Normalizer {
    /// Computes the normalizer of `normalization` for `data`.
    ///
    /// # Returns
    /// `None` when no normalization is requested.
    pub fn fit(normalization: &Normalization, data: &Dataset) -> Result<Option<Self>> {
        let normalizer = match normalization {
            Normalization::None => return Ok(None),
            Normalization::Rescale => Self::rescale(data.features()),
            Normalization::ZScore => Self::zscore(data.features()),
            Normalization::ZScoreFrom(path) => Self::from_file(path, data.dim())?,
        };

        info!("normalizing features with {normalization:?}");
        Ok(Some(normalizer))
    }

    /// Maps the range of each column of `x` onto `[0, 1]`.
    pub fn rescale(x: ArrayView2<f32>) -> Self {
        let shift = x.fold_axis(Axis(0), f32::INFINITY, |&m, &v| m.min(v));
        let max = x.fold_axis(Axis(0), f32::NEG_INFINITY, |&m, &v| m.max(v));

        Self::new(shift.clone(), &max - &shift)
    }

    /// Centers each column of `x` and scales it to unit standard deviation.
    pub fn zscore(x: ArrayView2<f32>) -> Self {
        let n = x.nrows().max(1) as f32;
        let mean = x.sum_axis(Axis(0)) / n;
        let var = x
            .rows()
            .into_iter()
            .fold(Array1::zeros(x.ncols()), |acc, row| {
                acc + (&row - &mean).mapv(|d| d * d)
            })
            / n;

        Self::new(mean, var.mapv(f32::sqrt))
    }

    /// Reads the means (first line) and standard deviations (second line) from a file.
    pub fn from_file(path: &Path, dim: usize) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let mut lines = content.lines().filter(|l| !l.trim().is_empty());

        let mut read_row = |line: usize| -> Result<Array1<f32>> {
            let row = lines
                .next()
                .ok_or_else(|| MlErr::Dataset {
                    line,
                    msg: "missing normalization statistics".to_string(),
                })?
                .split_whitespace()
                .map(|t| {
                    t.parse::<f32>().map_err(|_| MlErr::Dataset {
                        line,
                        msg: format!("invalid value `{t}`"),
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            if row.len() != dim {
                return Err(MlErr::SizeMismatch {
                    what: "normalization statistics",
                    got: row.len(),
                    expected: dim,
                });
            }

            Ok(Array1::from(row))
        };

        let mean = read_row(1)?;
        let std = read_row(2)?;
        Ok(Self::new(mean, std))
    }

    fn new(shift: Array1<f32>, scale: Array1<f32>) -> Self {
        let scale = scale.mapv(|s| if s.is_finite() && s > 0. { s } else { 1. });
        let shift = shift.mapv(|s| if s.is_finite() { s } else { 0. });
        Self { shift, scale }
    }

    /// Normalizes `data` in place.
    pub fn apply(&self, data: &mut Dataset) -> Result<()> {
        if data.dim() != self.shift.len() {
            return Err(MlErr::SizeMismatch {
                what: "normalized dimension",
                got: data.dim(),
                expected: self.shift.len(),
            });
        }

        for mut row in data.features_mut().rows_mut() {
            Zip::from(&mut row)
                .and(&self.shift)
                .and(&self.scale)
                .for_each(|x, &shift, &scale| *x = (*x - shift) / scale);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use approx::assert_abs_diff_eq;
    use ndarray::{Array2, array};

    use super::*;

    fn dataset(x: Array2<f32>) -> Dataset {
        let n = x.nrows();
        Dataset::new(x, Array1::zeros(n)).unwrap()
    }

    #[test]
    fn rescale_into_unit_range() {
        let mut data = dataset(array![[0., 5.], [10., 5.], [5., 5.]]);
        let normalizer = Normalizer::fit(&Normalization::Rescale, &data)
            .unwrap()
            .unwrap();

        normalizer.apply(&mut data).unwrap();

        assert_abs_diff_eq!(
            data.features(),
            array![[0., 0.], [1., 0.], [0.5, 0.]].view(),
            epsilon = 1e-6
        );
    }

    #[test]
    fn zscore_centers_and_scales() {
        let mut data = dataset(array![[1.], [3.]]);
        let normalizer = Normalizer::fit(&Normalization::ZScore, &data)
            .unwrap()
            .unwrap();

        normalizer.apply(&mut data).unwrap();

        assert_abs_diff_eq!(data.features(), array![[-1.], [1.]].view(), epsilon = 1e-6);
    }

    #[test]
    fn statistics_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "1 2\n2 0").unwrap();

        let mut data = dataset(array![[3., 4.]]);
        let normalization = Normalization::ZScoreFrom(file.path().to_path_buf());
        let normalizer = Normalizer::fit(&normalization, &data).unwrap().unwrap();

        normalizer.apply(&mut data).unwrap();

        assert_abs_diff_eq!(data.features(), array![[1., 2.]].view(), epsilon = 1e-6);
    }

    #[test]
    fn none_is_a_no_op() {
        let data = dataset(array![[3., 4.]]);
        assert!(Normalizer::fit(&Normalization::None, &data).unwrap().is_none());
    }
}
