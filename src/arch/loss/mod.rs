mod cross_entropy;
mod error_measure;
mod loss_fn;
mod mse;

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};

pub use cross_entropy::CrossEntropy;
pub use error_measure::ErrorMeasure;
pub use loss_fn::LossFn;
pub use mse::Mse;

use crate::{MlErr, Result};

/// Encodes class labels as rows of a `width` wide one-hot matrix.
pub fn one_hot(y: ArrayView1<usize>, width: usize) -> Result<Array2<f32>> {
    let mut target = Array2::zeros((y.len(), width));

    for (mut row, &label) in target.axis_iter_mut(Axis(0)).zip(y) {
        if label >= width {
            return Err(MlErr::SizeMismatch {
                what: "class label",
                got: label,
                expected: width,
            });
        }

        row[label] = 1.;
    }

    Ok(target)
}

/// Counts the rows of `prob` whose most probable class differs from the label.
///
/// Ties resolve to the lowest class index.
pub fn zero_one_error(prob: ArrayView2<f32>, y: ArrayView1<usize>) -> Result<usize> {
    if prob.nrows() != y.len() {
        return Err(MlErr::SizeMismatch {
            what: "predicted rows",
            got: prob.nrows(),
            expected: y.len(),
        });
    }

    let errors = prob
        .axis_iter(Axis(0))
        .zip(y)
        .filter(|(row, label)| argmax(row.view()) != Some(**label))
        .count();

    Ok(errors)
}

fn argmax(row: ArrayView1<f32>) -> Option<usize> {
    row.iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (i, &v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn counts_misclassified_rows() {
        let prob = array![[0.1, 0.9], [0.7, 0.3], [0.5, 0.5]];
        let y = array![1, 1, 0];

        assert_eq!(zero_one_error(prob.view(), y.view()).unwrap(), 1);
    }

    #[test]
    fn ties_pick_the_first_class() {
        let prob = array![[0.5, 0.5]];
        assert_eq!(zero_one_error(prob.view(), array![1].view()).unwrap(), 1);
    }

    #[test]
    fn rows_must_match_labels() {
        let prob = array![[0.5, 0.5]];
        assert!(zero_one_error(prob.view(), array![0, 1].view()).is_err());
    }

    #[test]
    fn one_hot_rows() {
        let target = one_hot(array![2, 0].view(), 3).unwrap();
        assert_eq!(target, array![[0., 0., 1.], [1., 0., 0.]]);
    }
}
