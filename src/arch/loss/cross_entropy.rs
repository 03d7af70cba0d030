use ndarray::{Array2, ArrayView1, ArrayView2, ArrayViewMut2, Axis, Zip};

use super::{LossFn, one_hot};
use crate::Result;

/// Cross entropy over a softmax output.
#[derive(Default, Clone, Copy, Debug)]
pub struct CrossEntropy;

impl LossFn for CrossEntropy {
    fn activate(&self, mut z: ArrayViewMut2<f32>) {
        for mut row in z.axis_iter_mut(Axis(0)) {
            let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
            row.mapv_inplace(|v| (v - max).exp());
            let sum = row.sum();
            row /= sum;
        }
    }

    fn loss(&self, y_pred: ArrayView2<f32>, y: ArrayView1<usize>) -> Result<f32> {
        let target = one_hot(y, y_pred.ncols())?;
        let mut loss = 0.;

        Zip::from(&y_pred).and(&target).for_each(|&p, &t| {
            if t > 0. {
                loss -= p.max(f32::MIN_POSITIVE).ln();
            }
        });

        Ok(loss)
    }

    fn loss_prime(&self, y_pred: ArrayView2<f32>, y: ArrayView1<usize>) -> Result<Array2<f32>> {
        Ok(&y_pred - &one_hot(y, y_pred.ncols())?)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    use super::*;

    #[test]
    fn softmax_rows_sum_to_one() {
        let mut z = array![[1., 2., 3.], [1000., 1000., 0.]];
        CrossEntropy.activate(z.view_mut());

        for row in z.rows() {
            assert_abs_diff_eq!(row.sum(), 1., epsilon = 1e-6);
        }
        assert_abs_diff_eq!(z[[1, 0]], 0.5, epsilon = 1e-6);
    }

    #[test]
    fn gradient_is_prediction_minus_target() {
        let p = array![[0.2, 0.8], [0.6, 0.4]];
        let grad = CrossEntropy.loss_prime(p.view(), array![1, 0].view()).unwrap();

        assert_abs_diff_eq!(grad, array![[0.2, -0.2], [-0.4, 0.4]], epsilon = 1e-6);
    }

    #[test]
    fn loss_is_summed_negative_log_likelihood() {
        let p = array![[0.5, 0.5], [0.25, 0.75]];
        let loss = CrossEntropy.loss(p.view(), array![0, 1].view()).unwrap();

        assert_abs_diff_eq!(loss, -(0.5f32.ln() + 0.75f32.ln()), epsilon = 1e-6);
    }

    #[test]
    fn label_out_of_range() {
        let p = array![[0.5, 0.5]];
        assert!(CrossEntropy.loss_prime(p.view(), array![2].view()).is_err());
    }
}
