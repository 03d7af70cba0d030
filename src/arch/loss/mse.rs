use ndarray::{Array2, ArrayView1, ArrayView2, ArrayViewMut2, Zip};

use super::{LossFn, one_hot};
use crate::{Result, arch::activations::ActFn};

/// Squared error over sigmoid outputs, halved so that its gradient carries no constant.
#[derive(Default, Clone, Copy, Debug)]
pub struct Mse;

impl LossFn for Mse {
    fn activate(&self, mut z: ArrayViewMut2<f32>) {
        let act_fn = ActFn::sigmoid();
        z.mapv_inplace(|v| act_fn.f(v));
    }

    fn loss(&self, y_pred: ArrayView2<f32>, y: ArrayView1<usize>) -> Result<f32> {
        let target = one_hot(y, y_pred.ncols())?;
        Ok((&y_pred - &target).mapv(|d| d * d).sum() / 2.)
    }

    fn loss_prime(&self, y_pred: ArrayView2<f32>, y: ArrayView1<usize>) -> Result<Array2<f32>> {
        let act_fn = ActFn::sigmoid();
        let mut grad = one_hot(y, y_pred.ncols())?;

        Zip::from(&mut grad)
            .and(&y_pred)
            .for_each(|g, &p| *g = (p - *g) * act_fn.df(p));

        Ok(grad)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    use super::*;

    #[test]
    fn gradient_goes_through_the_sigmoid() {
        let p = array![[0.5, 0.25]];
        let grad = Mse.loss_prime(p.view(), array![0].view()).unwrap();

        assert_abs_diff_eq!(grad, array![[-0.125, 0.046875]], epsilon = 1e-6);
    }

    #[test]
    fn loss_is_half_the_squared_distance() {
        let p = array![[0.5, 0.5]];
        let loss = Mse.loss(p.view(), array![1].view()).unwrap();

        assert_abs_diff_eq!(loss, 0.25, epsilon = 1e-6);
    }
}
