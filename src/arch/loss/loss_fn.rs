use ndarray::{Array2, ArrayView1, ArrayView2, ArrayViewMut2};

use crate::Result;

/// An error measure paired with the non-linearity of the output layer.
pub trait LossFn {
    /// Applies the output non-linearity in place, turning logits into predictions.
    fn activate(&self, z: ArrayViewMut2<f32>);

    /// The summed loss of a batch of predictions against the class labels.
    fn loss(&self, y_pred: ArrayView2<f32>, y: ArrayView1<usize>) -> Result<f32>;

    /// The gradient of `loss` with respect to the logits.
    fn loss_prime(&self, y_pred: ArrayView2<f32>, y: ArrayView1<usize>) -> Result<Array2<f32>>;
}
