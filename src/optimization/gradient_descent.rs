use ndarray::{ArrayView, ArrayViewMut, Dimension};

use super::Optimizer;

/// Gradient descent optimization algorithm.
#[derive(Debug, Default, Clone, Copy)]
pub struct GradientDescent;

impl GradientDescent {
    /// Returns a new `GradientDescent`.
    pub fn new() -> Self {
        Self
    }
}

impl Optimizer for GradientDescent {
    /// Updates the parameters according to the algorithm's learning rule, that is, making a step in
    /// the opposite direction of the gradient, with a length of `learning_rate`.
    ///
    /// # Arguments
    /// * `params` - The parameters that are going to be modified.
    /// * `grad` - The gradient used for taking the step.
    /// * `learning_rate` - The *length* of the step.
    fn update_params<D: Dimension>(
        &mut self,
        mut params: ArrayViewMut<f32, D>,
        grad: ArrayView<f32, D>,
        learning_rate: f32,
    ) {
        params.scaled_add(-learning_rate, &grad);
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn steps_against_the_gradient() {
        let mut params = array![[1., 2.], [3., 4.]];
        let grad = array![[1., 0.], [-2., 0.5]];

        GradientDescent.update_params(params.view_mut(), grad.view(), 0.5);

        assert_eq!(params, array![[0.5, 2.], [4., 3.75]]);
    }
}
