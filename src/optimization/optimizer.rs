use ndarray::{ArrayView, ArrayViewMut, Dimension};

pub trait Optimizer {
    fn update_params<D: Dimension>(
        &mut self,
        params: ArrayViewMut<f32, D>,
        grad: ArrayView<f32, D>,
        learning_rate: f32,
    );
}
