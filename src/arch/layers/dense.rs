use ndarray::{linalg, prelude::*};

use crate::{MlErr, Result, arch::activations::ActFn, optimization::Optimizer};

/// A fully connected layer with its bias folded into the weight matrix.
///
/// The weights are shaped `(in + 1, out + 1)`: the last row holds the biases and the last
/// column, reserved for the bias unit of the next layer, is never read nor trained.
#[derive(Debug, Clone)]
pub struct Dense {
    weights: Array2<f32>,
    act_fn: Option<ActFn>,

    // Forward metadata
    x: Array2<f32>,
    a: Array2<f32>,
    mask: Option<Array2<f32>>,

    // Weight gradient, reused by every backward pass
    grad: Array2<f32>,
}

impl Dense {
    /// Creates a new `Dense` layer.
    ///
    /// # Arguments
    /// * `weights` - The `(in + 1, out + 1)` weight matrix.
    /// * `act_fn` - The activation function, `None` for a linear output.
    pub fn new(weights: Array2<f32>, act_fn: Option<ActFn>) -> Result<Self> {
        let (rows, cols) = weights.dim();
        if rows < 2 || cols < 2 {
            return Err(MlErr::SizeMismatch {
                what: "dense weight matrix side",
                got: rows.min(cols),
                expected: 2,
            });
        }

        Ok(Self {
            weights,
            act_fn,
            x: Array2::zeros((0, rows)),
            a: Array2::zeros((0, cols - 1)),
            mask: None,
            grad: Array2::zeros((rows, cols - 1)),
        })
    }

    /// The `(inputs, outputs)` of this layer.
    pub fn dim(&self) -> (usize, usize) {
        let (rows, cols) = self.weights.dim();
        (rows - 1, cols - 1)
    }

    /// Returns the size of this layer.
    ///
    /// # Returns
    /// The amount of parameters this layer has.
    pub fn size(&self) -> usize {
        self.weights.len()
    }

    pub fn weights(&self) -> &Array2<f32> {
        &self.weights
    }

    /// Replaces the weight matrix, keeping its shape.
    pub fn set_weights(&mut self, weights: Array2<f32>) -> Result<()> {
        if weights.dim() != self.weights.dim() {
            return Err(MlErr::SizeMismatch {
                what: "dense weights",
                got: weights.len(),
                expected: self.weights.len(),
            });
        }

        self.weights = weights;
        Ok(())
    }

    /// The shape of the output of the last forward pass.
    pub fn output_shape(&self) -> (usize, usize) {
        self.a.dim()
    }

    /// Makes a forward pass.
    ///
    /// # Arguments
    /// * `x` - The input, one sample per row.
    /// * `mask` - A dropout mask multiplied into the input, shaped like it.
    ///
    /// # Returns
    /// The activations of this layer.
    pub fn forward(&mut self, x: ArrayView2<f32>, mask: Option<Array2<f32>>) -> ArrayView2<'_, f32> {
        let (n, d_in) = x.dim();
        let d_out = self.weights.ncols() - 1;

        if self.x.dim() != (n, d_in + 1) {
            self.x = Array2::zeros((n, d_in + 1));
        }

        self.x.slice_mut(s![.., ..d_in]).assign(&x);
        if let Some(mask) = &mask {
            self.x
                .slice_mut(s![.., ..d_in])
                .zip_mut_with(mask, |x, &m| *x *= m);
        }
        self.x.column_mut(d_in).fill(1.);
        self.mask = mask;

        if self.a.dim() != (n, d_out) {
            self.a = Array2::zeros((n, d_out));
        }

        let w = self.weights.slice(s![.., ..d_out]);
        linalg::general_mat_mul(1.0, &self.x, &w, 0.0, &mut self.a);

        if let Some(act_fn) = self.act_fn {
            self.a.mapv_inplace(|z| act_fn.f(z));
        }

        self.a.view()
    }

    /// Makes a backward pass and steps the weights.
    ///
    /// # Arguments
    /// * `d` - The gradient with respect to the activations of this layer, overwritten.
    /// * `dx` - Where the gradient with respect to the input of the last forward pass goes.
    /// * `learning_rate` - The length of the step.
    /// * `optimizer` - The update rule.
    pub fn backward<O: Optimizer>(
        &mut self,
        mut d: ArrayViewMut2<f32>,
        mut dx: ArrayViewMut2<f32>,
        learning_rate: f32,
        optimizer: &mut O,
    ) {
        if let Some(act_fn) = self.act_fn {
            d.zip_mut_with(&self.a, |d, &a| *d *= act_fn.df(a));
        }

        let (d_in, d_out) = self.dim();

        let w = self.weights.slice(s![..d_in, ..d_out]).reversed_axes();
        linalg::general_mat_mul(1.0, &d, &w, 0.0, &mut dx);
        linalg::general_mat_mul(1.0, &self.x.t(), &d, 0.0, &mut self.grad);

        optimizer.update_params(
            self.weights.slice_mut(s![.., ..d_out]),
            self.grad.view(),
            learning_rate,
        );

        if let Some(mask) = &self.mask {
            dx *= mask;
        }
    }
}
