use ndarray::{Array1, Array4, ArrayView2, ArrayView4, ArrayViewMut2, ArrayViewMut4, Axis, Zip, s};

use crate::{MlErr, Result, arch::activations::ActFn, optimization::Optimizer};

/// A valid (unpadded) convolution layer followed by a sigmoid.
///
/// Every output map is the sum over the input maps of their cross-correlation with the
/// corresponding kernel, plus the map's bias.
#[derive(Debug, Clone)]
pub struct Conv {
    /// Shaped `(in_maps, out_maps, kh, kw)`.
    kernels: Array4<f32>,
    bias: Array1<f32>,
    act_fn: ActFn,

    // Gradient buffers, reused by every backward pass
    grad_kernels: Array4<f32>,
    grad_bias: Array1<f32>,
}

impl Conv {
    /// Creates a new `Conv` layer.
    ///
    /// # Arguments
    /// * `kernels` - The kernels, shaped `(in_maps, out_maps, kh, kw)`.
    /// * `bias` - One bias per output map.
    ///
    /// # Returns
    /// A size mismatch error if there isn't exactly one bias per output map.
    pub fn new(kernels: Array4<f32>, bias: Array1<f32>) -> Result<Self> {
        let out_maps = kernels.len_of(Axis(1));
        if bias.len() != out_maps {
            return Err(MlErr::SizeMismatch {
                what: "convolution biases",
                got: bias.len(),
                expected: out_maps,
            });
        }

        Ok(Self {
            grad_kernels: Array4::zeros(kernels.raw_dim()),
            grad_bias: Array1::zeros(out_maps),
            kernels,
            bias,
            act_fn: ActFn::sigmoid(),
        })
    }

    pub fn in_maps(&self) -> usize {
        self.kernels.len_of(Axis(0))
    }

    pub fn out_maps(&self) -> usize {
        self.kernels.len_of(Axis(1))
    }

    /// The `(height, width)` of the kernels.
    pub fn kernel(&self) -> (usize, usize) {
        let (_, _, kh, kw) = self.kernels.dim();
        (kh, kw)
    }

    /// The amount of parameters of this layer.
    pub fn size(&self) -> usize {
        self.kernels.len() + self.bias.len()
    }

    pub fn kernels(&self) -> &Array4<f32> {
        &self.kernels
    }

    pub fn bias(&self) -> &Array1<f32> {
        &self.bias
    }

    /// Replaces the parameters of this layer, keeping its shape.
    pub fn set_params(&mut self, kernels: Array4<f32>, bias: Array1<f32>) -> Result<()> {
        if kernels.dim() != self.kernels.dim() {
            return Err(MlErr::SizeMismatch {
                what: "convolution kernels",
                got: kernels.len(),
                expected: self.kernels.len(),
            });
        }

        if bias.len() != self.bias.len() {
            return Err(MlErr::SizeMismatch {
                what: "convolution biases",
                got: bias.len(),
                expected: self.bias.len(),
            });
        }

        self.kernels = kernels;
        self.bias = bias;
        Ok(())
    }

    /// The `(height, width)` of the maps produced from `(h, w)` sized inputs.
    pub fn output_size(&self, (h, w): (usize, usize)) -> Option<(usize, usize)> {
        let (kh, kw) = self.kernel();
        Some((h.checked_sub(kh)? + 1, w.checked_sub(kw)? + 1))
    }

    /// Makes a forward pass, samples are processed in parallel.
    ///
    /// # Arguments
    /// * `x` - The input maps, shaped `(n, in_maps, h, w)`.
    /// * `out` - Receives the activated output maps, shaped `(n, out_maps, h - kh + 1, w - kw + 1)`.
    pub fn forward(&self, x: ArrayView4<f32>, mut out: ArrayViewMut4<f32>) {
        Zip::from(out.outer_iter_mut())
            .and(x.outer_iter())
            .par_for_each(|mut out, x| {
                for (j, mut map) in out.outer_iter_mut().enumerate() {
                    map.fill(self.bias[j]);

                    for (i, x) in x.outer_iter().enumerate() {
                        correlate_add(x, self.kernels.slice(s![i, j, .., ..]), map.view_mut());
                    }

                    map.mapv_inplace(|z| self.act_fn.f(z));
                }
            });
    }

    /// Makes a backward pass and steps the kernels and biases.
    ///
    /// The gradients are averaged over the batch before the step.
    ///
    /// # Arguments
    /// * `d` - The gradient with respect to the output of this layer, overwritten.
    /// * `x` - The input of the last forward pass.
    /// * `a` - The output of the last forward pass.
    /// * `dx` - Receives the gradient with respect to `x`.
    /// * `learning_rate` - The length of the step.
    /// * `optimizer` - The update rule.
    pub fn backward<O: Optimizer>(
        &mut self,
        mut d: ArrayViewMut4<f32>,
        x: ArrayView4<f32>,
        a: ArrayView4<f32>,
        mut dx: ArrayViewMut4<f32>,
        learning_rate: f32,
        optimizer: &mut O,
    ) {
        let act_fn = self.act_fn;
        Zip::from(&mut d)
            .and(&a)
            .par_for_each(|d, &a| *d *= act_fn.df(a));

        let d = d.view();
        let kernels = &self.kernels;
        Zip::from(dx.outer_iter_mut())
            .and(d.outer_iter())
            .par_for_each(|mut dx, d| {
                dx.fill(0.);

                for (i, mut dx) in dx.outer_iter_mut().enumerate() {
                    for (j, d) in d.outer_iter().enumerate() {
                        scatter_add(d, kernels.slice(s![i, j, .., ..]), dx.view_mut());
                    }
                }
            });

        let n = x.len_of(Axis(0)).max(1) as f32;
        let (_, _, oh, ow) = d.dim();

        Zip::from(self.grad_kernels.outer_iter_mut())
            .and(x.axis_iter(Axis(1)))
            .par_for_each(|mut dk, x| {
                for (j, mut dk) in dk.outer_iter_mut().enumerate() {
                    let d = d.index_axis(Axis(1), j);

                    for ((p, q), g) in dk.indexed_iter_mut() {
                        let window = x.slice(s![.., p..p + oh, q..q + ow]);
                        *g = Zip::from(&window).and(&d).fold(0., |acc, &x, &d| acc + x * d) / n;
                    }
                }
            });

        for (db, d) in self.grad_bias.iter_mut().zip(d.axis_iter(Axis(1))) {
            *db = d.sum() / n;
        }

        optimizer.update_params(self.kernels.view_mut(), self.grad_kernels.view(), learning_rate);
        optimizer.update_params(self.bias.view_mut(), self.grad_bias.view(), learning_rate);
    }
}

/// Adds the valid cross-correlation of `x` with `k` to `out`.
fn correlate_add(x: ArrayView2<f32>, k: ArrayView2<f32>, mut out: ArrayViewMut2<f32>) {
    let (oh, ow) = out.dim();

    for ((p, q), &kv) in k.indexed_iter() {
        out.scaled_add(kv, &x.slice(s![p..p + oh, q..q + ow]));
    }
}

/// The adjoint of `correlate_add` with respect to its input: spreads `d` over `dx`.
fn scatter_add(d: ArrayView2<f32>, k: ArrayView2<f32>, mut dx: ArrayViewMut2<f32>) {
    let (oh, ow) = d.dim();

    for ((p, q), &kv) in k.indexed_iter() {
        dx.slice_mut(s![p..p + oh, q..q + ow]).scaled_add(kv, &d);
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use ndarray::{Array, array};

    use super::*;
    use crate::optimization::GradientDescent;

    fn logit(a: f32) -> f32 {
        (a / (1. - a)).ln()
    }

    fn forward(conv: &Conv, x: ArrayView4<f32>) -> Array4<f32> {
        let (n, _, h, w) = x.dim();
        let (oh, ow) = conv.output_size((h, w)).unwrap();
        let mut out = Array4::zeros((n, conv.out_maps(), oh, ow));
        conv.forward(x, out.view_mut());
        out
    }

    #[test]
    fn valid_cross_correlation() {
        let x = Array::from_shape_fn((1, 1, 3, 3), |(_, _, i, j)| (i * 3 + j) as f32);
        let kernels = array![[[[1., 0.], [0., -1.]]]];
        let conv = Conv::new(kernels, array![0.5]).unwrap();

        let out = forward(&conv, x.view());

        assert_eq!(out.dim(), (1, 1, 2, 2));
        // Every window is x[i, j] - x[i + 1, j + 1] = -4, plus the bias.
        for &a in &out {
            assert_abs_diff_eq!(logit(a), -3.5, epsilon = 1e-4);
        }
    }

    #[test]
    fn input_maps_are_summed() {
        let x = Array::ones((2, 2, 2, 2));
        let kernels = Array::ones((2, 3, 2, 2));
        let conv = Conv::new(kernels, Array1::zeros(3)).unwrap();

        let out = forward(&conv, x.view());

        assert_eq!(out.dim(), (2, 3, 1, 1));
        for &a in &out {
            assert_abs_diff_eq!(logit(a), 8., epsilon = 1e-3);
        }
    }

    #[test]
    fn output_size_requires_fitting_kernel() {
        let conv = Conv::new(Array::zeros((1, 1, 3, 3)), Array1::zeros(1)).unwrap();

        assert_eq!(conv.output_size((10, 10)), Some((8, 8)));
        assert_eq!(conv.output_size((2, 10)), None);
    }

    #[test]
    fn gradients_match_finite_differences() {
        let x = Array::from_shape_fn((2, 1, 4, 4), |(s, _, i, j)| {
            ((s * 16 + i * 4 + j) as f32 * 0.37).sin()
        });
        let kernels = Array::from_shape_fn((1, 2, 2, 2), |(_, j, p, q)| {
            ((j * 4 + p * 2 + q) as f32 * 0.91).cos() * 0.5
        });
        let bias = array![0.1, -0.2];
        let conv = Conv::new(kernels.clone(), bias.clone()).unwrap();

        // Loss: half the sum of squared outputs, so dL/da = a.
        let loss = |conv: &Conv, x: ArrayView4<f32>| -> f32 {
            forward(conv, x).mapv(|a| a * a).sum() / 2.
        };

        let a = forward(&conv, x.view());
        let lr = 1e-2;
        let mut trained = conv.clone();
        let mut d = a.clone();
        let mut dx = Array4::from_elem(x.raw_dim(), f32::NAN);
        trained.backward(
            d.view_mut(),
            x.view(),
            a.view(),
            dx.view_mut(),
            lr,
            &mut GradientDescent,
        );

        let eps = 5e-3;
        let n = 2.;

        for idx in [(0, 0, 0, 0), (0, 1, 1, 0), (0, 1, 1, 1)] {
            let mut plus = conv.clone();
            let mut minus = conv.clone();
            let mut kp = kernels.clone();
            let mut km = kernels.clone();
            kp[idx] += eps;
            km[idx] -= eps;
            plus.set_params(kp, bias.clone()).unwrap();
            minus.set_params(km, bias.clone()).unwrap();

            let numeric = (loss(&plus, x.view()) - loss(&minus, x.view())) / (2. * eps);
            let analytic = (kernels[idx] - trained.kernels()[idx]) * n / lr;
            assert_abs_diff_eq!(analytic, numeric, epsilon = 2e-3);
        }

        for idx in [(0, 0, 0, 0), (1, 0, 2, 3), (1, 0, 1, 2)] {
            let mut xp = x.clone();
            let mut xm = x.clone();
            xp[idx] += eps;
            xm[idx] -= eps;

            let numeric = (loss(&conv, xp.view()) - loss(&conv, xm.view())) / (2. * eps);
            assert_abs_diff_eq!(dx[idx], numeric, epsilon = 2e-3);
        }
    }
}
