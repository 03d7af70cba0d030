use ndarray::{ArrayView4, ArrayViewMut4};

use super::{Conv, Subsample};
use crate::optimization::Optimizer;

/// A layer of the convolutional stage.
#[derive(Debug, Clone)]
pub enum Layer {
    Conv(Conv),
    Subsample(Subsample),
}
use Layer::*;

impl Layer {
    pub fn size(&self) -> usize {
        match self {
            Conv(l) => l.size(),
            Subsample(_) => 0,
        }
    }

    /// The `(maps, height, width)` produced from `(maps, h, w)` shaped inputs, `None` if the
    /// input is too small for this layer.
    pub fn output_shape(&self, (maps, h, w): (usize, usize, usize)) -> Option<(usize, usize, usize)> {
        match self {
            Conv(l) if l.in_maps() == maps => {
                let (oh, ow) = l.output_size((h, w))?;
                Some((l.out_maps(), oh, ow))
            }
            Conv(_) => None,
            Subsample(l) => {
                let (oh, ow) = l.output_size((h, w))?;
                Some((maps, oh, ow))
            }
        }
    }

    /// Writes the output of this layer for `x` into `out`.
    pub fn forward(&self, x: ArrayView4<f32>, out: ArrayViewMut4<f32>) {
        match self {
            Conv(l) => l.forward(x, out),
            Subsample(l) => l.forward(x, out),
        }
    }

    /// Writes the gradient with respect to `x` into `dx`, stepping any parameters.
    ///
    /// `d` may be overwritten.
    pub fn backward<O: Optimizer>(
        &mut self,
        d: ArrayViewMut4<f32>,
        x: ArrayView4<f32>,
        a: ArrayView4<f32>,
        dx: ArrayViewMut4<f32>,
        learning_rate: f32,
        optimizer: &mut O,
    ) {
        match self {
            Conv(l) => l.backward(d, x, a, dx, learning_rate, optimizer),
            Subsample(l) => l.backward(d.view(), dx),
        }
    }
}
