use ndarray::{ArrayView4, ArrayViewMut4, s};

/// Non-overlapping average pooling over `ratio x ratio` blocks.
///
/// Trailing rows and columns that don't fill a whole block are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subsample {
    ratio: usize,
}

impl Subsample {
    pub fn new(ratio: usize) -> Self {
        Self { ratio }
    }

    pub fn ratio(&self) -> usize {
        self.ratio
    }

    /// The `(height, width)` of the maps produced from `(h, w)` sized inputs.
    pub fn output_size(&self, (h, w): (usize, usize)) -> Option<(usize, usize)> {
        let size = (h.checked_div(self.ratio)?, w.checked_div(self.ratio)?);
        (size.0 > 0 && size.1 > 0).then_some(size)
    }

    /// Writes the block averages of `x` into `out`, shaped `(n, maps, h / ratio, w / ratio)`.
    pub fn forward(&self, x: ArrayView4<f32>, mut out: ArrayViewMut4<f32>) {
        let (_, _, oh, ow) = out.dim();
        let r = self.ratio;

        out.fill(0.);
        for p in 0..r {
            for q in 0..r {
                out += &x.slice(s![.., .., p..oh * r;r, q..ow * r;r]);
            }
        }

        out /= (r * r) as f32;
    }

    /// Spreads `d` evenly over the blocks of `dx`, trailing rows and columns get nothing.
    pub fn backward(&self, d: ArrayView4<f32>, mut dx: ArrayViewMut4<f32>) {
        let (_, _, oh, ow) = d.dim();
        let r = self.ratio;
        let share = 1. / (r * r) as f32;

        dx.fill(0.);
        for p in 0..r {
            for q in 0..r {
                dx.slice_mut(s![.., .., p..oh * r;r, q..ow * r;r])
                    .scaled_add(share, &d);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{Array, Array4, array};

    use super::*;

    #[test]
    fn averages_blocks() {
        let x = Array::from_shape_fn((1, 1, 4, 5), |(_, _, i, j)| (i * 5 + j) as f32);
        let mut out = Array4::from_elem((1, 1, 2, 2), f32::NAN);

        Subsample::new(2).forward(x.view(), out.view_mut());

        assert_eq!(out, array![[[[3., 5.], [13., 15.]]]]);
    }

    #[test]
    fn backward_spreads_evenly() {
        let d = array![[[[4.]]]];
        let mut dx = Array4::from_elem((1, 1, 3, 3), f32::NAN);

        Subsample::new(2).backward(d.view(), dx.view_mut());

        assert_eq!(
            dx,
            array![[[[1., 1., 0.], [1., 1., 0.], [0., 0., 0.]]]]
        );
    }

    #[test]
    fn output_size_floors() {
        let subsample = Subsample::new(3);

        assert_eq!(subsample.output_size((10, 8)), Some((3, 2)));
        assert_eq!(subsample.output_size((2, 8)), None);
    }
}
