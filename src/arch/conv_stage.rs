use std::mem;

use log::info;
use ndarray::{
    Array1, Array4, ArrayD, ArrayView2, ArrayViewD, ArrayViewMut2, ArrayViewMut4, Ix1, Ix4,
};
use rand::Rng;

use super::{
    Stage,
    layers::{Conv, Layer, Subsample},
    structure::ConvSpec,
};
use crate::{
    MlErr, Result,
    initialization::conv_kernels,
    memory::{CachedArray, MemoryCache},
    optimization::GradientDescent,
};

/// The convolutional front of a network: convolutions, each optionally followed by a
/// subsampling, over single-channel `(height, width)` images.
///
/// The output of every sample is its last feature maps flattened row-major. A stage without
/// layers passes its input through unchanged.
#[derive(Debug, Clone)]
pub struct ConvStage {
    input: (usize, usize),
    specs: Vec<ConvSpec>,
    layers: Vec<Layer>,
    shapes: Vec<(usize, usize, usize)>,
    optimizer: GradientDescent,

    // Forward metadata, the input then the output of every layer. The buffers are kept
    // between passes and only grow when a larger batch comes in.
    acts: Vec<Array4<f32>>,
    batch: Option<usize>,
}

impl ConvStage {
    /// Creates a new `ConvStage` with zeroed kernels.
    ///
    /// # Arguments
    /// * `input` - The `(height, width)` of the input images.
    /// * `specs` - The convolution layers, in order.
    ///
    /// # Returns
    /// The stage or `MlErr::InvalidStructure` if some layer doesn't fit its input.
    pub fn new(input: (usize, usize), specs: Vec<ConvSpec>) -> Result<Self> {
        Self::build(input, specs, |in_maps, out_maps, (kh, kw)| {
            Ok((
                Array4::zeros((in_maps, out_maps, kh, kw)),
                Array1::zeros(out_maps),
            ))
        })
    }

    /// Creates a new `ConvStage` with randomly initialized kernels.
    pub fn init<R: Rng + ?Sized>(
        input: (usize, usize),
        specs: Vec<ConvSpec>,
        rng: &mut R,
    ) -> Result<Self> {
        Self::build(input, specs, |in_maps, out_maps, kernel| {
            conv_kernels(in_maps, out_maps, kernel, &mut *rng)
        })
    }

    fn build<F>(input: (usize, usize), specs: Vec<ConvSpec>, mut kernels: F) -> Result<Self>
    where
        F: FnMut(usize, usize, (usize, usize)) -> Result<(Array4<f32>, Array1<f32>)>,
    {
        let mut shape = (1, input.0, input.1);
        let mut shapes = vec![shape];
        let mut layers = Vec::new();

        for spec in &specs {
            let (k, b) = kernels(shape.0, spec.maps, spec.kernel)?;
            let mut spec_layers = vec![Layer::Conv(Conv::new(k, b)?)];

            if let Some(ratio) = spec.subsample {
                spec_layers.push(Layer::Subsample(Subsample::new(ratio)));
            }

            for layer in spec_layers {
                shape = layer.output_shape(shape).ok_or_else(|| {
                    MlErr::InvalidStructure(format!(
                        "{spec:?} doesn't fit {}x{}x{} feature maps",
                        shape.0, shape.1, shape.2
                    ))
                })?;

                shapes.push(shape);
                layers.push(layer);
            }
        }

        Ok(Self {
            input,
            specs,
            layers,
            acts: shapes.iter().map(|_| Array4::zeros((0, 0, 0, 0))).collect(),
            shapes,
            optimizer: GradientDescent::new(),
            batch: None,
        })
    }

    /// The `(height, width)` of the input images.
    pub fn input_size(&self) -> (usize, usize) {
        self.input
    }

    pub fn specs(&self) -> &[ConvSpec] {
        &self.specs
    }

    /// The `(maps, height, width)` of the input and of the output of every layer.
    pub fn shapes(&self) -> &[(usize, usize, usize)] {
        &self.shapes
    }

    pub fn is_identity(&self) -> bool {
        self.layers.is_empty()
    }

    /// Logs the layers of this stage.
    pub fn status(&self) {
        for (layer, (maps, h, w)) in self.layers.iter().zip(&self.shapes[1..]) {
            let name = match layer {
                Layer::Conv(conv) => {
                    let (kh, kw) = conv.kernel();
                    format!("convolution {kh}x{kw}")
                }
                Layer::Subsample(subsample) => format!("subsample /{}", subsample.ratio()),
            };

            info!("  {name:<18} -> {maps} x {h} x {w}");
        }
    }

    fn out_shape(&self) -> (usize, usize, usize) {
        self.shapes[self.shapes.len() - 1]
    }
}

/// Gives `buf` the shape `(n, maps, height, width)`, keeping its storage when it's large enough.
fn reshape(buf: &mut Array4<f32>, n: usize, (maps, h, w): (usize, usize, usize)) -> Result<()> {
    let shape = (n, maps, h, w);
    if buf.dim() == shape {
        return Ok(());
    }

    let (mut data, _) = mem::take(buf).into_raw_vec_and_offset();
    data.resize(n * maps * h * w, 0.);
    *buf = Array4::from_shape_vec(shape, data)?;
    Ok(())
}

impl Stage for ConvStage {
    fn input_dim(&self) -> usize {
        self.input.0 * self.input.1
    }

    fn output_dim(&self) -> usize {
        let (maps, h, w) = self.out_shape();
        maps * h * w
    }

    fn size(&self) -> usize {
        self.layers.iter().map(Layer::size).sum()
    }

    fn forward<'c>(
        &mut self,
        x: ArrayView2<f32>,
        cache: &'c MemoryCache,
    ) -> Result<CachedArray<'c>> {
        if x.ncols() != self.input_dim() {
            return Err(MlErr::SizeMismatch {
                what: "convolutional stage input",
                got: x.ncols(),
                expected: self.input_dim(),
            });
        }

        let n = x.nrows();
        let (h, w) = self.input;

        for (buf, &shape) in self.acts.iter_mut().zip(&self.shapes) {
            reshape(buf, n, shape)?;
        }

        self.acts[0].assign(&x.to_shape((n, 1, h, w))?);

        for (k, layer) in self.layers.iter().enumerate() {
            let (done, rest) = self.acts.split_at_mut(k + 1);
            layer.forward(done[k].view(), rest[0].view_mut());
        }

        let last = &self.acts[self.acts.len() - 1];
        let mut out = cache.acquire_array((n, self.output_dim()))?;
        out.view_mut().assign(&last.to_shape((n, self.output_dim()))?);

        self.batch = Some(n);
        Ok(out)
    }

    fn backward<'c>(
        &mut self,
        delta: ArrayView2<f32>,
        learning_rate: f32,
        cache: &'c MemoryCache,
    ) -> Result<CachedArray<'c>> {
        let Some(n) = self.batch else {
            return Err(MlErr::SizeMismatch {
                what: "cached convolutional activations",
                got: 0,
                expected: self.layers.len() + 1,
            });
        };

        if delta.dim() != (n, self.output_dim()) {
            return Err(MlErr::SizeMismatch {
                what: "convolutional stage delta",
                got: delta.len(),
                expected: n * self.output_dim(),
            });
        }

        let mut d = cache.acquire(delta.len())?;
        ArrayViewMut2::from_shape(delta.dim(), &mut d[..])?.assign(&delta);

        for (k, layer) in self.layers.iter_mut().enumerate().rev() {
            let (in_maps, in_h, in_w) = self.shapes[k];
            let (maps, h, w) = self.shapes[k + 1];
            let mut dx = cache.acquire(n * in_maps * in_h * in_w)?;

            layer.backward(
                ArrayViewMut4::from_shape((n, maps, h, w), &mut d[..])?,
                self.acts[k].view(),
                self.acts[k + 1].view(),
                ArrayViewMut4::from_shape((n, in_maps, in_h, in_w), &mut dx[..])?,
                learning_rate,
                &mut self.optimizer,
            );

            d = dx;
        }

        d.into_array((n, self.input_dim()))
    }

    fn params(&self) -> Vec<ArrayViewD<'_, f32>> {
        self.layers
            .iter()
            .filter_map(|layer| match layer {
                Layer::Conv(conv) => Some([
                    conv.kernels().view().into_dyn(),
                    conv.bias().view().into_dyn(),
                ]),
                Layer::Subsample(_) => None,
            })
            .flatten()
            .collect()
    }

    fn set_params(&mut self, params: Vec<ArrayD<f32>>) -> Result<()> {
        let expected = 2 * self.specs.len();
        if params.len() != expected {
            return Err(MlErr::SizeMismatch {
                what: "convolutional parameter tensors",
                got: params.len(),
                expected,
            });
        }

        let mut params = params.into_iter();
        let convs = self.layers.iter_mut().filter_map(|layer| match layer {
            Layer::Conv(conv) => Some(conv),
            Layer::Subsample(_) => None,
        });

        for conv in convs {
            let (Some(kernels), Some(bias)) = (params.next(), params.next()) else {
                break;
            };

            conv.set_params(
                kernels.into_dimensionality::<Ix4>()?,
                bias.into_dimensionality::<Ix1>()?,
            )?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{Array, Array2, s};
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    fn spec(maps: usize, k: usize, subsample: Option<usize>) -> ConvSpec {
        ConvSpec {
            maps,
            kernel: (k, k),
            subsample,
        }
    }

    #[test]
    fn output_dimension_follows_the_layers() {
        let stage = ConvStage::new((10, 10), vec![spec(4, 3, Some(2))]).unwrap();

        assert_eq!(stage.shapes(), [(1, 10, 10), (4, 8, 8), (4, 4, 4)]);
        assert_eq!(stage.output_dim(), 64);
        assert_eq!(stage.size(), 4 * 9 + 4);
    }

    #[test]
    fn kernels_must_fit() {
        let err = ConvStage::new((5, 5), vec![spec(2, 3, Some(2)), spec(2, 3, None)]);
        assert!(matches!(err, Err(MlErr::InvalidStructure(_))));
    }

    #[test]
    fn empty_stage_is_identity() {
        let cache = MemoryCache::new(1);
        let mut stage = ConvStage::new((1, 3), vec![]).unwrap();
        let x = Array::from_shape_fn((2, 3), |(i, j)| (i * 3 + j) as f32);

        let out = stage.forward(x.view(), &cache).unwrap();
        assert_eq!(*out, x);
        drop(out);

        let d = stage.backward(x.view(), 1., &cache).unwrap();
        assert_eq!(*d, x);
        assert!(stage.is_identity());
    }

    #[test]
    fn forward_flattens_maps() {
        let cache = MemoryCache::new(1);
        let mut stage = ConvStage::new((6, 6), vec![spec(3, 3, Some(2))]).unwrap();

        let out = stage.forward(Array2::zeros((5, 36)).view(), &cache).unwrap();

        // Zeroed kernels and biases give sigmoid(0) everywhere.
        assert_eq!(out.dim(), (5, 12));
        assert!(out.iter().all(|&a| a == 0.5));
    }

    #[test]
    fn backward_needs_a_forward_pass() {
        let cache = MemoryCache::new(1);
        let mut stage = ConvStage::new((6, 6), vec![spec(3, 3, None)]).unwrap();
        assert!(stage.backward(Array2::zeros((1, 48)).view(), 1., &cache).is_err());
    }

    #[test]
    fn activation_buffers_are_reused() {
        let cache = MemoryCache::new(1);
        let mut rng = StdRng::seed_from_u64(3);
        let mut stage = ConvStage::init((8, 8), vec![spec(2, 3, Some(2))], &mut rng).unwrap();
        let x = Array::from_shape_fn((6, 64), |(i, j)| ((i + j) % 5) as f32 / 5.);

        drop(stage.forward(x.view(), &cache).unwrap());
        let first: Vec<_> = stage.acts.iter().map(|a| a.as_ptr()).collect();

        // A smaller batch then a full one again fit in the same storage.
        drop(stage.forward(x.slice(s![..4, ..]), &cache).unwrap());
        assert_eq!(stage.acts[1].dim(), (4, 2, 6, 6));

        drop(stage.forward(x.view(), &cache).unwrap());
        let d = Array2::from_elem((6, stage.output_dim()), 0.1);
        drop(stage.backward(d.view(), 0.5, &cache).unwrap());

        let again: Vec<_> = stage.acts.iter().map(|a| a.as_ptr()).collect();
        assert_eq!(first, again);
        assert_eq!(cache.in_use_bytes(), 0);
    }

    #[test]
    fn backward_gradients_come_from_the_cache() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut stage = ConvStage::init((8, 8), vec![spec(2, 3, None)], &mut rng).unwrap();
        let x = Array2::from_elem((4, 64), 0.5);

        // Room for the output, whose storage then holds the delta copy, but not for the input
        // gradient as well.
        let cache = MemoryCache::with_capacity_bytes(512 * size_of::<f32>());
        let out = stage.forward(x.view(), &cache).unwrap();
        let d = out.to_owned();
        drop(out);

        let err = stage.backward(d.view(), 0.5, &cache).unwrap_err();
        assert!(matches!(err, MlErr::CacheExhausted { .. }));
        assert_eq!(cache.in_use_bytes(), 0);
    }

    #[test]
    fn params_round_trip() {
        let mut rng = StdRng::seed_from_u64(5);
        let specs = vec![spec(2, 3, Some(2)), spec(3, 2, None)];
        let stage = ConvStage::init((12, 12), specs.clone(), &mut rng).unwrap();

        let params: Vec<_> = stage.params().into_iter().map(|p| p.to_owned()).collect();
        assert_eq!(params.len(), 4);
        assert_eq!(params[2].shape(), [2, 3, 2, 2]);

        let mut copy = ConvStage::new((12, 12), specs).unwrap();
        copy.set_params(params.clone()).unwrap();

        let copied: Vec<_> = copy.params().into_iter().map(|p| p.to_owned()).collect();
        assert_eq!(copied, params);

        assert!(copy.set_params(params[..2].to_vec()).is_err());
    }
}
