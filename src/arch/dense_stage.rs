use log::info;
use ndarray::{Array2, ArrayD, ArrayView2, ArrayViewD, Ix2};
use rand::{Rng, rngs::StdRng};

use super::{
    Stage,
    activations::ActFn,
    layers::Dense,
    loss::{ErrorMeasure, LossFn},
};
use crate::{
    MlErr, Result,
    memory::{CachedArray, MemoryCache},
    optimization::GradientDescent,
};

/// The fully connected back of a network.
///
/// Hidden layers use a sigmoid and the output layer the non-linearity of the error measure.
/// While dropout is enabled every hidden activation is zeroed with probability `dropout` as it
/// enters the next layer, survivors are scaled by `1 / (1 - dropout)`.
#[derive(Debug, Clone)]
pub struct DenseStage {
    layers: Vec<Dense>,
    measure: ErrorMeasure,
    dropout: f32,
    dropout_enabled: bool,
    rng: StdRng,
    optimizer: GradientDescent,
}

impl DenseStage {
    /// Creates a new `DenseStage`.
    ///
    /// # Arguments
    /// * `weights` - One `(in + 1, out + 1)` matrix per layer, in order.
    /// * `measure` - The error measure the stage is trained against.
    /// * `dropout` - The probability of dropping a hidden unit, in `[0, 1)`.
    /// * `rng` - The generator of the dropout masks.
    ///
    /// # Returns
    /// The stage or a size mismatch error if consecutive matrices don't chain.
    pub fn new(
        weights: Vec<Array2<f32>>,
        measure: ErrorMeasure,
        dropout: f32,
        rng: StdRng,
    ) -> Result<Self> {
        if weights.is_empty() {
            return Err(MlErr::SizeMismatch {
                what: "dense layers",
                got: 0,
                expected: 1,
            });
        }

        if !(0. ..1.).contains(&dropout) {
            return Err(MlErr::InvalidConfig(format!(
                "the dropout rate must be in [0, 1), got {dropout}"
            )));
        }

        for pair in weights.windows(2) {
            if pair[0].ncols() != pair[1].nrows() {
                return Err(MlErr::SizeMismatch {
                    what: "chained dense weights",
                    got: pair[1].nrows(),
                    expected: pair[0].ncols(),
                });
            }
        }

        let depth = weights.len();
        let layers = weights
            .into_iter()
            .enumerate()
            .map(|(i, w)| {
                let act_fn = (i + 1 < depth).then(ActFn::sigmoid);
                Dense::new(w, act_fn)
            })
            .collect::<Result<_>>()?;

        Ok(Self {
            layers,
            measure,
            dropout,
            dropout_enabled: true,
            rng,
            optimizer: GradientDescent::new(),
        })
    }

    /// Enables or disables dropout, it only takes effect with a positive dropout rate.
    pub fn set_dropout(&mut self, enabled: bool) {
        self.dropout_enabled = enabled;
    }

    /// Whether the next forward passes will drop hidden units.
    pub fn dropout_active(&self) -> bool {
        self.dropout_enabled && self.dropout > 0.
    }

    pub fn measure(&self) -> ErrorMeasure {
        self.measure
    }

    /// The amount of layers.
    pub fn depth(&self) -> usize {
        self.layers.len()
    }

    /// The `(inputs, outputs)` of every layer.
    pub fn layer_dims(&self) -> Vec<(usize, usize)> {
        self.layers.iter().map(Dense::dim).collect()
    }

    /// Logs the layers of this stage.
    pub fn status(&self) {
        let last = self.layers.len() - 1;

        for (i, (d_in, d_out)) in self.layer_dims().into_iter().enumerate() {
            let act = if i == last {
                self.measure.to_string()
            } else {
                "sigmoid".to_string()
            };

            info!("  dense {d_in:>5} -> {d_out:<5} ({act})");
        }
    }
}

impl Stage for DenseStage {
    fn input_dim(&self) -> usize {
        self.layers[0].dim().0
    }

    fn output_dim(&self) -> usize {
        self.layers[self.layers.len() - 1].dim().1
    }

    fn size(&self) -> usize {
        self.layers.iter().map(Dense::size).sum()
    }

    fn forward<'c>(
        &mut self,
        x: ArrayView2<f32>,
        cache: &'c MemoryCache,
    ) -> Result<CachedArray<'c>> {
        if x.ncols() != self.input_dim() {
            return Err(MlErr::SizeMismatch {
                what: "dense stage input",
                got: x.ncols(),
                expected: self.input_dim(),
            });
        }

        let dropout = self.dropout_active().then_some(self.dropout);
        let mut x = x;

        for (i, layer) in self.layers.iter_mut().enumerate() {
            let mask = match dropout {
                Some(p) if i > 0 => Some(dropout_mask(&mut self.rng, x.dim(), p)),
                _ => None,
            };

            x = layer.forward(x, mask);
        }

        let mut out = cache.acquire_array(x.dim())?;
        out.view_mut().assign(&x);
        self.measure.activate(out.view_mut());

        Ok(out)
    }

    fn backward<'c>(
        &mut self,
        delta: ArrayView2<f32>,
        learning_rate: f32,
        cache: &'c MemoryCache,
    ) -> Result<CachedArray<'c>> {
        let expected = self.layers[self.layers.len() - 1].output_shape();
        if delta.dim() != expected || expected.0 == 0 {
            return Err(MlErr::SizeMismatch {
                what: "dense stage delta",
                got: delta.len(),
                expected: expected.0 * expected.1,
            });
        }

        let mut d = cache.acquire_array(delta.dim())?;
        d.view_mut().assign(&delta);

        for layer in self.layers.iter_mut().rev() {
            let mut dx = cache.acquire_array((delta.nrows(), layer.dim().0))?;
            layer.backward(d.view_mut(), dx.view_mut(), learning_rate, &mut self.optimizer);
            d = dx;
        }

        Ok(d)
    }

    fn params(&self) -> Vec<ArrayViewD<'_, f32>> {
        self.layers
            .iter()
            .map(|layer| layer.weights().view().into_dyn())
            .collect()
    }

    fn set_params(&mut self, params: Vec<ArrayD<f32>>) -> Result<()> {
        if params.len() != self.layers.len() {
            return Err(MlErr::SizeMismatch {
                what: "dense parameter tensors",
                got: params.len(),
                expected: self.layers.len(),
            });
        }

        for (layer, weights) in self.layers.iter_mut().zip(params) {
            layer.set_weights(weights.into_dimensionality::<Ix2>()?)?;
        }

        Ok(())
    }
}

fn dropout_mask(rng: &mut StdRng, shape: (usize, usize), p: f32) -> Array2<f32> {
    let keep = 1. / (1. - p);
    Array2::from_shape_fn(shape, |_| if rng.random::<f32>() < p { 0. } else { keep })
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;

    use super::*;
    use crate::initialization::rand_weights;

    fn stage(dropout: f32) -> DenseStage {
        let mut rng = StdRng::seed_from_u64(11);
        let weights = rand_weights(4, &[16], 3, &mut rng).unwrap();
        DenseStage::new(weights, ErrorMeasure::CrossEntropy, dropout, rng).unwrap()
    }

    #[test]
    fn outputs_are_probabilities() {
        let cache = MemoryCache::new(1);
        let mut stage = stage(0.);
        let x = Array2::from_shape_fn((5, 4), |(i, j)| (i as f32 - j as f32) / 4.);

        let out = stage.forward(x.view(), &cache).unwrap();

        assert_eq!(out.dim(), (5, 3));
        for row in out.rows() {
            assert_abs_diff_eq!(row.sum(), 1., epsilon = 1e-5);
        }
    }

    #[test]
    fn rejects_unchained_weights() {
        let weights = vec![Array2::zeros((3, 4)), Array2::zeros((5, 2))];
        let rng = StdRng::seed_from_u64(0);

        assert!(DenseStage::new(weights, ErrorMeasure::L2, 0., rng).is_err());
    }

    #[test]
    fn dropout_only_while_enabled() {
        let cache = MemoryCache::new(1);
        let mut stage = stage(0.5);
        let x = Array2::from_elem((64, 4), 0.3);

        stage.set_dropout(false);
        assert!(!stage.dropout_active());
        let a = stage.forward(x.view(), &cache).unwrap().to_owned();
        let b = stage.forward(x.view(), &cache).unwrap().to_owned();
        assert_eq!(a, b);

        stage.set_dropout(true);
        assert!(stage.dropout_active());
        let c = stage.forward(x.view(), &cache).unwrap().to_owned();
        assert_ne!(a, c);
    }

    #[test]
    fn backward_returns_input_gradient() {
        let cache = MemoryCache::new(1);
        let mut stage = stage(0.);
        let x = Array2::from_elem((2, 4), 0.1);

        let out = stage.forward(x.view(), &cache).unwrap();
        let delta = Array2::from_elem(out.dim(), 0.1);
        drop(out);

        let dx = stage.backward(delta.view(), 0.1, &cache).unwrap();
        assert_eq!(dx.dim(), (2, 4));
        drop(dx);

        // Steady state: the same shapes come back out of the pool.
        let allocations = cache.allocations();
        drop(stage.forward(x.view(), &cache).unwrap());
        drop(stage.backward(delta.view(), 0.1, &cache).unwrap());

        assert_eq!(cache.allocations(), allocations);
        assert_eq!(cache.in_use_bytes(), 0);
    }

    #[test]
    fn backward_needs_a_forward_pass() {
        let cache = MemoryCache::new(1);
        let mut stage = stage(0.);
        assert!(stage.backward(Array2::zeros((2, 3)).view(), 0.1, &cache).is_err());
    }
}
