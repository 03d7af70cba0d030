use log::info;
use ndarray::ArrayView2;
use rand::{Rng, SeedableRng, rngs::StdRng};

use super::{
    ConvStage, DenseStage, Stage,
    structure::{ConvSpec, parse_structure},
};
use crate::{
    MlErr, Result,
    config::Config,
    initialization::rand_weights,
    memory::{CachedArray, MemoryCache},
};

/// A convolutional stage feeding a fully connected stage.
#[derive(Debug, Clone)]
pub struct Network {
    conv: ConvStage,
    dense: DenseStage,
}

impl Network {
    /// Composes two stages.
    ///
    /// # Returns
    /// A size mismatch error if the output of `conv` isn't as wide as the input of `dense`.
    pub fn new(conv: ConvStage, dense: DenseStage) -> Result<Self> {
        if conv.output_dim() != dense.input_dim() {
            return Err(MlErr::SizeMismatch {
                what: "dense stage input",
                got: dense.input_dim(),
                expected: conv.output_dim(),
            });
        }

        Ok(Self { conv, dense })
    }

    /// Builds a randomly initialized network.
    ///
    /// The convolutional stage is built first since its output dimension is the input
    /// dimension of the dense stage.
    ///
    /// # Arguments
    /// * `input` - The `(height, width)` of the input images.
    /// * `conv` - The convolution layers.
    /// * `hidden` - The widths of the hidden dense layers.
    /// * `output_dim` - The amount of classes.
    /// * `config` - Provides the seed, error measure and dropout rate.
    pub fn build(
        input: (usize, usize),
        conv: Vec<ConvSpec>,
        hidden: &[usize],
        output_dim: usize,
        config: &Config,
    ) -> Result<Self> {
        if output_dim == 0 {
            return Err(MlErr::InvalidStructure(
                "the output dimension must be positive".to_string(),
            ));
        }

        let mut rng = config.rng();
        let conv = ConvStage::init(input, conv, &mut rng)?;
        let weights = rand_weights(conv.output_dim(), hidden, output_dim, &mut rng)?;
        let dropout_rng = StdRng::seed_from_u64(rng.random());
        let dense = DenseStage::new(
            weights,
            config.error_measure(),
            config.dropout(),
            dropout_rng,
        )?;

        Self::new(conv, dense)
    }

    /// Builds a randomly initialized network from a structure string such as `"4x3x3-2s-8"`.
    pub fn from_structure(
        input: (usize, usize),
        structure: &str,
        output_dim: usize,
        config: &Config,
    ) -> Result<Self> {
        let (conv, hidden) = parse_structure(structure)?;
        Self::build(input, conv, &hidden, output_dim, config)
    }

    pub fn conv(&self) -> &ConvStage {
        &self.conv
    }

    pub fn dense(&self) -> &DenseStage {
        &self.dense
    }

    pub fn dense_mut(&mut self) -> &mut DenseStage {
        &mut self.dense
    }

    /// Borrows both stages at once.
    pub fn stages_mut(&mut self) -> (&mut ConvStage, &mut DenseStage) {
        (&mut self.conv, &mut self.dense)
    }

    pub fn input_dim(&self) -> usize {
        self.conv.input_dim()
    }

    pub fn output_dim(&self) -> usize {
        self.dense.output_dim()
    }

    /// The amount of trainable parameters.
    pub fn size(&self) -> usize {
        self.conv.size() + self.dense.size()
    }

    /// Makes a forward pass through both stages.
    ///
    /// # Returns
    /// The class probabilities of every sample.
    pub fn predict<'c>(
        &mut self,
        x: ArrayView2<f32>,
        cache: &'c MemoryCache,
    ) -> Result<CachedArray<'c>> {
        let middle = self.conv.forward(x, cache)?;
        self.dense.forward(middle.view(), cache)
    }

    /// Logs the structure of this network.
    pub fn status(&self) {
        let (h, w) = self.conv.input_size();
        info!(
            "network: {h}x{w} input, {} parameters, {} error",
            self.size(),
            self.dense.measure()
        );
        self.conv.status();
        self.dense.status();
    }
}
