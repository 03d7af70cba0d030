use std::num::NonZeroUsize;

use rand::{SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};

use crate::{MlErr, Result, arch::loss::ErrorMeasure};

/// Immutable hyper-parameters of a training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    learning_rate: f32,
    min_valid_accuracy: f32,
    max_epoch: usize,
    n_non_inc_epoch: usize,
    batch_size: NonZeroUsize,
    eval_batch_size: NonZeroUsize,
    dropout: f32,
    error_measure: ErrorMeasure,
    seed: Option<u64>,
}

impl Config {
    /// The initial learning rate.
    pub fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    /// The validation accuracy that must be exceeded before early stopping is considered.
    pub fn min_valid_accuracy(&self) -> f32 {
        self.min_valid_accuracy
    }

    /// The maximum amount of epochs to run.
    pub fn max_epoch(&self) -> usize {
        self.max_epoch
    }

    /// The length of the early stopping window.
    pub fn n_non_inc_epoch(&self) -> usize {
        self.n_non_inc_epoch
    }

    /// The amount of samples per training step.
    pub fn batch_size(&self) -> NonZeroUsize {
        self.batch_size
    }

    /// The amount of samples per evaluation step.
    pub fn eval_batch_size(&self) -> NonZeroUsize {
        self.eval_batch_size
    }

    /// The probability of dropping a hidden unit during training.
    pub fn dropout(&self) -> f32 {
        self.dropout
    }

    pub fn error_measure(&self) -> ErrorMeasure {
        self.error_measure
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    /// Creates the random number generator for this run.
    ///
    /// # Returns
    /// A generator seeded with `seed` if set, or from the operating system otherwise.
    pub fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            min_valid_accuracy: 0.5,
            max_epoch: 100_000,
            n_non_inc_epoch: 6,
            batch_size: NonZeroUsize::new(32).unwrap_or(NonZeroUsize::MIN),
            eval_batch_size: NonZeroUsize::new(2048).unwrap_or(NonZeroUsize::MIN),
            dropout: 0.,
            error_measure: ErrorMeasure::default(),
            seed: None,
        }
    }
}

/// Builds a validated `Config`.
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    config: Config,
    batch_size: Option<usize>,
    eval_batch_size: Option<usize>,
}

impl ConfigBuilder {
    /// Creates a new `ConfigBuilder` holding the default values.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn learning_rate(mut self, learning_rate: f32) -> Self {
        self.config.learning_rate = learning_rate;
        self
    }

    pub fn min_valid_accuracy(mut self, min_valid_accuracy: f32) -> Self {
        self.config.min_valid_accuracy = min_valid_accuracy;
        self
    }

    pub fn max_epoch(mut self, max_epoch: usize) -> Self {
        self.config.max_epoch = max_epoch;
        self
    }

    pub fn n_non_inc_epoch(mut self, n_non_inc_epoch: usize) -> Self {
        self.config.n_non_inc_epoch = n_non_inc_epoch;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn eval_batch_size(mut self, eval_batch_size: usize) -> Self {
        self.eval_batch_size = Some(eval_batch_size);
        self
    }

    pub fn dropout(mut self, dropout: f32) -> Self {
        self.config.dropout = dropout;
        self
    }

    pub fn error_measure(mut self, error_measure: ErrorMeasure) -> Self {
        self.config.error_measure = error_measure;
        self
    }

    pub fn seed(mut self, seed: Option<u64>) -> Self {
        self.config.seed = seed;
        self
    }

    /// Validates the values and builds the `Config`.
    ///
    /// # Returns
    /// The configuration or `MlErr::InvalidConfig` naming the first offending value.
    pub fn build(self) -> Result<Config> {
        let mut config = self.config;

        if let Some(batch_size) = self.batch_size {
            config.batch_size = NonZeroUsize::new(batch_size)
                .ok_or_else(|| invalid("the batch size must be positive"))?;
        }

        if let Some(eval_batch_size) = self.eval_batch_size {
            config.eval_batch_size = NonZeroUsize::new(eval_batch_size)
                .ok_or_else(|| invalid("the evaluation batch size must be positive"))?;
        }

        if !(config.learning_rate.is_finite() && config.learning_rate > 0.) {
            return Err(invalid(format!(
                "the learning rate must be positive, got {}",
                config.learning_rate
            )));
        }

        if !(0. ..=1.).contains(&config.min_valid_accuracy) {
            return Err(invalid(format!(
                "the minimum validation accuracy must be in [0, 1], got {}",
                config.min_valid_accuracy
            )));
        }

        if config.max_epoch == 0 {
            return Err(invalid("the maximum amount of epochs must be positive"));
        }

        if !(0. ..1.).contains(&config.dropout) {
            return Err(invalid(format!(
                "the dropout rate must be in [0, 1), got {}",
                config.dropout
            )));
        }

        Ok(config)
    }
}

fn invalid(msg: impl Into<String>) -> MlErr {
    MlErr::InvalidConfig(msg.into())
}
