use ndarray::{Array, ShapeBuilder};
use ndarray_rand::RandomExt;
use rand::Rng;
use rand_distr::Uniform;

use super::error::Result;

/// A parameter generator that samples whole tensors from a uniform distribution.
#[derive(Debug, Clone)]
pub struct RandParamGen {
    distribution: Uniform<f32>,
    low: f32,
    high: f32,
}

impl RandParamGen {
    /// Creates a new `RandParamGen` with an inclusive uniform distribution.
    ///
    /// # Arguments
    /// * `low` - The inclusive lower limit.
    /// * `high` - The inclusive upper limit.
    ///
    /// # Returns
    /// An error if the range is invalid (low > high or not finite).
    pub fn uniform(low: f32, high: f32) -> Result<Self> {
        Ok(Self {
            distribution: Uniform::new_inclusive(low, high)?,
            low,
            high,
        })
    }

    /// Creates a new `RandParamGen` using Xavier uniform initialization.
    ///
    /// The bound is `sqrt(6 / (fan_in + fan_out))`, which is the same as sampling
    /// `2 * sqrt(6 / (fan_in + fan_out)) * (u - 0.5)` with `u` uniform in `[0, 1]`.
    ///
    /// # Arguments
    /// * `fan_in` - The number of input units in the weight tensor.
    /// * `fan_out` - The number of output units in the weight tensor.
    ///
    /// # Returns
    /// An error if the calculated range is invalid.
    pub fn xavier_uniform(fan_in: usize, fan_out: usize) -> Result<Self> {
        let range = (6. / (fan_in + fan_out) as f32).sqrt();
        Self::uniform(-range, range)
    }

    /// The width of the sampling interval.
    pub fn width(&self) -> f32 {
        self.high - self.low
    }

    /// Samples a tensor of the given shape.
    ///
    /// # Arguments
    /// * `shape` - The shape of the resulting tensor.
    /// * `rng` - The random number generator to draw from.
    pub fn sample<Sh, R>(&self, shape: Sh, rng: &mut R) -> Array<f32, Sh::Dim>
    where
        Sh: ShapeBuilder,
        R: Rng + ?Sized,
    {
        Array::random_using(shape, &self.distribution, rng)
    }
}
