use ndarray::{ArrayD, ArrayView2, ArrayViewD};

use crate::{
    Result,
    memory::{CachedArray, MemoryCache},
};

/// A trainable section of a network.
///
/// A stage keeps whatever it needs from its last forward pass so that the following backward
/// pass can compute its gradients.
pub trait Stage {
    /// The width of the samples this stage consumes.
    fn input_dim(&self) -> usize;

    /// The width of the samples this stage produces.
    fn output_dim(&self) -> usize;

    /// The amount of trainable parameters.
    fn size(&self) -> usize;

    /// Makes a forward pass.
    ///
    /// # Arguments
    /// * `x` - The input, one sample per row.
    /// * `cache` - The pool the output buffer is borrowed from.
    ///
    /// # Returns
    /// The output of the stage, one sample per row.
    fn forward<'c>(&mut self, x: ArrayView2<f32>, cache: &'c MemoryCache)
    -> Result<CachedArray<'c>>;

    /// Makes a backward pass over the last forward pass and steps the parameters.
    ///
    /// The input and output of the last forward pass are the ones kept by the stage.
    ///
    /// # Arguments
    /// * `delta` - The gradient with respect to the output of the last forward pass.
    /// * `learning_rate` - The length of the step.
    /// * `cache` - The pool the intermediate gradients are borrowed from.
    ///
    /// # Returns
    /// The gradient with respect to the input of the last forward pass.
    fn backward<'c>(
        &mut self,
        delta: ArrayView2<f32>,
        learning_rate: f32,
        cache: &'c MemoryCache,
    ) -> Result<CachedArray<'c>>;

    /// Borrows every parameter tensor, in a stable order.
    fn params(&self) -> Vec<ArrayViewD<'_, f32>>;

    /// Replaces every parameter tensor, in the order given by `params`.
    fn set_params(&mut self, params: Vec<ArrayD<f32>>) -> Result<()>;
}
