use log::info;
use ndarray::{Array1, Array2, Array4};
use rand::Rng;

use super::RandParamGen;
use crate::Result;

/// Generates the weight matrices of a fully connected stage.
///
/// Each layer maps `d_i` units to `d_{i+1}` units and gets a `(d_i + 1) x (d_{i+1} + 1)` matrix,
/// the extra row holds the biases and the extra column is never read by the forward pass.
///
/// # Arguments
/// * `input_dim` - The amount of inputs of the stage.
/// * `hidden` - The widths of the hidden layers, in order.
/// * `output_dim` - The amount of outputs of the stage.
/// * `rng` - The random number generator to draw from.
///
/// # Returns
/// One weight matrix per layer, or an error if a distribution can't be built.
pub fn rand_weights<R: Rng + ?Sized>(
    input_dim: usize,
    hidden: &[usize],
    output_dim: usize,
    rng: &mut R,
) -> Result<Vec<Array2<f32>>> {
    let dims: Vec<usize> = std::iter::once(input_dim)
        .chain(hidden.iter().copied())
        .chain(std::iter::once(output_dim))
        .map(|d| d + 1)
        .collect();

    dims.windows(2)
        .enumerate()
        .map(|(i, pair)| {
            let (rows, cols) = (pair[0], pair[1]);
            let param_gen = RandParamGen::xavier_uniform(rows, cols)?;
            info!(
                "Initialize weights[{i}] using {:.4} x (rand({rows:>3},{cols:>3}) - 0.5)",
                param_gen.width()
            );
            Ok(param_gen.sample((rows, cols), &mut *rng))
        })
        .collect()
}

/// Generates the kernels and biases of a convolution layer.
///
/// Kernels use the same Xavier bound as the dense weights with `fan_in = in_maps * kh * kw` and
/// `fan_out = out_maps * kh * kw`, biases start at zero.
pub fn conv_kernels<R: Rng + ?Sized>(
    in_maps: usize,
    out_maps: usize,
    kernel: (usize, usize),
    rng: &mut R,
) -> Result<(Array4<f32>, Array1<f32>)> {
    let (kh, kw) = kernel;
    let param_gen = RandParamGen::xavier_uniform(in_maps * kh * kw, out_maps * kh * kw)?;
    info!(
        "Initialize kernels {in_maps} -> {out_maps} of {kh}x{kw} using {:.4} x (rand - 0.5)",
        param_gen.width()
    );

    let kernels = param_gen.sample((in_maps, out_maps, kh, kw), rng);
    Ok((kernels, Array1::zeros(out_maps)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, rngs::StdRng};

    #[test]
    fn dense_shapes_and_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        let weights = rand_weights(4, &[6], 3, &mut rng).unwrap();

        let shapes: Vec<_> = weights.iter().map(|w| w.dim()).collect();
        assert_eq!(shapes, [(5, 7), (7, 4)]);

        let bound = (6f32 / 12.).sqrt();
        assert!(weights[0].iter().all(|w| w.abs() <= bound));
        let bound = (6f32 / 11.).sqrt();
        assert!(weights[1].iter().all(|w| w.abs() <= bound));
    }

    #[test]
    fn no_hidden_layers() {
        let mut rng = StdRng::seed_from_u64(7);
        let weights = rand_weights(10, &[], 2, &mut rng).unwrap();

        assert_eq!(weights.len(), 1);
        assert_eq!(weights[0].dim(), (11, 3));
    }

    #[test]
    fn deterministic_given_seed() {
        let a = rand_weights(3, &[2], 2, &mut StdRng::seed_from_u64(1)).unwrap();
        let b = rand_weights(3, &[2], 2, &mut StdRng::seed_from_u64(1)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn conv_bias_starts_at_zero() {
        let mut rng = StdRng::seed_from_u64(3);
        let (kernels, bias) = conv_kernels(1, 4, (3, 3), &mut rng).unwrap();

        assert_eq!(kernels.dim(), (1, 4, 3, 3));
        assert!(bias.iter().all(|&b| b == 0.));

        let bound = (6f32 / 45.).sqrt();
        assert!(kernels.iter().all(|k| k.abs() <= bound));
    }
}
