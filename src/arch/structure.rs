use serde::{Deserialize, Serialize};

use crate::{MlErr, Result};

/// A convolution layer declared in a structure string, with its optional subsampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvSpec {
    /// The amount of output feature maps.
    pub maps: usize,
    /// The `(height, width)` of the kernels.
    pub kernel: (usize, usize),
    /// The subsampling ratio applied after the convolution.
    pub subsample: Option<usize>,
}

/// Parses a network structure such as `"9x5x5-3s-4x3x3-2s-256-128"`.
///
/// Layers are separated by `-`. `MxHxW` declares a convolution with `M` output maps and an
/// `HxW` kernel, `Ns` a subsampling by `N` of the preceding convolution and a bare integer a
/// hidden dense layer. Convolutions must come before the dense layers. An empty string
/// declares no hidden layer at all.
///
/// # Returns
/// The convolution specs and the hidden dense widths, in order.
pub fn parse_structure(structure: &str) -> Result<(Vec<ConvSpec>, Vec<usize>)> {
    let mut conv: Vec<ConvSpec> = Vec::new();
    let mut hidden = Vec::new();

    let structure = structure.trim();
    if structure.is_empty() {
        return Ok((conv, hidden));
    }

    for token in structure.split('-').map(str::trim) {
        if let Some(ratio) = token.strip_suffix(['s', 'S']) {
            let ratio = positive(ratio, token)?;

            let Some(last) = conv.last_mut().filter(|_| hidden.is_empty()) else {
                return Err(invalid(format!("`{token}` doesn't follow a convolution")));
            };

            if last.subsample.replace(ratio).is_some() {
                return Err(invalid(format!("`{token}` subsamples an already subsampled layer")));
            }
        } else if token.contains(['x', 'X']) {
            if !hidden.is_empty() {
                return Err(invalid(format!("convolution `{token}` after a dense layer")));
            }

            let dims = token
                .split(['x', 'X'])
                .map(|d| positive(d, token))
                .collect::<Result<Vec<_>>>()?;

            let &[maps, kh, kw] = dims.as_slice() else {
                return Err(invalid(format!("`{token}` isn't of the form MAPSxHEIGHTxWIDTH")));
            };

            conv.push(ConvSpec {
                maps,
                kernel: (kh, kw),
                subsample: None,
            });
        } else {
            hidden.push(positive(token, token)?);
        }
    }

    Ok((conv, hidden))
}

/// Parses an input dimension, either `HxW` for images or a plain `N` for flat vectors.
///
/// # Returns
/// The `(height, width)` of the input, `(1, N)` for flat vectors.
pub fn parse_input_dim(input_dim: &str) -> Result<(usize, usize)> {
    let input_dim = input_dim.trim();
    let parse = |d: &str| {
        d.trim().parse::<usize>().ok().filter(|&d| d > 0).ok_or_else(|| {
            MlErr::InvalidConfig(format!("invalid input dimension `{input_dim}`"))
        })
    };

    match input_dim.split_once(['x', 'X']) {
        Some((h, w)) => Ok((parse(h)?, parse(w)?)),
        None => Ok((1, parse(input_dim)?)),
    }
}

fn positive(value: &str, token: &str) -> Result<usize> {
    value
        .parse::<usize>()
        .ok()
        .filter(|&v| v > 0)
        .ok_or_else(|| invalid(format!("`{token}` isn't a valid layer")))
}

fn invalid(msg: String) -> MlErr {
    MlErr::InvalidStructure(msg)
}
