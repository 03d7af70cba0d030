use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use log::info;
use ndarray::{Array2, ArrayD, Ix2, IxDyn};
use rand::{Rng, SeedableRng, rngs::StdRng};
use safetensors::{Dtype, SafeTensors, tensor::TensorView};
use serde::{Deserialize, Serialize};

use crate::{
    MlErr, Result,
    arch::{ConvStage, DenseStage, Network, Stage, loss::ErrorMeasure, structure::ConvSpec},
    config::Config,
};

const MODEL_KEY: &str = "model";

/// The structure of a network, stored next to its tensors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ModelMeta {
    input: (usize, usize),
    conv: Vec<ConvSpec>,
    dense_layers: usize,
    error_measure: ErrorMeasure,
}

/// The path of the checkpoint written after `epoch`.
pub fn checkpoint_path<P: AsRef<Path>>(model_out: P, epoch: usize) -> PathBuf {
    let mut path = model_out.as_ref().as_os_str().to_owned();
    path.push(format!(".{epoch}"));
    PathBuf::from(path)
}

/// Writes `network` to `path` as a safetensors archive, replacing any previous file.
///
/// The file is written next to `path` first and then renamed, so a failed write never leaves
/// a truncated model behind.
pub fn save_model<P: AsRef<Path>>(network: &Network, path: P) -> Result<()> {
    let path = path.as_ref();
    let conv = network.conv();
    let dense = network.dense();

    let meta = ModelMeta {
        input: conv.input_size(),
        conv: conv.specs().to_vec(),
        dense_layers: dense.depth(),
        error_measure: dense.measure(),
    };

    let tensors: Vec<_> = conv_names(conv.specs().len())
        .into_iter()
        .zip(conv.params())
        .chain(dense_names(dense.depth()).into_iter().zip(dense.params()))
        .map(|(name, param)| {
            let data: Vec<f32> = param.iter().copied().collect();
            (name, param.shape().to_vec(), data)
        })
        .collect();

    let views = tensors
        .iter()
        .map(|(name, shape, data)| -> Result<(&str, TensorView<'_>)> {
            let view = TensorView::new(Dtype::F32, shape.clone(), bytemuck::cast_slice(data))?;
            Ok((name.as_str(), view))
        })
        .collect::<Result<Vec<_>>>()?;

    let metadata = HashMap::from([(MODEL_KEY.to_string(), serde_json::to_string(&meta)?)]);
    let bytes = safetensors::serialize(views, &Some(metadata))?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;

    info!("model written to {}", path.display());
    Ok(())
}

/// Reads a network written by `save_model`.
///
/// # Arguments
/// * `path` - The model file.
/// * `config` - Provides the dropout rate and the seed of its masks.
pub fn load_model<P: AsRef<Path>>(path: P, config: &Config) -> Result<Network> {
    let path = path.as_ref();
    let bytes = fs::read(path)?;

    let (_, metadata) = SafeTensors::read_metadata(&bytes)?;
    let meta = metadata
        .metadata()
        .as_ref()
        .and_then(|m| m.get(MODEL_KEY))
        .ok_or_else(|| MlErr::Serialization(format!("{} has no model record", path.display())))?;
    let meta: ModelMeta = serde_json::from_str(meta)?;

    let tensors = SafeTensors::deserialize(&bytes)?;
    let read = |name: &str| -> Result<ArrayD<f32>> {
        let view = tensors.tensor(name)?;
        if view.dtype() != Dtype::F32 {
            return Err(MlErr::Serialization(format!(
                "{name} holds {:?} values",
                view.dtype()
            )));
        }

        let data: Vec<f32> = view
            .data()
            .chunks_exact(size_of::<f32>())
            .map(bytemuck::pod_read_unaligned)
            .collect();

        Ok(ArrayD::from_shape_vec(IxDyn(view.shape()), data)?)
    };

    let mut conv = ConvStage::new(meta.input, meta.conv)?;
    let conv_params = conv_names(conv.specs().len())
        .iter()
        .map(|name| read(name))
        .collect::<Result<Vec<_>>>()?;
    conv.set_params(conv_params)?;

    let weights = dense_names(meta.dense_layers)
        .iter()
        .map(|name| Ok(read(name)?.into_dimensionality::<Ix2>()?))
        .collect::<Result<Vec<Array2<f32>>>>()?;

    let mut rng = config.rng();
    let dense = DenseStage::new(
        weights,
        meta.error_measure,
        config.dropout(),
        StdRng::seed_from_u64(rng.random()),
    )?;

    info!("model read from {}", path.display());
    Network::new(conv, dense)
}

fn conv_names(layers: usize) -> Vec<String> {
    (0..layers)
        .flat_map(|i| [format!("cnn.{i}.kernels"), format!("cnn.{i}.bias")])
        .collect()
}

fn dense_names(layers: usize) -> Vec<String> {
    (0..layers).map(|i| format!("dnn.{i}.weights")).collect()
}
