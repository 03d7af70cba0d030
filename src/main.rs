use std::{
    path::{Path, PathBuf},
    process::ExitCode,
};

use anyhow::Context;
use clap::{CommandFactory, Parser};
use log::{error, info};

use convnet_trainer::{
    MlErr,
    arch::{
        Network,
        loss::ErrorMeasure,
        structure::{parse_input_dim, parse_structure},
    },
    config::{Config, ConfigBuilder},
    dataset::{Dataset, Normalization, Normalizer},
    io::{load_model, save_model},
    memory::MemoryCache,
    training::Trainer,
};

/// Trains a convolutional neural network over a labeled dataset.
#[derive(Debug, Parser)]
#[command(
    version,
    after_help = "Example: convnet-train data/train.dat --input-dim 28x28 --struct 12x5x5-2s-8x3x3-2s-128 --output-dim 10"
)]
struct Args {
    /// The training set, one `label v1 v2 ...` or `label i:v ...` sample per line.
    training_set_file: PathBuf,

    /// The validation set, `-` splits it off the training set.
    valid_set_file: Option<String>,

    /// A model to keep training, `-` builds a new one from --struct.
    model_in: Option<String>,

    /// Where the trained model is written, defaults to `<training file name>.model`.
    model_out: Option<PathBuf>,

    /// The input dimension, `HxW` for images or `N` for flat features.
    #[arg(long, help_heading = "Feature options")]
    input_dim: String,

    /// 0 leaves features as they are, 1 rescales each dimension to [0, 1], 2 standardizes it.
    #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=2), help_heading = "Feature options")]
    normalize: u8,

    /// Reads the means and standard deviations used by --normalize 2 from a file.
    #[arg(long, value_name = "FILE", help_heading = "Feature options")]
    nf: Option<PathBuf>,

    /// The id of the first label.
    #[arg(long, default_value_t = 0, help_heading = "Feature options")]
    base: usize,

    /// The amount of classes, taken from the training set if missing.
    #[arg(long, help_heading = "Feature options")]
    output_dim: Option<usize>,

    /// The network structure, e.g. 9x5x5-3s-4x3x3-2s-256-128.
    ///
    /// `MxHxW` is a convolution with M output maps and an HxW kernel, `Ns` subsamples the
    /// previous convolution by N and a bare number is a hidden layer of that width.
    #[arg(long = "struct", default_value = "", help_heading = "Network structure")]
    structure: String,

    /// Error measure of the output layer.
    #[arg(long, value_enum, default_value_t = Measure::CrossEntropy, help_heading = "Network structure")]
    error_measure: Measure,

    /// One in every RATIO training samples goes to validation, 0 disables the split.
    #[arg(short = 'v', value_name = "RATIO", default_value_t = 5, help_heading = "Training options")]
    ratio: usize,

    #[arg(long, default_value_t = 100_000, help_heading = "Training options")]
    max_epoch: usize,

    /// The validation accuracy needed before stopping early.
    #[arg(long, default_value_t = 0.5, help_heading = "Training options")]
    min_acc: f32,

    #[arg(long, default_value_t = 0.1, help_heading = "Training options")]
    learning_rate: f32,

    #[arg(long, default_value_t = 32, help_heading = "Training options")]
    batch_size: usize,

    /// Epochs the validation error must stop decreasing for.
    #[arg(long, default_value_t = 6, help_heading = "Training options")]
    patience: usize,

    /// The probability of dropping a hidden unit.
    #[arg(long, default_value_t = 0., help_heading = "Training options")]
    dropout: f32,

    #[arg(long, help_heading = "Training options")]
    seed: Option<u64>,

    /// The size of the memory cache in MB.
    #[arg(long, default_value_t = 16, help_heading = "Hardware options")]
    cache: usize,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum Measure {
    CrossEntropy,
    L2,
}

impl From<Measure> for ErrorMeasure {
    fn from(value: Measure) -> Self {
        match value {
            Measure::CrossEntropy => ErrorMeasure::CrossEntropy,
            Measure::L2 => ErrorMeasure::L2,
        }
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(MlErr::InvalidConfig(_) | MlErr::InvalidStructure(_)) =
                e.downcast_ref::<MlErr>()
            {
                let _ = Args::command().print_help();
            }

            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    let config = ConfigBuilder::new()
        .learning_rate(args.learning_rate)
        .min_valid_accuracy(args.min_acc)
        .max_epoch(args.max_epoch)
        .n_non_inc_epoch(args.patience)
        .batch_size(args.batch_size)
        .dropout(args.dropout)
        .error_measure(args.error_measure.into())
        .seed(args.seed)
        .build()?;
    info!("configuration: {}", serde_json::to_string(&config)?);

    let image = parse_input_dim(&args.input_dim)?;
    let input_dim = image.0 * image.1;
    info!("image dimension = {} x {}", image.0, image.1);

    let normalization = match (args.normalize, args.nf) {
        (_, Some(path)) => Normalization::ZScoreFrom(path),
        (1, None) => Normalization::Rescale,
        (2, None) => Normalization::ZScore,
        _ => Normalization::None,
    };

    let (train, valid) = load_datasets(
        &args.training_set_file,
        given(args.valid_set_file),
        args.ratio,
        input_dim,
        args.base,
        &normalization,
    )?;
    train.summary("training set");
    valid.summary("validation set");

    let mut network = match given(args.model_in) {
        Some(model_in) => load_model(&model_in, &config)
            .with_context(|| format!("couldn't read the model {}", model_in.display()))?,
        None => build_network(image, &args.structure, args.output_dim, &train, &config)?,
    };
    network.status();

    let model_out = args
        .model_out
        .unwrap_or_else(|| default_model_out(&args.training_set_file));

    let cache = MemoryCache::new(args.cache);
    let report = Trainer::new(&config, &cache)
        .with_checkpoints(&model_out)
        .train(&mut network, &train, &valid)?;
    info!("# of total epochs = {}", report.epochs);

    save_model(&network, &model_out)
        .with_context(|| format!("couldn't write the model {}", model_out.display()))?;

    Ok(())
}

fn load_datasets(
    train_fn: &Path,
    valid_fn: Option<PathBuf>,
    ratio: usize,
    input_dim: usize,
    base: usize,
    normalization: &Normalization,
) -> anyhow::Result<(Dataset, Dataset)> {
    let load = |path: &Path| {
        Dataset::load(path, input_dim, base)
            .with_context(|| format!("couldn't read the dataset {}", path.display()))
    };

    match valid_fn {
        None if ratio != 0 => {
            let mut data = load(train_fn)?;
            normalize(normalization, &mut data, None)?;
            Ok(data.split(ratio)?)
        }
        None => anyhow::bail!(MlErr::InvalidConfig(
            "a validation set is needed when the split ratio is 0".to_string()
        )),
        Some(valid_fn) => {
            let mut train = load(train_fn)?;
            let mut valid = load(&valid_fn)?;
            normalize(normalization, &mut train, Some(&mut valid))?;
            Ok((train, valid))
        }
    }
}

/// Fits the normalizer on `data` and applies it to `data` and `other`.
fn normalize(
    normalization: &Normalization,
    data: &mut Dataset,
    other: Option<&mut Dataset>,
) -> anyhow::Result<()> {
    let Some(normalizer) = Normalizer::fit(normalization, data)? else {
        return Ok(());
    };

    normalizer.apply(data)?;
    if let Some(other) = other {
        normalizer.apply(other)?;
    }

    Ok(())
}

fn build_network(
    image: (usize, usize),
    structure: &str,
    output_dim: Option<usize>,
    train: &Dataset,
    config: &Config,
) -> anyhow::Result<Network> {
    let (conv, hidden) = parse_structure(structure)?;
    let output_dim = output_dim.unwrap_or_else(|| train.n_classes());

    Ok(Network::build(image, conv, &hidden, output_dim, config)?)
}

/// `None` for missing arguments and for `-`.
fn given(arg: Option<String>) -> Option<PathBuf> {
    arg.filter(|a| !a.is_empty() && a != "-").map(PathBuf::from)
}

fn default_model_out(train_fn: &Path) -> PathBuf {
    let mut name = train_fn
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".model");
    PathBuf::from(name)
}
