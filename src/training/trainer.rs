use std::{path::PathBuf, time::Instant};

use log::{Level, debug, info, log_enabled, warn};

use super::{LrSchedule, StopReason, TrainingReport, is_eout_stop_decrease, report::accuracy};
use crate::{
    MlErr, Result,
    arch::{
        Network, Stage,
        loss::{LossFn, zero_one_error},
    },
    config::Config,
    dataset::Dataset,
    io::{checkpoint_path, save_model},
    memory::MemoryCache,
};

/// Networks with convolution layers never train for longer than this.
pub const MAX_CONV_EPOCH: usize = 1024;

/// Runs mini-batch gradient descent over a network until the validation error stops
/// decreasing or the epochs run out.
pub struct Trainer<'a> {
    config: &'a Config,
    cache: &'a MemoryCache,
    model_out: Option<PathBuf>,
}

impl<'a> Trainer<'a> {
    /// Creates a new `Trainer`.
    ///
    /// # Arguments
    /// * `config` - The hyperparameters of the run.
    /// * `cache` - The pool the stage outputs and the backward gradients are borrowed from.
    pub fn new(config: &'a Config, cache: &'a MemoryCache) -> Self {
        Self {
            config,
            cache,
            model_out: None,
        }
    }

    /// Writes the network to `<model_out>.<epoch>` after every evaluation.
    pub fn with_checkpoints<P: Into<PathBuf>>(mut self, model_out: P) -> Self {
        self.model_out = Some(model_out.into());
        self
    }

    /// Trains `network` over `train`, using `valid` to decide when to stop.
    ///
    /// # Arguments
    /// * `network` - The network to train, updated in place.
    /// * `train` - The in-sample set.
    /// * `valid` - The out-of-sample set.
    ///
    /// # Returns
    /// The error history and the reason the run ended.
    pub fn train(
        &self,
        network: &mut Network,
        train: &Dataset,
        valid: &Dataset,
    ) -> Result<TrainingReport> {
        for (name, data) in [("training", train), ("validation", valid)] {
            if data.is_empty() {
                return Err(MlErr::InvalidConfig(format!("the {name} set is empty")));
            }

            if data.dim() != network.input_dim() {
                return Err(MlErr::SizeMismatch {
                    what: "dataset dimension",
                    got: data.dim(),
                    expected: network.input_dim(),
                });
            }
        }

        let max_epoch = if network.conv().is_identity() {
            self.config.max_epoch()
        } else {
            self.config.max_epoch().min(MAX_CONV_EPOCH)
        };

        let (n_train, n_valid) = (train.len(), valid.len());
        let mut schedule = LrSchedule::new(self.config.learning_rate());
        let mut ein = Vec::new();
        let mut eout = Vec::new();
        let start = Instant::now();

        for epoch in 0..max_epoch {
            let loss = self.run_epoch(network, train, schedule.learning_rate())?;
            if log_enabled!(Level::Debug) {
                let measure = network.dense().measure();
                debug!("epoch {epoch:>4}: mean {measure} loss {loss:.6}");
            }

            network.dense_mut().set_dropout(false);
            let errors = self
                .predict(network, train)
                .and_then(|e_in| Ok((e_in, self.predict(network, valid)?)));
            network.dense_mut().set_dropout(true);

            let (e_in, e_out) = errors?;
            ein.push(e_in);
            eout.push(e_out);

            if let Some(model_out) = &self.model_out {
                save_model(network, checkpoint_path(model_out, epoch))?;
            }

            let train_acc = accuracy(Some(e_in), n_train);
            let valid_acc = accuracy(Some(e_out), n_valid);

            if train_acc.is_nan() || train_acc < 0. {
                warn!("epoch {epoch:>4}: in-sample accuracy is {train_acc}, skipping");
                continue;
            }

            info!(
                "epoch {epoch:>4}: in-sample {:.2}% ({}/{n_train}), out-of-sample {:.2}% ({}/{n_valid}), {:.1}s",
                train_acc * 100.,
                n_train - e_in,
                valid_acc * 100.,
                n_valid - e_out,
                start.elapsed().as_secs_f32()
            );

            if valid_acc > self.config.min_valid_accuracy()
                && is_eout_stop_decrease(&eout, epoch, self.config.n_non_inc_epoch())
            {
                let stop = StopReason::Converged { epoch };
                return Ok(self.report(ein, eout, (n_train, n_valid), schedule, stop));
            }

            schedule.adjust(train_acc);
        }

        let stop = StopReason::MaxEpoch;
        Ok(self.report(ein, eout, (n_train, n_valid), schedule, stop))
    }

    /// Counts the samples of `data` that `network` misclassifies.
    pub fn predict(&self, network: &mut Network, data: &Dataset) -> Result<usize> {
        let mut errors = 0;

        for batch in &data.batches(self.config.eval_batch_size()) {
            let (x, y) = data.batch(batch)?;
            let prob = network.predict(x, self.cache)?;
            errors += zero_one_error(prob.view(), y)?;
        }

        Ok(errors)
    }

    /// Makes one pass over every batch of `data`.
    ///
    /// # Returns
    /// The mean loss of the epoch, only measured while debug logging is enabled.
    fn run_epoch(&self, network: &mut Network, data: &Dataset, learning_rate: f32) -> Result<f32> {
        let (conv, dense) = network.stages_mut();
        let measure = dense.measure();
        let measure_loss = log_enabled!(Level::Debug);
        let mut loss = 0.;

        for batch in &data.batches(self.config.batch_size()) {
            let (x, y) = data.batch(batch)?;
            let n_data = batch.n_data as f32;

            let delta = {
                let middle = conv.forward(x, self.cache)?;
                let out = dense.forward(middle.view(), self.cache)?;

                if measure_loss {
                    loss += measure.loss(out.view(), y)?;
                }

                measure.loss_prime(out.view(), y)?
            };

            let d = dense.backward(delta.view(), learning_rate / n_data, self.cache)?;
            if !conv.is_identity() {
                conv.backward(d.view(), learning_rate, self.cache)?;
            }
        }

        Ok(loss / data.len() as f32)
    }

    fn report(
        &self,
        ein: Vec<usize>,
        eout: Vec<usize>,
        (n_train, n_valid): (usize, usize),
        schedule: LrSchedule,
        stop: StopReason,
    ) -> TrainingReport {
        let report = TrainingReport {
            epochs: eout.len(),
            ein,
            eout,
            n_train,
            n_valid,
            stop,
            learning_rate: schedule.learning_rate(),
        };

        info!("{report}");
        report
    }
}
