use std::fmt::{self, Display};

/// Why a training run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The validation accuracy was good enough and its error stopped decreasing.
    Converged { epoch: usize },
    /// Every allowed epoch ran.
    MaxEpoch,
}

/// The outcome of a training run.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingReport {
    pub epochs: usize,
    /// The in-sample error count of every epoch.
    pub ein: Vec<usize>,
    /// The out-of-sample error count of every epoch.
    pub eout: Vec<usize>,
    pub n_train: usize,
    pub n_valid: usize,
    pub stop: StopReason,
    /// The learning rate after the last adaptation.
    pub learning_rate: f32,
}

impl TrainingReport {
    /// The accuracy over the training set after the last epoch.
    pub fn train_accuracy(&self) -> f32 {
        accuracy(self.ein.last().copied(), self.n_train)
    }

    /// The accuracy over the validation set after the last epoch.
    pub fn valid_accuracy(&self) -> f32 {
        accuracy(self.eout.last().copied(), self.n_valid)
    }
}

/// `1 - errors / n`, zero if there's no measurement.
pub(super) fn accuracy(errors: Option<usize>, n: usize) -> f32 {
    match errors {
        Some(e) if n > 0 => 1. - e as f32 / n as f32,
        _ => 0.,
    }
}

impl Display for TrainingReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stop = match self.stop {
            StopReason::Converged { epoch } => format!("converged at epoch {epoch}"),
            StopReason::MaxEpoch => "reached the maximum amount of epochs".to_string(),
        };

        write!(
            f,
            "{stop} after {} epochs, in-sample accuracy {:.2}%, out-of-sample accuracy {:.2}%",
            self.epochs,
            self.train_accuracy() * 100.,
            self.valid_accuracy() * 100.
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accuracies_use_the_last_epoch() {
        let report = TrainingReport {
            epochs: 2,
            ein: vec![50, 10],
            eout: vec![20, 5],
            n_train: 100,
            n_valid: 25,
            stop: StopReason::MaxEpoch,
            learning_rate: 0.1,
        };

        assert_eq!(report.train_accuracy(), 0.9);
        assert_eq!(report.valid_accuracy(), 0.8);
    }

    #[test]
    fn nothing_measured() {
        assert_eq!(accuracy(None, 10), 0.);
        assert_eq!(accuracy(Some(0), 0), 0.);
    }
}
