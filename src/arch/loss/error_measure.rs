use std::fmt::{self, Display};

use ndarray::{Array2, ArrayView1, ArrayView2, ArrayViewMut2};
use serde::{Deserialize, Serialize};

use super::{CrossEntropy, LossFn, Mse};
use crate::Result;

/// The error measure a network is trained against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorMeasure {
    /// Softmax outputs with cross entropy.
    #[default]
    CrossEntropy,
    /// Sigmoid outputs with squared error.
    L2,
}

impl LossFn for ErrorMeasure {
    fn activate(&self, z: ArrayViewMut2<f32>) {
        match self {
            ErrorMeasure::CrossEntropy => CrossEntropy.activate(z),
            ErrorMeasure::L2 => Mse.activate(z),
        }
    }

    fn loss(&self, y_pred: ArrayView2<f32>, y: ArrayView1<usize>) -> Result<f32> {
        match self {
            ErrorMeasure::CrossEntropy => CrossEntropy.loss(y_pred, y),
            ErrorMeasure::L2 => Mse.loss(y_pred, y),
        }
    }

    fn loss_prime(&self, y_pred: ArrayView2<f32>, y: ArrayView1<usize>) -> Result<Array2<f32>> {
        match self {
            ErrorMeasure::CrossEntropy => CrossEntropy.loss_prime(y_pred, y),
            ErrorMeasure::L2 => Mse.loss_prime(y_pred, y),
        }
    }
}

impl Display for ErrorMeasure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorMeasure::CrossEntropy => write!(f, "cross-entropy"),
            ErrorMeasure::L2 => write!(f, "L2"),
        }
    }
}
