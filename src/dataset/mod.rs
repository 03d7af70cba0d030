mod batches;
mod normalization;
mod samples;

pub use batches::{Batch, BatchIter, Batches};
pub use normalization::{Normalization, Normalizer};
pub use samples::Dataset;
