//! Mini-batch training of convolutional networks followed by fully connected layers.

pub mod arch;
pub mod config;
pub mod dataset;
mod error;
pub mod initialization;
pub mod io;
pub mod memory;
pub mod optimization;
pub mod training;

pub use error::{MlErr, Result};
