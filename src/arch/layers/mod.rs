mod conv;
mod dense;
mod layer;
mod subsample;

pub use conv::Conv;
pub use dense::Dense;
pub use layer::Layer;
pub use subsample::Subsample;
