mod error;
mod random;
mod weights;

pub use error::RandErr;
pub use random::RandParamGen;
pub use weights::{conv_kernels, rand_weights};
