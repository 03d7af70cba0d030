pub mod activations;
mod conv_stage;
mod dense_stage;
pub mod layers;
pub mod loss;
mod network;
mod stage;
pub mod structure;

pub use conv_stage::ConvStage;
pub use dense_stage::DenseStage;
pub use network::Network;
pub use stage::Stage;
