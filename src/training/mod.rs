mod early_stop;
mod report;
mod schedule;
mod trainer;

pub use early_stop::is_eout_stop_decrease;
pub use report::{StopReason, TrainingReport};
pub use schedule::LrSchedule;
pub use trainer::{MAX_CONV_EPOCH, Trainer};
