use log::info;

/// Training accuracies that each trigger one learning rate decay.
const PHASES: [f32; 6] = [0.80, 0.85, 0.90, 0.92, 0.95, 0.97];
const DECAY: f32 = 0.9;

/// Decays the learning rate as the training accuracy crosses fixed thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LrSchedule {
    learning_rate: f32,
    phase: usize,
}

impl LrSchedule {
    pub fn new(learning_rate: f32) -> Self {
        Self {
            learning_rate,
            phase: 0,
        }
    }

    pub fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    /// Decays the learning rate once if `train_acc` crossed the next threshold.
    ///
    /// # Returns
    /// Whether the learning rate changed.
    pub fn adjust(&mut self, train_acc: f32) -> bool {
        match PHASES.get(self.phase) {
            Some(&threshold) if train_acc > threshold => {
                self.phase += 1;
                self.learning_rate *= DECAY;
                info!(
                    "training accuracy above {threshold:.2}, learning rate set to {:.6}",
                    self.learning_rate
                );
                true
            }
            _ => false,
        }
    }
}
