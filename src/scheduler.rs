//! Learning rate schedules

use crate::optimizer::Optimizer;

/// Learning rate scheduler trait
pub trait LRScheduler {
    /// Get the current learning rate
    fn get_lr(&self) -> f64;

    /// Step the scheduler (called once per epoch)
    fn step(&mut self);

    /// Apply the current learning rate to an optimizer
    fn apply(&self, optimizer: &mut dyn Optimizer) {
        optimizer.set_learning_rate(self.get_lr() as f32);
    }
}

/// Step Decay Learning Rate Scheduler
///
/// Multiplies learning rate by gamma every step_size epochs.
///
/// Formula: lr_t = lr_initial * gamma^(floor(epoch / step_size))
#[derive(Debug, Clone)]
pub struct StepDecayLR {
    lr_initial: f64,
    gamma: f64,
    step_size: usize,
    current_epoch: usize,
}

impl StepDecayLR {
    /// # Arguments
    /// * `lr_initial` - Initial learning rate
    /// * `step_size` - Decay LR every step_size epochs
    /// * `gamma` - Multiplicative factor (e.g., 0.7)
    pub fn new(lr_initial: f64, step_size: usize, gamma: f64) -> Self {
        Self { lr_initial, gamma, step_size, current_epoch: 0 }
    }
}

impl LRScheduler for StepDecayLR {
    fn get_lr(&self) -> f64 {
        if self.step_size == 0 {
            return self.lr_initial;
        }
        let num_decays = self.current_epoch / self.step_size;
        self.lr_initial * self.gamma.powi(num_decays as i32)
    }

    fn step(&mut self) {
        self.current_epoch += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::Adam;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_geometric_decay_per_epoch() {
        let mut scheduler = StepDecayLR::new(1.0, 1, 0.7);
        assert_abs_diff_eq!(scheduler.get_lr(), 1.0);

        scheduler.step();
        assert_abs_diff_eq!(scheduler.get_lr(), 0.7, epsilon = 1e-12);

        scheduler.step();
        assert_abs_diff_eq!(scheduler.get_lr(), 0.49, epsilon = 1e-12);
    }

    #[test]
    fn test_step_size_groups_epochs() {
        let mut scheduler = StepDecayLR::new(0.1, 2, 0.5);
        scheduler.step();
        assert_abs_diff_eq!(scheduler.get_lr(), 0.1, epsilon = 1e-12);
        scheduler.step();
        assert_abs_diff_eq!(scheduler.get_lr(), 0.05, epsilon = 1e-12);
    }

    #[test]
    fn test_zero_step_size_keeps_initial() {
        let mut scheduler = StepDecayLR::new(0.3, 0, 0.5);
        scheduler.step();
        assert_eq!(scheduler.get_lr(), 0.3);
    }

    #[test]
    fn test_apply_sets_optimizer_rate() {
        let mut scheduler = StepDecayLR::new(0.5, 1, 0.5);
        let mut adam = Adam::default_params(0.5);
        scheduler.step();
        scheduler.apply(&mut adam);
        assert_abs_diff_eq!(adam.learning_rate(), 0.25, epsilon = 1e-7);
    }
}
