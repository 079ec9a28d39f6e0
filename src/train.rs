use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::TrainingConfig;
use crate::data::Dataset;
use crate::device::Device;
use crate::error::{Error, Result};
use crate::hyperparameters::Hyperparameters;
use crate::loss::argmax_rows;
use crate::model::Model;
use crate::optimizer::{Adam, Optimizer};
use crate::scheduler::{LRScheduler, StepDecayLR};
use crate::tracking::{MetricRecord, Session};

/// Per-epoch loop settings taken from [`TrainingConfig`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainSettings {
    pub batch_size: usize,
    pub test_batch_size: usize,
    pub log_interval: usize,
    pub dry_run: bool,
}

impl From<&TrainingConfig> for TrainSettings {
    fn from(config: &TrainingConfig) -> Self {
        TrainSettings {
            batch_size: config.batch_size,
            test_batch_size: config.test_batch_size,
            log_interval: config.log_interval,
            dry_run: config.dry_run,
        }
    }
}

/// Aggregate loss and accuracy over a dataset
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    /// Mean negative log-likelihood per example
    pub loss: f64,
    pub correct: usize,
    pub total: usize,
}

impl Evaluation {
    pub fn accuracy(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f64 / self.total as f64
        }
    }
}

/// Result of a completed training run
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub model: Model,
    /// Test loss after the last epoch
    pub test_loss: f64,
    pub records: Vec<MetricRecord>,
}

/// Sum of the loss and the number of correct predictions, in dataset order
fn loss_and_hits(model: &Model, device: &Device, data: &Dataset, batch_size: usize) -> Result<(f64, usize)> {
    let mut total_loss = 0.0;
    let mut correct = 0;
    for (images, labels) in data.batches(batch_size) {
        let log_probs = model.infer(&images, device)?;
        total_loss += model.loss.sum(log_probs.view(), &labels)?;
        correct += argmax_rows(log_probs.view())
            .iter()
            .zip(&labels)
            .filter(|(pred, label)| pred == label)
            .count();
    }
    Ok((total_loss, correct))
}

/// One pass of updates over `data` in shuffled order
///
/// Returns the mean loss over the whole training set, recomputed with the
/// inference forward after the last update. Dropout is off for that pass,
/// so the figure is not the loss seen by the updates.
pub fn train_epoch<R: Rng>(
    model: &mut Model,
    device: &Device,
    data: &Dataset,
    optimizer: &mut dyn Optimizer,
    epoch: usize,
    settings: &TrainSettings,
    rng: &mut R,
) -> Result<f64> {
    let batches = data.shuffled_batches(settings.batch_size, rng);
    let num_batches = batches.num_batches();

    for (batch_idx, (images, labels)) in batches.enumerate() {
        let loss = model.train_batch(&images, &labels, optimizer, device)?;
        if !loss.is_finite() {
            return Err(Error::NonFiniteLoss(loss));
        }

        if batch_idx % settings.log_interval.max(1) == 0 {
            tracing::info!(
                "Train Epoch: {} [{}/{} ({:.0}%)]\tLoss: {:.6}",
                epoch,
                batch_idx * settings.batch_size,
                data.len(),
                100.0 * batch_idx as f64 / num_batches as f64,
                loss
            );
            if settings.dry_run {
                break;
            }
        }
    }

    if data.is_empty() {
        return Ok(0.0);
    }
    let (total_loss, _) = loss_and_hits(model, device, data, settings.batch_size)?;
    Ok(total_loss / data.len() as f64)
}

/// Loss and accuracy of `model` on `data`; the model cannot be modified
pub fn evaluate(model: &Model, device: &Device, data: &Dataset, batch_size: usize) -> Result<Evaluation> {
    let (total_loss, correct) = loss_and_hits(model, device, data, batch_size)?;
    let total = data.len();
    let evaluation = Evaluation {
        loss: if total == 0 { 0.0 } else { total_loss / total as f64 },
        correct,
        total,
    };

    tracing::info!(
        "Test set: Average loss: {:.4}, Accuracy: {}/{} ({:.0}%)",
        evaluation.loss,
        correct,
        total,
        100.0 * evaluation.accuracy()
    );
    Ok(evaluation)
}

/// Train a fresh model for `hyperparameters.epochs()` epochs
///
/// Weights, dropout masks and shuffling all come from one RNG seeded with
/// `config.seed`, so identical inputs give identical runs. One
/// [`MetricRecord`] per epoch is sent to `session`.
pub fn run_training(
    hyperparameters: &Hyperparameters,
    config: &TrainingConfig,
    device: &Device,
    train: &Dataset,
    test: &Dataset,
    session: &mut Session<'_>,
) -> Result<TrainingOutcome> {
    if train.example_shape() != config.net.input_shape || test.example_shape() != config.net.input_shape {
        return Err(Error::Config(format!(
            "dataset examples are {:?}/{:?}, network expects {:?}",
            train.example_shape(),
            test.example_shape(),
            config.net.input_shape
        )));
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut model = Model::new(&config.net, &mut rng)?;
    let learning_rate = hyperparameters.learning_rate();
    let mut optimizer = Adam::default_params(learning_rate as f32);
    let mut scheduler = StepDecayLR::new(learning_rate, 1, config.gamma);
    let settings = TrainSettings::from(config);

    tracing::debug!(
        parameters = model.parameter_count(),
        device = %device.name(),
        "starting training run"
    );

    let mut records = Vec::with_capacity(hyperparameters.epochs());
    let mut test_loss = f64::NAN;
    for epoch in 0..hyperparameters.epochs() {
        let train_loss = train_epoch(&mut model, device, train, &mut optimizer, epoch, &settings, &mut rng)?;
        let evaluation = evaluate(&model, device, test, settings.test_batch_size)?;
        test_loss = evaluation.loss;

        let record = MetricRecord {
            epoch,
            train_loss,
            test_loss,
            accuracy: evaluation.accuracy(),
        };
        session.log(&record);
        records.push(record);

        scheduler.step();
        scheduler.apply(&mut optimizer);
    }

    if !test_loss.is_finite() {
        return Err(Error::NonFiniteLoss(test_loss));
    }
    Ok(TrainingOutcome { model, test_loss, records })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accuracy_of_empty_evaluation() {
        let evaluation = Evaluation { loss: 0.0, correct: 0, total: 0 };
        assert_eq!(evaluation.accuracy(), 0.0);
    }

    #[test]
    fn test_accuracy_ratio() {
        let evaluation = Evaluation { loss: 1.0, correct: 3, total: 4 };
        assert_eq!(evaluation.accuracy(), 0.75);
    }

    #[test]
    fn test_settings_from_config() {
        let settings = TrainSettings::from(&TrainingConfig::default());
        assert_eq!(settings.batch_size, 64);
        assert_eq!(settings.test_batch_size, 1000);
        assert_eq!(settings.log_interval, 10);
        assert!(!settings.dry_run);
    }
}
