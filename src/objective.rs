use crate::config::TrainingConfig;
use crate::data::DatasetProvider;
use crate::device::Device;
use crate::error::Result;
use crate::hyperparameters::{Hyperparameters, EPOCH_SEARCH_RANGE, LEARNING_RATE_SEARCH_RANGE};
use crate::search::{Objective, Trial};
use crate::tracking::{RunConfig, Session, TrackingBackend};
use crate::train::run_training;

/// Objective of the MNIST campaign: final test loss of a full training run
///
/// Each evaluation builds its own model, optimizer, schedule and RNG, so
/// nothing carries over from one trial to the next.
pub struct MnistObjective<P, B> {
    config: TrainingConfig,
    provider: P,
    backend: B,
}

impl<P: DatasetProvider, B: TrackingBackend> MnistObjective<P, B> {
    pub fn new(config: TrainingConfig, provider: P, backend: B) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, provider, backend })
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Train and evaluate with fixed hyperparameters, tracked as `run_name`
    pub fn run(&mut self, run_name: &str, hyperparameters: &Hyperparameters) -> Result<f64> {
        let device = Device::select(self.config.use_gpu);
        let (train, test) = self.provider.load()?;

        let run_config = RunConfig::new(hyperparameters, &self.config);
        let mut session = Session::open(&mut self.backend, run_name, &run_config);
        let outcome = run_training(hyperparameters, &self.config, &device, &train, &test, &mut session)?;

        if self.config.save_model {
            outcome.model.save_json(&self.config.model_path)?;
        }
        session.finish();
        Ok(outcome.test_loss)
    }
}

impl<P: DatasetProvider, B: TrackingBackend> Objective for MnistObjective<P, B> {
    fn evaluate(&mut self, trial: &mut Trial<'_>) -> Result<f64> {
        let epochs = trial.suggest_int("epochs", *EPOCH_SEARCH_RANGE.start(), *EPOCH_SEARCH_RANGE.end())?;
        let (low, high) = LEARNING_RATE_SEARCH_RANGE;
        let learning_rate = trial.suggest_float("learning_rate", low, high)?;

        let hyperparameters = Hyperparameters::new(epochs as usize, learning_rate)?;
        let _span = tracing::info_span!("trial", number = trial.number()).entered();
        tracing::info!(epochs, learning_rate, "starting trial");

        self.run(&format!("trial-{}", trial.number()), &hyperparameters)
    }
}
