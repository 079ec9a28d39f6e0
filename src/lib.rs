pub mod activation;
pub mod config;
pub mod data;
pub mod device;
pub mod error;
#[cfg(feature = "gpu")]
mod gpu;
pub mod hyperparameters;
pub mod layers;
pub mod loss;
pub mod model;
pub mod objective;
pub mod optimizer;
pub mod scheduler;
pub mod search;
pub mod tracking;
pub mod train;

pub use activation::ActivationType;
pub use config::{NetConfig, TrainingConfig};
pub use data::{Dataset, DatasetProvider, InMemoryProvider, MnistProvider};
pub use device::Device;
pub use error::{DataError, Error, Result};
pub use hyperparameters::Hyperparameters;
pub use loss::Loss;
pub use model::Model;
pub use objective::MnistObjective;
pub use optimizer::{Adam, Optimizer};
pub use scheduler::{LRScheduler, StepDecayLR};
pub use search::{Objective, Study, Trial};
pub use tracking::{InMemoryBackend, JsonlBackend, MetricRecord, Session, TrackingBackend};
pub use train::{evaluate, run_training, train_epoch, Evaluation};
