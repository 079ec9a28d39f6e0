use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Fixed settings shared by every trial of a campaign
///
/// Only `epochs` and `learning_rate` are searched; everything here stays
/// constant across trials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Batch size for the update pass
    pub batch_size: usize,

    /// Batch size for loss/accuracy passes
    pub test_batch_size: usize,

    /// Learning rate decay factor applied once per epoch
    pub gamma: f64,

    /// Seed for weight init, dropout and shuffling
    pub seed: u64,

    /// Log training progress every this many batches
    pub log_interval: usize,

    /// Stop each epoch after the first logged batch
    pub dry_run: bool,

    /// Try a GPU adapter before falling back to the CPU
    pub use_gpu: bool,

    /// Write the trained parameters of every trial to `model_path`
    pub save_model: bool,
    pub model_path: PathBuf,

    /// Dataset cache directory
    pub data_dir: PathBuf,

    /// Directory for tracked runs
    pub runs_dir: PathBuf,

    /// Number of trials in the campaign
    pub n_trials: usize,

    pub net: NetConfig,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig {
            batch_size: 64,
            test_batch_size: 1000,
            gamma: 0.7,
            seed: 1,
            log_interval: 10,
            dry_run: false,
            use_gpu: true,
            save_model: false,
            model_path: PathBuf::from("mnist_cnn.json"),
            data_dir: PathBuf::from("../data"),
            runs_dir: PathBuf::from("runs"),
            n_trials: 100,
            net: NetConfig::mnist(),
        }
    }
}

impl TrainingConfig {
    /// Load a config from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: TrainingConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 || self.test_batch_size == 0 {
            return Err(Error::Config("batch sizes must be positive".to_string()));
        }
        if !(self.gamma > 0.0 && self.gamma <= 1.0) {
            return Err(Error::Config(format!("gamma {} is outside (0, 1]", self.gamma)));
        }
        if self.log_interval == 0 {
            return Err(Error::Config("log_interval must be positive".to_string()));
        }
        if self.n_trials == 0 {
            return Err(Error::Config("n_trials must be positive".to_string()));
        }
        self.net.validate()
    }
}

/// Layer sizes of the convolutional classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetConfig {
    /// (channels, height, width) of one input image
    pub input_shape: (usize, usize, usize),
    pub conv1_filters: usize,
    pub conv2_filters: usize,
    pub kernel_size: usize,
    pub pool_size: usize,
    pub hidden: usize,
    pub classes: usize,
    pub conv_dropout: f32,
    pub hidden_dropout: f32,
}

impl NetConfig {
    /// The reference MNIST network
    pub fn mnist() -> Self {
        NetConfig {
            input_shape: (1, 28, 28),
            conv1_filters: 32,
            conv2_filters: 64,
            kernel_size: 3,
            pool_size: 2,
            hidden: 128,
            classes: 10,
            conv_dropout: 0.25,
            hidden_dropout: 0.5,
        }
    }

    /// Spatial size after both convolutions and the pooling layer
    pub fn pooled_shape(&self) -> (usize, usize, usize) {
        let (_, height, width) = self.input_shape;
        let shrink = 2 * (self.kernel_size - 1);
        (
            self.conv2_filters,
            (height - shrink) / self.pool_size,
            (width - shrink) / self.pool_size,
        )
    }

    pub fn flattened_features(&self) -> usize {
        let (c, h, w) = self.pooled_shape();
        c * h * w
    }

    pub fn validate(&self) -> Result<()> {
        let (channels, height, width) = self.input_shape;
        if channels == 0 || self.conv1_filters == 0 || self.conv2_filters == 0 {
            return Err(Error::Config("channel counts must be positive".to_string()));
        }
        if self.kernel_size == 0 || self.pool_size == 0 || self.hidden == 0 {
            return Err(Error::Config("kernel, pool and hidden sizes must be positive".to_string()));
        }
        if self.classes < 2 {
            return Err(Error::Config("at least two classes are required".to_string()));
        }
        let shrink = 2 * (self.kernel_size - 1);
        if height < shrink + self.pool_size || width < shrink + self.pool_size {
            return Err(Error::Config(format!(
                "input {height}x{width} is too small for two {k}x{k} convolutions and a {p}x{p} pool",
                k = self.kernel_size,
                p = self.pool_size,
            )));
        }
        for rate in [self.conv_dropout, self.hidden_dropout] {
            if !(0.0..1.0).contains(&rate) {
                return Err(Error::Config(format!("dropout rate {rate} is outside [0, 1)")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TrainingConfig::default();

        assert_eq!(config.batch_size, 64);
        assert_eq!(config.test_batch_size, 1000);
        assert_eq!(config.gamma, 0.7);
        assert_eq!(config.seed, 1);
        assert_eq!(config.log_interval, 10);
        assert!(!config.dry_run);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_mnist_flattened_features() {
        // 28 -> 26 -> 24 -> pooled 12; 64 * 12 * 12
        assert_eq!(NetConfig::mnist().flattened_features(), 9216);
    }

    #[test]
    fn test_too_small_input_rejected() {
        let mut net = NetConfig::mnist();
        net.input_shape = (1, 5, 5);
        assert!(net.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "batch_size": 16, "seed": 7 }"#).unwrap();

        let config = TrainingConfig::from_json_file(&path).unwrap();
        assert_eq!(config.batch_size, 16);
        assert_eq!(config.seed, 7);
        assert_eq!(config.test_batch_size, 1000);
    }

    #[test]
    fn test_invalid_gamma_rejected() {
        let config = TrainingConfig { gamma: 0.0, ..TrainingConfig::default() };
        assert!(config.validate().is_err());
    }
}
