use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Epoch counts the search is allowed to propose
pub const EPOCH_SEARCH_RANGE: RangeInclusive<i64> = 3..=30;

/// Learning rates the search is allowed to propose, half-open `[low, high)`
pub const LEARNING_RATE_SEARCH_RANGE: (f64, f64) = (0.0, 1.0);

/// Hyperparameters proposed for a single training run
///
/// Both fields are validated on construction; a value of this type always
/// describes a runnable configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawHyperparameters")]
pub struct Hyperparameters {
    /// Number of training epochs, at least one
    epochs: usize,

    /// Initial step size for the optimizer, in `[0, 1)`
    learning_rate: f64,
}

#[derive(Deserialize)]
struct RawHyperparameters {
    epochs: usize,
    learning_rate: f64,
}

impl TryFrom<RawHyperparameters> for Hyperparameters {
    type Error = Error;

    fn try_from(raw: RawHyperparameters) -> Result<Self> {
        Hyperparameters::new(raw.epochs, raw.learning_rate)
    }
}

impl Hyperparameters {
    pub fn new(epochs: usize, learning_rate: f64) -> Result<Self> {
        if epochs == 0 {
            return Err(Error::InvalidHyperparameter {
                name: "epochs",
                reason: "must be at least 1".to_string(),
            });
        }
        if !learning_rate.is_finite() || !(0.0..1.0).contains(&learning_rate) {
            return Err(Error::InvalidHyperparameter {
                name: "learning_rate",
                reason: format!("{learning_rate} is outside [0, 1)"),
            });
        }

        Ok(Hyperparameters { epochs, learning_rate })
    }

    pub fn epochs(&self) -> usize {
        self.epochs
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_hyperparameters() {
        let hp = Hyperparameters::new(12, 0.01).unwrap();

        assert_eq!(hp.epochs(), 12);
        assert_eq!(hp.learning_rate(), 0.01);
    }

    #[test]
    fn test_learning_rate_bounds() {
        assert!(Hyperparameters::new(3, 0.0).is_ok());
        assert!(Hyperparameters::new(3, 0.999).is_ok());
        assert!(Hyperparameters::new(3, 1.0).is_err());
        assert!(Hyperparameters::new(3, -0.1).is_err());
        assert!(Hyperparameters::new(3, f64::NAN).is_err());
    }

    #[test]
    fn test_deserialize_validates() {
        let hp: Hyperparameters = serde_json::from_str(r#"{"epochs": 4, "learning_rate": 0.5}"#).unwrap();
        assert_eq!(hp, Hyperparameters::new(4, 0.5).unwrap());

        let err = serde_json::from_str::<Hyperparameters>(r#"{"epochs": 4, "learning_rate": 1.5}"#).unwrap_err();
        assert!(err.to_string().contains("learning_rate"));
        assert!(serde_json::from_str::<Hyperparameters>(r#"{"epochs": 0, "learning_rate": 0.5}"#).is_err());
    }

    #[test]
    fn test_zero_epochs_rejected() {
        let err = Hyperparameters::new(0, 0.1).unwrap_err();
        assert!(err.to_string().contains("epochs"));
    }
}
