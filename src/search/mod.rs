//! Sequential hyperparameter search.
//!
//! A [`Study`] runs an [`Objective`] for a fixed number of trials. Each
//! trial draws its parameters through [`Trial::suggest_int`] and
//! [`Trial::suggest_float`]; the study keeps every outcome and reports the
//! trial with the lowest value.

pub mod sampler;
pub mod trial;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub use sampler::{Distribution, ParamValue, RandomSampler, Sampler, TpeSampler};
pub use trial::Trial;

/// Final state of a trial
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrialState {
    Complete,
    Failed,
}

/// A finished trial as stored by the study
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedTrial {
    pub number: usize,
    pub params: BTreeMap<String, ParamValue>,
    pub distributions: BTreeMap<String, Distribution>,
    /// Objective value, present for complete trials
    pub value: Option<f64>,
    pub state: TrialState,
    /// Why the trial failed
    pub failure: Option<String>,
}

/// Function minimized by a study
///
/// Implemented for any `FnMut(&mut Trial) -> Result<f64>` closure.
pub trait Objective {
    fn evaluate(&mut self, trial: &mut Trial<'_>) -> Result<f64>;
}

impl<F> Objective for F
where
    F: FnMut(&mut Trial<'_>) -> Result<f64>,
{
    fn evaluate(&mut self, trial: &mut Trial<'_>) -> Result<f64> {
        self(trial)
    }
}

/// Minimizes an objective over a campaign of trials
pub struct Study {
    sampler: Box<dyn Sampler>,
    trials: Vec<CompletedTrial>,
}

impl Study {
    /// Study driven by a TPE sampler
    pub fn new() -> Self {
        Self::with_sampler(TpeSampler::new())
    }

    pub fn with_sampler(sampler: impl Sampler + 'static) -> Self {
        Self { sampler: Box::new(sampler), trials: Vec::new() }
    }

    /// Run `n_trials` trials one after another
    ///
    /// A trial whose objective errors or returns a non-finite value is
    /// recorded as failed and never becomes the best.
    ///
    /// # Errors
    ///
    /// Returns `Error::NoCompletedTrials` if no trial completed.
    pub fn optimize(&mut self, n_trials: usize, mut objective: impl Objective) -> Result<()> {
        let _span = tracing::info_span!("optimize", n_trials).entered();

        for _ in 0..n_trials {
            let number = self.trials.len();
            let mut trial = Trial::new(number, self.sampler.as_mut(), &self.trials);
            let outcome = objective.evaluate(&mut trial);
            let (number, params, distributions) = trial.into_parts();

            let completed = match outcome {
                Ok(value) if value.is_finite() => CompletedTrial {
                    number,
                    params,
                    distributions,
                    value: Some(value),
                    state: TrialState::Complete,
                    failure: None,
                },
                Ok(value) => failed(number, params, distributions, format!("objective returned {value}")),
                Err(err) => failed(number, params, distributions, err.to_string()),
            };
            self.record(completed);
        }

        if self.trials.iter().any(|t| t.state == TrialState::Complete) {
            Ok(())
        } else {
            Err(Error::NoCompletedTrials)
        }
    }

    fn record(&mut self, trial: CompletedTrial) {
        match (trial.state, trial.value) {
            (TrialState::Complete, Some(value)) => {
                self.trials.push(trial);
                let last = &self.trials[self.trials.len() - 1];
                if let Ok(best) = self.best_trial() {
                    tracing::info!(
                        "Trial {} finished with value: {} and parameters: {}. Best is trial {} with value: {:?}.",
                        last.number,
                        value,
                        format_params(&last.params),
                        best.number,
                        best.value
                    );
                }
            }
            _ => {
                tracing::warn!(
                    "Trial {} failed: {}",
                    trial.number,
                    trial.failure.as_deref().unwrap_or("unknown error")
                );
                self.trials.push(trial);
            }
        }
    }

    /// Every trial run so far, in order
    pub fn trials(&self) -> &[CompletedTrial] {
        &self.trials
    }

    pub fn n_trials(&self) -> usize {
        self.trials.len()
    }

    /// Complete trial with the lowest value; the earliest wins ties
    pub fn best_trial(&self) -> Result<&CompletedTrial> {
        self.trials
            .iter()
            .filter(|t| t.state == TrialState::Complete)
            .filter_map(|t| t.value.map(|v| (t, v)))
            .min_by(|(a, va), (b, vb)| va.total_cmp(vb).then(a.number.cmp(&b.number)))
            .map(|(t, _)| t)
            .ok_or(Error::NoCompletedTrials)
    }

    pub fn best_value(&self) -> Result<f64> {
        self.best_trial()?.value.ok_or(Error::NoCompletedTrials)
    }

    pub fn best_params(&self) -> Result<BTreeMap<String, ParamValue>> {
        Ok(self.best_trial()?.params.clone())
    }
}

impl Default for Study {
    fn default() -> Self {
        Self::new()
    }
}

fn failed(
    number: usize,
    params: BTreeMap<String, ParamValue>,
    distributions: BTreeMap<String, Distribution>,
    reason: String,
) -> CompletedTrial {
    CompletedTrial {
        number,
        params,
        distributions,
        value: None,
        state: TrialState::Failed,
        failure: Some(reason),
    }
}

/// `{'epochs': 12, 'learning_rate': 0.03}`
pub fn format_params(params: &BTreeMap<String, ParamValue>) -> String {
    let body = params
        .iter()
        .map(|(name, value)| format!("'{name}': {value}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{{{body}}}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_best_trial_is_minimum() {
        let mut study = Study::with_sampler(RandomSampler::with_seed(5));
        study
            .optimize(15, |trial: &mut Trial<'_>| -> Result<f64> {
                let x = trial.suggest_float("x", -3.0, 3.0)?;
                Ok((x - 1.0).powi(2))
            })
            .unwrap();

        let min = study
            .trials()
            .iter()
            .filter_map(|t| t.value)
            .fold(f64::INFINITY, f64::min);
        assert_eq!(study.best_value().unwrap(), min);
        assert_eq!(study.n_trials(), 15);
    }

    #[test]
    fn test_all_failed_is_error() {
        let mut study = Study::with_sampler(RandomSampler::with_seed(5));
        let result = study.optimize(3, |_: &mut Trial<'_>| -> Result<f64> { Err(Error::Config("boom".into())) });
        assert!(matches!(result, Err(Error::NoCompletedTrials)));
        assert!(study.trials().iter().all(|t| t.state == TrialState::Failed));
        assert!(study.best_trial().is_err());
    }

    #[test]
    fn test_non_finite_value_fails_trial() {
        let mut study = Study::with_sampler(RandomSampler::with_seed(5));
        let mut calls = 0;
        study
            .optimize(2, |_: &mut Trial<'_>| -> Result<f64> {
                calls += 1;
                Ok(if calls == 1 { f64::NAN } else { 2.0 })
            })
            .unwrap();

        assert_eq!(study.trials()[0].state, TrialState::Failed);
        assert_eq!(study.best_trial().unwrap().number, 1);
    }

    #[test]
    fn test_format_params() {
        let params = BTreeMap::from([
            ("epochs".to_string(), ParamValue::Int(12)),
            ("learning_rate".to_string(), ParamValue::Float(0.5)),
        ]);
        assert_eq!(format_params(&params), "{'epochs': 12, 'learning_rate': 0.5}");
    }
}
