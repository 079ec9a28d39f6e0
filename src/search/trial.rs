use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::search::sampler::{Distribution, ParamValue, Sampler};
use crate::search::CompletedTrial;

/// One evaluation of the objective
///
/// Parameters are drawn from the study's sampler on first suggestion and
/// cached, so asking for the same name twice returns the same value.
pub struct Trial<'a> {
    number: usize,
    sampler: &'a mut dyn Sampler,
    history: &'a [CompletedTrial],
    params: BTreeMap<String, ParamValue>,
    distributions: BTreeMap<String, Distribution>,
}

impl<'a> Trial<'a> {
    pub fn new(number: usize, sampler: &'a mut dyn Sampler, history: &'a [CompletedTrial]) -> Self {
        Self {
            number,
            sampler,
            history,
            params: BTreeMap::new(),
            distributions: BTreeMap::new(),
        }
    }

    pub fn number(&self) -> usize {
        self.number
    }

    pub fn params(&self) -> &BTreeMap<String, ParamValue> {
        &self.params
    }

    /// Integer in `[low, high]`
    pub fn suggest_int(&mut self, name: &str, low: i64, high: i64) -> Result<i64> {
        if low > high {
            return Err(Error::InvalidBounds {
                name: name.to_string(),
                low: low as f64,
                high: high as f64,
            });
        }
        match self.suggest(name, Distribution::Int { low, high })? {
            ParamValue::Int(value) => Ok(value),
            ParamValue::Float(_) => Err(conflict(name)),
        }
    }

    /// Float in `[low, high)`
    pub fn suggest_float(&mut self, name: &str, low: f64, high: f64) -> Result<f64> {
        if !(low.is_finite() && high.is_finite() && low < high) {
            return Err(Error::InvalidBounds { name: name.to_string(), low, high });
        }
        match self.suggest(name, Distribution::Float { low, high })? {
            ParamValue::Float(value) => Ok(value),
            ParamValue::Int(_) => Err(conflict(name)),
        }
    }

    fn suggest(&mut self, name: &str, distribution: Distribution) -> Result<ParamValue> {
        if let Some(existing) = self.distributions.get(name) {
            if *existing != distribution {
                return Err(conflict(name));
            }
            if let Some(value) = self.params.get(name) {
                return Ok(*value);
            }
        }

        let value = self.sampler.sample(name, &distribution, self.history);
        self.distributions.insert(name.to_string(), distribution);
        self.params.insert(name.to_string(), value);
        Ok(value)
    }

    pub(crate) fn into_parts(self) -> (usize, BTreeMap<String, ParamValue>, BTreeMap<String, Distribution>) {
        (self.number, self.params, self.distributions)
    }
}

fn conflict(name: &str) -> Error {
    Error::ParameterConflict {
        name: name.to_string(),
        reason: "parameter was previously sampled with a different distribution".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::sampler::RandomSampler;

    #[test]
    fn test_repeated_suggestion_is_cached() {
        let mut sampler = RandomSampler::with_seed(1);
        let mut trial = Trial::new(0, &mut sampler, &[]);

        let first = trial.suggest_float("learning_rate", 0.0, 1.0).unwrap();
        let second = trial.suggest_float("learning_rate", 0.0, 1.0).unwrap();
        assert_eq!(first, second);
        assert_eq!(trial.params().len(), 1);
    }

    #[test]
    fn test_int_bounds_inclusive() {
        let mut sampler = RandomSampler::with_seed(1);
        let mut trial = Trial::new(0, &mut sampler, &[]);
        assert_eq!(trial.suggest_int("fixed", 5, 5).unwrap(), 5);
    }

    #[test]
    fn test_invalid_bounds() {
        let mut sampler = RandomSampler::with_seed(1);
        let mut trial = Trial::new(0, &mut sampler, &[]);

        assert!(matches!(trial.suggest_int("epochs", 30, 3), Err(Error::InvalidBounds { .. })));
        assert!(matches!(trial.suggest_float("lr", 1.0, 1.0), Err(Error::InvalidBounds { .. })));
        assert!(matches!(trial.suggest_float("lr", 0.0, f64::NAN), Err(Error::InvalidBounds { .. })));
    }

    #[test]
    fn test_conflicting_suggestions() {
        let mut sampler = RandomSampler::with_seed(1);
        let mut trial = Trial::new(0, &mut sampler, &[]);
        trial.suggest_int("epochs", 3, 30).unwrap();

        assert!(matches!(trial.suggest_int("epochs", 1, 10), Err(Error::ParameterConflict { .. })));
        assert!(matches!(trial.suggest_float("epochs", 3.0, 30.0), Err(Error::ParameterConflict { .. })));
    }
}
