//! Samplers proposing parameter values from the trial history.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::search::{CompletedTrial, TrialState};

/// Search space of a single parameter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Distribution {
    /// Integers in `[low, high]`
    Int { low: i64, high: i64 },
    /// Floats in `[low, high)`
    Float { low: f64, high: f64 },
}

impl Distribution {
    pub fn contains(&self, value: &ParamValue) -> bool {
        match (self, value) {
            (Distribution::Int { low, high }, ParamValue::Int(v)) => (low..=high).contains(&v),
            (Distribution::Float { low, high }, ParamValue::Float(v)) => (low..high).contains(&v),
            _ => false,
        }
    }
}

/// A sampled parameter value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
}

impl ParamValue {
    pub fn as_f64(&self) -> f64 {
        match *self {
            ParamValue::Int(v) => v as f64,
            ParamValue::Float(v) => v,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Float(v) => write!(f, "{v}"),
        }
    }
}

/// Proposes a value for one named parameter of a new trial
pub trait Sampler {
    fn sample(&mut self, name: &str, distribution: &Distribution, history: &[CompletedTrial]) -> ParamValue;
}

/// Keep `value` inside `[low, high)`
fn clamp_half_open(value: f64, low: f64, high: f64) -> f64 {
    if value < low {
        low
    } else if value >= high {
        let below = high - (high - low) * f64::EPSILON;
        below.max(low)
    } else {
        value
    }
}

fn sample_uniform(rng: &mut fastrand::Rng, distribution: &Distribution) -> ParamValue {
    match *distribution {
        Distribution::Int { low, high } => ParamValue::Int(rng.i64(low..=high)),
        Distribution::Float { low, high } => {
            let value = low + rng.f64() * (high - low);
            ParamValue::Float(clamp_half_open(value, low, high))
        }
    }
}

/// Samples uniformly, ignoring the history
pub struct RandomSampler {
    rng: fastrand::Rng,
}

impl RandomSampler {
    pub fn new() -> Self {
        Self { rng: fastrand::Rng::new() }
    }

    /// Fixed seed for reproducible campaigns
    pub fn with_seed(seed: u64) -> Self {
        Self { rng: fastrand::Rng::with_seed(seed) }
    }
}

impl Default for RandomSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler for RandomSampler {
    fn sample(&mut self, _name: &str, distribution: &Distribution, _history: &[CompletedTrial]) -> ParamValue {
        sample_uniform(&mut self.rng, distribution)
    }
}

/// Gaussian kernel density estimate over one parameter
#[derive(Debug, Clone)]
struct KernelDensity {
    samples: Vec<f64>,
    bandwidth: f64,
}

impl KernelDensity {
    /// Scott's rule bandwidth, floored at a fraction of the search range
    fn new(samples: Vec<f64>, range: f64) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let n = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / n;
        let std_dev = (samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n).sqrt();

        let floor = (range * 0.01).max(f64::EPSILON);
        let bandwidth = if std_dev < f64::EPSILON {
            (range * 0.1).max(floor)
        } else {
            (n.powf(-0.2) * std_dev).max(floor)
        };
        Some(Self { samples, bandwidth })
    }

    fn pdf(&self, x: f64) -> f64 {
        let inv_bandwidth = 1.0 / self.bandwidth;
        let normalization = inv_bandwidth / (2.0 * std::f64::consts::PI).sqrt();
        let density: f64 = self
            .samples
            .iter()
            .map(|&xi| {
                let z = (x - xi) * inv_bandwidth;
                normalization * (-0.5 * z * z).exp()
            })
            .sum();
        density / self.samples.len() as f64
    }

    /// Pick a kernel center, then add Gaussian noise (Box-Muller)
    fn sample(&self, rng: &mut fastrand::Rng) -> f64 {
        let center = self.samples[rng.usize(0..self.samples.len())];
        let u1 = 1.0 - rng.f64();
        let u2 = rng.f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        center + z * self.bandwidth
    }
}

/// Tree-structured Parzen Estimator
///
/// The first `n_startup_trials` completed trials are sampled uniformly.
/// After that, completed trials are split at the `gamma` quantile of their
/// values into a good and a bad group, a KDE is fitted to each, and the
/// candidate drawn from the good density with the highest `l(x) / g(x)` wins.
pub struct TpeSampler {
    rng: fastrand::Rng,
    gamma: f64,
    n_startup_trials: usize,
    n_ei_candidates: usize,
}

impl TpeSampler {
    /// gamma = 0.25, 10 startup trials, 24 candidates
    pub fn new() -> Self {
        Self {
            rng: fastrand::Rng::new(),
            gamma: 0.25,
            n_startup_trials: 10,
            n_ei_candidates: 24,
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self { rng: fastrand::Rng::with_seed(seed), ..Self::new() }
    }

    /// `(value of the parameter, objective value)` of every usable trial
    fn observations(name: &str, distribution: &Distribution, history: &[CompletedTrial]) -> Vec<(f64, f64)> {
        history
            .iter()
            .filter(|trial| trial.state == TrialState::Complete)
            .filter(|trial| trial.distributions.get(name) == Some(distribution))
            .filter_map(|trial| Some((trial.params.get(name)?.as_f64(), trial.value?)))
            .collect()
    }

    fn split(&self, mut observations: Vec<(f64, f64)>) -> (Vec<f64>, Vec<f64>) {
        observations.sort_by(|a, b| a.1.total_cmp(&b.1));
        let n = observations.len();
        let n_good = ((n as f64 * self.gamma).ceil() as usize).max(1).min(n - 1);

        let good = observations[..n_good].iter().map(|&(x, _)| x).collect();
        let bad = observations[n_good..].iter().map(|&(x, _)| x).collect();
        (good, bad)
    }

    fn best_candidate(&mut self, low: f64, high: f64, good: Vec<f64>, bad: Vec<f64>) -> Option<f64> {
        let range = high - low;
        let l_kde = KernelDensity::new(good, range)?;
        let g_kde = KernelDensity::new(bad, range)?;

        let mut best = None;
        let mut best_ratio = f64::NEG_INFINITY;
        for _ in 0..self.n_ei_candidates {
            let candidate = l_kde.sample(&mut self.rng).clamp(low, high);
            let l_density = l_kde.pdf(candidate);
            let g_density = g_kde.pdf(candidate);

            let ratio = if g_density < f64::EPSILON {
                if l_density > f64::EPSILON { f64::INFINITY } else { 0.0 }
            } else {
                l_density / g_density
            };
            if ratio > best_ratio {
                best_ratio = ratio;
                best = Some(candidate);
            }
        }
        best
    }
}

impl Default for TpeSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler for TpeSampler {
    fn sample(&mut self, name: &str, distribution: &Distribution, history: &[CompletedTrial]) -> ParamValue {
        let observations = Self::observations(name, distribution, history);
        if observations.len() < self.n_startup_trials.max(2) {
            return sample_uniform(&mut self.rng, distribution);
        }

        let (good, bad) = self.split(observations);
        match *distribution {
            Distribution::Int { low, high } => {
                match self.best_candidate(low as f64, high as f64, good, bad) {
                    Some(value) => ParamValue::Int((value.round() as i64).clamp(low, high)),
                    None => sample_uniform(&mut self.rng, distribution),
                }
            }
            Distribution::Float { low, high } => match self.best_candidate(low, high, good, bad) {
                Some(value) => ParamValue::Float(clamp_half_open(value, low, high)),
                None => sample_uniform(&mut self.rng, distribution),
            },
        }
    }
}
