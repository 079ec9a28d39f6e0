//! Hyperparameter search for the MNIST classifier.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use pur_hpo::search::{format_params, RandomSampler, TpeSampler};
use pur_hpo::{JsonlBackend, MnistObjective, MnistProvider, Study, TrainingConfig};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SamplerKind {
    Tpe,
    Random,
}

#[derive(Parser, Debug)]
#[command(name = "pur-hpo")]
#[command(about = "Search epochs and learning rate for a convolutional MNIST classifier")]
#[command(version)]
struct Args {
    /// JSON file overriding the default training config
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of trials to run
    #[arg(long)]
    trials: Option<usize>,

    /// Dataset cache directory
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Directory for tracked runs
    #[arg(long)]
    runs_dir: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "tpe")]
    sampler: SamplerKind,

    /// Seed for the sampler
    #[arg(long)]
    sampler_seed: Option<u64>,

    /// Train on the CPU even if a GPU is available
    #[arg(long)]
    no_gpu: bool,

    /// Stop every epoch after the first logged batch
    #[arg(long)]
    dry_run: bool,

    /// Save the model of each trial
    #[arg(long)]
    save_model: bool,
}

impl Args {
    fn training_config(&self) -> anyhow::Result<TrainingConfig> {
        let mut config = match &self.config {
            Some(path) => TrainingConfig::from_json_file(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => TrainingConfig::default(),
        };

        if let Some(trials) = self.trials {
            config.n_trials = trials;
        }
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(dir) = &self.runs_dir {
            config.runs_dir = dir.clone();
        }
        config.use_gpu &= !self.no_gpu;
        config.dry_run |= self.dry_run;
        config.save_model |= self.save_model;

        config.validate()?;
        Ok(config)
    }

    fn study(&self) -> Study {
        match (self.sampler, self.sampler_seed) {
            (SamplerKind::Tpe, Some(seed)) => Study::with_sampler(TpeSampler::with_seed(seed)),
            (SamplerKind::Tpe, None) => Study::with_sampler(TpeSampler::new()),
            (SamplerKind::Random, Some(seed)) => Study::with_sampler(RandomSampler::with_seed(seed)),
            (SamplerKind::Random, None) => Study::with_sampler(RandomSampler::new()),
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = args.training_config()?;
    let n_trials = config.n_trials;

    let provider = MnistProvider::new(&config.data_dir);
    let backend = JsonlBackend::new(&config.runs_dir)
        .with_context(|| format!("failed to create runs directory {}", config.runs_dir.display()))?;
    let objective = MnistObjective::new(config, provider, backend)?;

    let mut study = args.study();
    study.optimize(n_trials, objective)?;

    println!("{}", format_params(&study.best_params()?));
    Ok(())
}
