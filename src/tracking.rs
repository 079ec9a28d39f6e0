//! Experiment tracking for training runs
//!
//! Every trial opens one run through a [`TrackingBackend`], streams one
//! [`MetricRecord`] per epoch and closes the run with a [`RunStatus`].
//!
//! - **`JsonlBackend`**: one JSON-lines file per run
//! - **`InMemoryBackend`**: shared in-process store, handy for inspection
//! - **`Session`**: per-run handle that closes the run when dropped

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::TrainingConfig;
use crate::hyperparameters::Hyperparameters;

/// Errors from tracking backends
#[derive(Debug, thiserror::Error)]
pub enum TrackingError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Run is already closed: {0}")]
    RunClosed(String),
}

/// Status of a tracked run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Finished,
    Failed,
}

/// Settings recorded once when a run opens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub learning_rate: f64,
    pub architecture: String,
    pub dataset: String,
    pub epochs: usize,
    pub batch_size: usize,
    pub gamma: f64,
    pub seed: u64,
}

impl RunConfig {
    pub fn new(hyperparameters: &Hyperparameters, config: &TrainingConfig) -> Self {
        RunConfig {
            learning_rate: hyperparameters.learning_rate(),
            architecture: "CNN".to_string(),
            dataset: "MNIST".to_string(),
            epochs: hyperparameters.epochs(),
            batch_size: config.batch_size,
            gamma: config.gamma,
            seed: config.seed,
        }
    }
}

/// Per-epoch metrics of a training run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub epoch: usize,
    pub train_loss: f64,
    pub test_loss: f64,
    pub accuracy: f64,
}

/// Pluggable persistence for tracked runs
pub trait TrackingBackend {
    /// Open a run and return its id
    fn open_run(&mut self, name: &str, config: &RunConfig) -> Result<String, TrackingError>;

    fn log_metrics(&mut self, run_id: &str, record: &MetricRecord) -> Result<(), TrackingError>;

    fn close_run(&mut self, run_id: &str, status: RunStatus) -> Result<(), TrackingError>;
}

/// One line of a run file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JsonlEntry {
    Config {
        run_id: String,
        name: String,
        started_at: DateTime<Utc>,
        config: RunConfig,
    },
    Metrics {
        timestamp: DateTime<Utc>,
        #[serde(flatten)]
        record: MetricRecord,
    },
    Summary {
        status: RunStatus,
        finished_at: DateTime<Utc>,
    },
}

/// Writes every run to `<dir>/<name>-<run id>.jsonl`
#[derive(Debug)]
pub struct JsonlBackend {
    dir: PathBuf,
    open: HashMap<String, PathBuf>,
}

impl JsonlBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, TrackingError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, open: HashMap::new() })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn append(&self, run_id: &str, entry: &JsonlEntry) -> Result<(), TrackingError> {
        let path = self
            .open
            .get(run_id)
            .ok_or_else(|| TrackingError::RunNotFound(run_id.to_string()))?;
        let mut file = OpenOptions::new().append(true).open(path)?;
        write_entry(&mut file, entry)
    }

    /// Read every entry of a run file back
    pub fn read_run(path: impl AsRef<Path>) -> Result<Vec<JsonlEntry>, TrackingError> {
        let reader = BufReader::new(File::open(path)?);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            entries.push(serde_json::from_str(&line)?);
        }
        Ok(entries)
    }
}

impl TrackingBackend for JsonlBackend {
    fn open_run(&mut self, name: &str, config: &RunConfig) -> Result<String, TrackingError> {
        let run_id = Uuid::new_v4().to_string();
        let path = self.dir.join(format!("{name}-{run_id}.jsonl"));
        let entry = JsonlEntry::Config {
            run_id: run_id.clone(),
            name: name.to_string(),
            started_at: Utc::now(),
            config: config.clone(),
        };
        write_entry(&mut File::create(&path)?, &entry)?;

        // Only runs whose config line landed on disk are open
        self.open.insert(run_id.clone(), path);
        Ok(run_id)
    }

    fn log_metrics(&mut self, run_id: &str, record: &MetricRecord) -> Result<(), TrackingError> {
        self.append(run_id, &JsonlEntry::Metrics { timestamp: Utc::now(), record: *record })
    }

    fn close_run(&mut self, run_id: &str, status: RunStatus) -> Result<(), TrackingError> {
        self.append(run_id, &JsonlEntry::Summary { status, finished_at: Utc::now() })?;
        self.open.remove(run_id);
        Ok(())
    }
}

fn write_entry(file: &mut File, entry: &JsonlEntry) -> Result<(), TrackingError> {
    let line = serde_json::to_string(entry)?;
    writeln!(file, "{line}")?;
    Ok(())
}

/// A run as kept by [`InMemoryBackend`]
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedRun {
    pub run_id: String,
    pub name: String,
    pub config: RunConfig,
    pub metrics: Vec<MetricRecord>,
    pub status: RunStatus,
}

/// In-process backend; clones share the same store
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    runs: Arc<Mutex<Vec<TrackedRun>>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all runs in the order they were opened
    pub fn runs(&self) -> Vec<TrackedRun> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<TrackedRun>> {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_open_run<T>(
        &self,
        run_id: &str,
        f: impl FnOnce(&mut TrackedRun) -> T,
    ) -> Result<T, TrackingError> {
        let mut runs = self.lock();
        let run = runs
            .iter_mut()
            .find(|run| run.run_id == run_id)
            .ok_or_else(|| TrackingError::RunNotFound(run_id.to_string()))?;
        if run.status != RunStatus::Running {
            return Err(TrackingError::RunClosed(run_id.to_string()));
        }
        Ok(f(run))
    }
}

impl TrackingBackend for InMemoryBackend {
    fn open_run(&mut self, name: &str, config: &RunConfig) -> Result<String, TrackingError> {
        let run_id = Uuid::new_v4().to_string();
        self.lock().push(TrackedRun {
            run_id: run_id.clone(),
            name: name.to_string(),
            config: config.clone(),
            metrics: Vec::new(),
            status: RunStatus::Running,
        });
        Ok(run_id)
    }

    fn log_metrics(&mut self, run_id: &str, record: &MetricRecord) -> Result<(), TrackingError> {
        self.with_open_run(run_id, |run| run.metrics.push(*record))
    }

    fn close_run(&mut self, run_id: &str, status: RunStatus) -> Result<(), TrackingError> {
        self.with_open_run(run_id, |run| run.status = status)
    }
}

/// Handle on one open run
///
/// Tracking failures never abort training: they are logged as warnings.
/// A session dropped without [`Session::finish`] closes its run as failed.
pub struct Session<'a> {
    backend: &'a mut dyn TrackingBackend,
    run_id: Option<String>,
}

impl<'a> Session<'a> {
    pub fn open(backend: &'a mut dyn TrackingBackend, name: &str, config: &RunConfig) -> Self {
        let run_id = match backend.open_run(name, config) {
            Ok(run_id) => Some(run_id),
            Err(err) => {
                tracing::warn!("Could not open tracking run {}: {}", name, err);
                None
            }
        };
        Session { backend, run_id }
    }

    pub fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    pub fn log(&mut self, record: &MetricRecord) {
        if let Some(run_id) = &self.run_id {
            if let Err(err) = self.backend.log_metrics(run_id, record) {
                tracing::warn!("Dropping metrics for epoch {}: {}", record.epoch, err);
            }
        }
    }

    /// Close the run as finished
    pub fn finish(mut self) {
        self.close(RunStatus::Finished);
    }

    fn close(&mut self, status: RunStatus) {
        if let Some(run_id) = self.run_id.take() {
            if let Err(err) = self.backend.close_run(&run_id, status) {
                tracing::warn!("Could not close tracking run {}: {}", run_id, err);
            }
        }
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        self.close(RunStatus::Failed);
    }
}
