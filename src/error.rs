use thiserror::Error;

/// Main error type for training and search
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid hyperparameter {name}: {reason}")]
    InvalidHyperparameter { name: &'static str, reason: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Shape mismatch in {layer}: {message}")]
    Shape { layer: &'static str, message: String },

    #[error("Loss is not finite: {0}")]
    NonFiniteLoss(f64),

    #[error("Compute device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Data error: {0}")]
    Data(#[from] DataError),

    #[error("invalid bounds for '{name}': low ({low}) must be less than high ({high})")]
    InvalidBounds { name: String, low: f64, high: f64 },

    #[error("parameter conflict for '{name}': {reason}")]
    ParameterConflict { name: String, reason: String },

    #[error("no completed trials available")]
    NoCompletedTrials,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Dataset loading errors
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Dataset file not found: {0}")]
    NotFound(String),

    #[error("Invalid IDX file {file}: {message}")]
    InvalidFormat { file: String, message: String },

    #[error("Image and label counts differ: {images} images, {labels} labels")]
    CountMismatch { images: usize, labels: usize },

    #[error("Download of {url} failed: {message}")]
    Download { url: String, message: String },

    #[error("Dataset is empty")]
    Empty,
}

impl Error {
    pub(crate) fn shape(layer: &'static str, message: impl Into<String>) -> Self {
        Error::Shape { layer, message: message.into() }
    }
}

impl From<ndarray::ShapeError> for Error {
    fn from(err: ndarray::ShapeError) -> Self {
        Error::shape("ndarray", err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
