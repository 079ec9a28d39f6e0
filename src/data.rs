use std::path::{Path, PathBuf};

use ndarray::{Array4, Axis};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::{DataError, Result};

/// Mean pixel intensity of the MNIST training set after scaling to [0, 1]
pub const MNIST_MEAN: f32 = 0.1307;
/// Standard deviation of the MNIST training set after scaling to [0, 1]
pub const MNIST_STD: f32 = 0.3081;

const IMAGES_MAGIC: u32 = 0x0000_0803;
const LABELS_MAGIC: u32 = 0x0000_0801;

pub const TRAIN_IMAGES: &str = "train-images-idx3-ubyte";
pub const TRAIN_LABELS: &str = "train-labels-idx1-ubyte";
pub const TEST_IMAGES: &str = "t10k-images-idx3-ubyte";
pub const TEST_LABELS: &str = "t10k-labels-idx1-ubyte";

const DEFAULT_MIRROR: &str = "https://ossci-datasets.s3.amazonaws.com/mnist";

/// Labelled images laid out as `(N, C, H, W)`
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    images: Array4<f32>,
    labels: Vec<usize>,
}

impl Dataset {
    pub fn new(images: Array4<f32>, labels: Vec<usize>) -> Result<Self> {
        let count = images.len_of(Axis(0));
        if count != labels.len() {
            return Err(DataError::CountMismatch { images: count, labels: labels.len() }.into());
        }
        Ok(Dataset { images, labels })
    }

    /// Uniform noise images with labels cycling through `classes`
    pub fn synthetic<R: Rng>(
        len: usize,
        shape: (usize, usize, usize),
        classes: usize,
        rng: &mut R,
    ) -> Self {
        let (c, h, w) = shape;
        let images = Array4::from_shape_fn((len, c, h, w), |_| rng.random::<f32>());
        let labels = (0..len).map(|i| i % classes.max(1)).collect();
        Dataset { images, labels }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn images(&self) -> &Array4<f32> {
        &self.images
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    /// Shape of a single example, `(C, H, W)`
    pub fn example_shape(&self) -> (usize, usize, usize) {
        let (_, c, h, w) = self.images.dim();
        (c, h, w)
    }

    /// Batches in storage order
    pub fn batches(&self, batch_size: usize) -> Batches<'_> {
        Batches::new(self, (0..self.len()).collect(), batch_size)
    }

    /// Batches in an order drawn from `rng`
    pub fn shuffled_batches<R: Rng>(&self, batch_size: usize, rng: &mut R) -> Batches<'_> {
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.shuffle(rng);
        Batches::new(self, order, batch_size)
    }
}

/// Iterator over `(images, labels)` batches of a dataset
pub struct Batches<'a> {
    dataset: &'a Dataset,
    order: Vec<usize>,
    batch_size: usize,
    position: usize,
}

impl<'a> Batches<'a> {
    fn new(dataset: &'a Dataset, order: Vec<usize>, batch_size: usize) -> Self {
        Batches { dataset, order, batch_size: batch_size.max(1), position: 0 }
    }

    /// Total number of batches, including a trailing partial batch
    pub fn num_batches(&self) -> usize {
        self.order.len().div_ceil(self.batch_size)
    }
}

impl Iterator for Batches<'_> {
    type Item = (Array4<f32>, Vec<usize>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.order.len() {
            return None;
        }
        let end = (self.position + self.batch_size).min(self.order.len());
        let indices = &self.order[self.position..end];
        self.position = end;

        let images = self.dataset.images.select(Axis(0), indices);
        let labels = indices.iter().map(|&i| self.dataset.labels[i]).collect();
        Some((images, labels))
    }
}

/// Source of the training and evaluation datasets
pub trait DatasetProvider {
    /// Returns `(train, test)`
    fn load(&self) -> Result<(Dataset, Dataset)>;
}

/// Serves datasets held in memory
#[derive(Debug, Clone)]
pub struct InMemoryProvider {
    train: Dataset,
    test: Dataset,
}

impl InMemoryProvider {
    pub fn new(train: Dataset, test: Dataset) -> Self {
        InMemoryProvider { train, test }
    }
}

impl DatasetProvider for InMemoryProvider {
    fn load(&self) -> Result<(Dataset, Dataset)> {
        Ok((self.train.clone(), self.test.clone()))
    }
}

/// MNIST read from IDX files under `<root>/MNIST/raw`
///
/// Missing files are fetched from the mirror and gunzipped when the
/// `download` feature is enabled and downloads are allowed.
#[derive(Debug, Clone)]
pub struct MnistProvider {
    root: PathBuf,
    download: bool,
}

impl MnistProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        MnistProvider {
            root: root.into(),
            download: cfg!(feature = "download"),
        }
    }

    pub fn with_download(mut self, download: bool) -> Self {
        self.download = download;
        self
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.root.join("MNIST").join("raw")
    }

    fn ensure_file(&self, name: &str) -> Result<PathBuf> {
        let path = self.raw_dir().join(name);
        if path.exists() {
            return Ok(path);
        }
        if !self.download {
            return Err(DataError::NotFound(path.display().to_string()).into());
        }
        let url = format!("{}/{}.gz", DEFAULT_MIRROR, name);
        download_gz(&url, &path)?;
        Ok(path)
    }

    fn load_split(&self, images: &str, labels: &str) -> Result<Dataset> {
        let image_bytes = std::fs::read(self.ensure_file(images)?)?;
        let label_bytes = std::fs::read(self.ensure_file(labels)?)?;

        let images = parse_idx_images(&image_bytes, images)?;
        let labels = parse_idx_labels(&label_bytes, labels)?;
        Dataset::new(images, labels)
    }
}

impl DatasetProvider for MnistProvider {
    fn load(&self) -> Result<(Dataset, Dataset)> {
        let train = self.load_split(TRAIN_IMAGES, TRAIN_LABELS)?;
        let test = self.load_split(TEST_IMAGES, TEST_LABELS)?;
        if train.is_empty() || test.is_empty() {
            return Err(DataError::Empty.into());
        }
        tracing::info!(
            train = train.len(),
            test = test.len(),
            "Loaded MNIST from {}",
            self.raw_dir().display()
        );
        Ok((train, test))
    }
}

#[cfg(feature = "download")]
fn download_gz(url: &str, dest: &Path) -> Result<()> {
    use std::io::Read;

    let download_error = |message: String| DataError::Download { url: url.to_string(), message };

    tracing::info!("Downloading {}", url);
    let client = reqwest::blocking::Client::builder()
        .user_agent(concat!("pur-hpo/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| download_error(format!("Failed to create HTTP client: {e}")))?;

    let response = client.get(url).send().map_err(|e| download_error(e.to_string()))?;
    if !response.status().is_success() {
        return Err(download_error(format!("server returned {}", response.status())).into());
    }
    let compressed = response.bytes().map_err(|e| download_error(e.to_string()))?;

    let mut raw = Vec::new();
    flate2::read::GzDecoder::new(&compressed[..])
        .read_to_end(&mut raw)
        .map_err(|e| download_error(format!("gunzip failed: {e}")))?;

    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(dest, raw)?;
    Ok(())
}

#[cfg(not(feature = "download"))]
fn download_gz(url: &str, _dest: &Path) -> Result<()> {
    Err(DataError::Download {
        url: url.to_string(),
        message: "built without the `download` feature".to_string(),
    }
    .into())
}

fn read_u32(bytes: &[u8], offset: usize, file: &str) -> std::result::Result<u32, DataError> {
    bytes
        .get(offset..offset + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| DataError::InvalidFormat {
            file: file.to_string(),
            message: format!("truncated header at byte {offset}"),
        })
}

fn check_magic(bytes: &[u8], expected: u32, file: &str) -> std::result::Result<(), DataError> {
    let magic = read_u32(bytes, 0, file)?;
    if magic != expected {
        return Err(DataError::InvalidFormat {
            file: file.to_string(),
            message: format!("magic number {magic:#010x}, expected {expected:#010x}"),
        });
    }
    Ok(())
}

fn payload<'a>(bytes: &'a [u8], header: usize, len: usize, file: &str) -> std::result::Result<&'a [u8], DataError> {
    let body = &bytes[header.min(bytes.len())..];
    if body.len() != len {
        return Err(DataError::InvalidFormat {
            file: file.to_string(),
            message: format!("expected {len} data bytes, found {}", body.len()),
        });
    }
    Ok(body)
}

/// Parse an IDX3 image file into normalized `(N, 1, rows, cols)` pixels
pub fn parse_idx_images(bytes: &[u8], file: &str) -> std::result::Result<Array4<f32>, DataError> {
    check_magic(bytes, IMAGES_MAGIC, file)?;
    let count = read_u32(bytes, 4, file)? as usize;
    let rows = read_u32(bytes, 8, file)? as usize;
    let cols = read_u32(bytes, 12, file)? as usize;

    let len = count
        .checked_mul(rows)
        .and_then(|n| n.checked_mul(cols))
        .ok_or_else(|| DataError::InvalidFormat {
            file: file.to_string(),
            message: "header dimensions overflow".to_string(),
        })?;
    let pixels = payload(bytes, 16, len, file)?;
    let normalized = pixels
        .iter()
        .map(|&p| (p as f32 / 255.0 - MNIST_MEAN) / MNIST_STD)
        .collect();

    Array4::from_shape_vec((count, 1, rows, cols), normalized).map_err(|e| DataError::InvalidFormat {
        file: file.to_string(),
        message: e.to_string(),
    })
}

/// Parse an IDX1 label file
pub fn parse_idx_labels(bytes: &[u8], file: &str) -> std::result::Result<Vec<usize>, DataError> {
    check_magic(bytes, LABELS_MAGIC, file)?;
    let count = read_u32(bytes, 4, file)? as usize;
    let labels = payload(bytes, 8, count, file)?;
    Ok(labels.iter().map(|&l| l as usize).collect())
}
