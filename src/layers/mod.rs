pub mod conv2d;
pub mod dropout;
pub mod feed_forward;
pub mod max_pool;

use std::fmt::Debug;

use ndarray::{Array1, Array2, ArrayD, ArrayView, Dimension};
use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::activation::ActivationType;
use crate::device::Device;
use crate::error::{Error, Result};

/// Trainable state of a layer: parameters and their accumulated gradients
#[derive(Debug, Clone)]
pub struct LayerParams {
    pub weights: Array2<f32>,
    pub bias: Array1<f32>,
    pub activation: ActivationType,
    pub weight_grads: Array2<f32>,
    pub bias_grads: Array1<f32>,
}

impl LayerParams {
    /// He-normal weights of shape `(rows, fan_in)` and zero bias
    pub fn he_normal<R: Rng>(
        rows: usize,
        fan_in: usize,
        activation: ActivationType,
        rng: &mut R,
    ) -> Result<Self> {
        let std_dev = (2.0 / fan_in.max(1) as f32).sqrt();
        let normal_dist = Normal::new(0.0, std_dev).map_err(|e| Error::Config(e.to_string()))?;

        let weights = Array2::from_shape_fn((rows, fan_in), |_| normal_dist.sample(rng));
        Ok(LayerParams {
            weights,
            bias: Array1::zeros(rows),
            activation,
            weight_grads: Array2::zeros((rows, fan_in)),
            bias_grads: Array1::zeros(rows),
        })
    }

    pub fn parameter_count(&self) -> usize {
        self.weights.len() + self.bias.len()
    }

    pub fn zero_gradients(&mut self) {
        self.weight_grads.fill(0.0);
        self.bias_grads.fill(0.0);
    }

    pub fn add_to_weight_grads(&mut self, grads: &Array2<f32>) {
        self.weight_grads += grads;
    }

    pub fn add_to_bias_grads(&mut self, grads: &Array1<f32>) {
        self.bias_grads += grads;
    }
}

/// A stage of the network operating on whole batches
///
/// `forward` is the training path and caches whatever `backward` needs.
/// `infer` takes `&self`, so evaluation can never touch parameters or caches.
pub trait Layer: Debug {
    fn name(&self) -> &'static str;

    fn forward(&mut self, input: &ArrayD<f32>, device: &Device) -> Result<ArrayD<f32>>;

    fn infer(&self, input: &ArrayD<f32>, device: &Device) -> Result<ArrayD<f32>>;

    /// Accumulates parameter gradients and returns the gradient w.r.t. the input
    fn backward(&mut self, grad_output: &ArrayD<f32>, device: &Device) -> Result<ArrayD<f32>>;

    fn clone_box(&self) -> Box<dyn Layer>;

    fn params(&self) -> Option<&LayerParams> {
        None
    }

    fn params_mut(&mut self) -> Option<&mut LayerParams> {
        None
    }
}

impl Clone for Box<dyn Layer> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// View `input` with a fixed dimensionality, reporting the layer on failure
pub(crate) fn view_as<'a, D: Dimension>(
    layer: &'static str,
    input: &'a ArrayD<f32>,
) -> Result<ArrayView<'a, f32, D>> {
    input
        .view()
        .into_dimensionality::<D>()
        .map_err(|_| Error::shape(layer, format!("unexpected input shape {:?}", input.shape())))
}

pub(crate) fn missing_cache(layer: &'static str) -> Error {
    Error::shape(layer, "backward called without a preceding training forward")
}

pub use conv2d::Conv2DLayer;
pub use dropout::DropoutLayer;
pub use feed_forward::FeedForwardLayer;
pub use max_pool::MaxPoolLayer;
