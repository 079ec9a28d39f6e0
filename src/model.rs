use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use ndarray::{Array1, Array2, Array4, ArrayD, Ix2};
use rand::Rng;
use serde::Serialize;

use crate::activation::ActivationType;
use crate::config::NetConfig;
use crate::device::Device;
use crate::error::{Error, Result};
use crate::layers::{Conv2DLayer, DropoutLayer, FeedForwardLayer, Layer, LayerParams, MaxPoolLayer};
use crate::loss::{self, Loss};
use crate::optimizer::Optimizer;

/// Convolutional classifier producing per-class log-probabilities
#[derive(Debug, Clone)]
pub struct Model {
    pub layers: Vec<Box<dyn Layer>>,
    pub loss: Loss,
}

#[derive(Serialize)]
struct SavedLayer<'a> {
    layer: &'static str,
    weights: &'a Array2<f32>,
    bias: &'a Array1<f32>,
}

impl Model {
    /// Build the network described by `net`, drawing initial weights and
    /// dropout seeds from `rng`
    pub fn new<R: Rng>(net: &NetConfig, rng: &mut R) -> Result<Self> {
        net.validate()?;
        let kernel = (net.kernel_size, net.kernel_size);

        let conv1 = Conv2DLayer::new(
            net.input_shape,
            kernel,
            net.conv1_filters,
            (1, 1),
            (0, 0),
            ActivationType::ReLU,
            rng,
        )?;
        let conv2 = Conv2DLayer::new(
            conv1.output_shape(),
            kernel,
            net.conv2_filters,
            (1, 1),
            (0, 0),
            ActivationType::ReLU,
            rng,
        )?;
        let (channels, height, width) = conv2.output_shape();
        let pool = MaxPoolLayer::new(channels, height, width, (net.pool_size, net.pool_size), net.pool_size)?;
        let features = net.flattened_features();

        let layers: Vec<Box<dyn Layer>> = vec![
            Box::new(conv1),
            Box::new(conv2),
            Box::new(pool),
            Box::new(DropoutLayer::new(net.conv_dropout, rng)?),
            Box::new(FeedForwardLayer::new(features, net.hidden, ActivationType::ReLU, rng)?),
            Box::new(DropoutLayer::new(net.hidden_dropout, rng)?),
            Box::new(FeedForwardLayer::new(net.hidden, net.classes, ActivationType::Linear, rng)?),
        ];

        tracing::debug!(features, "built classifier with {} layers", layers.len());

        Ok(Model {
            layers,
            loss: Loss::NegativeLogLikelihood,
        })
    }

    /// Training forward pass; caches activations for `backward`
    pub fn forward(&mut self, images: &Array4<f32>, device: &Device) -> Result<Array2<f32>> {
        let mut current = images.clone().into_dyn();
        for layer in &mut self.layers {
            current = layer.forward(&current, device)?;
        }
        Self::log_probs(current)
    }

    /// Inference forward pass; dropout is the identity and nothing is mutated
    pub fn infer(&self, images: &Array4<f32>, device: &Device) -> Result<Array2<f32>> {
        let mut current = images.clone().into_dyn();
        for layer in &self.layers {
            current = layer.infer(&current, device)?;
        }
        Self::log_probs(current)
    }

    fn log_probs(logits: ArrayD<f32>) -> Result<Array2<f32>> {
        let logits = logits
            .into_dimensionality::<Ix2>()
            .map_err(|e| Error::shape("model", e.to_string()))?;
        Ok(loss::log_softmax(logits.view()))
    }

    /// Backpropagate the batch-mean loss from the output of the last `forward`
    pub fn backward(&mut self, log_probs: &Array2<f32>, targets: &[usize], device: &Device) -> Result<()> {
        let mut grad = self.loss.logits_gradient(log_probs.view(), targets)?.into_dyn();
        for layer in self.layers.iter_mut().rev() {
            grad = layer.backward(&grad, device)?;
        }
        Ok(())
    }

    pub fn zero_gradients(&mut self) {
        for params in self.params_mut() {
            params.zero_gradients();
        }
    }

    /// Trainable parameters in layer order
    pub fn params_mut(&mut self) -> Vec<&mut LayerParams> {
        self.layers.iter_mut().filter_map(|layer| layer.params_mut()).collect()
    }

    pub fn parameter_count(&self) -> usize {
        self.layers
            .iter()
            .filter_map(|layer| layer.params())
            .map(LayerParams::parameter_count)
            .sum()
    }

    /// One gradient update on a batch; returns the batch-mean loss
    pub fn train_batch(
        &mut self,
        images: &Array4<f32>,
        targets: &[usize],
        optimizer: &mut dyn Optimizer,
        device: &Device,
    ) -> Result<f64> {
        self.zero_gradients();
        let log_probs = self.forward(images, device)?;
        let loss = self.loss.mean(log_probs.view(), targets)?;
        self.backward(&log_probs, targets, device)?;
        optimizer.step(&mut self.params_mut());
        Ok(loss)
    }

    /// Write the trainable parameters as JSON
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let saved: Vec<SavedLayer> = self
            .layers
            .iter()
            .filter_map(|layer| {
                layer.params().map(|params| SavedLayer {
                    layer: layer.name(),
                    weights: &params.weights,
                    bias: &params.bias,
                })
            })
            .collect();

        let writer = BufWriter::new(File::create(path.as_ref())?);
        serde_json::to_writer(writer, &saved)?;
        tracing::info!("Saved model parameters to {}", path.as_ref().display());
        Ok(())
    }
}
