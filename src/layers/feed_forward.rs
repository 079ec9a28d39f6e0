use ndarray::{Array2, ArrayD, Axis, Ix2, IxDyn};
use rand::Rng;

use crate::activation::ActivationType;
use crate::device::Device;
use crate::error::{Error, Result};
use crate::layers::{missing_cache, view_as, Layer, LayerParams};

const NAME: &str = "feed_forward";

/// Fully connected layer; inputs with more than two axes are flattened per example
#[derive(Debug, Clone)]
pub struct FeedForwardLayer {
    pub params: LayerParams,
    pub inputs: usize,
    pub neurons: usize,
    cache: Option<FeedForwardCache>,
}

#[derive(Debug, Clone)]
struct FeedForwardCache {
    input_shape: IxDyn,
    input: Array2<f32>,
    preactivation: ArrayD<f32>,
}

impl FeedForwardLayer {
    pub fn new<R: Rng>(
        inputs: usize,
        neurons: usize,
        activation: ActivationType,
        rng: &mut R,
    ) -> Result<Self> {
        // Weights are (neurons × inputs), He-initialized
        let params = LayerParams::he_normal(neurons, inputs, activation, rng)?;

        Ok(FeedForwardLayer {
            params,
            inputs,
            neurons,
            cache: None,
        })
    }

    fn flatten(&self, input: &ArrayD<f32>) -> Result<Array2<f32>> {
        let batch = input.shape().first().copied().unwrap_or(0);
        if input.ndim() < 2 || input.len() != batch * self.inputs {
            return Err(Error::shape(
                NAME,
                format!("Input size does not match layer's input size: {:?} vs {} features", input.shape(), self.inputs),
            ));
        }
        let flat = input.to_shape((batch, self.inputs))?.into_owned();
        Ok(flat)
    }

    fn preactivate(&self, input: &Array2<f32>, device: &Device) -> Result<Array2<f32>> {
        // input is (batch × inputs), weights.t() is (inputs × neurons)
        let mut output = device.matmul(input.view(), self.params.weights.t())?;
        output += &self.params.bias;
        Ok(output)
    }
}

impl Layer for FeedForwardLayer {
    fn name(&self) -> &'static str {
        NAME
    }

    fn forward(&mut self, input: &ArrayD<f32>, device: &Device) -> Result<ArrayD<f32>> {
        let flat = self.flatten(input)?;
        let preactivation = self.preactivate(&flat, device)?.into_dyn();
        let output = self.params.activation.forward(preactivation.clone());
        self.cache = Some(FeedForwardCache {
            input_shape: input.raw_dim(),
            input: flat,
            preactivation,
        });
        Ok(output)
    }

    fn infer(&self, input: &ArrayD<f32>, device: &Device) -> Result<ArrayD<f32>> {
        let flat = self.flatten(input)?;
        let preactivation = self.preactivate(&flat, device)?.into_dyn();
        Ok(self.params.activation.forward(preactivation))
    }

    fn backward(&mut self, grad_output: &ArrayD<f32>, device: &Device) -> Result<ArrayD<f32>> {
        let cache = self.cache.take().ok_or_else(|| missing_cache(NAME))?;
        if grad_output.shape() != cache.preactivation.shape() {
            return Err(Error::shape(NAME, format!("gradient shape {:?}", grad_output.shape())));
        }

        // Gradient with respect to preactivation, (batch × neurons)
        let dlayer = self.params.activation.backward(&cache.preactivation, grad_output);
        let dlayer = view_as::<Ix2>(NAME, &dlayer)?;

        self.params.add_to_bias_grads(&dlayer.sum_axis(Axis(0)));
        // (neurons × batch) · (batch × inputs)
        let weight_grads = device.matmul(dlayer.t(), cache.input.view())?;
        self.params.add_to_weight_grads(&weight_grads);

        // (batch × neurons) · (neurons × inputs), reshaped to whatever came in
        let grad_input = device.matmul(dlayer, self.params.weights.view())?;
        Ok(grad_input.into_shape_with_order(cache.input_shape)?)
    }

    fn clone_box(&self) -> Box<dyn Layer> {
        Box::new(self.clone())
    }

    fn params(&self) -> Option<&LayerParams> {
        Some(&self.params)
    }

    fn params_mut(&mut self) -> Option<&mut LayerParams> {
        Some(&mut self.params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_forward_is_affine() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut layer = FeedForwardLayer::new(2, 1, ActivationType::Linear, &mut rng).unwrap();
        layer.params.weights = array![[2.0, -1.0]];
        layer.params.bias = array![0.5];

        let out = layer.infer(&array![[1.0f32, 3.0]].into_dyn(), &Device::Cpu).unwrap();
        assert_abs_diff_eq!(out[[0, 0]], -0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_flattens_image_batches() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut layer = FeedForwardLayer::new(8, 3, ActivationType::ReLU, &mut rng).unwrap();
        let input = ArrayD::from_elem(vec![4, 2, 2, 2], 0.5f32);

        let out = layer.forward(&input, &Device::Cpu).unwrap();
        assert_eq!(out.shape(), &[4, 3]);

        let grad = layer.backward(&ArrayD::ones(vec![4, 3]), &Device::Cpu).unwrap();
        assert_eq!(grad.shape(), &[4, 2, 2, 2]);
    }

    #[test]
    fn test_weight_gradient_is_outer_product() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut layer = FeedForwardLayer::new(2, 2, ActivationType::Linear, &mut rng).unwrap();
        let input = array![[1.0f32, 2.0]].into_dyn();

        layer.forward(&input, &Device::Cpu).unwrap();
        layer.backward(&array![[1.0f32, -1.0]].into_dyn(), &Device::Cpu).unwrap();

        assert_eq!(layer.params.weight_grads, array![[1.0f32, 2.0], [-1.0, -2.0]]);
        assert_eq!(layer.params.bias_grads, array![1.0f32, -1.0]);
    }

    #[test]
    fn test_invalid_input_size() {
        let mut rng = StdRng::seed_from_u64(1);
        let layer = FeedForwardLayer::new(3, 2, ActivationType::ReLU, &mut rng).unwrap();
        let err = layer.infer(&ArrayD::zeros(vec![1, 2]), &Device::Cpu).unwrap_err();
        assert!(err.to_string().contains("Input size"));
    }
}
