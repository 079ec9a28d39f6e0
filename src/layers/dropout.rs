use ndarray::ArrayD;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{missing_cache, Layer};
use crate::device::Device;
use crate::error::{Error, Result};

const NAME: &str = "dropout";

/// Inverted dropout: zeroes activations while training, identity at inference
///
/// The layer owns its RNG, seeded when the model is built, so masks are
/// reproducible for a fixed run seed.
#[derive(Debug, Clone)]
pub struct DropoutLayer {
    dropout_rate: f32,
    scale: f32,
    rng: StdRng,
    mask: Option<ArrayD<f32>>,
}

impl DropoutLayer {
    pub fn new<R: Rng>(dropout_rate: f32, rng: &mut R) -> Result<Self> {
        if !(0.0..1.0).contains(&dropout_rate) {
            return Err(Error::Config(format!("dropout rate {dropout_rate} is outside [0, 1)")));
        }

        Ok(DropoutLayer {
            dropout_rate,
            scale: 1.0 / (1.0 - dropout_rate), // Scale factor for training
            rng: StdRng::seed_from_u64(rng.random()),
            mask: None,
        })
    }
}

impl Layer for DropoutLayer {
    fn name(&self) -> &'static str {
        NAME
    }

    fn forward(&mut self, input: &ArrayD<f32>, _device: &Device) -> Result<ArrayD<f32>> {
        let (rate, scale) = (self.dropout_rate, self.scale);
        let rng = &mut self.rng;
        let mask = ArrayD::from_shape_fn(input.raw_dim(), |_| {
            if rng.random::<f32>() >= rate { scale } else { 0.0 }
        });

        let output = input * &mask;
        self.mask = Some(mask);
        Ok(output)
    }

    fn infer(&self, input: &ArrayD<f32>, _device: &Device) -> Result<ArrayD<f32>> {
        Ok(input.clone())
    }

    fn backward(&mut self, grad_output: &ArrayD<f32>, _device: &Device) -> Result<ArrayD<f32>> {
        // During backprop, we multiply gradients by the same mask
        let mask = self.mask.take().ok_or_else(|| missing_cache(NAME))?;
        if mask.shape() != grad_output.shape() {
            return Err(Error::shape(NAME, format!("gradient shape {:?}", grad_output.shape())));
        }
        Ok(grad_output * &mask)
    }

    fn clone_box(&self) -> Box<dyn Layer> {
        Box::new(self.clone())
    }
}
