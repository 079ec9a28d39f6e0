use ndarray::{Array4, ArrayD, ArrayView4, Ix4};

use super::{missing_cache, view_as, Layer};
use crate::device::Device;
use crate::error::{Error, Result};

const NAME: &str = "max_pool";

#[derive(Debug, Clone)]
pub struct MaxPoolLayer {
    pub input_shape: (usize, usize, usize),  // (channels, height, width)
    pub output_shape: (usize, usize, usize),
    pub pool_size: (usize, usize),
    pub stride: usize,
    /// Position (h, w) inside the input of every pooled maximum
    max_indices: Option<Array4<(usize, usize)>>,
}

impl MaxPoolLayer {
    pub fn new(
        in_channels: usize,
        input_height: usize,
        input_width: usize,
        pool_size: (usize, usize),
        stride: usize,
    ) -> Result<Self> {
        if stride == 0 || pool_size.0 == 0 || pool_size.1 == 0 {
            return Err(Error::Config("pool size and stride must be positive".to_string()));
        }
        if input_height < pool_size.0 || input_width < pool_size.1 {
            return Err(Error::Config(format!(
                "pool {:?} does not fit input {input_height}x{input_width}",
                pool_size
            )));
        }
        let input_shape = (in_channels, input_height, input_width);

        // Calculate output dimensions
        let output_height = ((input_height - pool_size.0) / stride) + 1;
        let output_width = ((input_width - pool_size.1) / stride) + 1;
        let output_shape = (in_channels, output_height, output_width);

        Ok(MaxPoolLayer {
            input_shape,
            output_shape,
            pool_size,
            stride,
            max_indices: None,
        })
    }

    fn pool(&self, input: ArrayView4<f32>) -> Result<(Array4<f32>, Array4<(usize, usize)>)> {
        let (batch, channels, height, width) = input.dim();
        if (channels, height, width) != self.input_shape {
            return Err(Error::shape(
                NAME,
                format!("expected {:?}, got {:?}", self.input_shape, (channels, height, width)),
            ));
        }
        let (_, output_height, output_width) = self.output_shape;

        let mut output = Array4::<f32>::zeros((batch, channels, output_height, output_width));
        let mut max_indices = Array4::<(usize, usize)>::from_elem(
            (batch, channels, output_height, output_width),
            (0, 0),
        );

        for n in 0..batch {
            for c in 0..channels {
                for h in 0..output_height {
                    for w in 0..output_width {
                        let h_start = h * self.stride;
                        let w_start = w * self.stride;

                        let mut max_val = f32::NEG_INFINITY;
                        let mut max_pos = (h_start, w_start);

                        // Find maximum in pooling window
                        for ph in 0..self.pool_size.0 {
                            for pw in 0..self.pool_size.1 {
                                let val = input[[n, c, h_start + ph, w_start + pw]];
                                if val > max_val || (val.is_nan() && !max_val.is_nan()) {
                                    max_val = val;
                                    max_pos = (h_start + ph, w_start + pw);
                                }
                            }
                        }

                        output[[n, c, h, w]] = max_val;
                        max_indices[[n, c, h, w]] = max_pos;
                    }
                }
            }
        }
        Ok((output, max_indices))
    }
}

impl Layer for MaxPoolLayer {
    fn name(&self) -> &'static str {
        NAME
    }

    fn forward(&mut self, input: &ArrayD<f32>, _device: &Device) -> Result<ArrayD<f32>> {
        let (output, max_indices) = self.pool(view_as::<Ix4>(NAME, input)?)?;
        self.max_indices = Some(max_indices);
        Ok(output.into_dyn())
    }

    fn infer(&self, input: &ArrayD<f32>, _device: &Device) -> Result<ArrayD<f32>> {
        let (output, _) = self.pool(view_as::<Ix4>(NAME, input)?)?;
        Ok(output.into_dyn())
    }

    fn backward(&mut self, grad_output: &ArrayD<f32>, _device: &Device) -> Result<ArrayD<f32>> {
        let max_indices = self.max_indices.take().ok_or_else(|| missing_cache(NAME))?;
        let grad_output = view_as::<Ix4>(NAME, grad_output)?;
        if grad_output.dim() != max_indices.dim() {
            return Err(Error::shape(NAME, format!("gradient shape {:?}", grad_output.shape())));
        }

        let (batch, channels, output_height, output_width) = max_indices.dim();
        let (_, height, width) = self.input_shape;
        let mut input_gradient = Array4::<f32>::zeros((batch, channels, height, width));

        for n in 0..batch {
            for c in 0..channels {
                for h in 0..output_height {
                    for w in 0..output_width {
                        let (max_h, max_w) = max_indices[[n, c, h, w]];
                        input_gradient[[n, c, max_h, max_w]] += grad_output[[n, c, h, w]];
                    }
                }
            }
        }

        Ok(input_gradient.into_dyn())
    }

    fn clone_box(&self) -> Box<dyn Layer> {
        Box::new(self.clone())
    }
}
