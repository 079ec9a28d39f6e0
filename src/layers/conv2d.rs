use ndarray::{Array2, Array3, Array4, ArrayD, ArrayView2, ArrayView3, ArrayView4, Axis, Ix4};
use rand::Rng;

use crate::activation::ActivationType;
use crate::device::Device;
use crate::error::{Error, Result};
use crate::layers::{missing_cache, view_as, Layer, LayerParams};

const NAME: &str = "conv2d";

/// 2D convolution lowered to a matrix product through im2col
///
/// Weights are laid out as `(filters, channels * kernel_h * kernel_w)`.
#[derive(Debug, Clone)]
pub struct Conv2DLayer {
    pub params: LayerParams,
    pub kernel_size: (usize, usize),
    pub stride: (usize, usize),
    pub padding: (usize, usize),
    pub input_shape: (usize, usize, usize), // (channels, height, width)
    pub filters: usize,
    cache: Option<ConvCache>,
}

#[derive(Debug, Clone)]
struct ConvCache {
    cols: Vec<Array2<f32>>,
    preactivation: ArrayD<f32>,
}

impl Conv2DLayer {
    pub fn new<R: Rng>(
        input_shape: (usize, usize, usize),
        kernel_size: (usize, usize),
        filters: usize,
        stride: (usize, usize),
        padding: (usize, usize),
        activation: ActivationType,
        rng: &mut R,
    ) -> Result<Self> {
        let (channels, height, width) = input_shape;
        let (kernel_h, kernel_w) = kernel_size;
        if stride.0 == 0 || stride.1 == 0 {
            return Err(Error::Config("convolution stride must be positive".to_string()));
        }
        if height + 2 * padding.0 < kernel_h || width + 2 * padding.1 < kernel_w {
            return Err(Error::Config(format!(
                "kernel {kernel_h}x{kernel_w} does not fit input {height}x{width}"
            )));
        }

        let fan_in = channels * kernel_h * kernel_w;
        let params = LayerParams::he_normal(filters, fan_in, activation, rng)?;

        Ok(Conv2DLayer {
            params,
            kernel_size,
            stride,
            padding,
            input_shape,
            filters,
            cache: None,
        })
    }

    pub fn output_shape(&self) -> (usize, usize, usize) {
        let (_, height, width) = self.input_shape;
        let output_h = ((height + 2 * self.padding.0 - self.kernel_size.0) / self.stride.0) + 1;
        let output_w = ((width + 2 * self.padding.1 - self.kernel_size.1) / self.stride.1) + 1;
        (self.filters, output_h, output_w)
    }

    fn im2col(&self, sample: ArrayView3<f32>) -> Array2<f32> {
        let (channels, height, width) = self.input_shape;
        let (kernel_h, kernel_w) = self.kernel_size;
        let (_, output_h, output_w) = self.output_shape();

        let mut cols = Array2::zeros((channels * kernel_h * kernel_w, output_h * output_w));
        for c in 0..channels {
            for kh in 0..kernel_h {
                for kw in 0..kernel_w {
                    let row = (c * kernel_h + kh) * kernel_w + kw;
                    for oh in 0..output_h {
                        let Some(ih) = (oh * self.stride.0 + kh).checked_sub(self.padding.0) else { continue };
                        if ih >= height {
                            continue;
                        }
                        for ow in 0..output_w {
                            let Some(iw) = (ow * self.stride.1 + kw).checked_sub(self.padding.1) else { continue };
                            if iw >= width {
                                continue;
                            }
                            cols[[row, oh * output_w + ow]] = sample[[c, ih, iw]];
                        }
                    }
                }
            }
        }
        cols
    }

    /// Scatter-adds column gradients back onto the input grid
    fn col2im(&self, cols: ArrayView2<f32>) -> Array3<f32> {
        let (channels, height, width) = self.input_shape;
        let (kernel_h, kernel_w) = self.kernel_size;
        let (_, output_h, output_w) = self.output_shape();

        let mut image = Array3::zeros((channels, height, width));
        for c in 0..channels {
            for kh in 0..kernel_h {
                for kw in 0..kernel_w {
                    let row = (c * kernel_h + kh) * kernel_w + kw;
                    for oh in 0..output_h {
                        let Some(ih) = (oh * self.stride.0 + kh).checked_sub(self.padding.0) else { continue };
                        if ih >= height {
                            continue;
                        }
                        for ow in 0..output_w {
                            let Some(iw) = (ow * self.stride.1 + kw).checked_sub(self.padding.1) else { continue };
                            if iw >= width {
                                continue;
                            }
                            image[[c, ih, iw]] += cols[[row, oh * output_w + ow]];
                        }
                    }
                }
            }
        }
        image
    }

    fn check_input(&self, input: &ArrayView4<f32>) -> Result<()> {
        let (_, c, h, w) = input.dim();
        if (c, h, w) != self.input_shape {
            return Err(Error::shape(
                NAME,
                format!("expected images of shape {:?}, got {:?}", self.input_shape, (c, h, w)),
            ));
        }
        Ok(())
    }

    /// Preactivation for a batch, optionally keeping the im2col matrices
    fn convolve(
        &self,
        input: ArrayView4<f32>,
        device: &Device,
        keep_cols: bool,
    ) -> Result<(Array4<f32>, Vec<Array2<f32>>)> {
        self.check_input(&input)?;
        let batch = input.len_of(Axis(0));
        let (filters, output_h, output_w) = self.output_shape();
        let bias = self.params.bias.view().insert_axis(Axis(1));

        let mut output = Array4::zeros((batch, filters, output_h, output_w));
        let mut kept = Vec::with_capacity(if keep_cols { batch } else { 0 });
        for (n, sample) in input.outer_iter().enumerate() {
            let cols = self.im2col(sample);
            let mut product = device.matmul(self.params.weights.view(), cols.view())?;
            product += &bias;
            output
                .index_axis_mut(Axis(0), n)
                .assign(&product.into_shape_with_order((filters, output_h, output_w))?);
            if keep_cols {
                kept.push(cols);
            }
        }
        Ok((output, kept))
    }
}

impl Layer for Conv2DLayer {
    fn name(&self) -> &'static str {
        NAME
    }

    fn forward(&mut self, input: &ArrayD<f32>, device: &Device) -> Result<ArrayD<f32>> {
        let input = view_as::<Ix4>(NAME, input)?;
        let (preactivation, cols) = self.convolve(input, device, true)?;
        let preactivation = preactivation.into_dyn();
        let output = self.params.activation.forward(preactivation.clone());
        self.cache = Some(ConvCache { cols, preactivation });
        Ok(output)
    }

    fn infer(&self, input: &ArrayD<f32>, device: &Device) -> Result<ArrayD<f32>> {
        let input = view_as::<Ix4>(NAME, input)?;
        let (preactivation, _) = self.convolve(input, device, false)?;
        Ok(self.params.activation.forward(preactivation.into_dyn()))
    }

    fn backward(&mut self, grad_output: &ArrayD<f32>, device: &Device) -> Result<ArrayD<f32>> {
        let cache = self.cache.take().ok_or_else(|| missing_cache(NAME))?;
        if grad_output.shape() != cache.preactivation.shape() {
            return Err(Error::shape(NAME, format!("gradient shape {:?}", grad_output.shape())));
        }
        let grad_pre = self.params.activation.backward(&cache.preactivation, grad_output);
        let (filters, output_h, output_w) = self.output_shape();
        let (channels, height, width) = self.input_shape;
        let batch = cache.cols.len();

        let mut grad_input = Array4::zeros((batch, channels, height, width));
        for (n, cols) in cache.cols.iter().enumerate() {
            let grad = grad_pre.index_axis(Axis(0), n);
            let grad = grad.to_shape((filters, output_h * output_w))?;

            let weight_grads = device.matmul(grad.view(), cols.t())?;
            self.params.add_to_weight_grads(&weight_grads);
            self.params.add_to_bias_grads(&grad.sum_axis(Axis(1)));

            let grad_cols = device.matmul(self.params.weights.t(), grad.view())?;
            grad_input.index_axis_mut(Axis(0), n).assign(&self.col2im(grad_cols.view()));
        }
        Ok(grad_input.into_dyn())
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
