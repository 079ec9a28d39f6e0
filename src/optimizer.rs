use ndarray::{Array1, Array2, Zip};

use crate::layers::LayerParams;

/// Updates layer parameters from their accumulated gradients
pub trait Optimizer {
    /// Apply one update to every trainable layer, in model order
    fn step(&mut self, params: &mut [&mut LayerParams]);

    fn learning_rate(&self) -> f32;

    fn set_learning_rate(&mut self, learning_rate: f32);
}

/// Adam with bias-corrected moment estimates
///
/// Moment buffers are created lazily on the first step and indexed by the
/// layer's position in the slice passed to `step`.
#[derive(Debug, Clone)]
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    t: i32,
    moments: Vec<LayerMoments>,
}

#[derive(Debug, Clone)]
struct LayerMoments {
    m_weights: Array2<f32>,
    v_weights: Array2<f32>,
    m_bias: Array1<f32>,
    v_bias: Array1<f32>,
}

impl Adam {
    pub fn new(learning_rate: f32, beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Self { learning_rate, beta1, beta2, epsilon, t: 0, moments: Vec::new() }
    }

    /// beta1 = 0.9, beta2 = 0.999, epsilon = 1e-8
    pub fn default_params(learning_rate: f32) -> Self {
        Self::new(learning_rate, 0.9, 0.999, 1e-8)
    }

    pub fn step_count(&self) -> i32 {
        self.t
    }

    fn ensure_moments(&mut self, params: &[&mut LayerParams]) {
        if self.moments.len() == params.len() {
            return;
        }
        self.moments = params
            .iter()
            .map(|p| LayerMoments {
                m_weights: Array2::zeros(p.weights.raw_dim()),
                v_weights: Array2::zeros(p.weights.raw_dim()),
                m_bias: Array1::zeros(p.bias.raw_dim()),
                v_bias: Array1::zeros(p.bias.raw_dim()),
            })
            .collect();
    }
}

impl Optimizer for Adam {
    fn step(&mut self, params: &mut [&mut LayerParams]) {
        self.ensure_moments(params);
        self.t += 1;

        let (beta1, beta2, epsilon) = (self.beta1, self.beta2, self.epsilon);
        let bias_correction1 = 1.0 - beta1.powi(self.t);
        let bias_correction2 = 1.0 - beta2.powi(self.t);
        let step_size = self.learning_rate / bias_correction1;
        let update = |param: &mut f32, m: &mut f32, v: &mut f32, &grad: &f32| {
            *m = beta1 * *m + (1.0 - beta1) * grad;
            *v = beta2 * *v + (1.0 - beta2) * grad * grad;
            let denom = (*v / bias_correction2).sqrt() + epsilon;
            *param -= step_size * *m / denom;
        };

        for (layer, moments) in params.iter_mut().zip(self.moments.iter_mut()) {
            Zip::from(&mut layer.weights)
                .and(&mut moments.m_weights)
                .and(&mut moments.v_weights)
                .and(&layer.weight_grads)
                .for_each(update);
            Zip::from(&mut layer.bias)
                .and(&mut moments.m_bias)
                .and(&mut moments.v_bias)
                .and(&layer.bias_grads)
                .for_each(update);
        }
    }

    fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, learning_rate: f32) {
        self.learning_rate = learning_rate;
    }
}
