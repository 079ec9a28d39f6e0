use ndarray::{ArrayD, Zip};
use serde::{Deserialize, Serialize};

/// Enum representing different activation function types
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ActivationType {
    Sigmoid,
    ReLU,
    Tanh,
    Linear,
}

impl ActivationType {
    /// Applies the activation function to a given input
    pub fn apply(&self, x: f32) -> f32 {
        match self {
            ActivationType::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            // NaN passes through
            ActivationType::ReLU => if x < 0.0 { 0.0 } else { x },
            ActivationType::Tanh => x.tanh(),
            ActivationType::Linear => x,
        }
    }

    /// Computes the derivative of the activation function
    pub fn derivative(&self, x: f32) -> f32 {
        match self {
            ActivationType::Sigmoid => {
                let sigmoid = 1.0 / (1.0 + (-x).exp());
                sigmoid * (1.0 - sigmoid)
            },
            ActivationType::ReLU => if x > 0.0 { 1.0 } else { 0.0 },
            ActivationType::Tanh => 1.0 - x.tanh().powi(2),
            ActivationType::Linear => 1.0,
        }
    }

    /// Applies the activation elementwise, consuming the preactivation
    pub fn forward(&self, mut preactivation: ArrayD<f32>) -> ArrayD<f32> {
        if *self != ActivationType::Linear {
            preactivation.mapv_inplace(|x| self.apply(x));
        }
        preactivation
    }

    /// Chains `grad_output` through the activation given the cached preactivation
    pub fn backward(&self, preactivation: &ArrayD<f32>, grad_output: &ArrayD<f32>) -> ArrayD<f32> {
        if *self == ActivationType::Linear {
            return grad_output.clone();
        }
        let mut grad = grad_output.clone();
        Zip::from(&mut grad)
            .and(preactivation)
            .for_each(|g, &x| *g *= self.derivative(x));
        grad
    }
}
