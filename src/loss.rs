use ndarray::{Array2, ArrayView2, Axis};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Loss {
    /// Negative log-likelihood over log-probabilities
    NegativeLogLikelihood,
}

impl Loss {
    /// Summed loss over a batch of log-probabilities `(N, classes)`
    pub fn sum(&self, log_probs: ArrayView2<f32>, targets: &[usize]) -> Result<f64> {
        check_targets(log_probs, targets)?;
        match self {
            Loss::NegativeLogLikelihood => Ok(log_probs
                .outer_iter()
                .zip(targets)
                .map(|(row, &target)| -(row[target] as f64))
                .sum()),
        }
    }

    /// Loss averaged over the batch
    pub fn mean(&self, log_probs: ArrayView2<f32>, targets: &[usize]) -> Result<f64> {
        let total = self.sum(log_probs, targets)?;
        Ok(total / targets.len().max(1) as f64)
    }

    /// Gradient of the batch-mean loss with respect to the logits that
    /// produced `log_probs` through log-softmax: `(softmax - onehot) / N`
    pub fn logits_gradient(&self, log_probs: ArrayView2<f32>, targets: &[usize]) -> Result<Array2<f32>> {
        check_targets(log_probs, targets)?;
        let scale = 1.0 / targets.len().max(1) as f32;
        let mut grad = log_probs.mapv(f32::exp);
        for (mut row, &target) in grad.outer_iter_mut().zip(targets) {
            row[target] -= 1.0;
            row.mapv_inplace(|g| g * scale);
        }
        Ok(grad)
    }
}

/// Numerically stable row-wise log-softmax
pub fn log_softmax(logits: ArrayView2<f32>) -> Array2<f32> {
    let mut out = logits.to_owned();
    for mut row in out.axis_iter_mut(Axis(0)) {
        let max = row.fold(f32::NEG_INFINITY, |m, &x| m.max(x));
        let log_sum = row.mapv(|x| (x - max).exp()).sum().ln() + max;
        row.mapv_inplace(|x| x - log_sum);
    }
    out
}

/// Index of the largest entry in each row
pub fn argmax_rows(values: ArrayView2<f32>) -> Vec<usize> {
    values
        .outer_iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |best, (i, &x)| if x > best.1 { (i, x) } else { best })
                .0
        })
        .collect()
}

fn check_targets(log_probs: ArrayView2<f32>, targets: &[usize]) -> Result<()> {
    let (rows, classes) = log_probs.dim();
    if rows != targets.len() {
        return Err(Error::shape("loss", format!("{rows} predictions for {} targets", targets.len())));
    }
    if let Some(&bad) = targets.iter().find(|&&t| t >= classes) {
        return Err(Error::shape("loss", format!("target {bad} out of range for {classes} classes")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_log_softmax_rows_normalize() {
        let logits = array![[1.0f32, 2.0, 3.0], [1000.0, 0.0, -1000.0]];
        let log_probs = log_softmax(logits.view());

        for row in log_probs.outer_iter() {
            let total: f32 = row.iter().map(|x| x.exp()).sum();
            assert_abs_diff_eq!(total, 1.0, epsilon = 1e-5);
        }
        assert!(log_probs.iter().all(|x| x.is_finite()));
    }

    #[test]
    fn test_nll_picks_target_entries() {
        let log_probs = array![[-0.1f32, -2.0], [-3.0, -0.5]];
        let loss = Loss::NegativeLogLikelihood;

        assert_abs_diff_eq!(loss.sum(log_probs.view(), &[0, 1]).unwrap(), 0.6, epsilon = 1e-6);
        assert_abs_diff_eq!(loss.mean(log_probs.view(), &[0, 1]).unwrap(), 0.3, epsilon = 1e-6);
    }

    #[test]
    fn test_gradient_rows_sum_to_zero() {
        let log_probs = log_softmax(array![[0.2f32, -1.0, 0.4], [2.0, 1.0, 0.0]].view());
        let grad = Loss::NegativeLogLikelihood.logits_gradient(log_probs.view(), &[2, 0]).unwrap();

        for row in grad.outer_iter() {
            assert_abs_diff_eq!(row.sum(), 0.0, epsilon = 1e-6);
        }
        assert!(grad[[0, 2]] < 0.0);
    }

    #[test]
    fn test_target_out_of_range() {
        let log_probs = array![[-0.1f32, -2.0]];
        assert!(Loss::NegativeLogLikelihood.sum(log_probs.view(), &[2]).is_err());
    }

    #[test]
    fn test_argmax_rows() {
        let values = array![[0.1f32, 0.7, 0.2], [0.9, 0.05, 0.05]];
        assert_eq!(argmax_rows(values.view()), vec![1, 0]);
    }
}
