use std::fmt;
#[cfg(feature = "gpu")]
use std::sync::Arc;

use ndarray::{Array2, ArrayView2};

use crate::error::{Error, Result};
#[cfg(feature = "gpu")]
use crate::gpu::GpuContext;

/// Compute context a training run executes its matrix products on
#[derive(Clone)]
pub enum Device {
    Cpu,
    #[cfg(feature = "gpu")]
    Gpu(Arc<GpuContext>),
}

impl Device {
    /// Pick a GPU when asked for and available, otherwise the CPU
    pub fn select(use_gpu: bool) -> Device {
        if !use_gpu {
            return Device::Cpu;
        }
        match Device::gpu() {
            Ok(device) => device,
            Err(err) => {
                tracing::info!("Falling back to CPU: {}", err);
                Device::Cpu
            }
        }
    }

    /// Request a GPU device, failing when none can be opened
    #[cfg(feature = "gpu")]
    pub fn gpu() -> Result<Device> {
        Ok(Device::Gpu(Arc::new(GpuContext::new()?)))
    }

    #[cfg(not(feature = "gpu"))]
    pub fn gpu() -> Result<Device> {
        Err(Error::DeviceUnavailable("built without the `gpu` feature".to_string()))
    }

    pub fn name(&self) -> String {
        match self {
            Device::Cpu => "cpu".to_string(),
            #[cfg(feature = "gpu")]
            Device::Gpu(ctx) => format!("gpu ({})", ctx.adapter_name()),
        }
    }

    /// `a (m x k) · b (k x n)`
    pub fn matmul(&self, a: ArrayView2<f32>, b: ArrayView2<f32>) -> Result<Array2<f32>> {
        if a.ncols() != b.nrows() {
            return Err(Error::shape(
                "matmul",
                format!("cannot multiply {:?} by {:?}", a.dim(), b.dim()),
            ));
        }
        match self {
            Device::Cpu => Ok(a.dot(&b)),
            #[cfg(feature = "gpu")]
            Device::Gpu(ctx) => ctx.matmul(a, b),
        }
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Device({})", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_cpu_matmul() {
        let a = array![[1.0f32, 2.0], [3.0, 4.0]];
        let b = array![[1.0f32], [1.0]];

        let out = Device::Cpu.matmul(a.view(), b.view()).unwrap();
        assert_eq!(out, array![[3.0f32], [7.0]]);
    }

    #[test]
    fn test_matmul_shape_mismatch() {
        let a = array![[1.0f32, 2.0]];
        let b = array![[1.0f32, 2.0]];
        assert!(Device::Cpu.matmul(a.view(), b.view()).is_err());
    }

    #[test]
    fn test_select_without_gpu_is_cpu() {
        assert_eq!(Device::select(false).name(), "cpu");
    }
}
