use ndarray::{Array2, ArrayView2};
use wgpu::util::DeviceExt;
use wgpu::{ComputePipeline, Device, PipelineCompilationOptions, Queue};

use crate::error::{Error, Result};

const WORKGROUP_SIZE: u32 = 16;

/// A wgpu device with the matrix-multiply pipeline compiled once
pub struct GpuContext {
    device: Device,
    queue: Queue,
    pipeline: ComputePipeline,
    adapter_name: String,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct MatmulDims {
    m: u32,
    k: u32,
    n: u32,
    _pad: u32,
}

impl GpuContext {
    pub fn new() -> Result<Self> {
        pollster::block_on(Self::request())
    }

    async fn request() -> Result<Self> {
        let instance = wgpu::Instance::default();

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                force_fallback_adapter: false,
                compatible_surface: None,
            })
            .await
            .ok_or_else(|| Error::DeviceUnavailable("no compatible GPU adapter".to_string()))?;
        let adapter_name = adapter.get_info().name;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Training Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::downlevel_defaults(),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await
            .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Matmul Shader"),
            source: wgpu::ShaderSource::Wgsl(std::borrow::Cow::Borrowed(include_str!("matmul.wgsl"))),
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Matmul Pipeline"),
            layout: None,
            module: &shader,
            entry_point: Some("matmul_main"),
            compilation_options: PipelineCompilationOptions::default(),
            cache: None,
        });

        tracing::info!("Using GPU adapter {}", adapter_name);
        Ok(GpuContext { device, queue, pipeline, adapter_name })
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    pub fn matmul(&self, a: ArrayView2<f32>, b: ArrayView2<f32>) -> Result<Array2<f32>> {
        let (m, k) = a.dim();
        let n = b.ncols();
        if m == 0 || n == 0 || k == 0 {
            return Ok(Array2::zeros((m, n)));
        }

        let lhs: Vec<f32> = a.iter().copied().collect();
        let rhs: Vec<f32> = b.iter().copied().collect();
        let dims = MatmulDims { m: m as u32, k: k as u32, n: n as u32, _pad: 0 };
        let output_size = (m * n * std::mem::size_of::<f32>()) as u64;

        let lhs_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Matmul Lhs"),
            contents: bytemuck::cast_slice(&lhs),
            usage: wgpu::BufferUsages::STORAGE,
        });
        let rhs_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Matmul Rhs"),
            contents: bytemuck::cast_slice(&rhs),
            usage: wgpu::BufferUsages::STORAGE,
        });
        let dims_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Matmul Dims"),
            contents: bytemuck::bytes_of(&dims),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let output_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Matmul Output"),
            size: output_size,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let staging_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Matmul Staging"),
            size: output_size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Matmul Bind Group"),
            layout: &self.pipeline.get_bind_group_layout(0),
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: lhs_buffer.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: rhs_buffer.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: output_buffer.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 3, resource: dims_buffer.as_entire_binding() },
            ],
        });

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Matmul Encoder"),
        });
        {
            let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Matmul Pass"),
                timestamp_writes: None,
            });
            compute_pass.set_pipeline(&self.pipeline);
            compute_pass.set_bind_group(0, &bind_group, &[]);
            compute_pass.dispatch_workgroups(
                (n as u32).div_ceil(WORKGROUP_SIZE),
                (m as u32).div_ceil(WORKGROUP_SIZE),
                1,
            );
        }
        encoder.copy_buffer_to_buffer(&output_buffer, 0, &staging_buffer, 0, output_size);
        self.queue.submit(Some(encoder.finish()));

        let output_slice = staging_buffer.slice(..);
        let (tx, rx) = futures_intrusive::channel::shared::oneshot_channel();
        output_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);
        match pollster::block_on(rx.receive()) {
            Some(Ok(())) => {}
            Some(Err(e)) => return Err(Error::DeviceUnavailable(e.to_string())),
            None => return Err(Error::DeviceUnavailable("buffer mapping was cancelled".to_string())),
        }

        let data = output_slice.get_mapped_range();
        let values: Vec<f32> = bytemuck::cast_slice(&data).to_vec();
        drop(data);
        staging_buffer.unmap();

        Ok(Array2::from_shape_vec((m, n), values)?)
    }
}
