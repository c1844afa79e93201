// gpu/smooth.rs — Separable Gaussian smoothing on the GPU.
//
// Two passes over R32Float images: rows into a temporary image, then
// columns into the output. Both kernels take the right half of the
// normalized 1D kernel (centre first) as a read-only buffer, the same
// coefficients `convolution::gaussian_kernel_1d` produces on the CPU, so
// the GPU result matches `convolution::gaussian_blur` up to float rounding.
//
// The result is submitted before `smooth` returns. Every CommandQueue of a
// device feeds the same wgpu::Queue, so a consumer that enqueues work on
// its own queue afterwards reads the finished image.

use std::sync::Arc;

use tracing::debug;

use super::error::{GpuError, Result};
use super::manager::{ResourceManager, PRIMARY_DEVICE};
use super::memory::{Image, MemAccess};
use super::program::Kernel;
use super::queue::CommandQueue;
use super::registry::ProgramRegistry;
use super::status::DeviceStatus;
use crate::convolution::gaussian_kernel_1d;

pub const GAUSSIAN_PROGRAM: &str = "gaussian_smooth";
pub const GAUSSIAN_SOURCE: &str = include_str!("../shaders/gaussian.wgsl");

/// Smoothing kernels plus the queue they run on.
pub struct GaussianSmooth {
    manager: Arc<ResourceManager>,
    rows: Kernel,
    cols: Kernel,
    queue: CommandQueue,
}

impl GaussianSmooth {
    pub fn new(manager: Arc<ResourceManager>, registry: &ProgramRegistry) -> Result<Self> {
        let program = registry.register_program(GAUSSIAN_PROGRAM, GAUSSIAN_SOURCE)?;
        let rows = Kernel::new(&program, "smooth_rows", PRIMARY_DEVICE)?;
        let cols = Kernel::new(&program, "smooth_cols", PRIMARY_DEVICE)?;
        let queue = manager.create_queue(PRIMARY_DEVICE)?;
        Ok(GaussianSmooth {
            manager,
            rows,
            cols,
            queue,
        })
    }

    /// Blur `image` with a `2 * half_width + 1` tap Gaussian of standard
    /// deviation `sigma`. The result is a new R32Float read-write image.
    pub fn smooth(&mut self, image: &Image, sigma: f32, half_width: u32) -> Result<Image> {
        if sigma.is_nan() || sigma <= 0.0 {
            return Err(GpuError::device(
                "smooth",
                DeviceStatus::InvalidValue,
                format!("sigma must be positive, got {sigma}"),
            ));
        }
        let (width, height) = (image.width(), image.height());
        let weights = half_kernel(half_width, sigma);
        let weights = self.manager.create_buffer_init(MemAccess::ReadOnly, &weights)?;
        let tmp = self
            .manager
            .create_image(wgpu::TextureFormat::R32Float, MemAccess::ReadWrite, width, height)?;
        let out = self
            .manager
            .create_image(wgpu::TextureFormat::R32Float, MemAccess::ReadWrite, width, height)?;

        for (kernel, src, dst) in [(&mut self.rows, image, &tmp), (&mut self.cols, &tmp, &out)] {
            kernel.set_image(0, src)?;
            kernel.set_image(1, dst)?;
            kernel.set_buffer(2, &weights)?;
            kernel.set_scalar(3, half_width)?;
        }

        self.queue.enqueue_kernel(&self.rows, [width, height])?;
        self.queue.enqueue_barrier();
        self.queue.enqueue_kernel(&self.cols, [width, height])?;
        self.queue.enqueue_barrier();
        debug!(width, height, sigma, half_width, "smoothed");
        Ok(out)
    }
}

/// Right half of the normalized kernel, centre first.
fn half_kernel(half_width: u32, sigma: f32) -> Vec<f32> {
    let half = half_width as usize;
    gaussian_kernel_1d(half, sigma).split_off(half)
}
