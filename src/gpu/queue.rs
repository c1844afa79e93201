// gpu/queue.rs — Per-consumer command queue.
//
// A CommandQueue records work into a command encoder and submits it to the
// device queue. Commands on one CommandQueue execute in the order they were
// enqueued.
//
// BARRIERS:
// `enqueue_barrier` ends the current submission. Everything enqueued before
// it is submitted first, and wgpu makes the writes of one submission
// visible to every later one, so launches after the barrier see the images
// and buffers produced before it. Within a submission each kernel launch
// also gets its own compute pass, which orders dependent launches too; the
// barrier is the explicit synchronization point the detection pipeline
// relies on.
//
// BLOCKING OPERATIONS:
// `read_buffer`, `read_image` and `finish` (and `enqueue_write_buffer` with
// `blocking`) submit pending work and wait for the device.
//
// All CommandQueues of a device share the device's wgpu::Queue, so work
// submitted earlier from one CommandQueue also runs before work submitted
// later from another.

use std::fmt;
use std::sync::mpsc;
use std::sync::Arc;

use bytemuck::Pod;
use tracing::trace;

use super::error::{GpuError, Result};
use super::memory::{align_to, Buffer, Image};
use super::program::Kernel;
use super::status::DeviceStatus;

pub struct CommandQueue {
    device_index: usize,
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    encoder: Option<wgpu::CommandEncoder>,
    submissions: u64,
}

impl CommandQueue {
    pub(crate) fn new(device_index: usize, device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        CommandQueue {
            device_index,
            device,
            queue,
            encoder: None,
            submissions: 0,
        }
    }

    pub fn device_index(&self) -> usize {
        self.device_index
    }

    /// Number of submissions made so far.
    pub fn submissions(&self) -> u64 {
        self.submissions
    }

    /// Launch `kernel` over a `[width, height]` index range with its
    /// currently bound arguments. Non-blocking.
    pub fn enqueue_kernel(&mut self, kernel: &Kernel, range: [u32; 2]) -> Result<()> {
        if kernel.device_index() != self.device_index {
            return Err(GpuError::DeviceMismatch {
                kernel: kernel.name().to_string(),
                kernel_device: kernel.device_index(),
                queue_device: self.device_index,
            });
        }
        let bind_group = kernel.bind_group()?;
        let [x, y] = kernel.dispatch_size(range);
        trace!(kernel = kernel.name(), ?range, workgroups = ?[x, y], "enqueue kernel");

        let encoder = self.encoder();
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(kernel.name()),
            timestamp_writes: None,
        });
        pass.set_pipeline(kernel.pipeline());
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(x, y, 1);
        Ok(())
    }

    /// Work enqueued after the barrier starts once work before it is done.
    pub fn enqueue_barrier(&mut self) {
        self.flush();
    }

    /// Write `data` to the start of `buffer`. With `blocking` the call
    /// returns once the write has landed on the device.
    pub fn enqueue_write_buffer<T: Pod>(&mut self, buffer: &Buffer<T>, data: &[T], blocking: bool) -> Result<()> {
        self.check_device("write buffer", buffer.device_index())?;
        if data.len() > buffer.len() {
            return Err(GpuError::OutOfBounds {
                what: "buffer write",
                requested: data.len(),
                capacity: buffer.len(),
            });
        }
        // Queue writes run ahead of the next submission; flush first so
        // earlier enqueued work still comes before this write.
        self.flush();
        if !data.is_empty() {
            let bytes = bytemuck::cast_slice::<T, u8>(data);
            if bytes.len() as u64 % wgpu::COPY_BUFFER_ALIGNMENT == 0 {
                self.queue.write_buffer(buffer.raw(), 0, bytes);
            } else {
                let mut padded = bytes.to_vec();
                padded.resize(align_to(bytes.len() as u64, wgpu::COPY_BUFFER_ALIGNMENT) as usize, 0);
                self.queue.write_buffer(buffer.raw(), 0, &padded);
            }
        }
        if blocking {
            self.finish()?;
        }
        Ok(())
    }

    /// Blocking read of the whole buffer.
    pub fn read_buffer<T: Pod>(&mut self, buffer: &Buffer<T>) -> Result<Vec<T>> {
        self.check_device("read buffer", buffer.device_index())?;
        let byte_len = buffer.byte_size();
        if byte_len == 0 {
            return Ok(Vec::new());
        }
        let copy_len = align_to(byte_len, wgpu::COPY_BUFFER_ALIGNMENT);
        let staging = self.staging_buffer(copy_len);
        self.encoder().copy_buffer_to_buffer(buffer.raw(), 0, &staging, 0, copy_len);

        self.map_staging(&staging, "read buffer")?;
        let mapped = staging.slice(..).get_mapped_range();
        let values = bytemuck::try_cast_slice::<u8, T>(&mapped[..byte_len as usize])
            .map(<[T]>::to_vec)
            .map_err(|e| GpuError::device("read buffer", DeviceStatus::InvalidValue, e.to_string()));
        drop(mapped);
        staging.unmap();
        values
    }

    /// Blocking read of a whole image, row-major without padding. `T` must
    /// have the size of one texel.
    pub fn read_image<T: Pod>(&mut self, image: &Image) -> Result<Vec<T>> {
        self.check_device("read image", image.device_index())?;
        let texel = std::mem::size_of::<T>() as u32;
        if image.format().block_copy_size(None) != Some(texel) {
            return Err(GpuError::device(
                "read image",
                DeviceStatus::ImageFormatMismatch,
                format!("{:?} texels are not {texel} bytes", image.format()),
            ));
        }
        let (width, height) = (image.width(), image.height());
        let unpadded_row = width * texel;
        let padded_row = align_to(unpadded_row as u64, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT as u64) as u32;
        let staging = self.staging_buffer(padded_row as u64 * height as u64);

        self.encoder().copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: image.texture(),
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &staging,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );

        self.map_staging(&staging, "read image")?;
        let mapped = staging.slice(..).get_mapped_range();
        let mut out = Vec::with_capacity((width * height) as usize);
        // Rows start at multiples of COPY_BYTES_PER_ROW_ALIGNMENT, so every
        // row slice is aligned for T.
        let rows = mapped.chunks_exact(padded_row as usize).try_for_each(|row| -> Result<()> {
            let texels = bytemuck::try_cast_slice::<u8, T>(&row[..unpadded_row as usize])
                .map_err(|e| GpuError::device("read image", DeviceStatus::InvalidValue, e.to_string()))?;
            out.extend_from_slice(texels);
            Ok(())
        });
        drop(mapped);
        staging.unmap();
        rows.map(|()| out)
    }

    /// Submit pending work without waiting.
    pub fn flush(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(std::iter::once(encoder.finish()));
            self.submissions += 1;
            trace!(device = self.device_index, submissions = self.submissions, "submitted");
        }
    }

    /// Submit pending work and wait until the device has finished it.
    pub fn finish(&mut self) -> Result<()> {
        self.flush();
        // An empty submission also flushes pending queue writes.
        self.queue.submit(std::iter::empty());
        self.device.poll(wgpu::Maintain::Wait);
        Ok(())
    }

    fn encoder(&mut self) -> &mut wgpu::CommandEncoder {
        let device = &self.device;
        self.encoder.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("CommandQueue"),
            })
        })
    }

    fn staging_buffer(&self, size: u64) -> wgpu::Buffer {
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("CommandQueue::staging"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    /// Submit pending work and map `staging` for reading.
    fn map_staging(&mut self, staging: &wgpu::Buffer, operation: &'static str) -> Result<()> {
        self.flush();
        let slice = staging.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|_| GpuError::device(operation, DeviceStatus::MapFailure, "map callback was dropped"))?
            .map_err(|e| GpuError::device(operation, DeviceStatus::from(&e), e.to_string()))
    }

    fn check_device(&self, operation: &'static str, device: usize) -> Result<()> {
        if device == self.device_index {
            Ok(())
        } else {
            Err(GpuError::device(
                operation,
                DeviceStatus::InvalidMemObject,
                format!("resource lives on device {device}, queue on {}", self.device_index),
            ))
        }
    }
}

impl fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandQueue")
            .field("device", &self.device_index)
            .field("pending", &self.encoder.is_some())
            .field("submissions", &self.submissions)
            .finish()
    }
}
