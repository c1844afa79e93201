// gpu/error.rs — Error type for the GPU layer.

use thiserror::Error;

use super::status::DeviceStatus;

#[derive(Error, Debug)]
pub enum GpuError {
    /// No GPU platform or device could be opened. Every later operation on
    /// a manager in this state fails with this error again.
    #[error("no GPU platform available: {0}")]
    PlatformUnavailable(String),

    /// Program compilation failed. `log` is the build log of `device`.
    #[error("program `{program}` failed to build on device {device} ({device_name}):\n{log}")]
    BuildFailure {
        program: String,
        device: usize,
        device_name: String,
        log: String,
    },

    #[error("device index {index} out of range ({count} devices)")]
    DeviceIndex { index: usize, count: usize },

    #[error("program `{program}` has no compute entry point `{entry}`")]
    KernelNotFound { program: String, entry: String },

    #[error("kernel `{kernel}` argument {index}: {reason}")]
    KernelArgument {
        kernel: String,
        index: usize,
        reason: String,
    },

    #[error("kernel `{kernel}` was built for device {kernel_device}, queue targets device {queue_device}")]
    DeviceMismatch {
        kernel: String,
        kernel_device: usize,
        queue_device: usize,
    },

    #[error("host image is not contiguous (width {width}, stride {stride})")]
    NonContiguousImage { width: usize, stride: usize },

    #[error("{what} of {requested} elements exceeds capacity {capacity}")]
    OutOfBounds {
        what: &'static str,
        requested: usize,
        capacity: usize,
    },

    /// A device-level failure, translated to a status.
    #[error("{operation} failed: {status}: {detail}")]
    Device {
        operation: &'static str,
        status: DeviceStatus,
        detail: String,
    },
}

impl GpuError {
    pub(crate) fn device(operation: &'static str, status: DeviceStatus, detail: impl Into<String>) -> Self {
        GpuError::Device {
            operation,
            status,
            detail: detail.into(),
        }
    }

    /// Wrap an error captured from a wgpu error scope.
    pub(crate) fn from_wgpu(operation: &'static str, err: &wgpu::Error) -> Self {
        GpuError::device(operation, DeviceStatus::classify(err), err.to_string())
    }

    /// Device status carried by this error, if any.
    pub fn status(&self) -> Option<DeviceStatus> {
        match self {
            GpuError::Device { status, .. } => Some(*status),
            GpuError::BuildFailure { .. } => Some(DeviceStatus::BuildProgramFailure),
            GpuError::PlatformUnavailable(_) => Some(DeviceStatus::DeviceNotFound),
            GpuError::DeviceIndex { .. } => Some(DeviceStatus::InvalidDevice),
            GpuError::KernelNotFound { .. } => Some(DeviceStatus::InvalidKernelName),
            GpuError::KernelArgument { .. } => Some(DeviceStatus::InvalidArgValue),
            GpuError::DeviceMismatch { .. } => Some(DeviceStatus::InvalidCommandQueue),
            GpuError::NonContiguousImage { .. } | GpuError::OutOfBounds { .. } => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, GpuError>;

/// Run `f` inside validation and out-of-memory error scopes on `device`,
/// returning the first error the scopes captured.
pub(crate) fn scoped<R>(device: &wgpu::Device, f: impl FnOnce() -> R) -> std::result::Result<R, wgpu::Error> {
    device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = f();
    let validation = pollster::block_on(device.pop_error_scope());
    let out_of_memory = pollster::block_on(device.pop_error_scope());
    match validation.or(out_of_memory) {
        Some(err) => Err(err),
        None => Ok(value),
    }
}
