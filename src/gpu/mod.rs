// gpu/mod.rs — GPU compute layer.
//
// One ResourceManager owns the wgpu instance, the devices of the selected
// backend and the pixel-format policy. It is constructed once by the
// application and handed to tasks as an Arc; nothing here is global.
//
//   ResourceManager    devices, allocation, program builds, queues
//   ProgramRegistry    one compiled Program per name, shared read-only
//   Kernel             entry point + positional arguments, owned by a task
//   CommandQueue       ordered submission channel, one per task
//
// Tasks built on top:
//
//   GaussianSmooth       separable Gaussian blur (two passes)
//   GpuHessianDetector   Hessian response → extrema, with an adaptive
//                        output capacity
//
// The CPU modules in the parent crate are the reference every kernel is
// checked against.

pub mod error;
pub mod format;
pub mod hessian;
pub mod manager;
pub mod memory;
pub mod program;
pub mod queue;
pub mod registry;
pub mod smooth;
pub mod status;

pub use error::{GpuError, Result};
pub use format::PixelFormatTable;
pub use hessian::{Detection, GpuHessianDetector, KeypointBudget, KeypointCoords};
pub use manager::{DeviceCapabilities, ManagerConfig, ResourceManager, PRIMARY_DEVICE};
pub use memory::{Buffer, Image, MemAccess};
pub use program::{Kernel, Program};
pub use queue::CommandQueue;
pub use registry::ProgramRegistry;
pub use smooth::GaussianSmooth;
pub use status::DeviceStatus;
