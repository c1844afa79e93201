// gpu/manager.rs — GPU resource manager.
//
// Responsibilities:
//   - Pick a platform (a wgpu backend) and open every GPU adapter on it.
//   - Compile programs for all opened devices.
//   - Hand out command queues, one per consumer.
//   - Allocate typed buffers and images, including uploads from host images
//     through the pixel format table.
//   - Report device capabilities to the log.
//
// PLATFORM SELECTION:
// Adapters are enumerated explicitly and anything with DeviceType::Cpu is
// rejected (llvmpipe / lavapipe show up as valid Vulkan devices), unless
// `ManagerConfig::allow_software` asks for them. The backend of the first
// remaining adapter is the platform; every adapter on that backend becomes
// a device, in enumeration order. Device 0 is the primary device and
// receives all buffer and image allocations.
//
// FAILURE MODEL:
// `ResourceManager::new` never fails. If no platform can be opened the error
// is logged and the manager stays in a non-functional state in which every
// operation returns `GpuError::PlatformUnavailable`. `try_new` is the strict
// form for callers that prefer to stop early.
//
// There is no global instance: the application creates one manager, wraps
// it in an `Arc` and passes it to the tasks that need it.

use std::fmt;
use std::sync::Arc;

use bytemuck::Pod;
use tracing::{debug, error, info, warn};

use super::error::{scoped, GpuError, Result};
use super::format::PixelFormatTable;
use super::memory::{align_to, padded_size, Buffer, Image, MemAccess};
use super::program::Program;
use super::queue::CommandQueue;
use super::status::DeviceStatus;
use crate::image::{Image as HostImage, Pixel};

/// Index of the device that owns buffer and image allocations.
pub const PRIMARY_DEVICE: usize = 0;

/// Extension token that signals double precision support.
pub const DOUBLE_PRECISION_EXTENSION: &str = "SHADER_F64";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Platform selection settings.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Backends searched for adapters.
    pub backends: wgpu::Backends,
    /// Accept software (CPU) adapters.
    pub allow_software: bool,
    /// Debug label given to opened devices.
    pub label: String,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        ManagerConfig {
            backends: wgpu::Backends::PRIMARY,
            allow_software: false,
            label: "hessian-gpu".to_string(),
        }
    }
}

impl ManagerConfig {
    /// Defaults, with the backend list taken from `WGPU_BACKEND` when set
    /// (e.g. `WGPU_BACKEND=vulkan`).
    pub fn from_env() -> Self {
        let mut config = ManagerConfig::default();
        if let Some(backends) = wgpu::util::backend_bits_from_env() {
            config.backends = backends;
        }
        config
    }
}

// ---------------------------------------------------------------------------
// Devices
// ---------------------------------------------------------------------------

pub(crate) struct ComputeDevice {
    pub(crate) info: wgpu::AdapterInfo,
    pub(crate) adapter: wgpu::Adapter,
    pub(crate) device: Arc<wgpu::Device>,
    pub(crate) queue: Arc<wgpu::Queue>,
}

/// The opened platform. `_instance` is declared last so it is dropped after
/// every device created from it.
struct Context {
    backend: wgpu::Backend,
    devices: Vec<ComputeDevice>,
    _instance: wgpu::Instance,
}

fn is_gpu(device_type: wgpu::DeviceType) -> bool {
    matches!(
        device_type,
        wgpu::DeviceType::DiscreteGpu
            | wgpu::DeviceType::IntegratedGpu
            | wgpu::DeviceType::VirtualGpu
            | wgpu::DeviceType::Other
    )
}

fn initialize(config: &ManagerConfig) -> Result<Context> {
    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
        backends: config.backends,
        ..Default::default()
    });

    let adapters: Vec<wgpu::Adapter> = instance
        .enumerate_adapters(config.backends)
        .into_iter()
        .filter(|adapter| {
            let info = adapter.get_info();
            let accepted = is_gpu(info.device_type) || config.allow_software;
            debug!(name = %info.name, backend = ?info.backend, kind = ?info.device_type, accepted, "adapter found");
            accepted
        })
        .collect();

    let backend = adapters
        .first()
        .map(|adapter| adapter.get_info().backend)
        .ok_or_else(|| GpuError::PlatformUnavailable(format!("no GPU adapter on backends {:?}", config.backends)))?;

    let mut devices = Vec::new();
    for adapter in adapters.into_iter().filter(|a| a.get_info().backend == backend) {
        let info = adapter.get_info();
        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some(&config.label),
                required_features: wgpu::Features::empty(),
                required_limits: adapter.limits(),
                memory_hints: wgpu::MemoryHints::Performance,
            },
            None,
        ))
        .map_err(|e| {
            GpuError::PlatformUnavailable(format!("{}: {} ({})", info.name, e, DeviceStatus::from(&e)))
        })?;

        let name = info.name.clone();
        device.on_uncaptured_error(Box::new(move |err| {
            error!(device = %name, status = %DeviceStatus::classify(&err), "uncaptured device error: {err}");
        }));

        info!(
            index = devices.len(),
            name = %info.name,
            backend = ?info.backend,
            kind = ?info.device_type,
            "device opened"
        );
        devices.push(ComputeDevice {
            info,
            adapter,
            device: Arc::new(device),
            queue: Arc::new(queue),
        });
    }

    Ok(Context {
        backend,
        devices,
        _instance: instance,
    })
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// Capability report of one device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceCapabilities {
    pub index: usize,
    pub name: String,
    pub backend: wgpu::Backend,
    pub device_type: wgpu::DeviceType,
    pub driver: String,
    /// Total device memory, when the backend exposes it.
    pub global_memory_bytes: Option<u64>,
    /// Largest single buffer allocation.
    pub max_allocation_bytes: u64,
    /// Largest 2D image (width, height).
    pub max_image_2d: (u32, u32),
    /// Space separated list of supported feature names.
    pub extensions: String,
}

impl DeviceCapabilities {
    /// Case-sensitive exact match of `token` against the extension list.
    pub fn has_extension(&self, token: &str) -> bool {
        self.extensions.split_whitespace().any(|ext| ext == token)
    }

    pub fn has_double_precision(&self) -> bool {
        self.has_extension(DOUBLE_PRECISION_EXTENSION)
    }
}

impl fmt::Display for DeviceCapabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const MB: u64 = 1024 * 1024;
        writeln!(f, "device {}: {} ({:?}, {:?})", self.index, self.name, self.backend, self.device_type)?;
        if !self.driver.is_empty() {
            writeln!(f, "  driver:               {}", self.driver)?;
        }
        match self.global_memory_bytes {
            Some(bytes) => writeln!(f, "  global memory:        {} MB", bytes / MB)?,
            None => writeln!(f, "  global memory:        not reported")?,
        }
        writeln!(f, "  max allocation:       {} MB", self.max_allocation_bytes / MB)?;
        writeln!(f, "  max image 2D:         {} x {}", self.max_image_2d.0, self.max_image_2d.1)?;
        write!(
            f,
            "  double precision:     {}",
            if self.has_double_precision() { "yes" } else { "no" }
        )
    }
}

fn extension_string(features: wgpu::Features) -> String {
    features.iter_names().map(|(name, _)| name).collect::<Vec<_>>().join(" ")
}

// ---------------------------------------------------------------------------
// ResourceManager
// ---------------------------------------------------------------------------

pub struct ResourceManager {
    context: Option<Context>,
    init_error: Option<String>,
    formats: PixelFormatTable,
}

impl ResourceManager {
    /// Open the first available GPU platform. On failure the error is
    /// logged and a non-functional manager is returned.
    pub fn new(config: &ManagerConfig) -> Self {
        match initialize(config) {
            Ok(context) => ResourceManager {
                context: Some(context),
                init_error: None,
                formats: PixelFormatTable::default(),
            },
            Err(err) => {
                error!(error = %err, "GPU initialization failed; resource manager is unavailable");
                ResourceManager {
                    context: None,
                    init_error: Some(err.to_string()),
                    formats: PixelFormatTable::default(),
                }
            }
        }
    }

    /// Strict form of `new`.
    pub fn try_new(config: &ManagerConfig) -> Result<Self> {
        Ok(ResourceManager {
            context: Some(initialize(config)?),
            init_error: None,
            formats: PixelFormatTable::default(),
        })
    }

    pub fn is_available(&self) -> bool {
        self.context.is_some()
    }

    pub fn device_count(&self) -> usize {
        self.context.as_ref().map_or(0, |ctx| ctx.devices.len())
    }

    /// Backend of the selected platform.
    pub fn backend(&self) -> Option<wgpu::Backend> {
        self.context.as_ref().map(|ctx| ctx.backend)
    }

    pub fn device_name(&self, index: usize) -> Result<&str> {
        Ok(&self.device(index)?.info.name)
    }

    pub fn pixel_formats(&self) -> &PixelFormatTable {
        &self.formats
    }

    pub fn pixel_formats_mut(&mut self) -> &mut PixelFormatTable {
        &mut self.formats
    }

    /// Compile `source` for every device; a failure reports the build log of
    /// `device_index`.
    pub fn build_program(&self, name: &str, source: &str, device_index: usize) -> Result<Program> {
        let ctx = self.context()?;
        if device_index >= ctx.devices.len() {
            return Err(GpuError::DeviceIndex {
                index: device_index,
                count: ctx.devices.len(),
            });
        }
        Program::build(name, source, &ctx.devices, device_index)
    }

    /// A new command queue on `device_index`, owned by the caller.
    pub fn create_queue(&self, device_index: usize) -> Result<CommandQueue> {
        let dev = self.device(device_index)?;
        Ok(CommandQueue::new(
            device_index,
            Arc::clone(&dev.device),
            Arc::clone(&dev.queue),
        ))
    }

    /// A working image without host data.
    pub fn create_image(&self, format: wgpu::TextureFormat, access: MemAccess, width: u32, height: u32) -> Result<Image> {
        let dev = self.device(PRIMARY_DEVICE)?;
        let usage = access.texture_usages(format, dev.device.features()).ok_or_else(|| {
            GpuError::device(
                "create image",
                DeviceStatus::ImageFormatNotSupported,
                format!("{format:?} does not support {access:?} access"),
            )
        })?;
        let texture = scoped(&dev.device, || {
            dev.device.create_texture(&wgpu::TextureDescriptor {
                label: Some("image"),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format,
                usage,
                view_formats: &[],
            })
        })
        .map_err(|e| GpuError::from_wgpu("create image", &e))?;
        Ok(Image::new(texture, access, PRIMARY_DEVICE))
    }

    /// A read-only input image holding a copy of `host`.
    ///
    /// Returns `Ok(None)` when the host pixel format has no entry in the
    /// pixel format table. Strided host images are rejected.
    pub fn create_image_from_host<T: Pixel>(&self, host: &HostImage<T>) -> Result<Option<Image>> {
        let dev = self.device(PRIMARY_DEVICE)?;
        let Some(format) = self.formats.lookup(T::FORMAT) else {
            warn!(pixel_format = %T::FORMAT, "unsupported pixel format");
            return Ok(None);
        };
        if !host.is_contiguous() {
            return Err(GpuError::NonContiguousImage {
                width: host.width(),
                stride: host.stride(),
            });
        }
        let bytes_per_pixel = T::FORMAT.bytes_per_pixel() as u32;
        if format.block_copy_size(None) != Some(bytes_per_pixel) {
            return Err(GpuError::device(
                "create image",
                DeviceStatus::ImageFormatMismatch,
                format!("{} pixels cannot be copied into {format:?}", T::FORMAT),
            ));
        }

        let (width, height) = extent(host.width(), host.height())?;
        let image = self.create_image(format, MemAccess::ReadOnly, width, height)?;
        scoped(&dev.device, || {
            dev.queue.write_texture(
                wgpu::ImageCopyTexture {
                    texture: image.texture(),
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                host.as_bytes(),
                wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(width * bytes_per_pixel),
                    rows_per_image: Some(height),
                },
                wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
            )
        })
        .map_err(|e| GpuError::from_wgpu("upload image", &e))?;
        Ok(Some(image))
    }

    /// A zero-initialized buffer of `len` elements.
    pub fn create_buffer<T: Pod>(&self, access: MemAccess, len: usize) -> Result<Buffer<T>> {
        let dev = self.device(PRIMARY_DEVICE)?;
        let raw = scoped(&dev.device, || {
            dev.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(std::any::type_name::<T>()),
                size: padded_size::<T>(len),
                usage: access.buffer_usages(),
                mapped_at_creation: false,
            })
        })
        .map_err(|e| GpuError::from_wgpu("create buffer", &e))?;
        Ok(Buffer::new(raw, len, access, PRIMARY_DEVICE))
    }

    /// A buffer holding a copy of `data`.
    pub fn create_buffer_init<T: Pod>(&self, access: MemAccess, data: &[T]) -> Result<Buffer<T>> {
        let buffer = self.create_buffer::<T>(access, data.len())?;
        if !data.is_empty() {
            let dev = self.device(PRIMARY_DEVICE)?;
            let mut bytes = bytemuck::cast_slice::<T, u8>(data).to_vec();
            bytes.resize(align_to(bytes.len() as u64, wgpu::COPY_BUFFER_ALIGNMENT) as usize, 0);
            dev.queue.write_buffer(buffer.raw(), 0, &bytes);
        }
        Ok(buffer)
    }

    /// Query and log the capabilities of `device_index`. Failures are
    /// logged and yield `None`; this never fails the caller.
    pub fn report_device_capabilities(&self, device_index: usize) -> Option<DeviceCapabilities> {
        let dev = match self.device(device_index) {
            Ok(dev) => dev,
            Err(err) => {
                warn!(device = device_index, error = %err, "device query failed");
                return None;
            }
        };
        let limits = dev.adapter.limits();
        let caps = DeviceCapabilities {
            index: device_index,
            name: dev.info.name.clone(),
            backend: dev.info.backend,
            device_type: dev.info.device_type,
            driver: format!("{} {}", dev.info.driver, dev.info.driver_info).trim().to_string(),
            global_memory_bytes: None,
            max_allocation_bytes: limits.max_buffer_size,
            max_image_2d: (limits.max_texture_dimension_2d, limits.max_texture_dimension_2d),
            extensions: extension_string(dev.adapter.features()),
        };
        info!("{caps}");
        Some(caps)
    }

    fn context(&self) -> Result<&Context> {
        self.context.as_ref().ok_or_else(|| {
            GpuError::PlatformUnavailable(
                self.init_error
                    .clone()
                    .unwrap_or_else(|| "resource manager is not initialized".to_string()),
            )
        })
    }

    fn device(&self, index: usize) -> Result<&ComputeDevice> {
        let ctx = self.context()?;
        ctx.devices.get(index).ok_or(GpuError::DeviceIndex {
            index,
            count: ctx.devices.len(),
        })
    }
}

impl fmt::Debug for ResourceManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self
            .context
            .iter()
            .flat_map(|ctx| ctx.devices.iter().map(|d| d.info.name.as_str()))
            .collect();
        f.debug_struct("ResourceManager")
            .field("backend", &self.backend())
            .field("devices", &names)
            .finish()
    }
}

fn extent(width: usize, height: usize) -> Result<(u32, u32)> {
    match (u32::try_from(width), u32::try_from(height)) {
        (Ok(w), Ok(h)) => Ok((w, h)),
        _ => Err(GpuError::device(
            "create image",
            DeviceStatus::InvalidImageSize,
            format!("{width}x{height} exceeds the addressable range"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unavailable() -> ResourceManager {
        ResourceManager::new(&ManagerConfig {
            backends: wgpu::Backends::empty(),
            ..ManagerConfig::default()
        })
    }

    fn caps(extensions: &str) -> DeviceCapabilities {
        DeviceCapabilities {
            index: 0,
            name: "test".into(),
            backend: wgpu::Backend::Vulkan,
            device_type: wgpu::DeviceType::DiscreteGpu,
            driver: String::new(),
            global_memory_bytes: None,
            max_allocation_bytes: 256 << 20,
            max_image_2d: (8192, 8192),
            extensions: extensions.into(),
        }
    }

    #[test]
    fn extension_match_is_exact_and_case_sensitive() {
        assert!(caps("TIMESTAMP_QUERY SHADER_F64 SHADER_I16").has_double_precision());
        assert!(!caps("shader_f64").has_double_precision());
        assert!(!caps("SHADER_F64_EXT").has_double_precision());
        assert!(!caps("").has_double_precision());
    }

    #[test]
    fn extension_string_lists_feature_names() {
        let ext = extension_string(wgpu::Features::SHADER_F64 | wgpu::Features::TIMESTAMP_QUERY);
        assert!(caps(&ext).has_extension("SHADER_F64"));
        assert!(caps(&ext).has_extension("TIMESTAMP_QUERY"));
        assert_eq!(extension_string(wgpu::Features::empty()), "");
    }

    #[test]
    fn report_names_the_numbers() {
        let text = caps("SHADER_F64").to_string();
        assert!(text.contains("max allocation:       256 MB"), "{text}");
        assert!(text.contains("8192 x 8192"));
        assert!(text.contains("double precision:     yes"));
    }

    #[test]
    fn unavailable_manager_fails_every_operation() {
        let manager = unavailable();
        assert!(!manager.is_available());
        assert_eq!(manager.device_count(), 0);
        assert!(matches!(manager.create_queue(0), Err(GpuError::PlatformUnavailable(_))));
        assert!(matches!(
            manager.create_buffer::<f32>(MemAccess::ReadWrite, 16),
            Err(GpuError::PlatformUnavailable(_))
        ));
        assert!(matches!(
            manager.create_image(wgpu::TextureFormat::R32Float, MemAccess::ReadWrite, 8, 8),
            Err(GpuError::PlatformUnavailable(_))
        ));
        assert!(matches!(
            manager.build_program("p", "@compute @workgroup_size(1) fn main() {}", 0),
            Err(GpuError::PlatformUnavailable(_))
        ));
        let host = HostImage::<f32>::new(4, 4);
        assert!(matches!(manager.create_image_from_host(&host), Err(GpuError::PlatformUnavailable(_))));
    }

    #[test]
    fn capability_query_on_unavailable_manager_is_not_fatal() {
        assert!(unavailable().report_device_capabilities(0).is_none());
    }

    #[test]
    fn try_new_reports_the_reason() {
        let err = ResourceManager::try_new(&ManagerConfig {
            backends: wgpu::Backends::empty(),
            ..ManagerConfig::default()
        })
        .unwrap_err();
        assert!(matches!(err, GpuError::PlatformUnavailable(_)));
        assert_eq!(err.status(), Some(DeviceStatus::DeviceNotFound));
    }
}
