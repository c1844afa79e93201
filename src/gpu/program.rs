// gpu/program.rs — Programs (compiled WGSL modules) and kernels.
//
// PROGRAM:
// A program is one WGSL source string. It is parsed and validated once with
// naga (device independent; a failure here is reported with naga's
// annotated diagnostic as the build log), then turned into a shader module
// on every device of the manager. Device-side failures are captured with an
// error scope, so each device has its own build log.
//
// KERNEL:
// A kernel is one `@compute` entry point of a program, compiled into a
// pipeline for one device. Its positional arguments are the `@group(0)`
// bindings the entry point actually uses, sorted by binding number. For
// the shader
//
//   @group(0) @binding(3) var response_in: texture_2d<f32>;
//   @group(0) @binding(7) var<storage, read_write> scores: array<f32>;
//   @group(0) @binding(10) var<uniform> threshold: f32;
//
// an entry point touching all three takes (image, buffer, f32) as
// arguments 0, 1 and 2. Scalar arguments are `var<uniform>` scalars; the
// kernel owns the small uniform buffer that carries each one.
//
// The bind group layout is built from the reflected types rather than from
// wgpu's automatic layout, so float textures are declared non-filterable
// and R32Float images can be bound without extra device features.

use std::fmt;
use std::sync::Arc;

use bytemuck::Pod;
use naga::valid::{Capabilities, ModuleInfo, ValidationFlags, Validator};
use tracing::{debug, error};
use wgpu::util::DeviceExt;

use super::error::{scoped, GpuError, Result};
use super::manager::ComputeDevice;
use super::memory::{Buffer, Image};

// ---------------------------------------------------------------------------
// Program
// ---------------------------------------------------------------------------

/// A compiled program: the validated module plus one shader module per
/// device, indexed by device index.
pub struct Program {
    name: String,
    module: naga::Module,
    info: ModuleInfo,
    devices: Vec<Arc<wgpu::Device>>,
    shaders: Vec<wgpu::ShaderModule>,
}

impl Program {
    /// Compile `source` for every device. On failure the build log of
    /// `log_device` is reported (or of the first failing device when
    /// `log_device` itself compiled).
    pub(crate) fn build(name: &str, source: &str, devices: &[ComputeDevice], log_device: usize) -> Result<Program> {
        let (module, info) = match parse_and_validate(source) {
            Ok(parsed) => parsed,
            Err(log) => return Err(build_failure(name, devices, log_device, log)),
        };

        let mut shaders = Vec::with_capacity(devices.len());
        let mut failures = Vec::new();
        for (index, dev) in devices.iter().enumerate() {
            let created = scoped(&dev.device, || {
                dev.device.create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(name),
                    source: wgpu::ShaderSource::Wgsl(source.into()),
                })
            });
            match created {
                Ok(shader) => shaders.push(shader),
                Err(err) => failures.push((index, err.to_string())),
            }
        }

        if !failures.is_empty() {
            let position = failures.iter().position(|(i, _)| *i == log_device).unwrap_or(0);
            let (index, log) = failures.swap_remove(position);
            return Err(build_failure(name, devices, index, log));
        }

        debug!(program = name, devices = devices.len(), "program built");
        Ok(Program {
            name: name.to_string(),
            module,
            info,
            devices: devices.iter().map(|d| Arc::clone(&d.device)).collect(),
            shaders,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device_count(&self) -> usize {
        self.shaders.len()
    }

    /// Names of the compute entry points.
    pub fn entry_points(&self) -> Vec<&str> {
        self.module
            .entry_points
            .iter()
            .filter(|ep| ep.stage == naga::ShaderStage::Compute)
            .map(|ep| ep.name.as_str())
            .collect()
    }

    /// Positional argument layout of `entry`.
    pub fn kernel_signature(&self, entry: &str) -> Result<KernelSignature> {
        KernelSignature::reflect(&self.name, &self.module, &self.info, entry)
    }

    fn shader(&self, device: usize) -> Option<(&Arc<wgpu::Device>, &wgpu::ShaderModule)> {
        Some((self.devices.get(device)?, self.shaders.get(device)?))
    }
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("name", &self.name)
            .field("entry_points", &self.entry_points())
            .field("devices", &self.shaders.len())
            .finish()
    }
}

/// Parse and validate WGSL. The error is naga's rendered diagnostic.
pub fn parse_and_validate(source: &str) -> std::result::Result<(naga::Module, ModuleInfo), String> {
    let module = naga::front::wgsl::parse_str(source).map_err(|e| e.emit_to_string(source))?;
    let info = Validator::new(ValidationFlags::all(), Capabilities::all())
        .validate(&module)
        .map_err(|e| e.emit_to_string(source))?;
    Ok((module, info))
}

fn build_failure(program: &str, devices: &[ComputeDevice], device: usize, log: String) -> GpuError {
    let device_name = devices
        .get(device)
        .map(|d| d.info.name.clone())
        .unwrap_or_else(|| "<no device>".to_string());
    error!(program, device, device_name = %device_name, "build log:\n{log}");
    GpuError::BuildFailure {
        program: program.to_string(),
        device,
        device_name,
        log,
    }
}

// ---------------------------------------------------------------------------
// Kernel signature (reflection)
// ---------------------------------------------------------------------------

/// Host types that can be passed as scalar kernel arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    F32,
    I32,
    U32,
}

impl ScalarType {
    pub fn size(self) -> usize {
        4
    }
}

/// Rust types accepted by `Kernel::set_scalar`.
pub trait ScalarArg: Pod {
    const TYPE: ScalarType;
}

impl ScalarArg for f32 {
    const TYPE: ScalarType = ScalarType::F32;
}

impl ScalarArg for i32 {
    const TYPE: ScalarType = ScalarType::I32;
}

impl ScalarArg for u32 {
    const TYPE: ScalarType = ScalarType::U32;
}

/// What a positional kernel argument expects.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ArgKind {
    /// `texture_2d<T>`, read with `textureLoad`.
    SampledImage { sample_type: wgpu::TextureSampleType },
    /// `texture_storage_2d<format, access>`.
    StorageImage {
        format: wgpu::TextureFormat,
        access: wgpu::StorageTextureAccess,
    },
    /// `var<storage>` buffer. `element_size` is the array stride (or the
    /// size of a single scalar/atomic) when the type has one.
    StorageBuffer { read_only: bool, element_size: Option<u32> },
    /// `var<uniform>` scalar.
    Scalar(ScalarType),
}

impl ArgKind {
    fn binding_type(&self) -> wgpu::BindingType {
        match *self {
            ArgKind::SampledImage { sample_type } => wgpu::BindingType::Texture {
                sample_type,
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            ArgKind::StorageImage { format, access } => wgpu::BindingType::StorageTexture {
                access,
                format,
                view_dimension: wgpu::TextureViewDimension::D2,
            },
            ArgKind::StorageBuffer { read_only, .. } => wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            ArgKind::Scalar(_) => wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
        }
    }
}

impl fmt::Display for ArgKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgKind::SampledImage { .. } => write!(f, "sampled image"),
            ArgKind::StorageImage { format, .. } => write!(f, "storage image ({format:?})"),
            ArgKind::StorageBuffer { read_only: true, .. } => write!(f, "read-only buffer"),
            ArgKind::StorageBuffer { read_only: false, .. } => write!(f, "read-write buffer"),
            ArgKind::Scalar(ty) => write!(f, "{ty:?} scalar"),
        }
    }
}

/// One positional argument.
#[derive(Debug, Clone, PartialEq)]
pub struct ArgSlot {
    pub binding: u32,
    pub name: String,
    pub kind: ArgKind,
}

/// Reflected interface of a compute entry point.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelSignature {
    pub entry: String,
    pub workgroup_size: [u32; 3],
    pub args: Vec<ArgSlot>,
}

impl KernelSignature {
    pub fn reflect(program: &str, module: &naga::Module, info: &ModuleInfo, entry: &str) -> Result<KernelSignature> {
        let (index, ep) = module
            .entry_points
            .iter()
            .enumerate()
            .find(|(_, ep)| ep.name == entry && ep.stage == naga::ShaderStage::Compute)
            .ok_or_else(|| GpuError::KernelNotFound {
                program: program.to_string(),
                entry: entry.to_string(),
            })?;
        let usage = info.get_entry_point(index);

        let mut args = Vec::new();
        for (handle, var) in module.global_variables.iter() {
            let Some(binding) = &var.binding else { continue };
            if usage[handle].is_empty() {
                continue;
            }
            let name = var.name.clone().unwrap_or_default();
            let unsupported = |reason: String| GpuError::KernelArgument {
                kernel: entry.to_string(),
                index: args.len(),
                reason,
            };
            if binding.group != 0 {
                return Err(unsupported(format!("`{name}` is in bind group {}; only group 0 is supported", binding.group)));
            }
            let kind = arg_kind(module, var).map_err(|reason| unsupported(format!("`{name}`: {reason}")))?;
            args.push(ArgSlot {
                binding: binding.binding,
                name,
                kind,
            });
        }
        args.sort_by_key(|a| a.binding);

        Ok(KernelSignature {
            entry: entry.to_string(),
            workgroup_size: ep.workgroup_size,
            args,
        })
    }
}

fn arg_kind(module: &naga::Module, var: &naga::GlobalVariable) -> std::result::Result<ArgKind, String> {
    use naga::{AddressSpace, ImageClass, ImageDimension, StorageAccess, TypeInner};

    let inner = &module.types[var.ty].inner;
    match var.space {
        AddressSpace::Uniform => match inner {
            TypeInner::Scalar(scalar) => scalar_type(scalar).map(ArgKind::Scalar),
            _ => Err("uniform arguments must be scalars".into()),
        },
        AddressSpace::Storage { access } => Ok(ArgKind::StorageBuffer {
            read_only: !access.contains(StorageAccess::STORE),
            element_size: element_size(module, inner),
        }),
        AddressSpace::Handle => match inner {
            TypeInner::Image {
                dim: ImageDimension::D2,
                arrayed: false,
                class,
            } => match *class {
                ImageClass::Sampled { kind, multi: false } => {
                    let sample_type = match kind {
                        naga::ScalarKind::Float => wgpu::TextureSampleType::Float { filterable: false },
                        naga::ScalarKind::Sint => wgpu::TextureSampleType::Sint,
                        naga::ScalarKind::Uint => wgpu::TextureSampleType::Uint,
                        other => return Err(format!("unsupported sample kind {other:?}")),
                    };
                    Ok(ArgKind::SampledImage { sample_type })
                }
                ImageClass::Storage { format, access } => {
                    let access = match (access.contains(StorageAccess::LOAD), access.contains(StorageAccess::STORE)) {
                        (true, true) => wgpu::StorageTextureAccess::ReadWrite,
                        (false, true) => wgpu::StorageTextureAccess::WriteOnly,
                        _ => wgpu::StorageTextureAccess::ReadOnly,
                    };
                    Ok(ArgKind::StorageImage {
                        format: storage_format(format)?,
                        access,
                    })
                }
                _ => Err("multisampled and depth images are not supported".into()),
            },
            _ => Err("only non-arrayed 2D images are supported".into()),
        },
        other => Err(format!("unsupported address space {other:?}")),
    }
}

fn scalar_type(scalar: &naga::Scalar) -> std::result::Result<ScalarType, String> {
    match (scalar.kind, scalar.width) {
        (naga::ScalarKind::Float, 4) => Ok(ScalarType::F32),
        (naga::ScalarKind::Sint, 4) => Ok(ScalarType::I32),
        (naga::ScalarKind::Uint, 4) => Ok(ScalarType::U32),
        (kind, width) => Err(format!("unsupported scalar {kind:?} of width {width}")),
    }
}

fn element_size(module: &naga::Module, inner: &naga::TypeInner) -> Option<u32> {
    use naga::TypeInner;
    match inner {
        TypeInner::Array { stride, .. } => Some(*stride),
        TypeInner::Scalar(scalar) | TypeInner::Atomic(scalar) => Some(scalar.width as u32),
        TypeInner::Vector { size, scalar } => Some(*size as u32 * scalar.width as u32),
        TypeInner::Struct { members, .. } if members.len() == 1 => {
            element_size(module, &module.types[members[0].ty].inner)
        }
        _ => None,
    }
}

fn storage_format(format: naga::StorageFormat) -> std::result::Result<wgpu::TextureFormat, String> {
    use naga::StorageFormat as S;
    use wgpu::TextureFormat as T;
    Ok(match format {
        S::R32Float => T::R32Float,
        S::R32Sint => T::R32Sint,
        S::R32Uint => T::R32Uint,
        S::Rg32Float => T::Rg32Float,
        S::Rgba8Unorm => T::Rgba8Unorm,
        S::Rgba32Float => T::Rgba32Float,
        other => return Err(format!("unsupported storage format {other:?}")),
    })
}

// ---------------------------------------------------------------------------
// Kernel
// ---------------------------------------------------------------------------

enum BoundArg {
    Image(Image),
    Buffer(Arc<wgpu::Buffer>),
    Scalar(wgpu::Buffer),
}

/// A compute entry point compiled for one device, with its argument state.
pub struct Kernel {
    program: String,
    device_index: usize,
    device: Arc<wgpu::Device>,
    signature: KernelSignature,
    layout: wgpu::BindGroupLayout,
    pipeline: wgpu::ComputePipeline,
    args: Vec<Option<BoundArg>>,
}

impl Kernel {
    /// Create the pipeline for `entry` on `device_index`.
    pub fn new(program: &Program, entry: &str, device_index: usize) -> Result<Kernel> {
        let signature = program.kernel_signature(entry)?;
        let (device, shader) = program.shader(device_index).ok_or(GpuError::DeviceIndex {
            index: device_index,
            count: program.device_count(),
        })?;

        let entries: Vec<wgpu::BindGroupLayoutEntry> = signature
            .args
            .iter()
            .map(|arg| wgpu::BindGroupLayoutEntry {
                binding: arg.binding,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: arg.kind.binding_type(),
                count: None,
            })
            .collect();

        let (layout, pipeline) = scoped(device, || {
            let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(entry),
                entries: &entries,
            });
            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(entry),
                bind_group_layouts: &[&layout],
                push_constant_ranges: &[],
            });
            let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(entry),
                layout: Some(&pipeline_layout),
                module: shader,
                entry_point: entry,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            });
            (layout, pipeline)
        })
        .map_err(|e| GpuError::from_wgpu("create kernel", &e))?;

        debug!(
            program = program.name(),
            kernel = entry,
            device = device_index,
            args = signature.args.len(),
            workgroup = ?signature.workgroup_size,
            "kernel created"
        );

        let args = signature.args.iter().map(|_| None).collect();
        Ok(Kernel {
            program: program.name().to_string(),
            device_index,
            device: Arc::clone(device),
            signature,
            layout,
            pipeline,
            args,
        })
    }

    pub fn name(&self) -> &str {
        &self.signature.entry
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn device_index(&self) -> usize {
        self.device_index
    }

    pub fn signature(&self) -> &KernelSignature {
        &self.signature
    }

    pub fn arg_count(&self) -> usize {
        self.signature.args.len()
    }

    pub fn workgroup_size(&self) -> [u32; 3] {
        self.signature.workgroup_size
    }

    /// Workgroup counts covering a `[width, height]` index range.
    pub fn dispatch_size(&self, range: [u32; 2]) -> [u32; 2] {
        let [wx, wy, _] = self.signature.workgroup_size;
        [range[0].div_ceil(wx.max(1)), range[1].div_ceil(wy.max(1))]
    }

    /// Bind an image to argument `index`.
    pub fn set_image(&mut self, index: usize, image: &Image) -> Result<()> {
        let kind = self.slot(index)?;
        self.check_device(index, image.device_index())?;
        match kind {
            ArgKind::SampledImage { sample_type } => {
                if !image.usage().contains(wgpu::TextureUsages::TEXTURE_BINDING) {
                    return Err(self.arg_error(index, "image is not readable by kernels"));
                }
                let actual = image.format().sample_type(None, Some(self.device.features()));
                if !actual.is_some_and(|actual| same_sample_kind(actual, sample_type)) {
                    return Err(self.arg_error(index, format!("{kind} cannot read {:?}", image.format())));
                }
            }
            ArgKind::StorageImage { format, .. } => {
                if !image.usage().contains(wgpu::TextureUsages::STORAGE_BINDING) {
                    return Err(self.arg_error(index, "image is not writable by kernels"));
                }
                if image.format() != format {
                    return Err(self.arg_error(index, format!("expects {format:?}, got {:?}", image.format())));
                }
            }
            other => return Err(self.arg_error(index, format!("expects a {other}, got an image"))),
        }
        self.args[index] = Some(BoundArg::Image(image.clone()));
        Ok(())
    }

    /// Bind a buffer to argument `index`.
    pub fn set_buffer<T: Pod>(&mut self, index: usize, buffer: &Buffer<T>) -> Result<()> {
        let kind = self.slot(index)?;
        self.check_device(index, buffer.device_index())?;
        let ArgKind::StorageBuffer { read_only, element_size } = kind else {
            return Err(self.arg_error(index, format!("expects a {kind}, got a buffer")));
        };
        if !read_only && !buffer.access().kernel_writes() {
            return Err(self.arg_error(index, "kernel writes a read-only buffer"));
        }
        if read_only && !buffer.access().kernel_reads() {
            return Err(self.arg_error(index, "kernel reads a write-only buffer"));
        }
        let size = std::mem::size_of::<T>() as u32;
        if element_size.is_some_and(|expected| expected != size) {
            return Err(self.arg_error(
                index,
                format!("element size {size} does not match {}", element_size.unwrap_or_default()),
            ));
        }
        self.args[index] = Some(BoundArg::Buffer(Arc::clone(buffer.raw())));
        Ok(())
    }

    /// Bind a scalar value to argument `index`.
    pub fn set_scalar<T: ScalarArg>(&mut self, index: usize, value: T) -> Result<()> {
        let kind = self.slot(index)?;
        match kind {
            ArgKind::Scalar(ty) if ty == T::TYPE => {}
            other => return Err(self.arg_error(index, format!("expects a {other}, got a {:?} scalar", T::TYPE))),
        }
        // Uniform bindings are padded to 16 bytes.
        let mut contents = [0u8; 16];
        let bytes = bytemuck::bytes_of(&value);
        contents[..bytes.len()].copy_from_slice(bytes);
        let uniform = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(self.signature.args[index].name.as_str()),
            contents: &contents,
            usage: wgpu::BufferUsages::UNIFORM,
        });
        self.args[index] = Some(BoundArg::Scalar(uniform));
        Ok(())
    }

    /// True when every argument has been bound.
    pub fn is_ready(&self) -> bool {
        self.args.iter().all(Option::is_some)
    }

    pub(crate) fn pipeline(&self) -> &wgpu::ComputePipeline {
        &self.pipeline
    }

    /// Snapshot of the current arguments.
    pub(crate) fn bind_group(&self) -> Result<wgpu::BindGroup> {
        let mut entries = Vec::with_capacity(self.args.len());
        for (index, (slot, arg)) in self.signature.args.iter().zip(&self.args).enumerate() {
            let arg = arg.as_ref().ok_or_else(|| self.arg_error(index, "argument is not bound"))?;
            let resource = match arg {
                BoundArg::Image(image) => wgpu::BindingResource::TextureView(image.view()),
                BoundArg::Buffer(buffer) => buffer.as_entire_binding(),
                BoundArg::Scalar(buffer) => buffer.as_entire_binding(),
            };
            entries.push(wgpu::BindGroupEntry {
                binding: slot.binding,
                resource,
            });
        }
        Ok(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(self.signature.entry.as_str()),
            layout: &self.layout,
            entries: &entries,
        }))
    }

    fn slot(&self, index: usize) -> Result<ArgKind> {
        self.signature
            .args
            .get(index)
            .map(|slot| slot.kind)
            .ok_or_else(|| self.arg_error(index, format!("kernel takes {} arguments", self.signature.args.len())))
    }

    fn check_device(&self, index: usize, device: usize) -> Result<()> {
        if device == self.device_index {
            Ok(())
        } else {
            Err(self.arg_error(index, format!("resource lives on device {device}, kernel on {}", self.device_index)))
        }
    }

    fn arg_error(&self, index: usize, reason: impl Into<String>) -> GpuError {
        GpuError::KernelArgument {
            kernel: self.signature.entry.clone(),
            index,
            reason: reason.into(),
        }
    }
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("program", &self.program)
            .field("entry", &self.signature.entry)
            .field("device", &self.device_index)
            .field("bound", &self.args.iter().filter(|a| a.is_some()).count())
            .field("args", &self.signature.args.len())
            .finish()
    }
}

fn same_sample_kind(a: wgpu::TextureSampleType, b: wgpu::TextureSampleType) -> bool {
    use wgpu::TextureSampleType as S;
    matches!(
        (a, b),
        (S::Float { .. }, S::Float { .. }) | (S::Sint, S::Sint) | (S::Uint, S::Uint) | (S::Depth, S::Depth)
    )
}
