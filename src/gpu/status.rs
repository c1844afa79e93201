// gpu/status.rs — Device status codes and their descriptions.
//
// Device-level failures are reported as a closed `DeviceStatus` enum. The
// numeric codes follow the OpenCL status numbering so logs stay comparable
// with other compute stacks; `from_code` is a table lookup, and the human
// readable text lives in a separate table (`description`).
//
// wgpu reports errors as typed values rather than integers, so `classify`
// maps them onto the closest status.

use std::fmt;

/// Closed set of device status kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceStatus {
    Success,
    DeviceNotFound,
    DeviceNotAvailable,
    CompilerNotAvailable,
    MemObjectAllocationFailure,
    OutOfResources,
    OutOfHostMemory,
    ProfilingInfoNotAvailable,
    MemCopyOverlap,
    ImageFormatMismatch,
    ImageFormatNotSupported,
    BuildProgramFailure,
    MapFailure,
    InvalidValue,
    InvalidDeviceType,
    InvalidPlatform,
    InvalidDevice,
    InvalidContext,
    InvalidQueueProperties,
    InvalidCommandQueue,
    InvalidHostPtr,
    InvalidMemObject,
    InvalidImageFormatDescriptor,
    InvalidImageSize,
    InvalidSampler,
    InvalidBinary,
    InvalidBuildOptions,
    InvalidProgram,
    InvalidProgramExecutable,
    InvalidKernelName,
    InvalidKernelDefinition,
    InvalidKernel,
    InvalidArgIndex,
    InvalidArgValue,
    InvalidArgSize,
    InvalidKernelArgs,
    InvalidWorkDimension,
    InvalidWorkGroupSize,
    InvalidWorkItemSize,
    InvalidGlobalOffset,
    InvalidEventWaitList,
    InvalidEvent,
    InvalidOperation,
    InvalidGlObject,
    InvalidBufferSize,
    InvalidMipLevel,
    InvalidGlobalWorkSize,
    /// A code outside the table.
    Unknown,
}

/// Numeric code table.
const STATUS_CODES: &[(i32, DeviceStatus)] = &[
    (0, DeviceStatus::Success),
    (-1, DeviceStatus::DeviceNotFound),
    (-2, DeviceStatus::DeviceNotAvailable),
    (-3, DeviceStatus::CompilerNotAvailable),
    (-4, DeviceStatus::MemObjectAllocationFailure),
    (-5, DeviceStatus::OutOfResources),
    (-6, DeviceStatus::OutOfHostMemory),
    (-7, DeviceStatus::ProfilingInfoNotAvailable),
    (-8, DeviceStatus::MemCopyOverlap),
    (-9, DeviceStatus::ImageFormatMismatch),
    (-10, DeviceStatus::ImageFormatNotSupported),
    (-11, DeviceStatus::BuildProgramFailure),
    (-12, DeviceStatus::MapFailure),
    (-30, DeviceStatus::InvalidValue),
    (-31, DeviceStatus::InvalidDeviceType),
    (-32, DeviceStatus::InvalidPlatform),
    (-33, DeviceStatus::InvalidDevice),
    (-34, DeviceStatus::InvalidContext),
    (-35, DeviceStatus::InvalidQueueProperties),
    (-36, DeviceStatus::InvalidCommandQueue),
    (-37, DeviceStatus::InvalidHostPtr),
    (-38, DeviceStatus::InvalidMemObject),
    (-39, DeviceStatus::InvalidImageFormatDescriptor),
    (-40, DeviceStatus::InvalidImageSize),
    (-41, DeviceStatus::InvalidSampler),
    (-42, DeviceStatus::InvalidBinary),
    (-43, DeviceStatus::InvalidBuildOptions),
    (-44, DeviceStatus::InvalidProgram),
    (-45, DeviceStatus::InvalidProgramExecutable),
    (-46, DeviceStatus::InvalidKernelName),
    (-47, DeviceStatus::InvalidKernelDefinition),
    (-48, DeviceStatus::InvalidKernel),
    (-49, DeviceStatus::InvalidArgIndex),
    (-50, DeviceStatus::InvalidArgValue),
    (-51, DeviceStatus::InvalidArgSize),
    (-52, DeviceStatus::InvalidKernelArgs),
    (-53, DeviceStatus::InvalidWorkDimension),
    (-54, DeviceStatus::InvalidWorkGroupSize),
    (-55, DeviceStatus::InvalidWorkItemSize),
    (-56, DeviceStatus::InvalidGlobalOffset),
    (-57, DeviceStatus::InvalidEventWaitList),
    (-58, DeviceStatus::InvalidEvent),
    (-59, DeviceStatus::InvalidOperation),
    (-60, DeviceStatus::InvalidGlObject),
    (-61, DeviceStatus::InvalidBufferSize),
    (-62, DeviceStatus::InvalidMipLevel),
    (-63, DeviceStatus::InvalidGlobalWorkSize),
];

/// Code reported for `DeviceStatus::Unknown`.
pub const UNKNOWN_CODE: i32 = i32::MIN;

impl DeviceStatus {
    /// Look up a device-reported numeric code.
    pub fn from_code(code: i32) -> DeviceStatus {
        STATUS_CODES
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, status)| *status)
            .unwrap_or(DeviceStatus::Unknown)
    }

    /// Numeric code of this status.
    pub fn code(self) -> i32 {
        STATUS_CODES
            .iter()
            .find(|(_, s)| *s == self)
            .map(|(c, _)| *c)
            .unwrap_or(UNKNOWN_CODE)
    }

    pub fn is_success(self) -> bool {
        self == DeviceStatus::Success
    }

    /// Every status with a numeric code, in table order.
    pub fn all() -> impl Iterator<Item = DeviceStatus> {
        STATUS_CODES.iter().map(|(_, s)| *s)
    }

    /// Human readable description.
    pub fn description(self) -> &'static str {
        use DeviceStatus::*;
        match self {
            Success => "success",
            DeviceNotFound => "device not found",
            DeviceNotAvailable => "device not available",
            CompilerNotAvailable => "device compiler not available",
            MemObjectAllocationFailure => "memory object allocation failure",
            OutOfResources => "out of device resources",
            OutOfHostMemory => "out of host memory",
            ProfilingInfoNotAvailable => "profiling information not available",
            MemCopyOverlap => "memory copy overlap",
            ImageFormatMismatch => "image format mismatch",
            ImageFormatNotSupported => "image format not supported",
            BuildProgramFailure => "program build failure",
            MapFailure => "map failure",
            InvalidValue => "invalid value",
            InvalidDeviceType => "invalid device type",
            InvalidPlatform => "invalid platform",
            InvalidDevice => "invalid device",
            InvalidContext => "invalid context",
            InvalidQueueProperties => "invalid queue properties",
            InvalidCommandQueue => "invalid command queue",
            InvalidHostPtr => "invalid host pointer",
            InvalidMemObject => "invalid memory object",
            InvalidImageFormatDescriptor => "invalid image format descriptor",
            InvalidImageSize => "invalid image size",
            InvalidSampler => "invalid sampler",
            InvalidBinary => "invalid binary",
            InvalidBuildOptions => "invalid build options",
            InvalidProgram => "invalid program",
            InvalidProgramExecutable => "invalid program executable",
            InvalidKernelName => "invalid kernel name",
            InvalidKernelDefinition => "invalid kernel definition",
            InvalidKernel => "invalid kernel",
            InvalidArgIndex => "invalid argument index",
            InvalidArgValue => "invalid argument value",
            InvalidArgSize => "invalid argument size",
            InvalidKernelArgs => "invalid kernel arguments",
            InvalidWorkDimension => "invalid work dimension",
            InvalidWorkGroupSize => "invalid work group size",
            InvalidWorkItemSize => "invalid work item size",
            InvalidGlobalOffset => "invalid global offset",
            InvalidEventWaitList => "invalid event wait list",
            InvalidEvent => "invalid event",
            InvalidOperation => "invalid operation",
            InvalidGlObject => "invalid OpenGL object",
            InvalidBufferSize => "invalid buffer size",
            InvalidMipLevel => "invalid mip-map level",
            InvalidGlobalWorkSize => "invalid global work size",
            Unknown => "unknown status",
        }
    }

    /// Map a captured wgpu error onto a status.
    pub fn classify(err: &wgpu::Error) -> DeviceStatus {
        match err {
            wgpu::Error::OutOfMemory { .. } => DeviceStatus::MemObjectAllocationFailure,
            wgpu::Error::Validation { .. } => DeviceStatus::InvalidOperation,
            #[allow(unreachable_patterns)]
            _ => DeviceStatus::OutOfResources,
        }
    }
}

impl From<&wgpu::BufferAsyncError> for DeviceStatus {
    fn from(_: &wgpu::BufferAsyncError) -> Self {
        DeviceStatus::MapFailure
    }
}

impl From<&wgpu::RequestDeviceError> for DeviceStatus {
    fn from(_: &wgpu::RequestDeviceError) -> Self {
        DeviceStatus::DeviceNotAvailable
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.description(), self.code())
    }
}
