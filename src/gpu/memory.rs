// gpu/memory.rs — Device memory handles: typed buffers and 2D images.
//
// Both handles are reference counted. Cloning a handle shares the
// allocation; the allocation is released when the last handle goes away.
// Kernels keep a clone of every bound resource, and wgpu keeps submitted
// resources alive until the GPU is done with them, so replacing a handle
// never frees memory a pending launch still reads.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use bytemuck::Pod;

/// How kernels may access a memory object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemAccess {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl MemAccess {
    pub fn kernel_reads(self) -> bool {
        self != MemAccess::WriteOnly
    }

    pub fn kernel_writes(self) -> bool {
        self != MemAccess::ReadOnly
    }

    /// Buffer usages. The host may always upload to and read back from a
    /// buffer; the access mode is enforced when binding kernel arguments.
    pub fn buffer_usages(self) -> wgpu::BufferUsages {
        wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST
    }

    /// Texture usages for an image of `format`, or `None` when the format
    /// cannot be written by kernels on a device with `features`.
    pub fn texture_usages(self, format: wgpu::TextureFormat, features: wgpu::Features) -> Option<wgpu::TextureUsages> {
        let allowed = format.guaranteed_format_features(features).allowed_usages;
        let mut usage = wgpu::TextureUsages::COPY_SRC | wgpu::TextureUsages::COPY_DST;
        if self.kernel_reads() {
            usage |= wgpu::TextureUsages::TEXTURE_BINDING;
        }
        if self.kernel_writes() {
            if !allowed.contains(wgpu::TextureUsages::STORAGE_BINDING) {
                return None;
            }
            usage |= wgpu::TextureUsages::STORAGE_BINDING;
        }
        allowed.contains(usage).then_some(usage)
    }
}

// ---------------------------------------------------------------------------
// Buffer<T>
// ---------------------------------------------------------------------------

/// A linear device allocation of `len` elements of `T`.
///
/// The element count is recorded next to the allocation because the device
/// only knows byte sizes, and the allocation is padded to the copy
/// alignment.
#[derive(Clone)]
pub struct Buffer<T: Pod> {
    raw: Arc<wgpu::Buffer>,
    len: usize,
    access: MemAccess,
    device: usize,
    _marker: PhantomData<T>,
}

impl<T: Pod> Buffer<T> {
    pub(crate) fn new(raw: wgpu::Buffer, len: usize, access: MemAccess, device: usize) -> Self {
        Buffer {
            raw: Arc::new(raw),
            len,
            access,
            device,
            _marker: PhantomData,
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Size of the valid elements in bytes.
    pub fn byte_size(&self) -> u64 {
        (self.len * std::mem::size_of::<T>()) as u64
    }

    /// Size of the underlying allocation in bytes.
    pub fn allocation_size(&self) -> u64 {
        self.raw.size()
    }

    pub fn access(&self) -> MemAccess {
        self.access
    }

    pub fn device_index(&self) -> usize {
        self.device
    }

    /// A handle to the first `len` elements, sharing this allocation.
    ///
    /// # Panics
    /// Panics if `len > self.len()`.
    pub fn prefix(&self, len: usize) -> Buffer<T> {
        assert!(len <= self.len, "prefix of {len} elements exceeds buffer length {}", self.len);
        Buffer {
            raw: Arc::clone(&self.raw),
            len,
            access: self.access,
            device: self.device,
            _marker: PhantomData,
        }
    }

    /// True when both handles share one allocation.
    pub fn same_allocation(&self, other: &Buffer<T>) -> bool {
        Arc::ptr_eq(&self.raw, &other.raw)
    }

    pub(crate) fn raw(&self) -> &Arc<wgpu::Buffer> {
        &self.raw
    }
}

impl<T: Pod> fmt::Debug for Buffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("element", &std::any::type_name::<T>())
            .field("len", &self.len)
            .field("access", &self.access)
            .field("device", &self.device)
            .finish()
    }
}

/// Round `size` up to a multiple of `alignment`.
pub(crate) fn align_to(size: u64, alignment: u64) -> u64 {
    size.div_ceil(alignment) * alignment
}

/// Allocation size for `len` elements of `T`: padded to the copy alignment,
/// and never zero so an empty buffer is still a valid binding.
pub(crate) fn padded_size<T>(len: usize) -> u64 {
    let bytes = (len * std::mem::size_of::<T>()) as u64;
    align_to(bytes.max(1), wgpu::COPY_BUFFER_ALIGNMENT)
}

// ---------------------------------------------------------------------------
// Image
// ---------------------------------------------------------------------------

/// A single-plane 2D device image.
#[derive(Clone)]
pub struct Image {
    inner: Arc<ImageInner>,
}

struct ImageInner {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    access: MemAccess,
    device: usize,
}

impl Image {
    pub(crate) fn new(texture: wgpu::Texture, access: MemAccess, device: usize) -> Self {
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Image {
            inner: Arc::new(ImageInner {
                texture,
                view,
                access,
                device,
            }),
        }
    }

    pub fn width(&self) -> u32 {
        self.inner.texture.width()
    }

    pub fn height(&self) -> u32 {
        self.inner.texture.height()
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.inner.texture.format()
    }

    pub fn usage(&self) -> wgpu::TextureUsages {
        self.inner.texture.usage()
    }

    pub fn access(&self) -> MemAccess {
        self.inner.access
    }

    pub fn device_index(&self) -> usize {
        self.inner.device
    }

    pub fn same_allocation(&self, other: &Image) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn texture(&self) -> &wgpu::Texture {
        &self.inner.texture
    }

    pub(crate) fn view(&self) -> &wgpu::TextureView {
        &self.inner.view
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("format", &self.format())
            .field("access", &self.access())
            .field("device", &self.device_index())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_modes() {
        assert!(MemAccess::ReadOnly.kernel_reads());
        assert!(!MemAccess::ReadOnly.kernel_writes());
        assert!(!MemAccess::WriteOnly.kernel_reads());
        assert!(MemAccess::ReadWrite.kernel_reads() && MemAccess::ReadWrite.kernel_writes());
    }

    #[test]
    fn storage_images_need_a_storage_format() {
        let features = wgpu::Features::empty();
        let rw = MemAccess::ReadWrite.texture_usages(wgpu::TextureFormat::R32Float, features);
        let usage = rw.unwrap();
        assert!(usage.contains(wgpu::TextureUsages::STORAGE_BINDING));
        assert!(usage.contains(wgpu::TextureUsages::TEXTURE_BINDING));

        // R8Unorm is sampleable but not a core storage format.
        assert!(MemAccess::ReadWrite.texture_usages(wgpu::TextureFormat::R8Unorm, features).is_none());
        let ro = MemAccess::ReadOnly.texture_usages(wgpu::TextureFormat::R8Unorm, features).unwrap();
        assert!(!ro.contains(wgpu::TextureUsages::STORAGE_BINDING));
    }

    #[test]
    fn padded_sizes() {
        assert_eq!(align_to(0, 4), 0);
        assert_eq!(align_to(5, 4), 8);
        assert_eq!(padded_size::<u8>(3), 4);
        assert_eq!(padded_size::<[f32; 2]>(10), 80);
        assert_eq!(padded_size::<f32>(0), 4);
    }
}
