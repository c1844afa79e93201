// gpu/format.rs — Host pixel format → texture format table.
//
// Single-channel formats only. A miss means "cannot upload this pixel type";
// callers get `None` and decide what to do.

use std::collections::HashMap;

use crate::image::PixelFormat;

#[derive(Debug, Clone)]
pub struct PixelFormatTable {
    map: HashMap<PixelFormat, wgpu::TextureFormat>,
}

impl Default for PixelFormatTable {
    /// Float → R32Float, Byte → R8Unorm (sampled as 0..1 in shaders).
    fn default() -> Self {
        let map = HashMap::from([
            (PixelFormat::Float, wgpu::TextureFormat::R32Float),
            (PixelFormat::Byte, wgpu::TextureFormat::R8Unorm),
        ]);
        PixelFormatTable { map }
    }
}

impl PixelFormatTable {
    /// A table without any entries.
    pub fn empty() -> Self {
        PixelFormatTable { map: HashMap::new() }
    }

    pub fn lookup(&self, format: PixelFormat) -> Option<wgpu::TextureFormat> {
        self.map.get(&format).copied()
    }

    /// Add or replace an entry, returning the previous texture format.
    pub fn register(&mut self, format: PixelFormat, texture: wgpu::TextureFormat) -> Option<wgpu::TextureFormat> {
        self.map.insert(format, texture)
    }

    pub fn contains(&self, format: PixelFormat) -> bool {
        self.map.contains_key(&format)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_entries() {
        let table = PixelFormatTable::default();
        assert_eq!(table.lookup(PixelFormat::Float), Some(wgpu::TextureFormat::R32Float));
        assert_eq!(table.lookup(PixelFormat::Byte), Some(wgpu::TextureFormat::R8Unorm));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn miss_is_none() {
        let table = PixelFormatTable::default();
        assert_eq!(table.lookup(PixelFormat::Double), None);
        assert_eq!(table.lookup(PixelFormat::UInt16), None);
        assert!(PixelFormatTable::empty().lookup(PixelFormat::Float).is_none());
    }

    #[test]
    fn register_extends_and_replaces() {
        let mut table = PixelFormatTable::default();
        assert_eq!(table.register(PixelFormat::Int32, wgpu::TextureFormat::R32Sint), None);
        assert!(table.contains(PixelFormat::Int32));
        assert_eq!(
            table.register(PixelFormat::Float, wgpu::TextureFormat::R16Float),
            Some(wgpu::TextureFormat::R32Float)
        );
        assert_eq!(table.lookup(PixelFormat::Float), Some(wgpu::TextureFormat::R16Float));
    }
}
