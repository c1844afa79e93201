// image.rs — Host-side image container used to stage pixels for the GPU.
//
// An `Image<T>` is one plane of pixels, row-major, with a row stride in
// elements (stride >= width; the tail of each row is padding). The pixel
// type carries a `PixelFormat` tag, which the GPU layer looks up in its
// `PixelFormatTable` to pick the texture format to upload into.
//
// Only contiguous images (stride == width) can be uploaded. The upload path
// rejects strided images instead of repacking them.

use std::fmt;

// ---------------------------------------------------------------------------
// Pixel format tags
// ---------------------------------------------------------------------------

/// Host pixel format of a single-channel image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Byte,
    UInt16,
    Int32,
    Float,
    Double,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Byte => 1,
            PixelFormat::UInt16 => 2,
            PixelFormat::Int32 | PixelFormat::Float => 4,
            PixelFormat::Double => 8,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PixelFormat::Byte => "byte",
            PixelFormat::UInt16 => "uint16",
            PixelFormat::Int32 => "int32",
            PixelFormat::Float => "float",
            PixelFormat::Double => "double",
        })
    }
}

/// A pixel value type.
///
/// `bytemuck::Pod` lets the upload path hand the pixel slice to the GPU as
/// bytes without copying.
pub trait Pixel: Copy + Default + Send + Sync + PartialOrd + bytemuck::Pod + 'static {
    const FORMAT: PixelFormat;

    /// Raw value as f32 (not normalized).
    fn to_f32(self) -> f32;

    /// Nearest representable pixel, saturating at the type's range.
    fn from_f32(v: f32) -> Self;
}

macro_rules! integer_pixel {
    ($ty:ty, $format:ident) => {
        impl Pixel for $ty {
            const FORMAT: PixelFormat = PixelFormat::$format;

            #[inline]
            fn to_f32(self) -> f32 {
                self as f32
            }

            #[inline]
            fn from_f32(v: f32) -> Self {
                // Float-to-int `as` saturates.
                v.round() as $ty
            }
        }
    };
}

integer_pixel!(u8, Byte);
integer_pixel!(u16, UInt16);
integer_pixel!(i32, Int32);

impl Pixel for f32 {
    const FORMAT: PixelFormat = PixelFormat::Float;

    #[inline]
    fn to_f32(self) -> f32 {
        self
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        v
    }
}

impl Pixel for f64 {
    const FORMAT: PixelFormat = PixelFormat::Double;

    #[inline]
    fn to_f32(self) -> f32 {
        self as f32
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        f64::from(v)
    }
}

// ---------------------------------------------------------------------------
// Image<T>
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct Image<T: Pixel> {
    data: Vec<T>,
    width: usize,
    height: usize,
    stride: usize,
}

impl<T: Pixel> Image<T> {
    /// Zero-filled contiguous image.
    pub fn new(width: usize, height: usize) -> Self {
        Self::new_with_stride(width, height, width)
    }

    /// Zero-filled image with `stride` elements per row.
    ///
    /// # Panics
    /// Panics if `stride < width`.
    pub fn new_with_stride(width: usize, height: usize, stride: usize) -> Self {
        Self::from_vec_with_stride(width, height, stride, vec![T::default(); height * stride])
    }

    /// Contiguous image over `data`.
    ///
    /// # Panics
    /// Panics if `data.len() != width * height`.
    pub fn from_vec(width: usize, height: usize, data: Vec<T>) -> Self {
        Self::from_vec_with_stride(width, height, width, data)
    }

    /// Image over `data` laid out with `stride` elements per row.
    ///
    /// # Panics
    /// Panics if `stride < width` or `data.len() != height * stride`.
    pub fn from_vec_with_stride(width: usize, height: usize, stride: usize, data: Vec<T>) -> Self {
        assert!(stride >= width, "stride ({stride}) must be >= width ({width})");
        assert!(
            data.len() == height * stride,
            "data length {} does not match {height} rows of stride {stride}",
            data.len()
        );
        Image {
            data,
            width,
            height,
            stride,
        }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Row stride in elements.
    #[inline]
    pub fn stride(&self) -> usize {
        self.stride
    }

    #[inline]
    pub fn pixel_format(&self) -> PixelFormat {
        T::FORMAT
    }

    /// True when rows are packed back to back.
    #[inline]
    pub fn is_contiguous(&self) -> bool {
        self.stride == self.width
    }

    /// Pixel at column `x`, row `y`.
    ///
    /// # Panics
    /// Panics if (x, y) is out of bounds.
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> T {
        self.data[self.index(x, y)]
    }

    /// Pixel at (x, y) with both coordinates clamped into the image.
    #[inline]
    pub fn get_clamped(&self, x: isize, y: isize) -> T {
        let x = x.clamp(0, self.width as isize - 1) as usize;
        let y = y.clamp(0, self.height as isize - 1) as usize;
        self.data[y * self.stride + x]
    }

    #[inline]
    pub fn get_mut(&mut self, x: usize, y: usize) -> &mut T {
        let i = self.index(x, y);
        &mut self.data[i]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: T) {
        *self.get_mut(x, y) = value;
    }

    /// Row `y` without its padding.
    pub fn row(&self, y: usize) -> &[T] {
        assert!(y < self.height, "row {y} out of bounds (height {})", self.height);
        &self.data[y * self.stride..][..self.width]
    }

    /// `(x, y, value)` for every pixel, row-major, padding skipped.
    pub fn pixels(&self) -> impl Iterator<Item = (usize, usize, T)> + '_ {
        (0..self.height).flat_map(move |y| self.row(y).iter().enumerate().map(move |(x, &v)| (x, y, v)))
    }

    /// Backing storage, padding included.
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Backing storage as bytes, padding included.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.data)
    }

    #[inline]
    fn index(&self, x: usize, y: usize) -> usize {
        assert!(
            x < self.width && y < self.height,
            "pixel ({x}, {y}) out of bounds for {}x{} image",
            self.width,
            self.height
        );
        y * self.stride + x
    }
}

impl<T: Pixel> fmt::Debug for Image<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("format", &T::FORMAT)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("stride", &self.stride)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_format_tags() {
        assert_eq!(Image::<u8>::new(2, 2).pixel_format(), PixelFormat::Byte);
        assert_eq!(Image::<f32>::new(2, 2).pixel_format(), PixelFormat::Float);
        assert_eq!(Image::<f64>::new(2, 2).pixel_format(), PixelFormat::Double);
        assert_eq!(PixelFormat::Float.bytes_per_pixel(), 4);
        assert_eq!(PixelFormat::Double.to_string(), "double");
    }

    #[test]
    fn integer_pixels_saturate() {
        assert_eq!(u8::from_f32(255.6), 255);
        assert_eq!(u8::from_f32(-1.0), 0);
        assert_eq!(u16::from_f32(1e9), u16::MAX);
        assert_eq!(i32::from_f32(-2.5), -3);
    }

    #[test]
    fn contiguity_follows_stride() {
        assert!(Image::<f32>::new(5, 3).is_contiguous());
        assert!(!Image::<f32>::new_with_stride(5, 3, 8).is_contiguous());
    }

    #[test]
    fn clamped_access_replicates_border() {
        let img = Image::from_vec(3, 2, vec![1u8, 2, 3, 4, 5, 6]);
        assert_eq!(img.get_clamped(-4, 0), 1);
        assert_eq!(img.get_clamped(7, 1), 6);
        assert_eq!(img.get_clamped(1, -1), 2);
        assert_eq!(img.get_clamped(1, 9), 5);
    }

    #[test]
    fn bytes_cover_whole_buffer() {
        let img = Image::<f32>::new_with_stride(3, 2, 4);
        assert_eq!(img.as_bytes().len(), 2 * 4 * 4);
    }

    #[test]
    #[should_panic(expected = "does not match")]
    fn wrong_data_length_panics() {
        Image::from_vec(3, 3, vec![0u8; 8]);
    }
}
