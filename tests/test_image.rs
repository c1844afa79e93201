// tests/test_image.rs — Integration tests for the host Image<T> container.
//
// These only touch the public API, the surface the GPU upload path and
// callers see.

use hessian_gpu::convolution::gaussian_blur;
use hessian_gpu::image::{Image, Pixel, PixelFormat};

// ===== Construction & access =====

#[test]
fn image_new_zero_initialized() {
    let img: Image<u8> = Image::new(100, 50);
    assert_eq!(img.width(), 100);
    assert_eq!(img.height(), 50);
    assert_eq!(img.get(0, 0), 0);
    assert_eq!(img.get(99, 49), 0);
    assert!(img.is_contiguous());
}

#[test]
fn image_from_vec_layout() {
    // 3×2 image, row-major:
    //  [10, 20, 30]
    //  [40, 50, 60]
    let img = Image::from_vec(3, 2, vec![10u8, 20, 30, 40, 50, 60]);
    assert_eq!(img.get(0, 0), 10);
    assert_eq!(img.get(2, 0), 30);
    assert_eq!(img.get(0, 1), 40);
    assert_eq!(img.get(2, 1), 60);
    assert_eq!(img.row(1), &[40, 50, 60]);
}

#[test]
#[should_panic(expected = "out of bounds")]
fn image_get_out_of_bounds_panics() {
    let img: Image<f32> = Image::new(4, 4);
    img.get(4, 0);
}

// ===== Stride =====

#[test]
fn strided_image_is_not_contiguous() {
    let mut img: Image<u8> = Image::new_with_stride(3, 2, 8);
    img.set(2, 1, 7);
    assert!(!img.is_contiguous());
    assert_eq!(img.stride(), 8);
    assert_eq!(img.as_slice().len(), 16);
    assert_eq!(img.as_slice()[8 + 2], 7);
    assert_eq!(img.row(1), &[0, 0, 7]);
}

#[test]
fn pixels_skip_stride_padding() {
    let data = vec![1.0f32, 2.0, -1.0, 3.0, 4.0, -1.0];
    let img = Image::from_vec_with_stride(2, 2, 3, data);
    let values: Vec<f32> = img.pixels().map(|(_, _, v)| v).collect();
    assert_eq!(values, [1.0, 2.0, 3.0, 4.0]);
}

#[test]
fn clamped_access_repeats_the_border() {
    let img = Image::from_vec(2, 2, vec![1u16, 2, 3, 4]);
    assert_eq!(img.get_clamped(-5, 0), 1);
    assert_eq!(img.get_clamped(9, 1), 4);
    assert_eq!(img.get_clamped(1, -1), 2);
}

// ===== Pixel formats =====

#[test]
fn pixel_format_tags() {
    assert_eq!(Image::<u8>::new(1, 1).pixel_format(), PixelFormat::Byte);
    assert_eq!(Image::<u16>::new(1, 1).pixel_format(), PixelFormat::UInt16);
    assert_eq!(Image::<i32>::new(1, 1).pixel_format(), PixelFormat::Int32);
    assert_eq!(Image::<f32>::new(1, 1).pixel_format(), PixelFormat::Float);
    assert_eq!(Image::<f64>::new(1, 1).pixel_format(), PixelFormat::Double);
    assert_eq!(PixelFormat::Double.to_string(), "double");
}

#[test]
fn as_bytes_matches_pixel_size() {
    let img: Image<f32> = Image::new(5, 3);
    assert_eq!(img.as_bytes().len(), 5 * 3 * PixelFormat::Float.bytes_per_pixel());
    let img: Image<u16> = Image::new_with_stride(5, 3, 6);
    assert_eq!(img.as_bytes().len(), 6 * 3 * 2);
}

#[test]
fn pixel_conversion_clamps() {
    assert_eq!(u8::from_f32(300.0), 255);
    assert_eq!(u8::from_f32(-4.0), 0);
    assert_eq!(u16::from_f32(12.6), 13);
    assert_eq!(200u8.to_f32(), 200.0);
}

// ===== Smoothing reference =====

#[test]
fn gaussian_blur_spreads_an_impulse_symmetrically() {
    let mut img: Image<f32> = Image::new(9, 9);
    img.set(4, 4, 1.0);
    let out = gaussian_blur(&img, 2.0, 2);
    let total: f32 = out.pixels().map(|(_, _, v)| v).sum();
    assert!((total - 1.0).abs() < 1e-5, "mass not preserved: {total}");
    assert!((out.get(3, 4) - out.get(5, 4)).abs() < 1e-7);
    assert!((out.get(4, 2) - out.get(2, 4)).abs() < 1e-7);
    assert_eq!(out.get(0, 0), 0.0);
}
