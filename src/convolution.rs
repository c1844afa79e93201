// convolution.rs — Separable Gaussian smoothing on the host.
//
// This is the CPU reference for the GPU `smooth_rows` / `smooth_cols`
// passes in shaders/gaussian.wgsl. Both sides use the same coefficients
// (`gaussian_kernel_1d`) and the same border policy, so results agree to
// float rounding.
//
// BORDER HANDLING: Clamp (replicate edge pixels), matching a texture load
// with coordinates clamped to the image rectangle.

use crate::image::{Image, Pixel};

/// Convolve each row of `src` with a centered 1D kernel (horizontal pass).
///
/// # Panics
/// Panics if the kernel is empty or has even length.
pub fn convolve_rows<T: Pixel>(src: &Image<T>, kernel: &[f32]) -> Image<f32> {
    let half = check_kernel(kernel);
    let mut dst = Image::<f32>::new(src.width(), src.height());
    for y in 0..src.height() {
        for x in 0..src.width() {
            let mut acc = 0.0f32;
            for (ki, &kv) in kernel.iter().enumerate() {
                let sx = x as isize + ki as isize - half;
                acc += src.get_clamped(sx, y as isize).to_f32() * kv;
            }
            dst.set(x, y, acc);
        }
    }
    dst
}

/// Convolve each column of `src` with a centered 1D kernel (vertical pass).
pub fn convolve_cols(src: &Image<f32>, kernel: &[f32]) -> Image<f32> {
    let half = check_kernel(kernel);
    let mut dst = Image::<f32>::new(src.width(), src.height());
    for y in 0..src.height() {
        for x in 0..src.width() {
            let mut acc = 0.0f32;
            for (ki, &kv) in kernel.iter().enumerate() {
                let sy = y as isize + ki as isize - half;
                acc += src.get_clamped(x as isize, sy) * kv;
            }
            dst.set(x, y, acc);
        }
    }
    dst
}

/// Full separable 2D convolution: horizontal pass then vertical pass.
pub fn convolve_separable<T: Pixel>(
    src: &Image<T>,
    kernel_row: &[f32],
    kernel_col: &[f32],
) -> Image<f32> {
    let intermediate = convolve_rows(src, kernel_row);
    convolve_cols(&intermediate, kernel_col)
}

/// Gaussian blur with a `2 * half_size + 1` tap kernel.
pub fn gaussian_blur<T: Pixel>(src: &Image<T>, sigma: f32, half_size: usize) -> Image<f32> {
    let k = gaussian_kernel_1d(half_size, sigma);
    convolve_separable(src, &k, &k)
}

/// Generate a 1D Gaussian kernel with the given half-size and sigma.
///
/// Returns a kernel of length `2 * half_size + 1`, normalized so the
/// coefficients sum to 1.0.
///
/// # Examples
/// ```
/// let k = hessian_gpu::convolution::gaussian_kernel_1d(2, 1.0);
/// assert_eq!(k.len(), 5);
/// assert!((k.iter().sum::<f32>() - 1.0).abs() < 1e-6);
/// ```
pub fn gaussian_kernel_1d(half_size: usize, sigma: f32) -> Vec<f32> {
    assert!(sigma > 0.0, "sigma must be positive");
    let two_sigma_sq = 2.0 * sigma * sigma;
    let mut kernel: Vec<f32> = (0..2 * half_size + 1)
        .map(|i| {
            let x = i as f32 - half_size as f32;
            (-x * x / two_sigma_sq).exp()
        })
        .collect();

    let sum: f32 = kernel.iter().sum();
    for v in &mut kernel {
        *v /= sum;
    }
    kernel
}

fn check_kernel(kernel: &[f32]) -> isize {
    assert!(!kernel.is_empty(), "kernel must not be empty");
    assert!(kernel.len() % 2 == 1, "kernel length must be odd (got {})", kernel.len());
    (kernel.len() / 2) as isize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_is_symmetric_and_peaked() {
        let k = gaussian_kernel_1d(3, 1.5);
        assert_eq!(k.len(), 7);
        for i in 0..3 {
            assert_eq!(k[i], k[6 - i], "tap {i}");
            assert!(k[i] < k[i + 1]);
        }
    }

    #[test]
    fn wider_sigma_flattens_the_kernel() {
        let narrow = gaussian_kernel_1d(2, 0.8);
        let wide = gaussian_kernel_1d(2, 4.0);
        assert!(narrow[2] > wide[2]);
        assert!(narrow[0] < wide[0]);
    }

    #[test]
    fn byte_input_is_blurred_in_float() {
        let img = Image::from_vec(4, 4, vec![200u8; 16]);
        let out = gaussian_blur(&img, 2.0, 2);
        for (x, y, v) in out.pixels() {
            assert!((v - 200.0).abs() < 1e-3, "({x}, {y}): {v}");
        }
    }

    #[test]
    fn rows_and_cols_are_independent_axes() {
        // A vertical step is untouched by the column pass.
        let img = Image::from_vec(4, 2, vec![0.0f32, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 1.0]);
        let k = [0.25, 0.5, 0.25];
        let cols = convolve_cols(&img, &k);
        assert_eq!(cols.as_slice(), img.as_slice());
        let rows = convolve_rows(&img, &k);
        assert!((rows.get(1, 0) - 0.25).abs() < 1e-6);
        assert!((rows.get(2, 1) - 0.75).abs() < 1e-6);
    }

    #[test]
    fn borders_replicate_the_edge_pixel() {
        // At y=0 the clamped window is [4, 4, 8].
        let img = Image::from_vec(1, 3, vec![4.0f32, 8.0, 16.0]);
        let out = convolve_cols(&img, &[0.25, 0.5, 0.25]);
        assert!((out.get(0, 0) - 5.0).abs() < 1e-6);
        assert!((out.get(0, 2) - 14.0).abs() < 1e-6);
    }

    #[test]
    #[should_panic(expected = "odd")]
    fn even_kernels_are_rejected() {
        convolve_cols(&Image::<f32>::new(2, 2), &[0.5, 0.5]);
    }
}
