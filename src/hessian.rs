// hessian.rs — Determinant-of-Hessian keypoint detector (CPU reference).
//
// The GPU pipeline in gpu/hessian.rs runs the same three steps; this module
// is the authority it is validated against.
//
// Algorithm:
//   1. Second derivatives by central differences with clamped borders:
//        Dxx = I(x+1,y) + I(x-1,y) - 2 I(x,y)
//        Dyy = I(x,y+1) + I(x,y-1) - 2 I(x,y)
//        Dxy = (I(x+1,y+1) + I(x-1,y-1) - I(x+1,y-1) - I(x-1,y+1)) / 4
//   2. Scale-normalized response: R = (s²)² · (Dxx·Dyy - Dxy²)
//   3. Keypoints are strict maxima of R over their 3×3 neighbourhood with
//      R > threshold, at least one pixel away from the border.
//
// Bright and dark blobs both give a positive determinant, so a single
// maximum search finds both. Saddles give negative responses and are never
// reported for a non-negative threshold.

use crate::image::{Image, Pixel};

/// A detected keypoint: position in pixels and its Hessian response.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub score: f32,
}

/// Hessian blob detector.
#[derive(Debug, Clone, Copy)]
pub struct HessianDetector {
    /// Minimum response for a keypoint (strict comparison).
    pub threshold: f32,
    /// Scale of the image the derivatives are taken on. The response is
    /// multiplied by scale⁴ so responses are comparable across scales.
    pub scale: f32,
    /// Refine positions with a per-axis quadratic fit.
    pub subpixel: bool,
}

impl HessianDetector {
    pub fn new(threshold: f32, scale: f32) -> Self {
        HessianDetector {
            threshold,
            scale,
            subpixel: false,
        }
    }

    pub fn with_subpixel(mut self, subpixel: bool) -> Self {
        self.subpixel = subpixel;
        self
    }

    /// Compute the Hessian response image.
    pub fn response<T: Pixel>(&self, image: &Image<T>) -> Image<f32> {
        hessian_response(image, self.scale * self.scale)
    }

    /// Detect keypoints, returned in row-major order.
    pub fn detect<T: Pixel>(&self, image: &Image<T>) -> Vec<Keypoint> {
        let response = self.response(image);
        let mut keypoints = find_extrema(&response, self.threshold);
        if self.subpixel {
            for kp in &mut keypoints {
                let (x, y) = refine_subpixel(&response, kp.x as usize, kp.y as usize);
                kp.x = x;
                kp.y = y;
            }
        }
        keypoints
    }
}

/// Determinant-of-Hessian response normalized by `scale_sq²`.
pub fn hessian_response<T: Pixel>(image: &Image<T>, scale_sq: f32) -> Image<f32> {
    let (w, h) = (image.width(), image.height());
    let mut out = Image::<f32>::new(w, h);
    let at = |x: isize, y: isize| image.get_clamped(x, y).to_f32();

    for y in 0..h as isize {
        for x in 0..w as isize {
            let c = at(x, y);
            let dxx = at(x + 1, y) + at(x - 1, y) - 2.0 * c;
            let dyy = at(x, y + 1) + at(x, y - 1) - 2.0 * c;
            let dxy = 0.25 * (at(x + 1, y + 1) + at(x - 1, y - 1) - at(x + 1, y - 1) - at(x - 1, y + 1));
            let det = scale_sq * scale_sq * (dxx * dyy - dxy * dxy);
            out.set(x as usize, y as usize, det);
        }
    }
    out
}

/// True when (x, y) is a thresholded strict 3×3 maximum of `response`.
pub fn is_extremum(response: &Image<f32>, x: usize, y: usize, threshold: f32) -> bool {
    let (w, h) = (response.width(), response.height());
    if x < 1 || y < 1 || x + 1 >= w || y + 1 >= h {
        return false;
    }
    let v = response.get(x, y);
    if v <= threshold {
        return false;
    }
    for dy in -1isize..=1 {
        for dx in -1isize..=1 {
            if dx == 0 && dy == 0 {
                continue;
            }
            let n = response.get((x as isize + dx) as usize, (y as isize + dy) as usize);
            if n >= v {
                return false;
            }
        }
    }
    true
}

/// All thresholded strict local maxima, row-major, at integer positions.
pub fn find_extrema(response: &Image<f32>, threshold: f32) -> Vec<Keypoint> {
    let mut keypoints = Vec::new();
    for y in 0..response.height() {
        for x in 0..response.width() {
            if is_extremum(response, x, y, threshold) {
                keypoints.push(Keypoint {
                    x: x as f32,
                    y: y as f32,
                    score: response.get(x, y),
                });
            }
        }
    }
    keypoints
}

/// Sub-pixel position of the maximum at (x, y).
///
/// Fits a parabola through the three samples on each axis; the offset is
/// clamped to ±0.5 so the refined point stays inside the pixel.
pub fn refine_subpixel(response: &Image<f32>, x: usize, y: usize) -> (f32, f32) {
    let (xi, yi) = (x as isize, y as isize);
    let at = |x: isize, y: isize| response.get_clamped(x, y);
    let v = at(xi, yi);
    let offset = |prev: f32, next: f32| {
        let d = 0.5 * (next - prev);
        let dd = next + prev - 2.0 * v;
        if dd < 0.0 {
            (-d / dd).clamp(-0.5, 0.5)
        } else {
            0.0
        }
    };
    let ox = offset(at(xi - 1, yi), at(xi + 1, yi));
    let oy = offset(at(xi, yi - 1), at(xi, yi + 1));
    (x as f32 + ox, y as f32 + oy)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(w: usize, h: usize, cx: f32, cy: f32, sigma: f32) -> Image<f32> {
        let mut img = Image::new(w, h);
        for y in 0..h {
            for x in 0..w {
                let (dx, dy) = (x as f32 - cx, y as f32 - cy);
                img.set(x, y, (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp());
            }
        }
        img
    }

    #[test]
    fn flat_image_has_zero_response() {
        let img = Image::from_vec(6, 6, vec![0.7f32; 36]);
        let r = hessian_response(&img, 4.0);
        assert!(r.pixels().all(|(_, _, v)| v == 0.0));
    }

    #[test]
    fn single_blob_gives_one_keypoint() {
        let img = blob(32, 32, 12.0, 20.0, 2.0);
        let kps = HessianDetector::new(1e-4, 1.0).detect(&img);
        assert_eq!(kps.len(), 1);
        assert_eq!((kps[0].x, kps[0].y), (12.0, 20.0));
        assert!(kps[0].score > 0.0);
    }

    #[test]
    fn dark_blob_is_detected_too() {
        let mut img = blob(32, 32, 16.0, 16.0, 2.0);
        for v in img.as_mut_slice() {
            *v = 1.0 - *v;
        }
        let kps = HessianDetector::new(1e-4, 1.0).detect(&img);
        assert_eq!(kps.len(), 1);
        assert_eq!((kps[0].x, kps[0].y), (16.0, 16.0));
    }

    #[test]
    fn scale_multiplies_response_by_fourth_power() {
        let img = blob(16, 16, 8.0, 8.0, 1.5);
        let r1 = hessian_response(&img, 1.0);
        let r2 = hessian_response(&img, 4.0);
        let (a, b) = (r1.get(8, 8), r2.get(8, 8));
        assert!((b - 16.0 * a).abs() <= 1e-4 * b.abs());
    }

    #[test]
    fn plateau_is_not_a_strict_maximum() {
        let mut r = Image::<f32>::new(5, 5);
        r.set(2, 2, 1.0);
        r.set(3, 2, 1.0);
        assert!(find_extrema(&r, 0.0).is_empty());
    }

    #[test]
    fn border_pixels_are_never_reported() {
        let mut r = Image::<f32>::new(5, 5);
        r.set(0, 2, 5.0);
        r.set(4, 4, 5.0);
        assert!(find_extrema(&r, 0.0).is_empty());
    }

    #[test]
    fn subpixel_offset_moves_towards_true_center() {
        let img = blob(32, 32, 15.3, 10.0, 2.0);
        let kps = HessianDetector::new(1e-4, 1.0).with_subpixel(true).detect(&img);
        assert_eq!(kps.len(), 1);
        assert!(kps[0].x > 15.0 && kps[0].x <= 15.5, "x = {}", kps[0].x);
        assert!((kps[0].y - 10.0).abs() < 1e-3);
    }
}
