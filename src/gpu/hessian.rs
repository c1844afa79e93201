// gpu/hessian.rs — Adaptive two-pass Hessian keypoint detection.
//
// PIPELINE
// ────────
//   compute_response      full resolution   det(H) · scale⁴ into an R32Float image
//   init_keypoint_map     half resolution   keypoint map cleared to -1
//   ── barrier ──
//   find_extrema_*        full resolution   strict 3x3 maxima above threshold,
//                                           appended to the coordinate and
//                                           score buffers with an atomic count
//   ── barrier ──
//
// OUTPUT CAPACITY
// ───────────────
// The number of keypoints is only known after the extrema pass. The kernel
// keeps counting past the end of the output buffers without storing, so
// the count read back after the pass is always the true number of maxima.
// When it reaches the capacity, some keypoints may be missing; the buffers
// are reallocated at exactly the count and the map-init and extrema passes
// run again. The response image does not depend on the capacity and is
// reused.
//
// The capacity is remembered between calls and set to 1.5x the last count,
// so a stream of similar frames settles into a single pass per frame.
//
// The buffers returned in a Detection are prefixes of exactly `count`
// elements. Replaced buffers stay alive while a submitted pass references
// them: wgpu holds its own reference to every resource of a submission.

use std::sync::Arc;

use tracing::{debug, trace};

use super::error::{GpuError, Result};
use super::manager::{ResourceManager, PRIMARY_DEVICE};
use super::memory::{Buffer, Image, MemAccess};
use super::program::Kernel;
use super::queue::CommandQueue;
use super::registry::ProgramRegistry;
use super::smooth::GaussianSmooth;
use crate::hessian::Keypoint;

pub const HESSIAN_PROGRAM: &str = "hessian";
pub const HESSIAN_SOURCE: &str = include_str!("../shaders/hessian.wgsl");

/// Standard deviation used by `smooth_and_detect`.
pub const SMOOTHING_SIGMA: f32 = 2.0;
/// Kernel half-width used by `smooth_and_detect` (a 5-tap kernel).
pub const SMOOTHING_HALF_WIDTH: u32 = 2;

// Positional arguments of the extrema kernels.
const ARG_RESPONSE: usize = 0;
const ARG_MAP: usize = 1;
const ARG_COORDS: usize = 2;
const ARG_SCORES: usize = 3;
const ARG_CAPACITY: usize = 4;
const ARG_COUNT: usize = 5;
const ARG_THRESHOLD: usize = 6;

// ---------------------------------------------------------------------------
// Capacity policy
// ---------------------------------------------------------------------------

/// Remembered estimate of how many keypoints the output buffers must hold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeypointBudget {
    capacity: usize,
}

impl KeypointBudget {
    /// Structural upper bound on keypoints for a `width` x `height` image.
    pub fn max_keypoints(width: u32, height: u32) -> usize {
        width as usize * height as usize / 4
    }

    /// Current estimate; 0 until the first detection.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Capacity for the next pass over a `width` x `height` image. An
    /// uninitialized budget starts at 1% of the structural bound (at
    /// least one slot).
    pub fn capacity_for(&mut self, width: u32, height: u32) -> usize {
        if self.capacity == 0 {
            self.capacity = (Self::max_keypoints(width, height) / 100).max(1);
        }
        self.capacity
    }

    /// True when `count` keypoints may not all fit in `capacity` slots.
    pub fn overflowed(capacity: usize, count: usize) -> bool {
        count >= capacity
    }

    /// Adapt to the last observed `count`.
    pub fn update(&mut self, count: usize, width: u32, height: u32) {
        self.capacity = (3 * count / 2).min(Self::max_keypoints(width, height));
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Keypoint coordinates: integer pixels, or subpixel positions.
#[derive(Debug, Clone)]
pub enum KeypointCoords {
    Fixed(Buffer<[i32; 2]>),
    Subpixel(Buffer<[f32; 2]>),
}

impl KeypointCoords {
    fn allocate(manager: &ResourceManager, subpixel: bool, len: usize) -> Result<Self> {
        Ok(if subpixel {
            KeypointCoords::Subpixel(manager.create_buffer(MemAccess::ReadWrite, len)?)
        } else {
            KeypointCoords::Fixed(manager.create_buffer(MemAccess::ReadWrite, len)?)
        })
    }

    pub fn len(&self) -> usize {
        match self {
            KeypointCoords::Fixed(b) => b.len(),
            KeypointCoords::Subpixel(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_subpixel(&self) -> bool {
        matches!(self, KeypointCoords::Subpixel(_))
    }

    fn bind(&self, kernel: &mut Kernel, index: usize) -> Result<()> {
        match self {
            KeypointCoords::Fixed(b) => kernel.set_buffer(index, b),
            KeypointCoords::Subpixel(b) => kernel.set_buffer(index, b),
        }
    }

    fn prefix(&self, len: usize) -> Self {
        match self {
            KeypointCoords::Fixed(b) => KeypointCoords::Fixed(b.prefix(len)),
            KeypointCoords::Subpixel(b) => KeypointCoords::Subpixel(b.prefix(len)),
        }
    }

    /// Blocking read of the positions as `(x, y)` pixels.
    fn read(&self, queue: &mut CommandQueue) -> Result<Vec<(f32, f32)>> {
        Ok(match self {
            KeypointCoords::Fixed(b) => queue
                .read_buffer(b)?
                .into_iter()
                .map(|[x, y]| (x as f32, y as f32))
                .collect(),
            KeypointCoords::Subpixel(b) => queue.read_buffer(b)?.into_iter().map(|[x, y]| (x, y)).collect(),
        })
    }
}

/// Result of one `detect` call. `coordinates` and `scores` hold exactly
/// `count` entries; `keypoint_map` is half resolution, each cell holding
/// the index of its keypoint or -1.
#[derive(Debug, Clone)]
pub struct Detection {
    pub keypoint_map: Image,
    pub coordinates: KeypointCoords,
    pub scores: Buffer<f32>,
    pub count: usize,
}

// ---------------------------------------------------------------------------
// Detector
// ---------------------------------------------------------------------------

/// GPU Hessian keypoint detector.
///
/// Owns its kernels and command queue; one instance serves one stream of
/// images from one host thread. The capacity estimate carries over from
/// call to call.
pub struct GpuHessianDetector {
    manager: Arc<ResourceManager>,
    compute_response: Kernel,
    init_keypoint_map: Kernel,
    find_extrema_fixed: Kernel,
    find_extrema_subpixel: Kernel,
    queue: CommandQueue,
    budget: KeypointBudget,
    smoother: GaussianSmooth,
}

impl GpuHessianDetector {
    pub fn new(manager: Arc<ResourceManager>, registry: &ProgramRegistry) -> Result<Self> {
        let program = registry.register_program(HESSIAN_PROGRAM, HESSIAN_SOURCE)?;
        let kernel = |entry: &str| Kernel::new(&program, entry, PRIMARY_DEVICE);
        let compute_response = kernel("compute_response")?;
        let init_keypoint_map = kernel("init_keypoint_map")?;
        let find_extrema_fixed = kernel("find_extrema_fixed")?;
        let find_extrema_subpixel = kernel("find_extrema_subpixel")?;
        let queue = manager.create_queue(PRIMARY_DEVICE)?;
        let smoother = GaussianSmooth::new(Arc::clone(&manager), registry)?;
        Ok(GpuHessianDetector {
            manager,
            compute_response,
            init_keypoint_map,
            find_extrema_fixed,
            find_extrema_subpixel,
            queue,
            budget: KeypointBudget::default(),
            smoother,
        })
    }

    /// The capacity the next `detect` call will allocate (0 before the
    /// first call).
    pub fn buffer_capacity(&self) -> usize {
        self.budget.capacity()
    }

    /// Detect keypoints in `input`.
    ///
    /// `threshold` is compared against the scale-normalized determinant of
    /// the Hessian; `scale` is the scale of `input`. With `subpixel` the
    /// coordinates are refined to fractions of a pixel.
    pub fn detect(&mut self, input: &Image, threshold: f32, scale: f32, subpixel: bool) -> Result<Detection> {
        let (width, height) = (input.width(), input.height());
        let max_keypoints = KeypointBudget::max_keypoints(width, height);
        let capacity = self.budget.capacity_for(width, height);
        let (map_width, map_height) = ((width / 2).max(1), (height / 2).max(1));

        let response = self
            .manager
            .create_image(wgpu::TextureFormat::R32Float, MemAccess::ReadWrite, width, height)?;
        let keypoint_map =
            self.manager
                .create_image(wgpu::TextureFormat::R32Sint, MemAccess::ReadWrite, map_width, map_height)?;
        let mut coordinates = KeypointCoords::allocate(&self.manager, subpixel, capacity)?;
        let mut scores = self.manager.create_buffer::<f32>(MemAccess::ReadWrite, capacity)?;
        let count_buffer = self.manager.create_buffer::<u32>(MemAccess::ReadWrite, 1)?;

        self.compute_response.set_image(0, input)?;
        self.compute_response.set_image(1, &response)?;
        self.compute_response.set_scalar(2, scale * scale)?;
        self.init_keypoint_map.set_image(0, &keypoint_map)?;

        let extrema = if subpixel {
            &mut self.find_extrema_subpixel
        } else {
            &mut self.find_extrema_fixed
        };
        extrema.set_image(ARG_RESPONSE, &response)?;
        extrema.set_image(ARG_MAP, &keypoint_map)?;
        coordinates.bind(extrema, ARG_COORDS)?;
        extrema.set_buffer(ARG_SCORES, &scores)?;
        extrema.set_scalar(ARG_CAPACITY, slot_count(capacity)?)?;
        extrema.set_buffer(ARG_COUNT, &count_buffer)?;
        extrema.set_scalar(ARG_THRESHOLD, threshold)?;

        self.queue.enqueue_kernel(&self.compute_response, [width, height])?;
        self.queue.enqueue_kernel(&self.init_keypoint_map, [map_width, map_height])?;
        self.queue.enqueue_barrier();
        self.queue.enqueue_kernel(extrema, [width, height])?;
        self.queue.enqueue_barrier();

        let count = read_count(&mut self.queue, &count_buffer)?;
        trace!(count, capacity, "first extrema pass");

        if KeypointBudget::overflowed(capacity, count) {
            debug!(count, capacity, "keypoint buffers overflowed, rerunning extrema pass");
            self.queue.enqueue_write_buffer(&count_buffer, &[0u32], false)?;
            coordinates = KeypointCoords::allocate(&self.manager, subpixel, count)?;
            scores = self.manager.create_buffer::<f32>(MemAccess::ReadWrite, count)?;
            coordinates.bind(extrema, ARG_COORDS)?;
            extrema.set_buffer(ARG_SCORES, &scores)?;
            extrema.set_scalar(ARG_CAPACITY, slot_count(count)?)?;

            self.queue.enqueue_kernel(&self.init_keypoint_map, [map_width, map_height])?;
            self.queue.enqueue_barrier();
            self.queue.enqueue_kernel(extrema, [width, height])?;
            self.queue.finish()?;
        }

        self.budget.update(count, width, height);
        debug!(
            width,
            height,
            count,
            next_capacity = self.budget.capacity(),
            max_keypoints,
            subpixel,
            "detection done"
        );

        Ok(Detection {
            keypoint_map,
            coordinates: coordinates.prefix(count),
            scores: scores.prefix(count),
            count,
        })
    }

    /// Smooth `input` with a 5-tap Gaussian of sigma 2 and detect on the
    /// result.
    pub fn smooth_and_detect(
        &mut self,
        input: &Image,
        threshold: f32,
        scale: f32,
        subpixel: bool,
    ) -> Result<Detection> {
        let smoothed = self.smoother.smooth(input, SMOOTHING_SIGMA, SMOOTHING_HALF_WIDTH)?;
        self.detect(&smoothed, threshold, scale, subpixel)
    }

    /// Blocking read of a detection as host keypoints, in slot order.
    pub fn read_keypoints(&mut self, detection: &Detection) -> Result<Vec<Keypoint>> {
        let positions = detection.coordinates.read(&mut self.queue)?;
        let scores = self.queue.read_buffer(&detection.scores)?;
        Ok(positions
            .into_iter()
            .zip(scores)
            .map(|((x, y), score)| Keypoint { x, y, score })
            .collect())
    }

    /// Blocking read of the keypoint map, row-major.
    pub fn read_keypoint_map(&mut self, detection: &Detection) -> Result<Vec<i32>> {
        self.queue.read_image(&detection.keypoint_map)
    }
}

fn read_count(queue: &mut CommandQueue, count: &Buffer<u32>) -> Result<usize> {
    let values = queue.read_buffer(count)?;
    Ok(values.first().copied().unwrap_or(0) as usize)
}

fn slot_count(capacity: usize) -> Result<u32> {
    u32::try_from(capacity).map_err(|_| GpuError::OutOfBounds {
        what: "keypoint capacity",
        requested: capacity,
        capacity: u32::MAX as usize,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::program::{parse_and_validate, ArgKind, KernelSignature, ScalarType};

    #[test]
    fn initial_capacity_is_one_percent_of_the_bound() {
        let mut budget = KeypointBudget::default();
        assert_eq!(budget.capacity(), 0);
        assert_eq!(KeypointBudget::max_keypoints(64, 64), 1024);
        assert_eq!(budget.capacity_for(64, 64), 10);
        // Remembered, not recomputed for a different size.
        assert_eq!(budget.capacity_for(640, 480), 10);
    }

    #[test]
    fn tiny_images_get_one_slot() {
        let mut budget = KeypointBudget::default();
        assert_eq!(budget.capacity_for(8, 8), 1);
    }

    #[test]
    fn overflow_includes_exact_fit() {
        assert!(KeypointBudget::overflowed(10, 10));
        assert!(KeypointBudget::overflowed(10, 11));
        assert!(!KeypointBudget::overflowed(10, 9));
        assert!(!KeypointBudget::overflowed(1, 0));
    }

    #[test]
    fn update_adds_headroom_up_to_the_bound() {
        let mut budget = KeypointBudget::default();
        budget.update(40, 64, 64);
        assert_eq!(budget.capacity(), 60);
        budget.update(1000, 64, 64);
        assert_eq!(budget.capacity(), 1024);
        budget.update(1, 64, 64);
        assert_eq!(budget.capacity(), 1);
    }

    #[test]
    fn zero_count_reinitializes_next_call() {
        let mut budget = KeypointBudget::default();
        budget.update(0, 64, 64);
        assert_eq!(budget.capacity(), 0);
        assert_eq!(budget.capacity_for(64, 64), 10);
    }

    fn signature(entry: &str) -> KernelSignature {
        let (module, info) = parse_and_validate(HESSIAN_SOURCE).unwrap();
        KernelSignature::reflect(HESSIAN_PROGRAM, &module, &info, entry).unwrap()
    }

    fn names(sig: &KernelSignature) -> Vec<&str> {
        sig.args.iter().map(|a| a.name.as_str()).collect()
    }

    #[test]
    fn response_kernel_arguments() {
        let sig = signature("compute_response");
        assert_eq!(names(&sig), ["input_image", "response_out", "scale_sq"]);
        assert_eq!(sig.args[2].kind, ArgKind::Scalar(ScalarType::F32));
        assert_eq!(sig.workgroup_size, [8, 8, 1]);
    }

    #[test]
    fn map_init_kernel_arguments() {
        let sig = signature("init_keypoint_map");
        assert_eq!(names(&sig), ["keypoint_map"]);
        assert_eq!(
            sig.args[0].kind,
            ArgKind::StorageImage {
                format: wgpu::TextureFormat::R32Sint,
                access: wgpu::StorageTextureAccess::WriteOnly,
            }
        );
    }

    #[test]
    fn extrema_kernels_share_positional_layout() {
        let fixed = signature("find_extrema_fixed");
        let subpixel = signature("find_extrema_subpixel");
        assert_eq!(
            names(&fixed),
            ["response_in", "keypoint_map", "coords_fixed", "scores", "capacity", "count", "threshold"]
        );
        assert_eq!(
            names(&subpixel),
            ["response_in", "keypoint_map", "coords_subpixel", "scores", "capacity", "count", "threshold"]
        );
        for sig in [&fixed, &subpixel] {
            assert_eq!(sig.args[ARG_CAPACITY].kind, ArgKind::Scalar(ScalarType::U32));
            assert_eq!(sig.args[ARG_THRESHOLD].kind, ArgKind::Scalar(ScalarType::F32));
            assert_eq!(
                sig.args[ARG_COUNT].kind,
                ArgKind::StorageBuffer {
                    read_only: false,
                    element_size: Some(4),
                }
            );
        }
        // Element sizes match the host coordinate types.
        assert_eq!(
            fixed.args[ARG_COORDS].kind,
            ArgKind::StorageBuffer {
                read_only: false,
                element_size: Some(std::mem::size_of::<[i32; 2]>() as u32),
            }
        );
        assert_eq!(
            subpixel.args[ARG_COORDS].kind,
            ArgKind::StorageBuffer {
                read_only: false,
                element_size: Some(std::mem::size_of::<[f32; 2]>() as u32),
            }
        );
    }

    #[test]
    fn capacity_must_fit_a_u32() {
        assert_eq!(slot_count(7).unwrap(), 7);
        assert!(slot_count(u32::MAX as usize + 1).is_err());
    }
}
