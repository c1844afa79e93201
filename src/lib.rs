// hessian-gpu: Determinant-of-Hessian keypoint detection on the GPU.
//
// Host side: a strided image container, separable convolution, and the CPU
// reference detector. GPU side (`gpu`): a resource manager over wgpu, a
// program cache, and the adaptive two-pass detection task.

pub mod image;
pub mod convolution;
pub mod hessian;
pub mod gpu;
