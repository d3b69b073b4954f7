pub type CpuBackend = burn::backend::NdArray<f32, i32>;
pub type GpuBackend = burn::backend::Wgpu<f32, i32>;

pub use burn;

pub mod audio;
pub mod emotion_classifier;
#[cfg(feature = "transcribe")]
pub mod stt;
