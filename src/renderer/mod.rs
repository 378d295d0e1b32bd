pub mod backend;
pub mod casters;
pub mod pipeline_builder;
pub mod uniforms;

pub use backend::{GpuInitError, WgpuShadowBackend};
pub use casters::{CasterMesh, CasterVertex, ShadowCaster};
pub use pipeline_builder::PipelineBuilder;
pub use uniforms::{CasterUniform, EncodeUniform, ShadowUniform};
