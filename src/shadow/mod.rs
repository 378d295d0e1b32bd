//! Cascaded variance shadow maps for a single directional light.

pub mod atlas;
pub mod backend;
pub mod camera;
pub mod compositor;
pub mod config;
pub mod params;
pub mod recording;
pub mod scheduler;

pub use atlas::{AtlasManager, AtlasTargets, MomentPair, Target};
pub use backend::{
    ActiveSurface, DepthPass, MomentEncoder, MomentMode, RenderTargets, ShadowBackend, TargetDesc,
    TargetId, TargetKind,
};
pub use camera::{pick_main_light, DirectionalLight, Pose, ShadowCamera, ShadowCameraController};
pub use config::{AtlasBand, CascadeConfig, CasterFilter, LayerMask};
pub use params::{LightMatrices, ParamValue, ParameterSink, ParameterStore, ShadowParameters};
pub use recording::RecordingBackend;
pub use scheduler::{CascadedShadows, SweepProgress};
