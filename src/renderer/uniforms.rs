// renderer/uniforms.rs
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2};

use crate::shadow::camera::ShadowCamera;
use crate::shadow::params::{
    ParameterStore, DRAW_TRANSPARENT_SHADOWS, INV_NUM_CASCADES, LIGHT_MATRIX, LIGHT_MATRIX_NORMAL,
};

/// Depth stored per unit of `depth_range`: the symmetric clip range maps to `[-64, 64]`.
pub const DEPTH_UNITS: f32 = 64.0;

/// Per-caster block of `vsm_depth.wgsl`.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq)]
pub struct CasterUniform {
    pub view_proj: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    pub model: [[f32; 4]; 4],
    pub params: [f32; 4],
}

impl CasterUniform {
    pub fn new(camera: &ShadowCamera, model: Mat4, dithered: bool) -> Self {
        let depth_range = (camera.far - camera.near) * 0.5;
        Self {
            view_proj: camera.view_projection().to_cols_array_2d(),
            view: camera.view().to_cols_array_2d(),
            model: model.to_cols_array_2d(),
            params: [
                DEPTH_UNITS / depth_range.max(f32::EPSILON),
                if dithered { 1.0 } else { 0.0 },
                0.0,
                0.0,
            ],
        }
    }
}

/// Block of `vsm_encode.wgsl`.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq)]
pub struct EncodeUniform {
    pub texel: [f32; 2],
    pub mode: f32,
    pub _padding: f32,
}

impl EncodeUniform {
    pub fn new(texel: Vec2, squared: bool) -> Self {
        Self {
            texel: texel.to_array(),
            mode: if squared { 1.0 } else { 0.0 },
            _padding: 0.0,
        }
    }
}

/// Published shadow parameters laid out for a material uniform buffer.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq)]
pub struct ShadowUniform {
    pub light_matrix: [[f32; 4]; 4],
    pub light_matrix_normal: [[f32; 4]; 4],
    /// x: 1 / cascade count, y: transparent shadows flag.
    pub params: [f32; 4],
}

impl ShadowUniform {
    pub fn new() -> Self {
        Self {
            light_matrix: Mat4::IDENTITY.to_cols_array_2d(),
            light_matrix_normal: Mat4::IDENTITY.to_cols_array_2d(),
            params: [1.0, 0.0, 0.0, 0.0],
        }
    }

    /// Reads whatever is currently published; missing keys keep their defaults.
    pub fn from_store(store: &ParameterStore) -> Self {
        let mut uniform = Self::new();
        if let Some(m) = store.matrix(LIGHT_MATRIX) {
            uniform.light_matrix = m.to_cols_array_2d();
        }
        if let Some(m) = store.matrix(LIGHT_MATRIX_NORMAL) {
            uniform.light_matrix_normal = m.to_cols_array_2d();
        }
        if let Some(inv) = store.float(INV_NUM_CASCADES) {
            uniform.params[0] = inv;
        }
        if let Some(flag) = store.flag(DRAW_TRANSPARENT_SHADOWS) {
            uniform.params[1] = if flag { 1.0 } else { 0.0 };
        }
        uniform
    }
}

impl Default for ShadowUniform {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shadow::params::ParamValue;
    use crate::shadow::ParameterSink;

    #[test]
    fn uniform_sizes_match_wgsl_layout() {
        // 3 * mat4x4<f32> + vec4<f32>
        assert_eq!(std::mem::size_of::<CasterUniform>(), 208);
        assert_eq!(std::mem::size_of::<EncodeUniform>(), 16);
        assert_eq!(std::mem::size_of::<ShadowUniform>(), 144);
    }

    #[test]
    fn caster_depth_scale_spans_clip_range() {
        let camera = ShadowCamera {
            near: -500.0,
            far: 500.0,
            ..ShadowCamera::default()
        };
        let uniform = CasterUniform::new(&camera, Mat4::IDENTITY, false);
        assert!((uniform.params[0] * 500.0 - DEPTH_UNITS).abs() < 1e-4);
        assert_eq!(uniform.params[1], 0.0);
    }

    #[test]
    fn from_store_falls_back_per_key() {
        let mut store = ParameterStore::new();
        store.set(INV_NUM_CASCADES, ParamValue::Float(0.25));
        store.set(DRAW_TRANSPARENT_SHADOWS, ParamValue::Flag(true));

        let uniform = ShadowUniform::from_store(&store);
        assert_eq!(uniform.params, [0.25, 1.0, 0.0, 0.0]);
        assert_eq!(uniform.light_matrix, Mat4::IDENTITY.to_cols_array_2d());
    }
}
