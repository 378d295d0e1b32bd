//! Light-space parameters handed to the sampling stage.

use std::collections::HashMap;

use glam::{Mat4, Vec3};

use crate::shadow::atlas::MomentPair;
use crate::shadow::backend::TargetId;
use crate::shadow::camera::ShadowCamera;
use crate::shadow::config::CascadeConfig;

pub const LIGHT_MATRIX: &str = "VSM_LightMatrix";
pub const LIGHT_MATRIX_NORMAL: &str = "VSM_LightMatrixNormal";
pub const SHADOW_TEX_LINEAR: &str = "VSM_ShadowTex1";
pub const SHADOW_TEX_SQUARED: &str = "VSM_ShadowTex2";
pub const INV_NUM_CASCADES: &str = "VSM_InvNumCascades";
pub const DRAW_TRANSPARENT_SHADOWS: &str = "VSM_DRAW_TRANSPARENT_SHADOWS";

/// Depth is stored in `[-64, 64]` across the full clip range.
const DEPTH_SCALE: f32 = 128.0;
/// Normal-offset bias in atlas texels.
const NORMAL_BIAS_TEXELS: f32 = 1.2;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ParamValue {
    Matrix(Mat4),
    Float(f32),
    Texture(TargetId),
    Flag(bool),
}

/// Global key/value store read by materials that sample the shadow atlas.
pub trait ParameterSink {
    fn set(&mut self, key: &'static str, value: ParamValue);
    fn remove(&mut self, key: &'static str);
}

#[derive(Clone, Debug, Default)]
pub struct ParameterStore {
    values: HashMap<&'static str, ParamValue>,
}

impl ParameterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<ParamValue> {
        self.values.get(key).copied()
    }

    pub fn matrix(&self, key: &str) -> Option<Mat4> {
        match self.get(key)? {
            ParamValue::Matrix(m) => Some(m),
            _ => None,
        }
    }

    pub fn float(&self, key: &str) -> Option<f32> {
        match self.get(key)? {
            ParamValue::Float(v) => Some(v),
            _ => None,
        }
    }

    pub fn texture(&self, key: &str) -> Option<TargetId> {
        match self.get(key)? {
            ParamValue::Texture(id) => Some(id),
            _ => None,
        }
    }

    pub fn flag(&self, key: &str) -> Option<bool> {
        match self.get(key)? {
            ParamValue::Flag(v) => Some(v),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl ParameterSink for ParameterStore {
    fn set(&mut self, key: &'static str, value: ParamValue) {
        self.values.insert(key, value);
    }

    fn remove(&mut self, key: &'static str) {
        self.values.remove(key);
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LightMatrices {
    /// World space to normalized light space: x, y in units of the view
    /// extent, z scaled so the clip range spans 128.
    pub light: Mat4,
    /// World space scaled by a fixed fraction of an atlas texel, for
    /// normal-offset sampling.
    pub normal_bias: Mat4,
}

impl LightMatrices {
    pub fn from_camera(camera: &ShadowCamera, atlas_width: u32) -> Self {
        let size = camera.extent();
        let scale = Vec3::new(1.0 / size.x, 1.0 / size.y, DEPTH_SCALE / size.z);
        let world_to_local = camera.pose.world_to_local();
        let texel_scale = NORMAL_BIAS_TEXELS / atlas_width.max(1) as f32;
        Self {
            light: Mat4::from_scale(scale) * world_to_local,
            normal_bias: Mat4::from_scale(Vec3::splat(texel_scale)) * world_to_local,
        }
    }

    pub fn publish(&self, sink: &mut dyn ParameterSink) {
        sink.set(LIGHT_MATRIX, ParamValue::Matrix(self.light));
        sink.set(LIGHT_MATRIX_NORMAL, ParamValue::Matrix(self.normal_bias));
    }
}

/// Everything published at the end of a sweep.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ShadowParameters {
    pub matrices: LightMatrices,
    pub linear_atlas: TargetId,
    pub squared_atlas: TargetId,
    pub inv_cascade_count: f32,
    pub draw_transparent: bool,
}

impl ShadowParameters {
    pub fn derive(camera: &ShadowCamera, atlas: &MomentPair, config: &CascadeConfig) -> Self {
        Self {
            matrices: LightMatrices::from_camera(camera, atlas.linear.width),
            linear_atlas: atlas.linear.id,
            squared_atlas: atlas.squared.id,
            inv_cascade_count: 1.0 / config.cascade_count.max(1) as f32,
            draw_transparent: config.dither_transparent,
        }
    }

    pub fn publish(&self, sink: &mut dyn ParameterSink) {
        sink.set(SHADOW_TEX_LINEAR, ParamValue::Texture(self.linear_atlas));
        sink.set(SHADOW_TEX_SQUARED, ParamValue::Texture(self.squared_atlas));
        sink.set(INV_NUM_CASCADES, ParamValue::Float(self.inv_cascade_count));
        sink.set(DRAW_TRANSPARENT_SHADOWS, ParamValue::Flag(self.draw_transparent));
        self.matrices.publish(sink);
    }
}

/// Withdraws the atlas handles, used when the published surfaces are released.
pub fn unpublish_atlas(sink: &mut dyn ParameterSink) {
    sink.remove(SHADOW_TEX_LINEAR);
    sink.remove(SHADOW_TEX_SQUARED);
}
