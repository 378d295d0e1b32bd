use glam::{Mat4, Quat, Vec3};

use crate::settings::CameraDrive;
use crate::shadow::config::{CascadeConfig, LayerMask};

/// Position, orientation and scale of the shadow camera in world space.
/// The camera looks down its local -Z axis with +Y up.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Pose {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Pose {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Pose {
    pub fn new(position: Vec3, rotation: Quat) -> Self {
        Self {
            position,
            rotation,
            scale: Vec3::ONE,
        }
    }

    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    /// Orientation that looks along `direction`, with a fixed up vector so
    /// the camera never rolls. Vertical directions use +Z as up.
    pub fn look_rotation(direction: Vec3) -> Quat {
        let forward = direction.normalize_or(Vec3::NEG_Z);
        let up = if forward.dot(Vec3::Y).abs() > 0.99 {
            Vec3::Z
        } else {
            Vec3::Y
        };
        let view = Mat4::look_to_rh(Vec3::ZERO, forward, up);
        Quat::from_mat4(&view).inverse()
    }

    /// Reference pose for follow mode: centred on the viewer, oriented
    /// along the light.
    pub fn from_light(viewer_position: Vec3, light_direction: Vec3) -> Self {
        Self::new(viewer_position, Self::look_rotation(light_direction))
    }

    pub fn forward(&self) -> Vec3 {
        self.rotation * Vec3::NEG_Z
    }

    pub fn up(&self) -> Vec3 {
        self.rotation * Vec3::Y
    }

    pub fn local_to_world(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }

    pub fn world_to_local(&self) -> Mat4 {
        self.local_to_world().inverse()
    }
}

/// A directional light the host knows about.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DirectionalLight {
    pub direction: Vec3,
    pub intensity: f32,
}

/// The brightest light, first one wins on ties.
pub fn pick_main_light(lights: &[DirectionalLight]) -> Option<&DirectionalLight> {
    lights.iter().fold(None, |best, light| match best {
        Some(current) if current.intensity >= light.intensity => Some(current),
        _ => Some(light),
    })
}

/// Orthographic camera rendering one cascade level at a time.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ShadowCamera {
    pub pose: Pose,
    pub level: u32,
    /// Half the vertical extent of the view volume.
    pub half_size: f32,
    pub near: f32,
    pub far: f32,
    pub aspect: f32,
    pub culling_mask: LayerMask,
}

impl Default for ShadowCamera {
    fn default() -> Self {
        Self {
            pose: Pose::default(),
            level: 0,
            half_size: 1.0,
            near: 0.0,
            far: 1.0,
            aspect: 1.0,
            culling_mask: LayerMask::ALL,
        }
    }
}

impl ShadowCamera {
    /// Full width, height and depth of the view volume.
    pub fn extent(&self) -> Vec3 {
        let height = self.half_size * 2.0;
        Vec3::new(self.aspect * height, height, self.far - self.near)
    }

    pub fn view(&self) -> Mat4 {
        self.pose.world_to_local()
    }

    pub fn projection(&self) -> Mat4 {
        let half_width = self.half_size * self.aspect;
        Mat4::orthographic_rh(
            -half_width,
            half_width,
            -self.half_size,
            self.half_size,
            self.near,
            self.far,
        )
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection() * self.view()
    }
}

/// Owns the shadow camera and decides where it sits for each level.
#[derive(Debug, Default)]
pub struct ShadowCameraController {
    camera: Option<ShadowCamera>,
    reference: Option<Pose>,
    manual: Pose,
}

impl ShadowCameraController {
    pub fn new() -> Self {
        Self::default()
    }

    /// The camera, created on first use.
    pub fn fetch(&mut self) -> &mut ShadowCamera {
        self.camera.get_or_insert_with(|| {
            log::debug!("Creating shadow camera");
            ShadowCamera::default()
        })
    }

    pub fn camera(&self) -> Option<&ShadowCamera> {
        self.camera.as_ref()
    }

    pub fn destroy(&mut self) {
        if self.camera.take().is_some() {
            log::debug!("Destroyed shadow camera");
        }
    }

    /// Latest reference pose for follow mode, `None` when the host has no
    /// light or tracked transform.
    pub fn set_reference(&mut self, reference: Option<Pose>) {
        self.reference = reference;
    }

    pub fn reference(&self) -> Option<Pose> {
        self.reference
    }

    pub fn set_manual_pose(&mut self, pose: Pose) {
        self.manual = pose;
    }

    pub fn manual_pose(&self) -> Pose {
        self.manual
    }

    /// Pose the next level should use. Follow mode without a reference
    /// logs and yields `None`, leaving the camera where it was.
    pub fn sample_pose(&self, drive: CameraDrive) -> Option<Pose> {
        match drive {
            CameraDrive::Manual => Some(self.manual),
            CameraDrive::Follow => {
                if self.reference.is_none() {
                    log::error!(
                        "No reference pose for the shadow camera; keeping its last position"
                    );
                }
                self.reference
            }
        }
    }

    pub fn position(&mut self, pose: Option<Pose>) {
        let camera = self.fetch();
        if let Some(pose) = pose {
            camera.pose = pose;
        }
    }

    pub fn set_level(&mut self, level: u32, config: &CascadeConfig) {
        let camera = self.fetch();
        camera.level = level;
        camera.half_size = config.level_half_size(level);
        // Symmetric clip range keeps depths near the camera close to zero.
        camera.near = -config.depth_range;
        camera.far = config.depth_range;
        camera.aspect = 1.0;
        camera.culling_mask = config.culling_mask;
    }
}
