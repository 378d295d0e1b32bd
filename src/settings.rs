use std::fmt;

use log::{info, warn};
use serde::{Deserialize, Serialize};

/// Live shadow configuration. Sweeps read it once, through
/// [`CascadeConfig::snapshot`](crate::shadow::CascadeConfig::snapshot).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShadowSettings {
    #[serde(default)]
    pub computation: ShadowComputation,
    #[serde(default = "ShadowSettings::default_follow_reference")]
    pub follow_reference: bool,
    #[serde(default)]
    pub pose_sampling: PoseSampling,
    #[serde(default = "ShadowSettings::default_resolution")]
    pub resolution: u32,
    #[serde(default = "ShadowSettings::default_cascade_count")]
    pub cascade_count: u32,
    #[serde(default = "ShadowSettings::default_first_cascade_level_size")]
    pub first_cascade_level_size: f32,
    #[serde(default = "ShadowSettings::default_depth_range")]
    pub depth_range: f32,
    #[serde(default)]
    pub filter_mode: FilterMode,
    #[serde(default)]
    pub dither_transparent: bool,
    #[serde(default = "ShadowSettings::default_culling_mask")]
    pub culling_mask: u32,
    #[serde(default = "ShadowSettings::default_only_opaque_casters")]
    pub only_opaque_casters: bool,
}

impl Default for ShadowSettings {
    fn default() -> Self {
        Self {
            computation: ShadowComputation::default(),
            follow_reference: Self::default_follow_reference(),
            pose_sampling: PoseSampling::default(),
            resolution: Self::default_resolution(),
            cascade_count: Self::default_cascade_count(),
            first_cascade_level_size: Self::default_first_cascade_level_size(),
            depth_range: Self::default_depth_range(),
            filter_mode: FilterMode::default(),
            dither_transparent: false,
            culling_mask: Self::default_culling_mask(),
            only_opaque_casters: Self::default_only_opaque_casters(),
        }
    }
}

#[derive(Debug)]
pub enum SettingsError {
    Io(std::io::Error),
    Parse(serde_json::Error),
}

impl From<std::io::Error> for SettingsError {
    fn from(e: std::io::Error) -> Self {
        SettingsError::Io(e)
    }
}

impl From<serde_json::Error> for SettingsError {
    fn from(e: serde_json::Error) -> Self {
        SettingsError::Parse(e)
    }
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingsError::Io(e) => write!(f, "IO error: {}", e),
            SettingsError::Parse(e) => write!(f, "Parse error: {}", e),
        }
    }
}

impl std::error::Error for SettingsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SettingsError::Io(e) => Some(e),
            SettingsError::Parse(e) => Some(e),
        }
    }
}

impl ShadowSettings {
    pub fn load() -> Self {
        Self::load_from_path("shadow_settings.json")
    }

    pub fn try_load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self, SettingsError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    pub fn from_json(contents: &str) -> Result<Self, SettingsError> {
        let settings = serde_json::from_str::<ShadowSettings>(contents)?;
        Ok(settings.validate())
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Self {
        let path = path.as_ref();
        match Self::try_load_from_path(path) {
            Ok(settings) => {
                info!("Loaded shadow settings from {:?}", path);
                settings
            }
            Err(SettingsError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(
                    "Shadow settings file {:?} not found. Using default settings.",
                    path
                );
                ShadowSettings::default()
            }
            Err(err) => {
                warn!(
                    "Failed to load {:?} ({}). Falling back to default shadow settings.",
                    path, err
                );
                ShadowSettings::default()
            }
        }
    }

    pub fn validate(mut self) -> Self {
        if !(self.first_cascade_level_size.is_finite() && self.first_cascade_level_size > 0.0) {
            warn!("First cascade level size must be positive. Using default value.");
            self.first_cascade_level_size = Self::default_first_cascade_level_size();
        }

        if !(self.depth_range.is_finite() && self.depth_range > 0.0) {
            warn!("Shadow depth range must be positive. Using default value.");
            self.depth_range = Self::default_depth_range();
        }

        // Zero resolution or cascade count is a legal way to switch shadow updates off.
        if self.resolution == 0 || self.cascade_count == 0 {
            warn!(
                "Shadow resolution {} / cascade count {} disables shadow updates.",
                self.resolution, self.cascade_count
            );
        }

        self
    }

    pub fn camera_drive(&self) -> CameraDrive {
        if self.follow_reference {
            CameraDrive::Follow
        } else {
            CameraDrive::Manual
        }
    }

    const fn default_follow_reference() -> bool {
        true
    }

    const fn default_resolution() -> u32 {
        512
    }

    const fn default_cascade_count() -> u32 {
        6
    }

    const fn default_first_cascade_level_size() -> f32 {
        8.0
    }

    const fn default_depth_range() -> f32 {
        1000.0
    }

    const fn default_culling_mask() -> u32 {
        u32::MAX
    }

    const fn default_only_opaque_casters() -> bool {
        true
    }
}

/// How the frame-tick hook drives shadow updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShadowComputation {
    /// Shadows only change when the host calls an update explicitly.
    ManualFromScript,
    /// One full sweep per displayed frame.
    #[default]
    AutomaticFull,
    /// One cascade level per displayed frame; a sweep spans `cascade_count` frames.
    AutomaticIncrementalCascade,
}

/// When the reference pose is read during a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoseSampling {
    #[default]
    PerSweep,
    PerLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterMode {
    Point,
    #[default]
    Bilinear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraDrive {
    /// Pose comes from the reference supplied by the host, re-read every sweep.
    Follow,
    /// Pose is whatever the host set last through `set_shadow_camera_pose`.
    Manual,
}
