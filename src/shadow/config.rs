use bitflags::bitflags;
use glam::Vec2;

use crate::settings::{FilterMode, ShadowSettings};

bitflags! {
    /// Scene layers a shadow camera renders. Bits outside the named ones are
    /// kept as-is so hosts can use all 32 layers.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct LayerMask: u32 {
        const DEFAULT = 1 << 0;
        const TRANSPARENT_FX = 1 << 1;
        const IGNORE_RAYCAST = 1 << 2;
        const WATER = 1 << 4;
        const UI = 1 << 5;
        const ALL = !0;
    }
}

impl LayerMask {
    pub const NONE: LayerMask = LayerMask::empty();

    pub fn layer(index: u8) -> Self {
        if index >= 32 {
            log::warn!("Layer index {} out of range, ignoring", index);
            return Self::NONE;
        }
        Self::from_bits_retain(1 << index)
    }

    pub fn includes_layer(self, index: u8) -> bool {
        index < 32 && self.bits() & (1 << index) != 0
    }
}

/// Which casters the depth pass draws.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CasterFilter {
    /// Opaque casters only.
    OpaqueOnly,
    /// Every caster, transparent ones drawn solid.
    All,
    /// Every caster, transparent ones drawn with a dither pattern.
    DitheredTransparent,
}

impl CasterFilter {
    /// `only_opaque` decides whether transparent casters are drawn at all;
    /// `dither_transparent` only picks how they are drawn when they are.
    /// The published transparency flag follows `dither_transparent` alone.
    pub fn from_flags(only_opaque: bool, dither_transparent: bool) -> Self {
        match (only_opaque, dither_transparent) {
            (true, _) => CasterFilter::OpaqueOnly,
            (false, true) => CasterFilter::DitheredTransparent,
            (false, false) => CasterFilter::All,
        }
    }

    pub fn draws_transparent(self) -> bool {
        !matches!(self, CasterFilter::OpaqueOnly)
    }
}

/// Vertical slice of an atlas in normalized texture coordinates (v grows
/// downward, so band 0 is the top of the texture).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AtlasBand {
    pub y0: f32,
    pub y1: f32,
}

impl AtlasBand {
    pub fn level(level: u32, cascade_count: u32) -> Self {
        let n = cascade_count.max(1) as f32;
        Self {
            y0: level as f32 / n,
            y1: (level + 1) as f32 / n,
        }
    }

    /// The last pixel row of an atlas `height` texels tall.
    pub fn edge_row(height: u32) -> Self {
        Self {
            y0: 1.0 - 1.0 / height.max(1) as f32,
            y1: 1.0,
        }
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    /// Pixel rows `[start, end)` covered by this band in a texture `height` texels tall.
    pub fn rows(&self, height: u32) -> (u32, u32) {
        let h = height as f32;
        ((self.y0 * h).round() as u32, (self.y1 * h).round() as u32)
    }
}

/// Per-sweep snapshot of [`ShadowSettings`]. Taken once when a sweep starts
/// and never re-read until the sweep completes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CascadeConfig {
    pub resolution: u32,
    pub cascade_count: u32,
    pub first_cascade_level_size: f32,
    pub depth_range: f32,
    pub filter_mode: FilterMode,
    pub culling_mask: LayerMask,
    pub casters: CasterFilter,
    pub dither_transparent: bool,
}

impl CascadeConfig {
    pub fn snapshot(settings: &ShadowSettings) -> Self {
        Self {
            resolution: settings.resolution,
            cascade_count: settings.cascade_count,
            first_cascade_level_size: settings.first_cascade_level_size,
            depth_range: settings.depth_range,
            filter_mode: settings.filter_mode,
            culling_mask: LayerMask::from_bits_retain(settings.culling_mask),
            casters: CasterFilter::from_flags(
                settings.only_opaque_casters,
                settings.dither_transparent,
            ),
            dither_transparent: settings.dither_transparent,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.resolution > 0 && self.cascade_count > 0 && self.atlas_height().is_some()
    }

    /// Height of each atlas channel, `None` on overflow.
    pub fn atlas_height(&self) -> Option<u32> {
        self.resolution.checked_mul(self.cascade_count)
    }

    pub fn level_half_size(&self, level: u32) -> f32 {
        self.first_cascade_level_size * 2f32.powi(level as i32)
    }

    pub fn band(&self, level: u32) -> AtlasBand {
        AtlasBand::level(level, self.cascade_count)
    }

    pub fn texel_size(&self) -> Vec2 {
        Vec2::splat(1.0 / self.resolution.max(1) as f32)
    }

    /// Levels in processing order: farthest (largest) first.
    pub fn levels(&self) -> impl Iterator<Item = u32> {
        (0..self.cascade_count).rev()
    }
}
