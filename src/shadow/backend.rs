//! Capabilities the cascade core borrows from the renderer.
//!
//! The core never touches GPU objects directly: it allocates surfaces by
//! description, binds one of them as the active surface, and asks the
//! renderer to draw depth or encode moments into it.

use std::ops::{Deref, DerefMut};

use glam::Vec2;

use crate::settings::FilterMode;
use crate::shadow::camera::ShadowCamera;
use crate::shadow::config::{AtlasBand, CasterFilter};

/// Opaque handle to a render surface owned by a backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(u64);

impl TargetId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetKind {
    /// Camera-space depth moments plus a coverage channel, with a depth buffer.
    Depth,
    /// One moment channel of the cascade atlas.
    Moments,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TargetDesc {
    pub label: &'static str,
    pub kind: TargetKind,
    pub width: u32,
    pub height: u32,
    pub filter: FilterMode,
}

/// Which moment an encode pass writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MomentMode {
    /// Mean depth.
    Linear,
    /// Mean squared depth.
    Squared,
}

pub trait RenderTargets {
    fn create_target(&mut self, desc: &TargetDesc) -> TargetId;

    /// Frees the surface immediately. The id must not be used afterwards.
    fn release_target(&mut self, target: TargetId);

    fn active_surface(&self) -> Option<TargetId>;

    fn set_active_surface(&mut self, target: Option<TargetId>);
}

pub trait DepthPass {
    /// Renders the casters selected by `casters` as seen from `camera`
    /// into the active surface.
    fn render_depth(&mut self, camera: &ShadowCamera, casters: CasterFilter);
}

pub trait MomentEncoder {
    /// Filters `source` with a radius-2 kernel scaled by `texel` and writes
    /// the selected moment into `band` of the active surface. A `None`
    /// source writes the "nothing drawn" value.
    fn encode(&mut self, source: Option<TargetId>, band: AtlasBand, mode: MomentMode, texel: Vec2);
}

/// Everything the cascade core needs from a renderer.
pub trait ShadowBackend: RenderTargets + DepthPass + MomentEncoder {}

impl<T: RenderTargets + DepthPass + MomentEncoder + ?Sized> ShadowBackend for T {}

/// Binds a surface for the lifetime of the guard and restores whatever was
/// active before when dropped, including on early return.
pub struct ActiveSurface<'a, B: RenderTargets + ?Sized> {
    backend: &'a mut B,
    previous: Option<TargetId>,
}

impl<'a, B: RenderTargets + ?Sized> ActiveSurface<'a, B> {
    pub fn bind(backend: &'a mut B, target: TargetId) -> Self {
        let previous = backend.active_surface();
        backend.set_active_surface(Some(target));
        Self { backend, previous }
    }
}

impl<B: RenderTargets + ?Sized> Deref for ActiveSurface<'_, B> {
    type Target = B;

    fn deref(&self) -> &B {
        self.backend
    }
}

impl<B: RenderTargets + ?Sized> DerefMut for ActiveSurface<'_, B> {
    fn deref_mut(&mut self) -> &mut B {
        self.backend
    }
}

impl<B: RenderTargets + ?Sized> Drop for ActiveSurface<'_, B> {
    fn drop(&mut self) {
        self.backend.set_active_surface(self.previous);
    }
}
