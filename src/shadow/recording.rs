//! In-memory backend that records what the cascade core asks for. Useful
//! for exercising the core without a GPU.

use std::collections::BTreeMap;

use glam::Vec2;

use crate::shadow::backend::{
    DepthPass, MomentEncoder, MomentMode, RenderTargets, TargetDesc, TargetId, TargetKind,
};
use crate::shadow::camera::{Pose, ShadowCamera};
use crate::shadow::config::{AtlasBand, CasterFilter};

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SurfaceWrite {
    Depth {
        level: u32,
        half_size: f32,
        pose: Pose,
        casters: CasterFilter,
    },
    Band {
        band: AtlasBand,
        mode: MomentMode,
        source: Option<TargetId>,
        /// Half size of the depth render the source held at encode time.
        depth_half_size: Option<f32>,
        texel: Vec2,
    },
}

/// A surface and everything drawn into it, in order.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedSurface {
    pub desc: TargetDesc,
    pub writes: Vec<SurfaceWrite>,
}

impl RecordedSurface {
    pub fn band_writes(&self) -> impl Iterator<Item = (AtlasBand, Option<f32>)> + '_ {
        self.writes.iter().filter_map(|write| match *write {
            SurfaceWrite::Band {
                band,
                depth_half_size,
                ..
            } => Some((band, depth_half_size)),
            SurfaceWrite::Depth { .. } => None,
        })
    }

    fn last_depth_half_size(&self) -> Option<f32> {
        self.writes.iter().rev().find_map(|write| match *write {
            SurfaceWrite::Depth { half_size, .. } => Some(half_size),
            SurfaceWrite::Band { .. } => None,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum BackendEvent {
    Created(TargetId, TargetDesc),
    Released(TargetId),
    Depth {
        target: TargetId,
        level: u32,
        half_size: f32,
    },
    Encode {
        target: TargetId,
        band: AtlasBand,
        mode: MomentMode,
    },
}

#[derive(Debug, Default)]
pub struct RecordingBackend {
    next_id: u64,
    surfaces: BTreeMap<TargetId, RecordedSurface>,
    active: Option<TargetId>,
    events: Vec<BackendEvent>,
    rejected: usize,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn surface(&self, id: TargetId) -> Option<&RecordedSurface> {
        self.surfaces.get(&id)
    }

    pub fn live_targets(&self) -> usize {
        self.surfaces.len()
    }

    pub fn events(&self) -> &[BackendEvent] {
        &self.events
    }

    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    pub fn active_surface_id(&self) -> Option<TargetId> {
        self.active
    }

    /// Draw calls that had no valid surface to go to.
    pub fn rejected_draws(&self) -> usize {
        self.rejected
    }

    /// Depth renders in the order they happened, as `(level, half_size)`.
    pub fn depth_renders(&self) -> Vec<(u32, f32)> {
        self.events
            .iter()
            .filter_map(|event| match *event {
                BackendEvent::Depth {
                    level, half_size, ..
                } => Some((level, half_size)),
                _ => None,
            })
            .collect()
    }

    fn active_of_kind(&mut self, kind: TargetKind) -> Option<TargetId> {
        let active = self
            .active
            .filter(|id| self.surfaces.get(id).is_some_and(|s| s.desc.kind == kind));
        if active.is_none() {
            log::warn!("No {:?} surface bound, draw ignored", kind);
            self.rejected += 1;
        }
        active
    }
}

impl RenderTargets for RecordingBackend {
    fn create_target(&mut self, desc: &TargetDesc) -> TargetId {
        self.next_id += 1;
        let id = TargetId::new(self.next_id);
        self.surfaces.insert(
            id,
            RecordedSurface {
                desc: *desc,
                writes: Vec::new(),
            },
        );
        self.events.push(BackendEvent::Created(id, *desc));
        id
    }

    fn release_target(&mut self, target: TargetId) {
        if self.surfaces.remove(&target).is_none() {
            log::warn!("Release of unknown target {:?}", target);
            return;
        }
        if self.active == Some(target) {
            log::warn!("Released the active surface {:?}", target);
            self.active = None;
        }
        self.events.push(BackendEvent::Released(target));
    }

    fn active_surface(&self) -> Option<TargetId> {
        self.active
    }

    fn set_active_surface(&mut self, target: Option<TargetId>) {
        self.active = target;
    }
}

impl DepthPass for RecordingBackend {
    fn render_depth(&mut self, camera: &ShadowCamera, casters: CasterFilter) {
        let Some(target) = self.active_of_kind(TargetKind::Depth) else {
            return;
        };
        if let Some(surface) = self.surfaces.get_mut(&target) {
            surface.writes.push(SurfaceWrite::Depth {
                level: camera.level,
                half_size: camera.half_size,
                pose: camera.pose,
                casters,
            });
        }
        self.events.push(BackendEvent::Depth {
            target,
            level: camera.level,
            half_size: camera.half_size,
        });
    }
}

impl MomentEncoder for RecordingBackend {
    fn encode(&mut self, source: Option<TargetId>, band: AtlasBand, mode: MomentMode, texel: Vec2) {
        let Some(target) = self.active_of_kind(TargetKind::Moments) else {
            return;
        };
        let depth_half_size = source
            .and_then(|id| self.surfaces.get(&id))
            .and_then(RecordedSurface::last_depth_half_size);
        if let Some(surface) = self.surfaces.get_mut(&target) {
            surface.writes.push(SurfaceWrite::Band {
                band,
                mode,
                source,
                depth_half_size,
                texel,
            });
        }
        self.events.push(BackendEvent::Encode { target, band, mode });
    }
}
