//! Per-level depth rendering and moment compositing into the atlas.

use crate::shadow::atlas::AtlasManager;
use crate::shadow::backend::{ActiveSurface, MomentMode, ShadowBackend, TargetId};
use crate::shadow::camera::ShadowCamera;
use crate::shadow::config::{AtlasBand, CascadeConfig};

const CHANNELS: [MomentMode; 2] = [MomentMode::Linear, MomentMode::Squared];

/// Renders depth for `camera`'s level and writes both moments into that
/// level's band of the current atlas pair. Returns `false` if the atlas has
/// not been allocated.
pub fn composite_level<B: ShadowBackend + ?Sized>(
    backend: &mut B,
    atlas: &AtlasManager,
    camera: &ShadowCamera,
    level: u32,
    config: &CascadeConfig,
) -> bool {
    let (Some(depth), Some(pair)) = (atlas.depth(), atlas.current()) else {
        log::warn!("Shadow atlas missing while compositing level {}", level);
        return false;
    };

    {
        let mut surface = ActiveSurface::bind(backend, depth.id);
        surface.render_depth(camera, config.casters);
    }

    let band = config.band(level);
    for (mode, channel) in CHANNELS.into_iter().zip([pair.linear, pair.squared]) {
        encode_into(backend, Some(depth.id), channel.id, band, mode, config);
    }
    true
}

/// Duplicates the level-0 depth still held by the depth target into the
/// last row of each channel, so clamped lookups past the atlas edge see
/// valid moments.
pub fn write_edge_row<B: ShadowBackend + ?Sized>(
    backend: &mut B,
    atlas: &AtlasManager,
    config: &CascadeConfig,
) -> bool {
    let (Some(depth), Some(pair)) = (atlas.depth(), atlas.current()) else {
        log::warn!("Shadow atlas missing while writing the edge row");
        return false;
    };

    for (mode, channel) in CHANNELS.into_iter().zip([pair.linear, pair.squared]) {
        let band = AtlasBand::edge_row(channel.height);
        encode_into(backend, Some(depth.id), channel.id, band, mode, config);
    }
    true
}

fn encode_into<B: ShadowBackend + ?Sized>(
    backend: &mut B,
    source: Option<TargetId>,
    destination: TargetId,
    band: AtlasBand,
    mode: MomentMode,
    config: &CascadeConfig,
) {
    let mut surface = ActiveSurface::bind(backend, destination);
    surface.encode(source, band, mode, config.texel_size());
}
