use crate::settings::FilterMode;
use crate::shadow::backend::{RenderTargets, TargetDesc, TargetId, TargetKind};
use crate::shadow::config::CascadeConfig;

/// A live surface together with the description it was created from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Target {
    pub id: TargetId,
    pub width: u32,
    pub height: u32,
    pub filter: FilterMode,
}

impl Target {
    fn create<B: RenderTargets + ?Sized>(backend: &mut B, desc: TargetDesc) -> Self {
        let id = backend.create_target(&desc);
        log::info!(
            "Created {} {}x{} ({:?})",
            desc.label,
            desc.width,
            desc.height,
            id
        );
        Self {
            id,
            width: desc.width,
            height: desc.height,
            filter: desc.filter,
        }
    }
}

/// The two moment channels of one atlas: mean depth and mean squared depth.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MomentPair {
    pub linear: Target,
    pub squared: Target,
}

/// Ids and sizes of every surface the atlas manager holds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AtlasTargets {
    pub depth: Option<Target>,
    pub current: Option<MomentPair>,
    pub previous: Option<MomentPair>,
}

/// Owns the depth target and the double-buffered moment atlas.
#[derive(Debug, Default)]
pub struct AtlasManager {
    targets: AtlasTargets,
}

impl AtlasManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes sure the depth target and the current atlas pair exist and
    /// match `config`. Returns `false` without touching anything when the
    /// configuration has no resolution or no cascades.
    pub fn ensure<B: RenderTargets + ?Sized>(&mut self, backend: &mut B, config: &CascadeConfig) -> bool {
        let Some(atlas_height) = config.atlas_height().filter(|_| config.is_valid()) else {
            return false;
        };

        if self.is_stale(config, atlas_height) {
            log::info!(
                "Shadow targets no longer match {}x{} ({} cascades), recreating",
                config.resolution,
                atlas_height,
                config.cascade_count
            );
            self.destroy(backend);
        }

        if self.targets.depth.is_none() {
            self.targets.depth = Some(Target::create(
                backend,
                TargetDesc {
                    label: "ShadowDepthTarget",
                    kind: TargetKind::Depth,
                    width: config.resolution,
                    height: config.resolution,
                    filter: FilterMode::Bilinear,
                },
            ));
        }

        if self.targets.current.is_none() {
            let desc = |label| TargetDesc {
                label,
                kind: TargetKind::Moments,
                width: config.resolution,
                height: atlas_height,
                filter: config.filter_mode,
            };
            let linear = Target::create(backend, desc("ShadowAtlasLinear"));
            let squared = Target::create(backend, desc("ShadowAtlasSquared"));
            self.targets.current = Some(MomentPair { linear, squared });
        }

        true
    }

    fn is_stale(&self, config: &CascadeConfig, atlas_height: u32) -> bool {
        let depth_stale = self
            .targets
            .depth
            .is_some_and(|depth| depth.width != config.resolution || depth.height != config.resolution);
        let atlas_stale = self.targets.current.is_some_and(|pair| {
            pair.linear.width != config.resolution
                || pair.linear.height != atlas_height
                || pair.linear.filter != config.filter_mode
        });
        depth_stale || atlas_stale
    }

    /// Exchanges the current atlas pair with the previous one, so the pair
    /// being sampled is never the one being written.
    pub fn swap(&mut self) {
        std::mem::swap(&mut self.targets.current, &mut self.targets.previous);
    }

    /// Releases every surface, previous pair included. Returns whether
    /// anything was allocated.
    pub fn destroy<B: RenderTargets + ?Sized>(&mut self, backend: &mut B) -> bool {
        let targets = std::mem::take(&mut self.targets);
        let mut released = false;

        let pairs = [targets.current, targets.previous];
        let moments = pairs
            .into_iter()
            .flatten()
            .flat_map(|pair| [pair.linear, pair.squared]);

        for target in targets.depth.into_iter().chain(moments) {
            backend.release_target(target.id);
            log::info!("Released shadow target {:?}", target.id);
            released = true;
        }
        released
    }

    pub fn depth(&self) -> Option<Target> {
        self.targets.depth
    }

    pub fn current(&self) -> Option<MomentPair> {
        self.targets.current
    }

    pub fn previous(&self) -> Option<MomentPair> {
        self.targets.previous
    }

    pub fn targets(&self) -> AtlasTargets {
        self.targets
    }

    pub fn holds(&self, pair: MomentPair) -> bool {
        self.targets.current == Some(pair) || self.targets.previous == Some(pair)
    }
}
