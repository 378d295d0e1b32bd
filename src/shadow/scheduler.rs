use crate::settings::{PoseSampling, ShadowComputation, ShadowSettings};
use crate::shadow::atlas::{AtlasManager, AtlasTargets, MomentPair};
use crate::shadow::backend::ShadowBackend;
use crate::shadow::camera::{Pose, ShadowCamera, ShadowCameraController};
use crate::shadow::compositor::{composite_level, write_edge_row};
use crate::shadow::config::CascadeConfig;
use crate::shadow::params::{unpublish_atlas, LightMatrices, ParameterSink, ShadowParameters};

/// Result of advancing an incremental sweep by one tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SweepProgress {
    /// A level was composited; `next_level` is the one the next call renders.
    Pending { next_level: u32 },
    /// The last level was composited and the new atlas published.
    Completed,
    /// The configuration has no resolution or no cascades; nothing changed.
    Aborted,
}

#[derive(Clone, Copy, Debug)]
struct Sweep {
    next_level: u32,
    config: CascadeConfig,
    pose: Option<Pose>,
}

#[derive(Clone, Copy, Debug)]
enum SweepState {
    Idle,
    Sweeping(Sweep),
}

#[derive(Clone, Copy, Debug)]
struct Publication {
    atlas: MomentPair,
    /// Level-0 camera the light matrices are derived from.
    camera: ShadowCamera,
}

/// Cascaded variance shadow maps for one directional light.
///
/// Drives full sweeps synchronously and incremental sweeps one level per
/// [`resume`](Self::resume). The atlas published to the sink always comes
/// from a completed sweep: incremental sweeps render into the swapped-out
/// pair and only publish once level 0 is done.
pub struct CascadedShadows<B: ShadowBackend, S: ParameterSink> {
    backend: B,
    sink: S,
    settings: ShadowSettings,
    atlas: AtlasManager,
    controller: ShadowCameraController,
    state: SweepState,
    published: Option<Publication>,
    last_frame: Option<u64>,
    completed_sweeps: u64,
}

impl<B: ShadowBackend, S: ParameterSink> CascadedShadows<B, S> {
    pub fn new(backend: B, sink: S, settings: ShadowSettings) -> Self {
        Self {
            backend,
            sink,
            settings,
            atlas: AtlasManager::new(),
            controller: ShadowCameraController::new(),
            state: SweepState::Idle,
            published: None,
            last_frame: None,
            completed_sweeps: 0,
        }
    }

    pub fn settings(&self) -> &ShadowSettings {
        &self.settings
    }

    /// Live settings. Changes take effect at the start of the next sweep.
    pub fn settings_mut(&mut self) -> &mut ShadowSettings {
        &mut self.settings
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn camera(&self) -> Option<&ShadowCamera> {
        self.controller.camera()
    }

    pub fn debug_targets(&self) -> AtlasTargets {
        self.atlas.targets()
    }

    pub fn is_sweeping(&self) -> bool {
        matches!(self.state, SweepState::Sweeping(_))
    }

    /// Level the in-flight sweep renders next, if any.
    pub fn pending_level(&self) -> Option<u32> {
        match self.state {
            SweepState::Sweeping(sweep) => Some(sweep.next_level),
            SweepState::Idle => None,
        }
    }

    /// Number of sweeps that reached the publish step.
    pub fn completed_sweeps(&self) -> u64 {
        self.completed_sweeps
    }

    /// Reference for follow mode, typically [`Pose::from_light`] each frame.
    pub fn set_reference_pose(&mut self, reference: Option<Pose>) {
        self.controller.set_reference(reference);
    }

    /// Moves the shadow camera: sweeps render from `pose` while
    /// `follow_reference` is off, and the published atlas is re-projected
    /// from it right away. Shorthand for [`set_render_pose`](Self::set_render_pose)
    /// plus [`set_display_pose`](Self::set_display_pose).
    pub fn set_shadow_camera_pose(&mut self, pose: Pose) {
        self.set_render_pose(pose);
        self.set_display_pose(pose);
    }

    /// Pose sweeps render from while `follow_reference` is off. Read at the
    /// start of the next sweep, or before the next level with per-level
    /// sampling. The published light matrices are left alone.
    pub fn set_render_pose(&mut self, pose: Pose) {
        self.controller.set_manual_pose(pose);
    }

    /// Republishes the light matrices of the published atlas as if it had
    /// been rendered from `pose`, without rendering anything. Works during a
    /// sweep too; the sweep keeps its own pose and publishes it when done.
    /// Returns `false` when nothing is published yet.
    pub fn set_display_pose(&mut self, pose: Pose) -> bool {
        let Some(publication) = self.published.as_mut() else {
            return false;
        };
        publication.camera.pose = pose;
        LightMatrices::from_camera(&publication.camera, publication.atlas.linear.width)
            .publish(&mut self.sink);
        true
    }

    /// Frame-tick hook. Repeated calls for the same frame are ignored.
    pub fn on_frame(&mut self, frame: u64) -> Option<SweepProgress> {
        if self.last_frame == Some(frame) {
            return None;
        }
        self.last_frame = Some(frame);

        match self.settings.computation {
            ShadowComputation::ManualFromScript => None,
            ShadowComputation::AutomaticFull => Some(if self.update_full() {
                SweepProgress::Completed
            } else {
                SweepProgress::Aborted
            }),
            ShadowComputation::AutomaticIncrementalCascade => Some(self.resume()),
        }
    }

    /// Renders every level and publishes, all in one call. Discards any
    /// incremental sweep in flight. Returns `false` when the configuration
    /// is degenerate, in which case nothing changes, an in-flight sweep
    /// included.
    pub fn update_full(&mut self) -> bool {
        let config = CascadeConfig::snapshot(&self.settings);
        if !config.is_valid() {
            log::debug!(
                "Shadow sweep skipped: resolution {} cascades {}",
                config.resolution,
                config.cascade_count
            );
            return false;
        }

        if let SweepState::Sweeping(sweep) = self.state {
            log::debug!(
                "Full shadow update cancels incremental sweep at level {}",
                sweep.next_level
            );
            self.state = SweepState::Idle;
        }

        if !self.prepare(&config) {
            return false;
        }

        let pose = self.controller.sample_pose(self.settings.camera_drive());
        for level in config.levels() {
            self.compute_level(level, &config, pose);
        }
        self.finalize(&config);
        true
    }

    /// Starts an incremental sweep: freezes the configuration and primes the
    /// farthest level. The pairs are swapped only when the current one is
    /// the published atlas, so a restarted or cancelled sweep reuses its
    /// partly written pair and the published atlas is never written.
    pub fn begin_incremental(&mut self) -> bool {
        let config = CascadeConfig::snapshot(&self.settings);
        if !config.is_valid() {
            log::debug!(
                "Shadow sweep skipped: resolution {} cascades {}",
                config.resolution,
                config.cascade_count
            );
            return false;
        }

        if let SweepState::Sweeping(sweep) = self.state {
            log::debug!("Restarting incremental sweep at level {}", sweep.next_level);
            self.state = SweepState::Idle;
        }
        if self.current_is_published() {
            self.atlas.swap();
        }

        if !self.prepare(&config) {
            return false;
        }

        let pose = self.controller.sample_pose(self.settings.camera_drive());
        self.state = SweepState::Sweeping(Sweep {
            next_level: config.cascade_count - 1,
            config,
            pose,
        });
        true
    }

    /// Renders exactly one level of the in-flight sweep, starting a new
    /// sweep first when idle. Publishes after level 0.
    pub fn resume(&mut self) -> SweepProgress {
        if !self.is_sweeping() && !self.begin_incremental() {
            return SweepProgress::Aborted;
        }
        let SweepState::Sweeping(mut sweep) = self.state else {
            return SweepProgress::Aborted;
        };

        let level = sweep.next_level;
        self.compute_level(level, &sweep.config, sweep.pose);

        if level == 0 {
            self.state = SweepState::Idle;
            self.finalize(&sweep.config);
            return SweepProgress::Completed;
        }

        sweep.next_level = level - 1;
        self.state = SweepState::Sweeping(sweep);
        SweepProgress::Pending {
            next_level: sweep.next_level,
        }
    }

    /// Drops the camera and every surface. The next sweep recreates them.
    pub fn shutdown(&mut self) {
        self.state = SweepState::Idle;
        self.controller.destroy();
        if self.atlas.destroy(&mut self.backend) {
            log::info!("Shadow targets released");
        }
        if self.published.take().is_some() {
            unpublish_atlas(&mut self.sink);
        }
    }

    fn current_is_published(&self) -> bool {
        self.published
            .is_some_and(|publication| self.atlas.current() == Some(publication.atlas))
    }

    fn prepare(&mut self, config: &CascadeConfig) -> bool {
        if !self.atlas.ensure(&mut self.backend, config) {
            log::debug!(
                "Shadow sweep skipped: resolution {} cascades {}",
                config.resolution,
                config.cascade_count
            );
            return false;
        }

        // Recreation may have released the pair the sink points at.
        if let Some(publication) = self.published {
            if !self.atlas.holds(publication.atlas) {
                log::debug!("Published shadow atlas was released, withdrawing it");
                unpublish_atlas(&mut self.sink);
                self.published = None;
            }
        }
        true
    }

    fn compute_level(&mut self, level: u32, config: &CascadeConfig, sweep_pose: Option<Pose>) {
        let pose = match self.settings.pose_sampling {
            PoseSampling::PerSweep => sweep_pose,
            PoseSampling::PerLevel => self.controller.sample_pose(self.settings.camera_drive()),
        };
        self.controller.position(pose);
        self.controller.set_level(level, config);
        let camera = self.controller.fetch();
        composite_level(&mut self.backend, &self.atlas, camera, level, config);
    }

    fn finalize(&mut self, config: &CascadeConfig) {
        write_edge_row(&mut self.backend, &self.atlas, config);

        let Some(atlas) = self.atlas.current() else {
            return;
        };
        let camera = *self.controller.fetch();
        ShadowParameters::derive(&camera, &atlas, config).publish(&mut self.sink);
        self.published = Some(Publication { atlas, camera });
        self.completed_sweeps += 1;
    }
}

impl<B: ShadowBackend, S: ParameterSink> Drop for CascadedShadows<B, S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shadow::params::{ParameterStore, LIGHT_MATRIX, SHADOW_TEX_LINEAR};
    use crate::shadow::recording::RecordingBackend;
    use glam::{Quat, Vec2, Vec3};

    fn shadows(cascade_count: u32) -> CascadedShadows<RecordingBackend, ParameterStore> {
        let settings = ShadowSettings {
            resolution: 64,
            cascade_count,
            follow_reference: false,
            ..ShadowSettings::default()
        };
        CascadedShadows::new(RecordingBackend::new(), ParameterStore::new(), settings)
    }

    #[test]
    fn resume_from_idle_processes_first_level() {
        let mut shadows = shadows(3);
        assert_eq!(shadows.resume(), SweepProgress::Pending { next_level: 1 });
        assert_eq!(shadows.pending_level(), Some(1));
        assert_eq!(shadows.backend().depth_renders(), vec![(2, 32.0)]);
    }

    #[test]
    fn single_cascade_completes_in_one_tick() {
        let mut shadows = shadows(1);
        assert_eq!(shadows.resume(), SweepProgress::Completed);
        assert!(!shadows.is_sweeping());
        assert_eq!(shadows.completed_sweeps(), 1);
    }

    #[test]
    fn begin_then_resume_takes_cascade_count_ticks() {
        let mut shadows = shadows(2);
        assert!(shadows.begin_incremental());
        assert!(shadows.backend().depth_renders().is_empty());
        assert_eq!(shadows.resume(), SweepProgress::Pending { next_level: 0 });
        assert_eq!(shadows.resume(), SweepProgress::Completed);
    }

    #[test]
    fn restart_does_not_swap_again() {
        let mut shadows = shadows(2);
        assert!(shadows.update_full());
        let published = shadows.sink().texture(SHADOW_TEX_LINEAR).unwrap();

        assert!(shadows.begin_incremental());
        assert!(shadows.begin_incremental());
        let targets = shadows.debug_targets();
        assert_eq!(targets.previous.unwrap().linear.id, published);
        assert_ne!(targets.current.unwrap().linear.id, published);
    }

    #[test]
    fn on_frame_deduplicates_and_dispatches() {
        let mut shadows = shadows(2);
        assert_eq!(shadows.on_frame(1), Some(SweepProgress::Completed));
        assert_eq!(shadows.on_frame(1), None);

        shadows.settings_mut().computation = ShadowComputation::AutomaticIncrementalCascade;
        assert_eq!(
            shadows.on_frame(2),
            Some(SweepProgress::Pending { next_level: 0 })
        );

        shadows.settings_mut().computation = ShadowComputation::ManualFromScript;
        assert_eq!(shadows.on_frame(3), None);
        assert_eq!(shadows.pending_level(), Some(0));
    }

    #[test]
    fn manual_pose_republishes_between_sweeps() {
        let mut shadows = shadows(2);
        assert!(shadows.update_full());
        let before = shadows.sink().matrix(LIGHT_MATRIX).unwrap();

        let pose = Pose::new(Vec3::new(0.0, 4.0, 0.0), Quat::from_rotation_x(-1.0));
        shadows.set_shadow_camera_pose(pose);

        let after = shadows.sink().matrix(LIGHT_MATRIX).unwrap();
        assert_ne!(before, after);
        assert!(after.transform_point3(pose.position).abs_diff_eq(Vec3::ZERO, 1e-5));
        assert_eq!(shadows.completed_sweeps(), 1);
    }

    #[test]
    fn camera_pose_mid_sweep_reprojects_published_atlas() {
        let mut shadows = shadows(2);
        assert!(shadows.update_full());
        let published = shadows.sink().texture(SHADOW_TEX_LINEAR);

        assert!(matches!(shadows.resume(), SweepProgress::Pending { .. }));
        let pose = Pose::new(Vec3::X * 3.0, Quat::IDENTITY);
        shadows.set_shadow_camera_pose(pose);
        let moved = shadows.sink().matrix(LIGHT_MATRIX).unwrap();
        assert!(moved.transform_point3(pose.position).abs_diff_eq(Vec3::ZERO, 1e-5));
        assert_eq!(shadows.sink().texture(SHADOW_TEX_LINEAR), published);

        // The in-flight sweep keeps the pose it started with.
        assert_eq!(shadows.resume(), SweepProgress::Completed);
        assert_eq!(shadows.camera().unwrap().pose, Pose::default());
        let finished = shadows.sink().matrix(LIGHT_MATRIX).unwrap();
        assert!(finished.transform_point3(Vec3::ZERO).abs_diff_eq(Vec3::ZERO, 1e-5));

        assert!(shadows.update_full());
        assert_eq!(shadows.camera().unwrap().pose, pose);
    }

    #[test]
    fn render_pose_is_staged_without_republishing() {
        let mut shadows = shadows(3);
        let display = Pose::new(Vec3::Y, Pose::look_rotation(Vec3::new(0.0, -1.0, -1.0)));
        shadows.set_shadow_camera_pose(display);
        assert!(shadows.update_full());
        let shown = shadows.sink().matrix(LIGHT_MATRIX).unwrap();

        let render = Pose::new(Vec3::Y, Pose::look_rotation(Vec3::NEG_Y));
        shadows.set_render_pose(render);
        assert!(shadows.begin_incremental());
        while shadows.is_sweeping() {
            assert_eq!(shadows.sink().matrix(LIGHT_MATRIX), Some(shown));
            shadows.resume();
        }

        let light = shadows.sink().matrix(LIGHT_MATRIX).unwrap();
        assert_ne!(light, shown);
        let along = light.transform_point3(render.position + render.forward() * 10.0);
        assert!(along.truncate().abs_diff_eq(Vec2::ZERO, 1e-5));
        assert!(along.z < 0.0);
    }

    #[test]
    fn display_pose_needs_a_published_atlas() {
        let mut shadows = shadows(2);
        assert!(!shadows.set_display_pose(Pose::default()));
        assert!(shadows.sink().is_empty());

        assert!(shadows.update_full());
        assert!(shadows.set_display_pose(Pose::new(Vec3::Z, Quat::IDENTITY)));
        assert_eq!(shadows.completed_sweeps(), 1);
    }

    #[test]
    fn shutdown_releases_targets_and_withdraws_atlas() {
        let mut shadows = shadows(2);
        assert!(shadows.update_full());
        assert!(shadows.camera().is_some());

        shadows.shutdown();
        assert_eq!(shadows.backend().live_targets(), 0);
        assert!(shadows.camera().is_none());
        assert!(shadows.sink().texture(SHADOW_TEX_LINEAR).is_none());

        assert!(shadows.update_full());
        assert_eq!(shadows.backend().live_targets(), 3);
    }
}
