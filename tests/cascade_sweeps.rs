use glam::{Quat, Vec3};

use vsm_shadows::shadow::params::{
    ParamValue, ParameterSink, ParameterStore, LIGHT_MATRIX, SHADOW_TEX_LINEAR, SHADOW_TEX_SQUARED,
};
use vsm_shadows::shadow::recording::{BackendEvent, RecordingBackend};
use vsm_shadows::shadow::{AtlasBand, CascadedShadows, MomentMode, Pose, SweepProgress};
use vsm_shadows::ShadowSettings;

/// Parameter sink that also remembers every write, to count publishes.
#[derive(Default)]
struct CountingSink {
    store: ParameterStore,
    writes: Vec<&'static str>,
}

impl CountingSink {
    fn publishes(&self) -> usize {
        self.writes.iter().filter(|key| **key == SHADOW_TEX_LINEAR).count()
    }
}

impl ParameterSink for CountingSink {
    fn set(&mut self, key: &'static str, value: ParamValue) {
        self.writes.push(key);
        self.store.set(key, value);
    }

    fn remove(&mut self, key: &'static str) {
        self.store.remove(key);
    }
}

type Shadows = CascadedShadows<RecordingBackend, CountingSink>;

fn shadows(resolution: u32, cascade_count: u32) -> Shadows {
    let settings = ShadowSettings {
        resolution,
        cascade_count,
        follow_reference: true,
        ..ShadowSettings::default()
    };
    let mut shadows = CascadedShadows::new(RecordingBackend::new(), CountingSink::default(), settings);
    shadows.set_reference_pose(Some(Pose::from_light(Vec3::ZERO, Vec3::new(0.2, -1.0, 0.1))));
    shadows
}

fn levels_rendered(shadows: &Shadows) -> Vec<u32> {
    shadows
        .backend()
        .depth_renders()
        .into_iter()
        .map(|(level, _)| level)
        .collect()
}

/// Bands written into the linear channel of the current atlas, in order.
fn linear_bands(shadows: &Shadows) -> Vec<AtlasBand> {
    let pair = shadows.debug_targets().current.expect("atlas allocated");
    shadows
        .backend()
        .surface(pair.linear.id)
        .expect("linear channel alive")
        .band_writes()
        .map(|(band, _)| band)
        .collect()
}

#[test]
fn full_update_scenario_four_cascades() {
    let mut shadows = shadows(512, 4);
    assert!(shadows.update_full());

    let pair = shadows.debug_targets().current.unwrap();
    assert_eq!((pair.linear.width, pair.linear.height), (512, 2048));
    assert_eq!((pair.squared.width, pair.squared.height), (512, 2048));

    let bands = linear_bands(&shadows);
    assert_eq!(bands.len(), 5);
    for (band, level) in bands.iter().zip([3u32, 2, 1, 0]) {
        assert_eq!(*band, AtlasBand::level(level, 4));
        assert_eq!(band.rows(2048), (level * 512, (level + 1) * 512));
    }
    assert_eq!(bands[4].rows(2048), (2047, 2048));

    assert_eq!(shadows.sink().publishes(), 1);
    assert_eq!(shadows.sink().store.texture(SHADOW_TEX_LINEAR), Some(pair.linear.id));
    assert_eq!(shadows.sink().store.texture(SHADOW_TEX_SQUARED), Some(pair.squared.id));
}

#[test]
fn every_band_written_once_after_incremental_sweep() {
    let mut shadows = shadows(128, 5);
    while shadows.resume() != SweepProgress::Completed {}

    let bands = linear_bands(&shadows);
    for level in 0..5 {
        let count = bands.iter().filter(|b| **b == AtlasBand::level(level, 5)).count();
        assert_eq!(count, 1, "level {level}");
    }
    assert_eq!(bands.last().unwrap().rows(640), (639, 640));
}

#[test]
fn edge_row_duplicates_level_zero_depth() {
    let mut shadows = shadows(64, 3);
    assert!(shadows.update_full());

    let pair = shadows.debug_targets().current.unwrap();
    let writes: Vec<_> = shadows
        .backend()
        .surface(pair.squared.id)
        .unwrap()
        .band_writes()
        .collect();
    let (_, level_zero_depth) = writes[2];
    let (edge, edge_depth) = writes[3];
    assert_eq!(edge.rows(192), (191, 192));
    assert_eq!(edge_depth, level_zero_depth);
    assert_eq!(edge_depth, Some(8.0));
}

#[test]
fn incremental_scenario_three_cascades() {
    let mut shadows = shadows(64, 3);
    assert!(shadows.update_full());
    let before_matrix = shadows.sink().store.matrix(LIGHT_MATRIX).unwrap();
    let before_atlas = shadows.debug_targets().current.unwrap();

    let moved = Pose::from_light(Vec3::new(10.0, 0.0, -4.0), Vec3::new(-0.5, -1.0, 0.0));
    shadows.set_reference_pose(Some(moved));

    for call in 1..=2 {
        assert!(matches!(shadows.resume(), SweepProgress::Pending { .. }), "call {call}");
        assert_eq!(shadows.sink().store.matrix(LIGHT_MATRIX), Some(before_matrix));
        assert_eq!(shadows.sink().publishes(), 1);
    }

    assert_eq!(shadows.resume(), SweepProgress::Completed);
    let after_matrix = shadows.sink().store.matrix(LIGHT_MATRIX).unwrap();
    assert_ne!(after_matrix, before_matrix);
    assert!(after_matrix
        .transform_point3(moved.position)
        .abs_diff_eq(Vec3::ZERO, 1e-4));

    let after_atlas = shadows.debug_targets().current.unwrap();
    assert_ne!(after_atlas, before_atlas);
    assert_eq!(
        shadows.sink().store.texture(SHADOW_TEX_LINEAR),
        Some(after_atlas.linear.id)
    );
    assert_eq!(shadows.sink().publishes(), 2);
}

#[test]
fn sampled_atlas_untouched_during_incremental_sweep() {
    let mut shadows = shadows(64, 3);
    assert!(shadows.update_full());
    let published = shadows.sink().store.texture(SHADOW_TEX_LINEAR).unwrap();
    let snapshot = shadows.backend().surface(published).unwrap().clone();

    shadows.resume();
    shadows.resume();
    assert_eq!(shadows.backend().surface(published), Some(&snapshot));
    assert_eq!(shadows.debug_targets().previous.unwrap().linear.id, published);

    // The next sweep writes into the pair the one before it left behind.
    shadows.resume();
    shadows.resume();
    let rewritten = shadows.backend().surface(published).unwrap();
    assert_eq!(rewritten.writes.len(), snapshot.writes.len() + 1);
}

#[test]
fn levels_processed_in_descending_order() {
    let mut shadows = shadows(32, 6);
    while shadows.resume() != SweepProgress::Completed {}
    assert_eq!(levels_rendered(&shadows), vec![5, 4, 3, 2, 1, 0]);

    shadows.backend_mut().clear_events();
    assert!(shadows.update_full());
    assert_eq!(levels_rendered(&shadows), vec![5, 4, 3, 2, 1, 0]);
}

#[test]
fn live_cascade_change_waits_for_next_sweep() {
    let mut shadows = shadows(32, 3);
    assert_eq!(shadows.resume(), SweepProgress::Pending { next_level: 1 });

    shadows.settings_mut().cascade_count = 5;
    assert_eq!(shadows.resume(), SweepProgress::Pending { next_level: 0 });
    assert_eq!(shadows.resume(), SweepProgress::Completed);
    assert_eq!(levels_rendered(&shadows), vec![2, 1, 0]);
    assert_eq!(shadows.sink().store.float("VSM_InvNumCascades"), Some(1.0 / 3.0));

    shadows.backend_mut().clear_events();
    while shadows.resume() != SweepProgress::Completed {}
    assert_eq!(levels_rendered(&shadows), vec![4, 3, 2, 1, 0]);
    assert_eq!(shadows.debug_targets().current.unwrap().linear.height, 160);
}

#[test]
fn full_update_discards_partial_incremental_sweep() {
    let mut shadows = shadows(64, 3);
    assert!(shadows.begin_incremental());
    assert_eq!(shadows.resume(), SweepProgress::Pending { next_level: 1 });

    shadows.backend_mut().clear_events();
    assert!(shadows.update_full());
    assert!(!shadows.is_sweeping());
    assert_eq!(levels_rendered(&shadows), vec![2, 1, 0]);
    assert_eq!(shadows.sink().publishes(), 1);

    // Nothing left to resume: the next tick starts a fresh sweep.
    shadows.backend_mut().clear_events();
    assert_eq!(shadows.resume(), SweepProgress::Pending { next_level: 1 });
    assert_eq!(levels_rendered(&shadows), vec![2]);
}

#[test]
fn degenerate_config_is_a_silent_no_op() {
    for (resolution, cascades) in [(0, 4), (512, 0), (0, 0)] {
        let mut shadows = shadows(resolution, cascades);
        assert!(!shadows.update_full());
        assert_eq!(shadows.resume(), SweepProgress::Aborted);
        assert!(!shadows.begin_incremental());
        assert_eq!(shadows.backend().live_targets(), 0);
        assert!(shadows.backend().events().is_empty());
        assert_eq!(shadows.sink().publishes(), 0);
    }
}

#[test]
fn degenerate_config_keeps_previous_publication() {
    let mut shadows = shadows(64, 2);
    assert!(shadows.update_full());
    let targets = shadows.debug_targets();
    let published = shadows.sink().store.texture(SHADOW_TEX_LINEAR);

    shadows.settings_mut().resolution = 0;
    assert!(!shadows.update_full());
    assert_eq!(shadows.resume(), SweepProgress::Aborted);
    assert_eq!(shadows.debug_targets(), targets);
    assert_eq!(shadows.sink().store.texture(SHADOW_TEX_LINEAR), published);
}

#[test]
fn rejected_full_update_leaves_sweep_in_flight() {
    let mut shadows = shadows(64, 3);
    assert!(shadows.update_full());
    let published = shadows.sink().store.texture(SHADOW_TEX_LINEAR).unwrap();
    let snapshot = shadows.backend().surface(published).unwrap().clone();
    assert_eq!(shadows.resume(), SweepProgress::Pending { next_level: 1 });

    shadows.settings_mut().resolution = 0;
    assert!(!shadows.update_full());
    assert!(shadows.is_sweeping());

    shadows.settings_mut().resolution = 64;
    assert!(shadows.begin_incremental());
    while shadows.is_sweeping() {
        assert_eq!(shadows.backend().surface(published), Some(&snapshot));
        assert_eq!(shadows.sink().store.texture(SHADOW_TEX_LINEAR), Some(published));
        shadows.resume();
    }

    assert_eq!(shadows.backend().surface(published), Some(&snapshot));
    assert_ne!(shadows.sink().store.texture(SHADOW_TEX_LINEAR), Some(published));
    assert_eq!(shadows.sink().publishes(), 2);
}

#[test]
fn resolution_change_withdraws_released_atlas() {
    let mut shadows = shadows(64, 2);
    assert!(shadows.update_full());

    shadows.settings_mut().resolution = 128;
    assert_eq!(shadows.resume(), SweepProgress::Pending { next_level: 0 });
    assert!(shadows.sink().store.texture(SHADOW_TEX_LINEAR).is_none());

    assert_eq!(shadows.resume(), SweepProgress::Completed);
    let pair = shadows.debug_targets().current.unwrap();
    assert_eq!(pair.linear.width, 128);
    assert_eq!(shadows.sink().store.texture(SHADOW_TEX_LINEAR), Some(pair.linear.id));
}

#[test]
fn missing_reference_keeps_last_pose() {
    let mut shadows = shadows(32, 2);
    assert!(shadows.update_full());
    let pose = shadows.camera().unwrap().pose;

    shadows.set_reference_pose(None);
    assert!(shadows.update_full());
    assert_eq!(shadows.camera().unwrap().pose, pose);
    assert_eq!(shadows.sink().publishes(), 2);
}

#[test]
fn per_level_sampling_tracks_moving_reference() {
    let mut shadows = shadows(32, 3);
    shadows.settings_mut().pose_sampling = vsm_shadows::PoseSampling::PerLevel;

    let first = Pose::new(Vec3::X, Quat::IDENTITY);
    shadows.set_reference_pose(Some(first));
    shadows.resume();
    assert_eq!(shadows.camera().unwrap().pose, first);

    let second = Pose::new(Vec3::Y, Quat::IDENTITY);
    shadows.set_reference_pose(Some(second));
    shadows.resume();
    assert_eq!(shadows.camera().unwrap().pose, second);
}

#[test]
fn per_sweep_sampling_freezes_reference() {
    let mut shadows = shadows(32, 3);
    let first = Pose::new(Vec3::X, Quat::IDENTITY);
    shadows.set_reference_pose(Some(first));
    shadows.resume();

    shadows.set_reference_pose(Some(Pose::new(Vec3::Y, Quat::IDENTITY)));
    shadows.resume();
    shadows.resume();
    assert_eq!(shadows.camera().unwrap().pose, first);
}

#[test]
fn encodes_alternate_channels_per_level() {
    let mut shadows = shadows(32, 2);
    assert!(shadows.update_full());

    let modes: Vec<MomentMode> = shadows
        .backend()
        .events()
        .iter()
        .filter_map(|event| match event {
            BackendEvent::Encode { mode, .. } => Some(*mode),
            _ => None,
        })
        .collect();
    assert_eq!(
        modes,
        [MomentMode::Linear, MomentMode::Squared].repeat(3)
    );
    assert_eq!(shadows.backend().active_surface_id(), None);
    assert_eq!(shadows.backend().rejected_draws(), 0);
}
