use std::sync::Arc;

use glam::{Mat4, Quat, Vec3};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use vsm_shadows::renderer::{CasterMesh, ShadowCaster, ShadowUniform, WgpuShadowBackend};
use vsm_shadows::shadow::params::{SHADOW_TEX_LINEAR, SHADOW_TEX_SQUARED};
use vsm_shadows::shadow::{pick_main_light, DirectionalLight};
use vsm_shadows::{CascadedShadows, ParameterStore, Pose, ShadowComputation, ShadowSettings};

const FRAMES: u64 = 12;

fn build_scene(backend: &mut WgpuShadowBackend) {
    let cube = Arc::new(CasterMesh::cuboid(backend.device(), Vec3::splat(0.5)));
    let ground = Arc::new(CasterMesh::cuboid(backend.device(), Vec3::new(40.0, 0.1, 40.0)));

    backend.add_caster(ShadowCaster::opaque(
        ground,
        Mat4::from_translation(Vec3::new(0.0, -0.1, 0.0)),
    ));
    for i in 0..5 {
        let model = Mat4::from_translation(Vec3::new(i as f32 * 2.5 - 5.0, 0.5, 0.0));
        backend.add_caster(ShadowCaster::opaque(cube.clone(), model));
    }
    backend.add_caster(ShadowCaster {
        mesh: cube,
        model: Mat4::from_translation(Vec3::new(0.0, 2.0, 3.0)),
        layer: 0,
        transparent: true,
    });
}

fn log_published(shadows: &CascadedShadows<WgpuShadowBackend, ParameterStore>) {
    let store = shadows.sink();
    let uniform = ShadowUniform::from_store(store);
    log::info!(
        "Published atlas {:?}/{:?}, inv cascades {}, transparent {}",
        store.texture(SHADOW_TEX_LINEAR),
        store.texture(SHADOW_TEX_SQUARED),
        uniform.params[0],
        uniform.params[1]
    );
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    vsm_shadows::init_logging();

    let settings = ShadowSettings::load();
    log::info!("Shadow settings: {:?}", settings);

    let mut backend = pollster::block_on(WgpuShadowBackend::request_headless())?;
    build_scene(&mut backend);

    let mut shadows = CascadedShadows::new(backend, ParameterStore::new(), settings);

    // Automatic modes: the sun drives the camera from the viewer position.
    let lights = [
        DirectionalLight {
            direction: Vec3::new(0.3, -1.0, 0.2),
            intensity: 3.0,
        },
        DirectionalLight {
            direction: Vec3::new(-1.0, -0.2, 0.0),
            intensity: 0.4,
        },
    ];
    let sun = pick_main_light(&lights).copied();
    let viewer = Vec3::new(0.0, 1.7, 8.0);

    for frame in 0..FRAMES {
        shadows.set_reference_pose(sun.map(|light| Pose::from_light(viewer, light.direction)));
        if let Some(progress) = shadows.on_frame(frame) {
            log::debug!("Frame {}: {:?}", frame, progress);
        }
    }
    log_published(&shadows);

    // Script-driven: render from a random direction while materials keep
    // sampling the previous atlas with the previous pose. Completing the
    // sweep publishes the new atlas together with its render pose.
    shadows.settings_mut().computation = ShadowComputation::ManualFromScript;
    shadows.settings_mut().follow_reference = false;

    let mut rng = SmallRng::seed_from_u64(7);
    let forward = Pose::look_rotation(Vec3::NEG_Z);
    let down = Pose::look_rotation(Vec3::NEG_Y);
    let mut display = Pose::look_rotation(Vec3::new(0.0, -1.0, -1.0));

    for _ in 0..3 {
        let render: Quat = forward.slerp(down, rng.gen_range(0.1..0.9));
        shadows.set_render_pose(Pose::new(Vec3::Y, render));
        if !shadows.begin_incremental() {
            log::warn!("Shadow sweep disabled by settings");
            break;
        }
        while shadows.is_sweeping() {
            shadows.resume();
        }
        display = render;
        log_published(&shadows);
    }

    shadows.set_shadow_camera_pose(Pose::new(Vec3::Y, display));
    shadows.update_full();
    log_published(&shadows);

    log::info!("Completed {} sweeps", shadows.completed_sweeps());
    shadows.shutdown();
    Ok(())
}

fn main() {
    if let Err(err) = run() {
        eprintln!("Application error: {err}");
    }
}
