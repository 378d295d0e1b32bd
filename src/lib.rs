pub mod renderer;
pub mod settings;
pub mod shadow;

pub use settings::{FilterMode, PoseSampling, SettingsError, ShadowComputation, ShadowSettings};
pub use shadow::{CascadedShadows, ParameterStore, Pose, SweepProgress};

/// Installs env_logger at info level. Safe to call more than once.
pub fn init_logging() {
    let _ = env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .try_init();
}
