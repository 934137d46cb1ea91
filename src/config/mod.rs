pub mod error;
pub mod load;
pub mod paths;
pub mod save;
pub mod settings;

pub use error::ConfigError;
pub use load::{load_default_settings, load_settings};
pub use paths::{
    default_settings_path, default_state_root, ENGINE_SETTINGS_FILE_NAME, GLOBAL_STATE_DIR,
};
pub use save::save_settings;
pub use settings::{AdmissionSettings, BudgetSettings, CheckpointSettings, EngineSettings};
