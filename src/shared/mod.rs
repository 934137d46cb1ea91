pub mod fs_atomic;
pub mod ids;
pub mod logging;
pub mod time;

pub use fs_atomic::atomic_write_file;
pub use ids::{generate_compact_id, validate_identifier_value};
pub use logging::EngineLog;
pub use time::now_millis;
