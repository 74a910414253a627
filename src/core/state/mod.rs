pub mod app_state;
pub mod settings;

pub use app_state::ResolverState;
pub use settings::{default_data_dir, OfficialSettings, ResolverSettings, APP_DIR_NAME, SETTINGS_FILE};
