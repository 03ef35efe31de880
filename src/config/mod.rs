mod app;
mod policy;

pub use app::{AppConfig, DB_PATH_ENV, PROJECT_CONFIG_FILE};
pub use policy::ToolPolicy;
