//! Command implementations.

pub mod add;
pub mod cleanup;
pub mod init;
pub mod list;
pub mod logs;
pub mod remove;
pub mod start;
pub mod status;
pub mod stop;
pub mod sync_labels;

use std::path::Path;

use anyhow::{Context, Result};
use swarm_core::Config;
use swarm_core::config::config_file_path;

/// Load and validate the config, pointing at `init` when it is missing.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let shown = path
        .map(Path::to_path_buf)
        .unwrap_or_else(config_file_path);
    Config::load(path).with_context(|| {
        format!(
            "failed to load config from {} (run `dev-swarm init` to create one)",
            shown.display()
        )
    })
}

/// The config if it loads, otherwise defaults anchored at the same directory.
///
/// Lock and log paths only depend on the directory, so commands that inspect
/// a running instance work even with a broken config file.
pub fn config_or_defaults(path: Option<&Path>) -> Config {
    match Config::load(path) {
        Ok(config) => config,
        Err(_) => {
            let mut config = Config::default();
            if let Some(dir) = path.and_then(Path::parent) {
                config.config_dir = dir.to_path_buf();
            }
            config
        }
    }
}
