//! Initialize the configuration directory: create ~/.relay, a default config, and the data tree.
//!
//! Data layout: `credentials/<id>/`, `sessions/<id>.json`, `media/` (with `media/status/`),
//! and `unclassified.jsonl`, all under the resolved data directory.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::{self, RelaySettings};

/// Ensure the configuration directory has been initialized (config file and data directory exist).
pub fn require_initialized(config_path: &Path, config: &config::Config) -> Result<()> {
    if !config_path.exists() {
        anyhow::bail!(
            "configuration not initialized; run `relay init` first (config file not found: {})",
            config_path.display()
        );
    }
    let data_dir = config::resolve_data_dir(config);
    if !data_dir.exists() {
        anyhow::bail!(
            "configuration not initialized; run `relay init` first (data directory not found: {})",
            data_dir.display()
        );
    }
    Ok(())
}

/// Create the config directory and default files if they do not exist.
/// - Creates the config directory (parent of config file path).
/// - Writes `config.json` with `{}` if missing.
/// - Creates the data directory tree named by the (possibly just written) config.
pub fn init_config_dir(config_path: &Path) -> Result<PathBuf> {
    let config_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;

    if !config_path.exists() {
        std::fs::write(config_path, b"{}")
            .with_context(|| format!("writing default config to {}", config_path.display()))?;
        log::info!("created default config at {}", config_path.display());
    }

    let (config, _) = config::load_config(Some(config_path.to_path_buf()))?;
    let settings = RelaySettings::with_data_dir(config::resolve_data_dir(&config));
    for dir in [
        settings.credentials_dir,
        settings.session_config_dir,
        settings.media_dir.join("status"),
    ] {
        if !dir.exists() {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("creating data directory {}", dir.display()))?;
            log::info!("created {}", dir.display());
        } else {
            log::debug!("{} already exists, skipping", dir.display());
        }
    }

    Ok(config_dir.to_path_buf())
}
