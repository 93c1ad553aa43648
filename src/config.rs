//! Configuration file loading.
//!
//! `luna.yaml` selects the datastore backend and its location:
//!
//! ```yaml
//! store:
//!   backend: sled
//!   path: /var/lib/luna/store
//! ```
//!
//! A missing file falls back to the defaults; a present but malformed
//! file is an error.

use std::path::{Path, PathBuf};

use color_eyre::Result;
use log::info;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/luna/luna.yaml";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LunaConfig {
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            backend: StoreBackend::default(),
            path: default_store_path(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Sled,
    /// Throwaway in-memory store, nothing survives the process.
    Memory,
}

fn default_store_path() -> PathBuf {
    PathBuf::from("/var/lib/luna/store")
}

/// Load the configuration, falling back to defaults when the file does
/// not exist.
pub fn load_config(config_path: &Path) -> Result<LunaConfig> {
    if !config_path.exists() {
        info!(
            "no configuration at {:?}, using built-in defaults",
            config_path
        );
        return Ok(LunaConfig::default());
    }

    let file = std::fs::File::open(config_path)?;
    let config: LunaConfig = serde_yaml::from_reader(file)?;
    info!("loaded configuration from {:?}", config_path);
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_missing_file_gives_defaults() {
        let config = load_config(Path::new("/nonexistent/luna.yaml")).unwrap();
        assert_eq!(config.store.backend, StoreBackend::Sled);
        assert_eq!(config.store.path, PathBuf::from("/var/lib/luna/store"));
    }

    #[test]
    fn test_parse_yaml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "store:\n  backend: memory\n  path: /tmp/luna").unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.store.path, PathBuf::from("/tmp/luna"));
    }

    #[test]
    fn test_malformed_yaml_is_an_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "store: [not, a, map]").unwrap();
        assert!(load_config(file.path()).is_err());
    }
}
