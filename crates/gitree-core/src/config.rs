//! Configuration file and XDG paths.
//!
//! | Purpose | XDG Variable | Default | gitree Path |
//! |---------|--------------|---------|-------------|
//! | Config | `$XDG_CONFIG_HOME` | `~/.config` | `$XDG_CONFIG_HOME/gitree/config.toml` |
//! | Handle store | `$XDG_DATA_HOME` | `~/.local/share` | `$XDG_DATA_HOME/gitree/handles/` |
//!
//! Every key is optional; command-line flags override file values.
//!
//! ```toml
//! log_level = "debug"
//!
//! [fuse]
//! fs_name = "gitree"
//! allow_other = false
//!
//! [nfs]
//! host = "127.0.0.1"
//! port = 2049
//! storage = "/var/lib/gitree/handles"
//! handle_limit = 1000000
//! open_files = 64
//! ```

use std::path::{Path, PathBuf};

use directories::BaseDirs;
use serde::Deserialize;

use crate::error::{Error, Result};

/// Parsed `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// `tracing` filter used when `RUST_LOG` is unset.
    pub log_level: Option<String>,
    pub fuse: FuseConfig,
    pub nfs: NfsConfig,
}

/// `[fuse]` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FuseConfig {
    pub fs_name: Option<String>,
    pub allow_other: Option<bool>,
}

/// `[nfs]` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NfsConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub storage: Option<PathBuf>,
    pub handle_limit: Option<u64>,
    pub open_files: Option<usize>,
}

impl Config {
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::InvalidArgument(format!("config: {e}")))
    }

    /// Load configuration.
    ///
    /// An explicit `path` must exist. Without one, the default location is
    /// read when present and an empty configuration is used otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (config_file(), false),
        };
        match std::fs::read_to_string(&path) {
            Ok(text) => {
                tracing::debug!(path = %path.display(), "loaded config file");
                Self::from_toml(&text)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => Ok(Self::default()),
            Err(e) => Err(Error::InvalidArgument(format!(
                "reading config {}: {e}",
                path.display()
            ))),
        }
    }
}

/// Get the config directory.
///
/// Uses `$XDG_CONFIG_HOME/gitree` or falls back to `~/.config/gitree`.
pub fn config_dir() -> PathBuf {
    BaseDirs::new()
        .map(|d| d.config_dir().to_path_buf())
        .unwrap_or_else(|| home_fallback().join(".config"))
        .join("gitree")
}

/// Get the data directory for persistent state.
///
/// Uses `$XDG_DATA_HOME/gitree` or falls back to `~/.local/share/gitree`.
pub fn data_dir() -> PathBuf {
    BaseDirs::new()
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| home_fallback().join(".local").join("share"))
        .join("gitree")
}

pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Default location of the network handle store.
pub fn handle_store_dir() -> PathBuf {
    data_dir().join("handles")
}

fn home_fallback() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}
