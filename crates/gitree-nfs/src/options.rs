//! Command line and server settings.

use std::path::PathBuf;

use clap::Parser;
use gitree_core::config::{self, Config};
use gitree_core::handle::MAX_HANDLE_LIMIT;

use crate::adapter::DEFAULT_OPEN_FILES;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 2049;

/// Export a directory of git clones over NFSv3 as /<repository>/<commitish>/<path>.
#[derive(Debug, Clone, Parser)]
#[command(name = "gitree-nfs", version, about)]
pub struct Options {
    /// Directory holding one git clone per repository.
    pub clones: PathBuf,

    /// Address to listen on.
    #[arg(long)]
    pub host: Option<String>,

    /// TCP port to listen on.
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory for the persistent handle store
    /// (default: $XDG_DATA_HOME/gitree/handles).
    #[arg(long)]
    pub storage: Option<PathBuf>,

    /// Number of handles advertised to clients.
    #[arg(long)]
    pub handle_limit: Option<u64>,

    /// Open files kept between reads.
    #[arg(long)]
    pub open_files: Option<usize>,

    /// Log filter used when RUST_LOG is unset (e.g. "debug").
    #[arg(long)]
    pub log_level: Option<String>,

    /// Config file (default: $XDG_CONFIG_HOME/gitree/config.toml).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// Options after merging the config file; flags win.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub clones: PathBuf,
    pub host: String,
    pub port: u16,
    pub storage: PathBuf,
    pub handle_limit: u64,
    pub open_files: usize,
    pub log_level: String,
}

impl Options {
    pub fn settings(&self, config: &Config) -> Settings {
        let nfs = &config.nfs;
        Settings {
            clones: self.clones.clone(),
            host: self
                .host
                .clone()
                .or_else(|| nfs.host.clone())
                .unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: self.port.or(nfs.port).unwrap_or(DEFAULT_PORT),
            storage: self
                .storage
                .clone()
                .or_else(|| nfs.storage.clone())
                .unwrap_or_else(config::handle_store_dir),
            handle_limit: self
                .handle_limit
                .or(nfs.handle_limit)
                .unwrap_or(MAX_HANDLE_LIMIT),
            open_files: self
                .open_files
                .or(nfs.open_files)
                .unwrap_or(DEFAULT_OPEN_FILES),
            log_level: self
                .log_level
                .clone()
                .or_else(|| config.log_level.clone())
                .unwrap_or_else(|| "info".to_string()),
        }
    }
}

impl Settings {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Options {
        Options::try_parse_from(std::iter::once("gitree-nfs").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn defaults() {
        let settings = parse(&["/clones"]).settings(&Config::default());
        assert_eq!(settings.address(), "127.0.0.1:2049");
        assert_eq!(settings.storage, config::handle_store_dir());
        assert_eq!(settings.handle_limit, MAX_HANDLE_LIMIT);
        assert_eq!(settings.open_files, DEFAULT_OPEN_FILES);
        assert_eq!(settings.log_level, "info");
    }

    #[test]
    fn config_fills_gaps_and_flags_win() {
        let config = Config::from_toml(
            "[nfs]\nhost = \"0.0.0.0\"\nport = 12049\nstorage = \"/srv/h\"\nhandle_limit = 1000\n",
        )
        .unwrap();
        let settings = parse(&["/clones", "--port", "3049", "--open-files", "4"]).settings(&config);
        assert_eq!(settings.address(), "0.0.0.0:3049");
        assert_eq!(settings.storage, PathBuf::from("/srv/h"));
        assert_eq!(settings.handle_limit, 1000);
        assert_eq!(settings.open_files, 4);
    }

    #[test]
    fn clones_is_required() {
        assert!(Options::try_parse_from(["gitree-nfs"]).is_err());
    }
}
