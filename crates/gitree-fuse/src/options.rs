//! Command line and mount options.

use std::path::PathBuf;

use clap::Parser;
use fuser::MountOption;
use gitree_core::config::Config;

const DEFAULT_FS_NAME: &str = "gitree";
const SUBTYPE: &str = "gitreefs";

/// Mount a directory of git clones as /<repository>/<commitish>/<path>.
#[derive(Debug, Clone, Parser)]
#[command(name = "gitree-fuse", version, about)]
pub struct Options {
    /// Directory holding one git clone per repository.
    pub clones: PathBuf,

    /// Where to mount the filesystem.
    pub mountpoint: PathBuf,

    /// Filesystem name shown in the mount table.
    #[arg(long)]
    pub fs_name: Option<String>,

    /// Let users other than the mounting one access the filesystem.
    #[arg(long)]
    pub allow_other: bool,

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
    pub mountpoint: PathBuf,
    pub fs_name: String,
    pub allow_other: bool,
    pub log_level: String,
}

impl Options {
    pub fn settings(&self, config: &Config) -> Settings {
        Settings {
            clones: self.clones.clone(),
            mountpoint: self.mountpoint.clone(),
            fs_name: self
                .fs_name
                .clone()
                .or_else(|| config.fuse.fs_name.clone())
                .unwrap_or_else(|| DEFAULT_FS_NAME.to_string()),
            allow_other: self.allow_other || config.fuse.allow_other.unwrap_or(false),
            log_level: self
                .log_level
                .clone()
                .or_else(|| config.log_level.clone())
                .unwrap_or_else(|| "info".to_string()),
        }
    }
}

impl Settings {
    pub fn mount_options(&self) -> Vec<MountOption> {
        let mut options = vec![
            MountOption::RO,
            MountOption::FSName(self.fs_name.clone()),
            MountOption::Subtype(SUBTYPE.to_string()),
            MountOption::NoExec,
        ];
        if self.allow_other {
            options.push(MountOption::AllowOther);
        }
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Options {
        Options::try_parse_from(std::iter::once("gitree-fuse").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn defaults() {
        let settings = parse(&["/clones", "/mnt/git"]).settings(&Config::default());
        assert_eq!(settings.fs_name, "gitree");
        assert!(!settings.allow_other);
        assert_eq!(settings.log_level, "info");
        assert!(settings.mount_options().contains(&MountOption::RO));
        assert!(!settings.mount_options().contains(&MountOption::AllowOther));
    }

    #[test]
    fn flags_override_config() {
        let config = Config::from_toml("log_level = \"warn\"\n[fuse]\nfs_name = \"cfg\"\nallow_other = true\n").unwrap();
        let settings = parse(&["/c", "/m", "--fs-name", "cli"]).settings(&config);
        assert_eq!(settings.fs_name, "cli");
        assert!(settings.allow_other);
        assert_eq!(settings.log_level, "warn");
        assert!(settings.mount_options().contains(&MountOption::AllowOther));
    }

    #[test]
    fn mountpoint_is_required() {
        assert!(Options::try_parse_from(["gitree-fuse", "/clones"]).is_err());
    }
}
