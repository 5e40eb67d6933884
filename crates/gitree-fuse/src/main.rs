//! gitree-fuse entry point.
//!
//! ```bash
//! gitree-fuse ~/clones /mnt/git
//! cat /mnt/git/myrepo/main/README.md
//! ```

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use gitree_core::config::Config;
use gitree_core::{GitProviderFactory, Root};
use gitree_fuse::{GitreeFs, KernelAdapter, Options};

#[tokio::main]
async fn main() -> Result<()> {
    let options = Options::parse();
    let config = Config::load(options.config.as_deref()).context("Failed to load configuration")?;
    let settings = options.settings(&config);

    // RUST_LOG wins over --log-level / config
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.log_level))
        .context("Invalid log level")?;
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    if !settings.clones.is_dir() {
        bail!("clones directory {} is not a directory", settings.clones.display());
    }
    if !settings.mountpoint.is_dir() {
        bail!("mount point {} is not a directory", settings.mountpoint.display());
    }

    let root = Arc::new(Root::new(&settings.clones, Arc::new(GitProviderFactory)));
    let adapter = Arc::new(KernelAdapter::new(root));
    let fs = GitreeFs::new(adapter, tokio::runtime::Handle::current());

    let session = fuser::spawn_mount2(fs, &settings.mountpoint, &settings.mount_options())
        .with_context(|| format!("Failed to mount at {}", settings.mountpoint.display()))?;

    tracing::info!(
        clones = %settings.clones.display(),
        mountpoint = %settings.mountpoint.display(),
        fs_name = %settings.fs_name,
        "mounted"
    );

    wait_for_shutdown().await?;

    tracing::info!("unmounting");
    drop(session);
    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("Failed to install SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("Failed to wait for Ctrl-C")?,
        _ = terminate.recv() => {}
    }
    Ok(())
}
