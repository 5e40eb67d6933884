//! gitree-nfs entry point.
//!
//! ```bash
//! gitree-nfs ~/clones --port 12049
//! mount -t nfs -o vers=3,tcp,port=12049,mountport=12049,nolock localhost:/ /mnt/git
//! ```

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use nfsserve::tcp::{NFSTcp, NFSTcpListener};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use gitree_core::config::Config;
use gitree_core::{GitFileSystem, GitProviderFactory, HandleRegistry, Root};
use gitree_nfs::{NfsAdapter, Options};

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

    let handles = HandleRegistry::open(&settings.storage, settings.handle_limit)
        .with_context(|| format!("Failed to open handle store {}", settings.storage.display()))?;
    // nfsserve has no notion of a handle limit; the clamped value is reported only.
    let handle_limit = handles.handle_limit();
    let root = Arc::new(Root::new(&settings.clones, Arc::new(GitProviderFactory)));
    let adapter = NfsAdapter::new(
        GitFileSystem::new(root),
        Arc::new(handles),
        settings.open_files,
    )
    .context("Failed to register the root handle")?;

    let address = settings.address();
    let listener = NFSTcpListener::bind(&address, adapter)
        .await
        .with_context(|| format!("Failed to listen on {address}"))?;

    tracing::info!(
        clones = %settings.clones.display(),
        address = %address,
        storage = %settings.storage.display(),
        handle_limit,
        "serving"
    );

    tokio::select! {
        result = listener.handle_forever() => result.context("NFS server stopped")?,
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to wait for Ctrl-C")?;
            tracing::info!("shutting down");
        }
    }
    Ok(())
}
