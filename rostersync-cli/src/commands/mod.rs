pub mod column;
pub mod config;
pub mod coord;
pub mod daemon;
pub mod init;
pub mod layout;
pub mod reconcile;
pub mod sheet;
pub mod status;

use std::future::Future;
use std::path::PathBuf;

use anyhow::{Context, Result};

pub(crate) fn home() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

/// Drive one async sync-crate call to completion on a single-threaded runtime.
pub(crate) fn block_on<F: Future>(future: F) -> Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    Ok(runtime.block_on(future))
}
