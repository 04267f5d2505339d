// ─── Orchestrator ───
// Composes the clients, scanner, diff engine, downloader, and merger into
// the status, init, and update operations.

mod init;
mod mode;
mod resolve;
mod run;
mod scan;
mod status;

pub use init::{init, InitOptions, InitOutcome};
pub use run::update;
pub use status::{status, StatusOutcome};

use std::path::PathBuf;

use crate::core::diff::{Change, Summary};
use crate::core::downloader::DEFAULT_CONCURRENCY;
use crate::core::error::UpdaterResult;
use crate::core::index::PackageIndex;
use crate::core::manifest::{ManifestSnapshot, Mode};

/// Options for an update run.
#[derive(Debug, Clone, Default)]
pub struct Options {
    pub instance_dir: PathBuf,
    pub dry_run: bool,
    pub force: bool,
    /// Override manifest pins with newer versions from the index, Maven, and
    /// upstream releases.
    pub latest: bool,
    /// Zero means the default worker count.
    pub concurrency: usize,
    pub auth_token: Option<String>,
    pub cache_dir: Option<PathBuf>,
    pub no_cache: bool,
}

impl Options {
    pub(crate) fn effective_concurrency(&self) -> usize {
        if self.concurrency == 0 {
            DEFAULT_CONCURRENCY
        } else {
            self.concurrency
        }
    }
}

/// Remote documents prefetched once and reused across sequential profile
/// updates to avoid redundant network fetches.
#[derive(Debug)]
pub struct SharedData {
    pub mode: Mode,
    pub manifest: ManifestSnapshot,
    pub index: PackageIndex,
}

/// Fetches the manifest and package index once for reuse.
pub async fn fetch_shared_data(client: &reqwest::Client, mode: Mode) -> UpdaterResult<SharedData> {
    Ok(SharedData {
        mode,
        manifest: ManifestSnapshot::fetch(client, mode).await?,
        index: PackageIndex::fetch(client).await?,
    })
}

/// What an update run did (or would do).
#[derive(Debug, Default)]
pub struct UpdateOutcome {
    pub old_version: String,
    pub new_version: String,
    pub summary: Summary,
    pub changes: Vec<Change>,
    pub up_to_date: bool,
    pub config_merged: usize,
    pub config_conflict: usize,
    pub conflict_files: Vec<String>,
}
