// Read-only comparison of the current state against the latest manifest.

use std::path::Path;

use tracing::debug;

use crate::core::diff::{self, Change, Summary};
use crate::core::error::UpdaterResult;
use crate::core::index::PackageIndex;
use crate::core::manifest::{ManifestSnapshot, Mode};
use crate::core::state::LocalState;

#[derive(Debug)]
pub struct StatusOutcome {
    pub mode: Mode,
    pub current_version: String,
    pub latest_version: String,
    pub last_updated: String,
    pub up_to_date: bool,
    pub summary: Summary,
    pub changes: Vec<Change>,
    pub excluded: Vec<String>,
    pub extras: Vec<String>,
}

/// Computes what an update would change, without writing anything.
pub async fn status(
    client: &reqwest::Client,
    instance_dir: &Path,
    auth_token: Option<&str>,
) -> UpdaterResult<StatusOutcome> {
    let state = LocalState::load(instance_dir).await?;
    let install = state.install_side()?;
    let mode = super::mode::resolve_mode(&state);
    debug!(
        mode = %mode,
        manifest_date = %state.manifest_date,
        config = %state.config_version,
        mods = state.mods.len(),
        "status state"
    );

    let manifest = ManifestSnapshot::fetch(client, mode).await?;

    let mut outcome = StatusOutcome {
        mode,
        current_version: state.config_version.clone(),
        latest_version: manifest.config_version.clone(),
        last_updated: manifest.last_updated.clone(),
        up_to_date: false,
        summary: Summary::default(),
        changes: Vec::new(),
        excluded: state.exclude_mods.clone(),
        extras: state.extra_mods.keys().cloned().collect(),
    };

    if manifest.last_updated == state.manifest_date {
        outcome.up_to_date = true;
        return Ok(outcome);
    }

    // Extras need the package index; skip the fetch when there are none.
    let resolved_extras = if state.extra_mods.is_empty() {
        Default::default()
    } else {
        let index = PackageIndex::fetch(client).await?;
        let (resolved, _) =
            super::resolve::resolve_configured_extras(client, &state, &index, auth_token, false)
                .await?;
        resolved
    };

    let compute_opts = diff::ComputeOptions {
        exclude_mods: state.exclude_mods.clone(),
        extra_mods: resolved_extras,
    };
    outcome.changes = diff::compute(&state, &manifest, install, &compute_opts);
    outcome.summary = diff::summary(&outcome.changes);

    Ok(outcome)
}
