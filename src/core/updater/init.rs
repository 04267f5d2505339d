// Initializes tracking for an existing installation by scanning what is
// actually on disk, rather than assuming the latest manifest.

use std::collections::HashSet;
use std::path::PathBuf;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::downloader::Downloader;
use crate::core::error::UpdaterResult;
use crate::core::index::PackageIndex;
use crate::core::manifest::ManifestSnapshot;
use crate::core::merge;
use crate::core::side::InstallSide;
use crate::core::state::{game_dir, LocalState};

#[derive(Debug, Clone)]
pub struct InitOptions {
    pub instance_dir: PathBuf,
    pub side: InstallSide,
    /// Empty means "assume the manifest's current config version".
    pub config_version: String,
    /// Empty means "infer from the config version".
    pub mode: String,
    pub auth_token: Option<String>,
}

#[derive(Debug, Default)]
pub struct InitOutcome {
    pub mods: usize,
    pub config_version: String,
    /// Jars on disk the index could not identify (user-added or unknown).
    pub unmatched: Vec<String>,
    pub excluded_preserved: usize,
    pub extras_preserved: usize,
}

/// Scans the instance and writes a fresh state file. Re-initializing keeps
/// the existing exclude and extra settings.
pub async fn init(
    client: &reqwest::Client,
    opts: &InitOptions,
    cancel: &CancellationToken,
) -> UpdaterResult<InitOutcome> {
    let mode = super::mode::resolve_init_mode(&opts.config_version, &opts.mode)?;
    debug!(
        instance = %opts.instance_dir.display(),
        side = %opts.side,
        mode = %mode,
        config_version = %opts.config_version,
        "init start"
    );

    let index = PackageIndex::fetch(client).await?;
    let game_dir = game_dir(&opts.instance_dir);
    let mods_dir = game_dir.join("mods");

    // The manifest disambiguates scan matches and supplies defaults.
    let manifest = ManifestSnapshot::fetch(client, mode).await?;
    let manifest_mods = manifest.all_mods();

    // Keep exclude/extra settings when re-initializing over existing state.
    let existing_state = LocalState::load(&opts.instance_dir).await.ok();
    let exclude_set: HashSet<String> = existing_state
        .as_ref()
        .map(|s| s.exclude_mods.iter().cloned().collect())
        .unwrap_or_default();

    info!("Scanning mods directory...");
    let filename_index = index.build_filename_index();
    let mods = super::scan::scan_installed_mods(
        &mods_dir,
        &filename_index,
        &manifest_mods,
        &exclude_set,
        opts.side,
    )
    .await?;
    debug!(mods = mods.len(), "identified tracked mods");

    let mut unmatched: Vec<String> = super::scan::list_jar_files(&mods_dir)
        .await?
        .into_iter()
        .filter(|f| !filename_index.contains_key(f))
        .collect();
    unmatched.sort();

    let config_version = if opts.config_version.is_empty() {
        info!(
            "No config version specified, assuming latest: {}",
            manifest.config_version
        );
        manifest.config_version.clone()
    } else {
        opts.config_version.clone()
    };

    // Hash every file tracked by this pack version; fall back to the local
    // config tree when the pack archive cannot be fetched.
    info!("Hashing tracked pack files...");
    let downloader = Downloader::new(client.clone()).with_auth_token(opts.auth_token.clone());
    let hashes = match merge::compute_tracked_hashes(&downloader, &game_dir, &index, &config_version, cancel)
        .await
    {
        Ok(hashes) => hashes,
        Err(e) => {
            warn!(
                version = %config_version,
                error = %e,
                "could not hash the full pack file set, falling back to config-only hashing"
            );
            merge::compute_config_hashes(&game_dir)?
        }
    };
    debug!(tracked = hashes.len(), "computed tracked file hashes");

    let mods_count = mods.len();
    let mut state = LocalState {
        side: opts.side.as_str().to_string(),
        mode: mode.as_str().to_string(),
        // Left empty so the next update always detects changes.
        manifest_date: String::new(),
        config_version: config_version.clone(),
        config_hashes: hashes,
        mods,
        ..Default::default()
    };
    if let Some(existing) = existing_state {
        state.exclude_mods = existing.exclude_mods;
        state.extra_mods = existing.extra_mods;
    }

    state.save(&opts.instance_dir).await?;
    info!(
        "Initialized: detected {} mods ({} side), config version {}",
        mods_count, opts.side, config_version
    );

    Ok(InitOutcome {
        mods: mods_count,
        config_version,
        unmatched,
        excluded_preserved: state.exclude_mods.len(),
        extras_preserved: state.extra_mods.len(),
    })
}
