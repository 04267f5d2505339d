// The full update flow: rescan, diff, delete, download, merge, persist.
// Failures abort the run without undoing earlier filesystem mutations; the
// next run reconciles against whatever is on disk via the rescan.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::diff::{self, Change, ChangeKind};
use crate::core::downloader::{DownloadJob, Downloader, Progress};
use crate::core::error::{UpdaterError, UpdaterResult};
use crate::core::index::PackageIndex;
use crate::core::launchlib;
use crate::core::manifest::ManifestSnapshot;
use crate::core::maven;
use crate::core::merge;
use crate::core::side::InstallSide;
use crate::core::state::{game_dir, InstalledMod, LocalState};

use super::resolve;
use super::{Options, SharedData, UpdateOutcome};

/// Performs the full update flow for one instance.
pub async fn update(
    client: &reqwest::Client,
    opts: &Options,
    shared: Option<&SharedData>,
    cancel: &CancellationToken,
) -> UpdaterResult<UpdateOutcome> {
    let concurrency = opts.effective_concurrency();
    debug!(
        instance = %opts.instance_dir.display(),
        dry_run = opts.dry_run,
        force = opts.force,
        latest = opts.latest,
        concurrency,
        "update start"
    );

    let mut state = LocalState::load(&opts.instance_dir).await?;
    let install = state.install_side()?;
    let mode = super::mode::resolve_mode(&state);

    let fetched_data;
    let (manifest, index) = match shared {
        Some(shared) if shared.mode == mode => {
            debug!(mode = %mode, "reusing shared manifest and package index");
            (&shared.manifest, &shared.index)
        }
        _ => {
            fetched_data = (
                ManifestSnapshot::fetch(client, mode).await?,
                PackageIndex::fetch(client).await?,
            );
            (&fetched_data.0, &fetched_data.1)
        }
    };

    let game_dir = game_dir(&opts.instance_dir);
    let mods_dir = game_dir.join("mods");

    refresh_tracked_mods(&mut state, index, manifest, &mods_dir, install).await?;

    let auth_token = opts.auth_token.as_deref();
    let (resolved_extras, extra_downloads) =
        resolve::resolve_configured_extras(client, &state, index, auth_token, opts.latest).await?;

    let compute_opts = diff::ComputeOptions {
        exclude_mods: state.exclude_mods.clone(),
        extra_mods: resolved_extras,
    };
    let mut changes = diff::compute(&state, manifest, install, &compute_opts);

    let mut latest_downloads = BTreeMap::new();
    if opts.latest {
        resolve::resolve_latest_versions(
            client,
            index,
            &mut changes,
            &extra_downloads,
            &mut latest_downloads,
            concurrency,
            auth_token,
        )
        .await;
    }

    let summary = diff::summary(&changes);
    debug!(
        added = summary.added,
        removed = summary.removed,
        updated = summary.updated,
        unchanged = summary.unchanged,
        "diff summary"
    );
    let mut outcome = UpdateOutcome {
        old_version: state.config_version.clone(),
        new_version: manifest.config_version.clone(),
        summary,
        changes: changes.clone(),
        ..Default::default()
    };

    let no_mod_changes = summary.added == 0 && summary.removed == 0 && summary.updated == 0;
    if !opts.force
        && !opts.dry_run
        && no_mod_changes
        && state.config_version == manifest.config_version
    {
        info!("Already up to date.");
        outcome.up_to_date = true;
        return Ok(outcome);
    }

    if opts.dry_run {
        return Ok(outcome);
    }

    let needs_download: Vec<Change> = changes
        .iter()
        .filter(|c| matches!(c.kind, ChangeKind::Added | ChangeKind::Updated))
        .cloned()
        .collect();
    let downloads = resolve_downloads_for_changes(
        &needs_download,
        index,
        auth_token,
        &extra_downloads,
        &latest_downloads,
    )?;

    tokio::fs::create_dir_all(&mods_dir)
        .await
        .map_err(|e| UpdaterError::io(&mods_dir, e))?;
    remove_outdated_jars(&changes, &state.mods, &mods_dir)?;

    let downloader = Downloader::new(client.clone())
        .with_concurrency(concurrency)
        .with_auth_token(opts.auth_token.clone())
        .with_cache_dir(resolve_cache_directory(opts));

    let final_filenames =
        download_mods(&downloader, index, downloads, &needs_download, &mods_dir, cancel).await?;

    apply_launchlib_if_needed(&downloader, &changes, install, &opts.instance_dir, cancel).await?;

    if state.config_version != manifest.config_version {
        info!("Merging configs...");
        let merge_outcome = merge::merge_pack(
            &downloader,
            &game_dir,
            &state.config_hashes,
            &state.config_version,
            index,
            &manifest.config_version,
            cancel,
        )
        .await?;

        outcome.config_merged = merge_outcome.files_merged + merge_outcome.files_updated;
        outcome.config_conflict = merge_outcome.files_conflict;
        outcome.conflict_files = merge_outcome.conflict_paths.clone();
        state.config_hashes = merge_outcome.new_hashes;
    }

    persist_updated_state(&mut state, &changes, manifest, &final_filenames, &opts.instance_dir)
        .await?;

    Ok(outcome)
}

/// Re-derives the tracked mod map from what is actually on disk. Excludes
/// are not applied here: excluded manifest mods must still be detected so
/// the diff can mark them Removed and delete their archives. Previously
/// tracked mods whose recorded archive still exists survive a failed
/// identification (covers --latest versions newer than the index).
async fn refresh_tracked_mods(
    state: &mut LocalState,
    index: &PackageIndex,
    manifest: &ManifestSnapshot,
    mods_dir: &Path,
    install: InstallSide,
) -> UpdaterResult<()> {
    info!("Scanning mods directory...");
    let manifest_mods = manifest.all_mods();
    let filename_index = index.build_filename_index();

    let mut scanned = super::scan::scan_installed_mods(
        mods_dir,
        &filename_index,
        &manifest_mods,
        &std::collections::HashSet::new(),
        install,
    )
    .await?;

    let disk_files = super::scan::list_jar_files(mods_dir).await?;
    for (name, installed) in &state.mods {
        if scanned.contains_key(name) {
            continue;
        }
        if !installed.filename.is_empty() && disk_files.contains(&installed.filename) {
            scanned.insert(name.clone(), installed.clone());
        }
    }

    debug!(mods = scanned.len(), "scanned installed mods");
    state.mods = scanned;
    Ok(())
}

fn resolve_downloads_for_changes(
    needs_download: &[Change],
    index: &PackageIndex,
    auth_token: Option<&str>,
    extra_downloads: &BTreeMap<String, crate::core::index::ResolvedDownload>,
    latest_downloads: &BTreeMap<String, crate::core::index::ResolvedDownload>,
) -> UpdaterResult<Vec<DownloadJob>> {
    let mut downloads = Vec::with_capacity(needs_download.len());
    let mut unresolved = Vec::new();

    for c in needs_download {
        match resolve::resolve_mod_download(
            index,
            &c.name,
            &c.new_version,
            auth_token,
            extra_downloads,
            latest_downloads,
        ) {
            Some(job) => {
                debug!(
                    name = %c.name,
                    version = %c.new_version,
                    filename = %job.filename,
                    url = %job.url,
                    auth_api = job.is_auth_api,
                    "resolved download"
                );
                downloads.push(job);
            }
            None => unresolved.push(c.name.clone()),
        }
    }
    if !unresolved.is_empty() {
        return Err(UpdaterError::Other(format!(
            "failed to resolve download URLs for: {}",
            unresolved.join(", ")
        )));
    }
    Ok(downloads)
}

/// Deletes the archives of Removed and Updated mods. A file already gone is
/// not an error.
fn remove_outdated_jars(
    changes: &[Change],
    installed_mods: &BTreeMap<String, InstalledMod>,
    mods_dir: &Path,
) -> UpdaterResult<()> {
    for c in changes {
        if !matches!(c.kind, ChangeKind::Removed | ChangeKind::Updated) {
            continue;
        }
        let Some(installed) = installed_mods.get(&c.name) else {
            continue;
        };
        if installed.filename.is_empty() {
            continue;
        }

        let jar_path = mods_dir.join(&installed.filename);
        match std::fs::remove_file(&jar_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(UpdaterError::io(&jar_path, e)),
        }
        if c.kind == ChangeKind::Removed {
            info!("  - Removed {} {}", c.name, c.old_version);
        }
    }
    Ok(())
}

/// The cache directory for this run: disabled, explicit, or the XDG default.
fn resolve_cache_directory(opts: &Options) -> Option<PathBuf> {
    if opts.no_cache {
        return None;
    }
    let cache_dir = opts.cache_dir.clone().or_else(|| {
        let base = std::env::var_os("XDG_CACHE_HOME")
            .map(PathBuf::from)
            .filter(|p| !p.as_os_str().is_empty())
            .or_else(dirs::cache_dir)?;
        Some(base.join("packsync").join("mods"))
    })?;

    if let Err(e) = std::fs::create_dir_all(&cache_dir) {
        warn!(dir = %cache_dir.display(), error = %e, "could not create cache dir, continuing without cache");
        return None;
    }
    debug!(dir = %cache_dir.display(), "cache directory");
    Some(cache_dir)
}

/// Runs the downloader, then retries terminal failures of first-party mods
/// against their Maven URL before giving up. Returns the final filename per
/// mod for the state rewrite.
async fn download_mods(
    downloader: &Downloader,
    index: &PackageIndex,
    downloads: Vec<DownloadJob>,
    needs_download: &[Change],
    mods_dir: &Path,
    cancel: &CancellationToken,
) -> UpdaterResult<BTreeMap<String, String>> {
    let mut final_filenames: BTreeMap<String, String> = downloads
        .iter()
        .map(|job| (job.mod_name.clone(), job.filename.clone()))
        .collect();
    if downloads.is_empty() {
        return Ok(final_filenames);
    }

    for c in needs_download {
        match c.kind {
            ChangeKind::Added => info!("  + Adding {} {}", c.name, c.new_version),
            ChangeKind::Updated => {
                info!("  ~ Updating {} {} -> {}", c.name, c.old_version, c.new_version)
            }
            _ => {}
        }
    }

    info!("Downloading {} mods...", downloads.len());
    let results = downloader
        .run(downloads, mods_dir, cancel, |p: Progress| {
            debug!(completed = p.completed, total = p.total, "mods downloaded");
        })
        .await;

    // Terminal failures of first-party mods get one more chance via Maven.
    let versions: BTreeMap<&str, &str> = needs_download
        .iter()
        .map(|c| (c.name.as_str(), c.new_version.as_str()))
        .collect();
    let mut failed = Vec::new();
    let mut maven_retries = Vec::new();

    for result in &results {
        let Some(error) = &result.error else { continue };
        let name = result.job.mod_name.as_str();
        let version = versions.get(name).copied().unwrap_or_default();

        if error.is_network() && index.is_first_party(name) {
            let (url, filename) = maven::download_url(name, version);
            if url != result.job.url {
                warn!(name, error = %error, "download failed, retrying via Maven");
                maven_retries.push(DownloadJob {
                    url,
                    filename,
                    mod_name: name.to_string(),
                    is_auth_api: false,
                });
                continue;
            }
        }
        failed.push(format!("{}: {}", result.job.filename, error));
    }

    if !maven_retries.is_empty() {
        for job in &maven_retries {
            final_filenames.insert(job.mod_name.clone(), job.filename.clone());
        }
        let retry_results = downloader
            .run(maven_retries, mods_dir, cancel, |_| {})
            .await;
        for result in retry_results {
            if let Some(error) = result.error {
                failed.push(format!("{}: {}", result.job.filename, error));
            }
        }
    }

    if !failed.is_empty() {
        return Err(UpdaterError::DownloadsFailed(failed.join("; ")));
    }
    Ok(final_filenames)
}

/// Applies the launcher-library payload when its mod was added or updated.
async fn apply_launchlib_if_needed(
    downloader: &Downloader,
    changes: &[Change],
    install: InstallSide,
    instance_dir: &Path,
    cancel: &CancellationToken,
) -> UpdaterResult<()> {
    for c in changes {
        if !matches!(c.kind, ChangeKind::Added | ChangeKind::Updated) || !launchlib::needs_update(&c.name)
        {
            continue;
        }
        info!("Updating launcher library to {}...", c.new_version);
        match install {
            InstallSide::Client => {
                launchlib::update_client(downloader, instance_dir, &c.new_version, cancel).await?
            }
            InstallSide::Server => {
                launchlib::update_server(downloader, instance_dir, &c.new_version, cancel).await?
            }
        }
        break;
    }
    Ok(())
}

/// Folds the change list into the state and writes it out: Added/Updated
/// entries at their new versions, Removed entries dropped, new hashes and
/// versions recorded.
async fn persist_updated_state(
    state: &mut LocalState,
    changes: &[Change],
    manifest: &ManifestSnapshot,
    final_filenames: &BTreeMap<String, String>,
    instance_dir: &Path,
) -> UpdaterResult<()> {
    for c in changes {
        match c.kind {
            ChangeKind::Added | ChangeKind::Updated => {
                let filename = final_filenames.get(&c.name).cloned().unwrap_or_default();
                state.mods.insert(
                    c.name.clone(),
                    InstalledMod {
                        version: c.new_version.clone(),
                        filename,
                        side: c.side.clone(),
                    },
                );
            }
            ChangeKind::Removed => {
                state.mods.remove(&c.name);
            }
            ChangeKind::Unchanged => {}
        }
    }

    state.config_version = manifest.config_version.clone();
    state.manifest_date = manifest.last_updated.clone();

    state.save(instance_dir).await?;
    debug!(
        mods = state.mods.len(),
        manifest_date = %state.manifest_date,
        config = %state.config_version,
        "saved state"
    );
    Ok(())
}
