// Installed-mod identification: match top-level jar files against the
// package index's reverse filename index, disambiguating via the manifest.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use tracing::debug;

use crate::core::error::{UpdaterError, UpdaterResult};
use crate::core::index::FilenameMatch;
use crate::core::manifest::ModPin;
use crate::core::side::{side_included, InstallSide};
use crate::core::state::InstalledMod;

/// Reads the mods directory and identifies each jar via the reverse filename
/// index. Unmatched jars are skipped silently; excluded and side-foreign
/// mods are filtered out.
pub(crate) async fn scan_installed_mods(
    mods_dir: &Path,
    filename_index: &HashMap<String, Vec<FilenameMatch>>,
    manifest_mods: &BTreeMap<String, ModPin>,
    exclude: &HashSet<String>,
    install: InstallSide,
) -> UpdaterResult<BTreeMap<String, InstalledMod>> {
    let mut mods = BTreeMap::new();

    for filename in list_jar_files(mods_dir).await? {
        let Some(matches) = filename_index.get(&filename) else {
            debug!(%filename, "unmatched jar skipped during scan");
            continue;
        };
        let Some(m) = pick_best_match(matches, manifest_mods) else {
            continue;
        };

        if exclude.contains(&m.name) {
            debug!(name = %m.name, "excluded mod skipped during scan");
            continue;
        }

        // The manifest side is more accurate than the index side when the
        // mod is pinned; filter on the effective value.
        let mod_side = manifest_mods
            .get(&m.name)
            .map(|pin| pin.side.clone())
            .unwrap_or_else(|| m.side.clone());
        if !side_included(&mod_side, install) {
            debug!(name = %m.name, side = %mod_side, "side-filtered mod skipped during scan");
            continue;
        }

        debug!(name = %m.name, version = %m.version, %filename, side = %mod_side, "scanned mod");
        mods.insert(
            m.name.clone(),
            InstalledMod {
                version: m.version.clone(),
                filename,
                side: mod_side,
            },
        );
    }

    Ok(mods)
}

/// Prefers a candidate pinned by the current manifest; falls back to the
/// first candidate.
fn pick_best_match<'a>(
    matches: &'a [FilenameMatch],
    manifest_mods: &BTreeMap<String, ModPin>,
) -> Option<&'a FilenameMatch> {
    if matches.len() == 1 {
        return matches.first();
    }
    matches
        .iter()
        .find(|m| manifest_mods.contains_key(&m.name))
        .or_else(|| matches.first())
}

/// Top-level `.jar` basenames in the mods directory. A missing directory is
/// an empty set.
pub(crate) async fn list_jar_files(mods_dir: &Path) -> UpdaterResult<HashSet<String>> {
    let mut files = HashSet::new();
    let mut entries = match tokio::fs::read_dir(mods_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
        Err(e) => return Err(UpdaterError::io(mods_dir, e)),
    };

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| UpdaterError::io(mods_dir, e))?
    {
        let path = entry.path();
        if path.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(".jar") {
            files.insert(name);
        }
    }
    Ok(files)
}
