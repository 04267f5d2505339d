// Local inspection of tracked files against the baseline recorded at the
// last successful update. Read-only; used by the `config` CLI surface.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use walkdir::WalkDir;

use crate::core::error::{UpdaterError, UpdaterResult};

use super::{compute_config_hashes, hash_bytes, slash_path};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffStatus {
    Added,
    Removed,
    Modified,
    Unchanged,
}

impl DiffStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DiffStatus::Added => "added",
            DiffStatus::Removed => "removed",
            DiffStatus::Modified => "modified",
            DiffStatus::Unchanged => "unchanged",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConfigDiff {
    pub path: String,
    pub status: DiffStatus,
}

/// Compares current tracked-file hashes against a baseline map (typically
/// `config_hashes` from the last successful update).
pub fn diff_config_files(
    game_dir: &Path,
    baseline: &BTreeMap<String, String>,
    include_unchanged: bool,
) -> UpdaterResult<Vec<ConfigDiff>> {
    let current = compute_current_hashes(game_dir, baseline)?;

    let all_paths: BTreeSet<&String> = baseline.keys().chain(current.keys()).collect();

    let mut diffs = Vec::new();
    for path in all_paths {
        let status = match (baseline.get(path), current.get(path)) {
            (None, Some(_)) => DiffStatus::Added,
            (Some(_), None) => DiffStatus::Removed,
            (Some(base), Some(cur)) if base != cur => DiffStatus::Modified,
            _ => DiffStatus::Unchanged,
        };
        if status == DiffStatus::Unchanged && !include_unchanged {
            continue;
        }
        diffs.push(ConfigDiff {
            path: path.clone(),
            status,
        });
    }
    Ok(diffs)
}

fn compute_current_hashes(
    game_dir: &Path,
    baseline: &BTreeMap<String, String>,
) -> UpdaterResult<BTreeMap<String, String>> {
    // Legacy state files tracked config paths relative to config/ without
    // the prefix; for those, hash the config tree directly.
    if !has_config_prefix(baseline) {
        return compute_config_hashes(game_dir);
    }

    let mut hashes = BTreeMap::new();
    for root in tracked_roots(baseline) {
        let root_path = game_dir.join(&root);
        let meta = match std::fs::metadata(&root_path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(UpdaterError::io(&root_path, e)),
        };

        if !meta.is_dir() {
            let content =
                std::fs::read(&root_path).map_err(|e| UpdaterError::io(&root_path, e))?;
            hashes.insert(root, hash_bytes(&content));
            continue;
        }

        for entry in WalkDir::new(&root_path) {
            let entry = entry.map_err(|e| UpdaterError::io(&root_path, e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(game_dir)
                .map_err(|_| UpdaterError::Other("tracked walk escaped the game dir".to_string()))?;
            let content =
                std::fs::read(entry.path()).map_err(|e| UpdaterError::io(entry.path(), e))?;
            hashes.insert(slash_path(rel), hash_bytes(&content));
        }
    }
    Ok(hashes)
}

fn has_config_prefix(paths: &BTreeMap<String, String>) -> bool {
    paths
        .keys()
        .any(|p| p == "config" || p.starts_with("config/"))
}

fn tracked_roots(paths: &BTreeMap<String, String>) -> BTreeSet<String> {
    paths
        .keys()
        .filter(|p| !p.is_empty())
        .map(|p| p.split('/').next().unwrap_or(p).to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_added_removed_modified() {
        let tmp = tempfile::tempdir().unwrap();
        let config = tmp.path().join("config");
        std::fs::create_dir_all(&config).unwrap();
        std::fs::write(config.join("kept.cfg"), b"same").unwrap();
        std::fs::write(config.join("edited.cfg"), b"changed").unwrap();
        std::fs::write(config.join("new.cfg"), b"fresh").unwrap();

        let baseline = BTreeMap::from([
            ("config/kept.cfg".to_string(), hash_bytes(b"same")),
            ("config/edited.cfg".to_string(), hash_bytes(b"original")),
            ("config/gone.cfg".to_string(), hash_bytes(b"deleted")),
        ]);

        let diffs = diff_config_files(tmp.path(), &baseline, false).unwrap();
        let by_path: BTreeMap<&str, DiffStatus> =
            diffs.iter().map(|d| (d.path.as_str(), d.status)).collect();

        assert_eq!(by_path["config/edited.cfg"], DiffStatus::Modified);
        assert_eq!(by_path["config/gone.cfg"], DiffStatus::Removed);
        assert_eq!(by_path["config/new.cfg"], DiffStatus::Added);
        assert!(!by_path.contains_key("config/kept.cfg"));

        let with_unchanged = diff_config_files(tmp.path(), &baseline, true).unwrap();
        assert!(with_unchanged
            .iter()
            .any(|d| d.path == "config/kept.cfg" && d.status == DiffStatus::Unchanged));
    }

    #[test]
    fn legacy_baseline_without_prefix_uses_config_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let config = tmp.path().join("config");
        std::fs::create_dir_all(&config).unwrap();
        std::fs::write(config.join("a.cfg"), b"x").unwrap();

        let baseline = BTreeMap::from([("a.cfg".to_string(), hash_bytes(b"x"))]);
        let diffs = diff_config_files(tmp.path(), &baseline, true).unwrap();
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].status, DiffStatus::Unchanged);
    }
}
