// ─── Config Merger ───
// Three-way merge of pack-tracked files across a pack upgrade: the old pack
// release is the base, the new release is "theirs", and whatever is on disk
// is "ours". User edits are never silently lost; an unresolvable file keeps
// the user's copy and gains a `.packnew` sidecar with the pack's content.

mod cfg;
mod filediff;
mod inspect;
mod json;
mod text;

pub use cfg::{merge_cfg, parse_cfg, CfgCategory, CfgEntry, CfgFile};
pub use filediff::{diff_file_against_pack, FileDiffOutcome};
pub use inspect::{diff_config_files, ConfigDiff, DiffStatus};
pub use json::merge_json;
pub use text::merge_text;

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::core::downloader::Downloader;
use crate::core::error::{UpdaterError, UpdaterResult};
use crate::core::index::PackageIndex;

#[derive(Debug, Default)]
pub struct MergeOutcome {
    pub files_updated: usize,
    pub files_merged: usize,
    pub files_conflict: usize,
    pub conflict_paths: Vec<String>,
    pub new_hashes: BTreeMap<String, String>,
}

/// Performs the tracked-file merge for a pack upgrade.
///
/// Downloads and extracts the new pack archive; when `old_config_version` is
/// known, the old archive supplies base content for three-way merges. If the
/// old archive cannot be fetched the run degrades to two-way mode where any
/// both-changed file is flagged as a conflict.
pub async fn merge_pack(
    downloader: &Downloader,
    game_dir: &Path,
    old_hashes: &BTreeMap<String, String>,
    old_config_version: &str,
    index: &PackageIndex,
    new_config_version: &str,
    cancel: &CancellationToken,
) -> UpdaterResult<MergeOutcome> {
    debug!(
        old = old_config_version,
        new = new_config_version,
        tracked = old_hashes.len(),
        "pack merge start"
    );

    let workspace = tempfile::tempdir().map_err(|e| UpdaterError::io("pack merge tempdir", e))?;

    let new_pack_dir = download_and_extract_pack(
        downloader,
        index,
        new_config_version,
        &workspace.path().join("new"),
        cancel,
    )
    .await
    .map_err(|e| UpdaterError::Other(format!("new pack {new_config_version}: {e}")))?;

    let mut old_pack_dir: Option<PathBuf> = None;
    if !old_config_version.is_empty() {
        match download_and_extract_pack(
            downloader,
            index,
            old_config_version,
            &workspace.path().join("old"),
            cancel,
        )
        .await
        {
            Ok(dir) => old_pack_dir = Some(dir),
            Err(e) => {
                warn!(
                    version = old_config_version,
                    error = %e,
                    "could not fetch old pack for three-way merge; both-changed files will conflict"
                );
            }
        }
    }

    let outcome = merge_tree(game_dir, old_hashes, &new_pack_dir, old_pack_dir.as_deref())?;

    debug!(
        updated = outcome.files_updated,
        merged = outcome.files_merged,
        conflicts = outcome.files_conflict,
        "pack merge complete"
    );
    Ok(outcome)
}

/// Walks every file the new pack ships and applies the merge decision
/// matrix against the baseline hashes and the user's tree.
fn merge_tree(
    game_dir: &Path,
    old_hashes: &BTreeMap<String, String>,
    new_pack_dir: &Path,
    old_pack_dir: Option<&Path>,
) -> UpdaterResult<MergeOutcome> {
    let mut outcome = MergeOutcome::default();

    for entry in WalkDir::new(new_pack_dir) {
        let entry = entry.map_err(|e| UpdaterError::io(new_pack_dir, e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let rel_path = entry
            .path()
            .strip_prefix(new_pack_dir)
            .map_err(|_| UpdaterError::Other("pack walk escaped its root".to_string()))?;
        let rel_key = slash_path(rel_path);

        let new_content = std::fs::read(entry.path())
            .map_err(|e| UpdaterError::io(entry.path(), e))?;
        let new_hash = hash_bytes(&new_content);
        outcome.new_hashes.insert(rel_key.clone(), new_hash.clone());

        let user_path = game_dir.join(rel_path);
        let base_hash = lookup_base_hash(old_hashes, &rel_key);
        let user_content = std::fs::read(&user_path).ok();

        let Some(base_hash) = base_hash else {
            // New file from the pack.
            write_file(&user_path, &new_content)?;
            outcome.files_updated += 1;
            info!("  + {rel_key} (new)");
            continue;
        };

        let Some(user_content) = user_content else {
            // User deleted the file, the pack still ships it.
            write_file(&user_path, &new_content)?;
            outcome.files_updated += 1;
            info!("  + {rel_key} (restored)");
            continue;
        };

        let user_hash = hash_bytes(&user_content);

        if user_hash == base_hash {
            // User untouched: accept the pack's version.
            write_file(&user_path, &new_content)?;
            outcome.files_updated += 1;
            info!("  ~ {rel_key} (updated)");
        } else if new_hash == base_hash {
            // Pack untouched: keep the user's version.
            debug!("  = {rel_key} (user-changed, pack-unchanged)");
        } else if user_hash == new_hash {
            // Both made the same change.
            debug!("  = {rel_key} (already in sync)");
        } else {
            // Both changed: three-way merge with base content when we have it.
            let base_content = old_pack_dir
                .as_ref()
                .and_then(|dir| std::fs::read(dir.join(rel_path)).ok());

            let (merged, conflicts) =
                merge_file(&rel_key, base_content.as_deref(), &new_content, &user_content);
            if conflicts.is_empty() {
                write_file(&user_path, &merged)?;
                outcome.files_merged += 1;
                info!("  ~ {rel_key} (merged)");
            } else {
                // Keep the user's file; park the pack's content beside it.
                let packnew = sibling_with_suffix(&user_path, ".packnew");
                write_file(&packnew, &new_content)?;
                outcome.files_conflict += 1;
                outcome.conflict_paths.push(rel_key.clone());
                info!("  ! {rel_key} (conflict -> .packnew)");
            }
        }
    }

    Ok(outcome)
}

/// Dispatches a three-way merge by file extension. A missing base makes the
/// file an unconditional conflict so the user can review it manually.
pub fn merge_file(
    rel_path: &str,
    base: Option<&[u8]>,
    theirs: &[u8],
    ours: &[u8],
) -> (Vec<u8>, Vec<String>) {
    let Some(base) = base else {
        return (
            Vec::new(),
            vec!["no base content available for 3-way merge".to_string()],
        );
    };

    let ext = Path::new(rel_path)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("cfg") => merge_cfg(base, theirs, ours),
        Some("json") => merge_json(base, theirs, ours),
        _ => merge_text(base, theirs, ours),
    }
}

/// Downloads a pack archive and extracts it, returning the pack root.
async fn download_and_extract_pack(
    downloader: &Downloader,
    index: &PackageIndex,
    config_version: &str,
    work_dir: &Path,
    cancel: &CancellationToken,
) -> UpdaterResult<PathBuf> {
    let resolved = match index.resolve_config_download(config_version) {
        Ok(r) => r,
        Err(e) if downloader.has_auth_token() => {
            debug!(version = config_version, error = %e, "public pack URL unavailable, using API URL");
            index.resolve_config_download_with_auth(config_version)?
        }
        Err(e) => return Err(e),
    };

    tokio::fs::create_dir_all(work_dir)
        .await
        .map_err(|e| UpdaterError::io(work_dir, e))?;

    let zip_path = work_dir.join(&resolved.filename);
    let fetched = downloader
        .fetch_to_file(&resolved.url, &zip_path, resolved.is_auth_api, cancel)
        .await;
    if let Err(e) = fetched {
        // Browser URL can 404 on private assets; retry via the API form.
        if resolved.is_auth_api && downloader.has_auth_token() {
            debug!(version = config_version, "pack download failed via browser URL, retrying API URL");
            let auth = index.resolve_config_download_with_auth(config_version)?;
            downloader
                .fetch_to_file(&auth.url, &zip_path, true, cancel)
                .await?;
        } else {
            return Err(e);
        }
    }

    let extract_dir = work_dir.join("extracted");
    extract_zip(&zip_path, &extract_dir)?;

    find_pack_root(&extract_dir).ok_or_else(|| {
        UpdaterError::Other("no pack root containing a config directory found in archive".to_string())
    })
}

/// Hashes the local files tracked by a specific pack version: every file the
/// pack ships that also exists in the instance.
pub async fn compute_tracked_hashes(
    downloader: &Downloader,
    game_dir: &Path,
    index: &PackageIndex,
    config_version: &str,
    cancel: &CancellationToken,
) -> UpdaterResult<BTreeMap<String, String>> {
    let workspace = tempfile::tempdir().map_err(|e| UpdaterError::io("pack hash tempdir", e))?;
    let pack_dir = download_and_extract_pack(
        downloader,
        index,
        config_version,
        &workspace.path().join("pack"),
        cancel,
    )
    .await?;

    let mut hashes = BTreeMap::new();
    for entry in WalkDir::new(&pack_dir) {
        let entry = entry.map_err(|e| UpdaterError::io(&pack_dir, e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel_path = entry
            .path()
            .strip_prefix(&pack_dir)
            .map_err(|_| UpdaterError::Other("pack walk escaped its root".to_string()))?;

        match std::fs::read(game_dir.join(rel_path)) {
            Ok(content) => {
                hashes.insert(slash_path(rel_path), hash_bytes(&content));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(UpdaterError::io(game_dir.join(rel_path), e)),
        }
    }
    Ok(hashes)
}

/// Hashes every file under the instance's `config/` directory. Fallback for
/// init runs that cannot fetch the pack archive.
pub fn compute_config_hashes(game_dir: &Path) -> UpdaterResult<BTreeMap<String, String>> {
    let config_dir = game_dir.join("config");
    let mut hashes = BTreeMap::new();
    if !config_dir.is_dir() {
        return Ok(hashes);
    }

    for entry in WalkDir::new(&config_dir) {
        let entry = entry.map_err(|e| UpdaterError::io(&config_dir, e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel_path = entry
            .path()
            .strip_prefix(&config_dir)
            .map_err(|_| UpdaterError::Other("config walk escaped its root".to_string()))?;
        let content = std::fs::read(entry.path()).map_err(|e| UpdaterError::io(entry.path(), e))?;
        hashes.insert(slash_path(rel_path), hash_bytes(&content));
    }
    Ok(hashes)
}

pub fn hash_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Base-hash lookup with backward compatibility: older state files tracked
/// config files relative to `config/` instead of the pack root.
pub(crate) fn lookup_base_hash(old_hashes: &BTreeMap<String, String>, rel_key: &str) -> Option<String> {
    if let Some(h) = old_hashes.get(rel_key) {
        return Some(h.clone());
    }
    rel_key
        .strip_prefix("config/")
        .and_then(|legacy| old_hashes.get(legacy))
        .cloned()
}

fn write_file(path: &Path, content: &[u8]) -> UpdaterResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| UpdaterError::io(parent, e))?;
    }
    std::fs::write(path, content).map_err(|e| UpdaterError::io(path, e))
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}

pub(crate) fn slash_path(path: &Path) -> String {
    path.to_string_lossy().replace(std::path::MAIN_SEPARATOR, "/")
}

/// Extracts an archive with a path-traversal guard.
pub(crate) fn extract_zip(zip_path: &Path, dest_dir: &Path) -> UpdaterResult<()> {
    let file = std::fs::File::open(zip_path).map_err(|e| UpdaterError::io(zip_path, e))?;
    let mut archive = zip::ZipArchive::new(file)?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let Some(rel) = entry.enclosed_name() else {
            continue;
        };
        let out_path = dest_dir.join(rel);

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path).map_err(|e| UpdaterError::io(&out_path, e))?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| UpdaterError::io(parent, e))?;
        }

        let mut content = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut content)
            .map_err(|e| UpdaterError::io(&out_path, e))?;
        std::fs::write(&out_path, &content).map_err(|e| UpdaterError::io(&out_path, e))?;
    }
    Ok(())
}

/// The pack root is the extract dir itself when it contains `config/`, or
/// the unique first-level subdirectory that does.
pub(crate) fn find_pack_root(extract_dir: &Path) -> Option<PathBuf> {
    if extract_dir.join("config").is_dir() {
        return Some(extract_dir.to_path_buf());
    }

    let entries = std::fs::read_dir(extract_dir).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() && path.join("config").is_dir() {
            return Some(path);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_file_dispatch_by_extension() {
        // cfg goes through the structural merger.
        let (merged, conflicts) = merge_file(
            "config/general.cfg",
            Some(b"general {\n    I:foo=1\n}\n"),
            b"general {\n    I:foo=2\n}\n",
            b"general {\n    I:foo=3\n}\n",
        );
        assert!(String::from_utf8(merged).unwrap().contains("I:foo=3"));
        assert_eq!(conflicts.len(), 1);

        // Unknown extensions use the text merger.
        let (merged, conflicts) = merge_file(
            "scripts/notes.txt",
            Some(b"a\nb\n"),
            b"a\nB\n",
            b"a\nb\n",
        );
        assert_eq!(merged, b"a\nB\n");
        assert!(conflicts.is_empty());
    }

    #[test]
    fn merge_file_without_base_is_conflict() {
        let (merged, conflicts) = merge_file("settings.cfg", None, b"a", b"b");
        assert!(merged.is_empty());
        assert!(!conflicts.is_empty());
    }

    #[test]
    fn base_hash_lookup_handles_legacy_paths() {
        let old = BTreeMap::from([("cofh/world.cfg".to_string(), "legacy-hash".to_string())]);
        assert_eq!(
            lookup_base_hash(&old, "config/cofh/world.cfg").as_deref(),
            Some("legacy-hash")
        );
        assert_eq!(lookup_base_hash(&old, "config/other.cfg"), None);
    }

    #[test]
    fn pack_root_direct_and_nested() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("config")).unwrap();
        assert_eq!(find_pack_root(tmp.path()).unwrap(), tmp.path());

        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("pack-root").join("config");
        std::fs::create_dir_all(&nested).unwrap();
        assert_eq!(
            find_pack_root(tmp.path()).unwrap(),
            tmp.path().join("pack-root")
        );

        let tmp = tempfile::tempdir().unwrap();
        assert!(find_pack_root(tmp.path()).is_none());
    }

    #[test]
    fn config_hashes_cover_nested_files() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("config").join("a").join("settings.txt");
        std::fs::create_dir_all(file.parent().unwrap()).unwrap();
        std::fs::write(&file, b"hello world").unwrap();

        let hashes = compute_config_hashes(tmp.path()).unwrap();
        assert_eq!(
            hashes.get("a/settings.txt"),
            Some(&hash_bytes(b"hello world"))
        );

        // Missing config dir yields an empty map.
        let empty = tempfile::tempdir().unwrap();
        assert!(compute_config_hashes(empty.path()).unwrap().is_empty());
    }

    #[test]
    fn hash_is_hex_sha256() {
        assert_eq!(
            hash_bytes(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    struct MergeFixture {
        game: tempfile::TempDir,
        new_pack: tempfile::TempDir,
        old_pack: tempfile::TempDir,
        hashes: BTreeMap<String, String>,
    }

    impl MergeFixture {
        fn new() -> Self {
            Self {
                game: tempfile::tempdir().unwrap(),
                new_pack: tempfile::tempdir().unwrap(),
                old_pack: tempfile::tempdir().unwrap(),
                hashes: BTreeMap::new(),
            }
        }

        /// Seeds one tracked file: base content in the old pack and the
        /// baseline hashes, plus the new-pack and on-disk variants.
        fn seed(&mut self, rel: &str, base: &[u8], new: Option<&[u8]>, user: Option<&[u8]>) {
            let write = |root: &Path, content: &[u8]| {
                let path = root.join(rel);
                std::fs::create_dir_all(path.parent().unwrap()).unwrap();
                std::fs::write(path, content).unwrap();
            };
            write(self.old_pack.path(), base);
            self.hashes.insert(rel.to_string(), hash_bytes(base));
            if let Some(new) = new {
                write(self.new_pack.path(), new);
            }
            if let Some(user) = user {
                write(self.game.path(), user);
            }
        }

        fn run(&self) -> MergeOutcome {
            merge_tree(
                self.game.path(),
                &self.hashes,
                self.new_pack.path(),
                Some(self.old_pack.path()),
            )
            .unwrap()
        }

        fn game_file(&self, rel: &str) -> String {
            String::from_utf8(std::fs::read(self.game.path().join(rel)).unwrap()).unwrap()
        }
    }

    #[test]
    fn merge_tree_conflict_keeps_user_and_writes_packnew() {
        let mut fx = MergeFixture::new();
        fx.seed(
            "config/notes.txt",
            b"a\nb\nc\n",
            Some(b"a\nB\nc\n"),
            Some(b"a\nX\nc\n"),
        );

        let outcome = fx.run();
        assert_eq!(outcome.files_conflict, 1);
        assert_eq!(outcome.conflict_paths, vec!["config/notes.txt"]);

        let kept = fx.game_file("config/notes.txt");
        assert!(kept.contains('X'));
        assert!(!kept.contains('B'));
        let packnew = fx.game_file("config/notes.txt.packnew");
        assert!(packnew.contains('B'));
        // The recorded hash is the pack's content, the next merge's baseline.
        assert_eq!(
            outcome.new_hashes["config/notes.txt"],
            hash_bytes(b"a\nB\nc\n")
        );
    }

    #[test]
    fn merge_tree_decision_matrix() {
        let mut fx = MergeFixture::new();
        // User untouched, pack changed: pack wins.
        fx.seed("config/a.txt", b"old\n", Some(b"new\n"), Some(b"old\n"));
        // Pack untouched, user changed: user file stays.
        fx.seed("config/b.txt", b"base\n", Some(b"base\n"), Some(b"mine\n"));
        // User deleted, pack ships it: restored.
        fx.seed("config/c.txt", b"gone\n", Some(b"gone2\n"), None);
        // Both changed mergeable regions: merged silently.
        fx.seed(
            "config/d.txt",
            b"one\ntwo\nthree\nfour\nfive\n",
            Some(b"ONE\ntwo\nthree\nfour\nfive\n"),
            Some(b"one\ntwo\nthree\nfour\nFIVE\n"),
        );

        // A brand-new pack file (no baseline entry).
        let fresh = fx.new_pack.path().join("config/fresh.txt");
        std::fs::create_dir_all(fresh.parent().unwrap()).unwrap();
        std::fs::write(&fresh, b"hello\n").unwrap();

        let outcome = fx.run();
        assert_eq!(fx.game_file("config/a.txt"), "new\n");
        assert_eq!(fx.game_file("config/b.txt"), "mine\n");
        assert_eq!(fx.game_file("config/c.txt"), "gone2\n");
        let merged = fx.game_file("config/d.txt");
        assert!(merged.contains("ONE") && merged.contains("FIVE"));
        assert_eq!(fx.game_file("config/fresh.txt"), "hello\n");

        assert_eq!(outcome.files_conflict, 0);
        assert_eq!(outcome.files_merged, 1);
        // a (updated) + c (restored) + fresh (new).
        assert_eq!(outcome.files_updated, 3);
        assert_eq!(outcome.new_hashes.len(), 5);
    }

    #[test]
    fn merge_tree_without_base_pack_flags_conflicts() {
        let mut fx = MergeFixture::new();
        fx.seed(
            "config/x.txt",
            b"a\nb\nc\n",
            Some(b"a\nB\nc\n"),
            Some(b"a\nX\nc\n"),
        );

        // Two-way mode: no old pack directory available.
        let outcome = merge_tree(
            fx.game.path(),
            &fx.hashes,
            fx.new_pack.path(),
            None,
        )
        .unwrap();
        assert_eq!(outcome.files_conflict, 1);
        assert_eq!(fx.game_file("config/x.txt"), "a\nX\nc\n");
        assert!(fx.game.path().join("config/x.txt.packnew").exists());
    }

    #[test]
    fn zip_round_trip_with_traversal_guard() {
        use std::io::Write;
        use zip::write::SimpleFileOptions;

        let file = tempfile::NamedTempFile::new().unwrap();
        let mut writer = zip::ZipWriter::new(file.reopen().unwrap());
        for (name, content) in [
            ("pack-root/config/a.cfg", b"x".as_slice()),
            ("../outside.txt", b"nope".as_slice()),
        ] {
            writer.start_file(name, SimpleFileOptions::default()).unwrap();
            writer.write_all(content).unwrap();
        }
        writer.finish().unwrap();

        let dest = tempfile::tempdir().unwrap();
        extract_zip(file.path(), dest.path()).unwrap();
        assert!(dest.path().join("pack-root/config/a.cfg").exists());
        assert!(!dest.path().parent().unwrap().join("outside.txt").exists());
        assert_eq!(
            find_pack_root(dest.path()).unwrap(),
            dest.path().join("pack-root")
        );
    }
}
