// ─── Local State Store ───
// The persistent document that makes updates incremental: which mods are
// installed, which files the pack tracks, and which pack version the
// instance is on.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::error::{UpdaterError, UpdaterResult};
use crate::core::side::InstallSide;

/// Fixed file name, kept stable for compatibility with existing instances.
pub const STATE_FILE: &str = ".state.json";

/// A mod archive currently tracked on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledMod {
    pub version: String,
    pub filename: String,
    pub side: String,
}

/// A user-requested mod outside the manifest.
///
/// `source` variants: empty (resolve via the package index),
/// `upstream:<owner>/<repo>` (fetch from the release API), or a direct URL.
/// Empty `version` means "latest at resolve time"; empty `side` defaults to
/// BOTH.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraModSpec {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub side: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalState {
    #[serde(default)]
    pub side: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mode: String,
    #[serde(default)]
    pub manifest_date: String,
    #[serde(default)]
    pub config_version: String,
    #[serde(default)]
    pub config_hashes: BTreeMap<String, String>,
    #[serde(default)]
    pub mods: BTreeMap<String, InstalledMod>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_mods: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_mods: BTreeMap<String, ExtraModSpec>,
}

impl LocalState {
    /// Reads the local state from the instance directory.
    pub async fn load(instance_dir: &Path) -> UpdaterResult<LocalState> {
        let path = instance_dir.join(STATE_FILE);
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(UpdaterError::NotInitialized(STATE_FILE.to_string()));
            }
            Err(e) => return Err(UpdaterError::io(path, e)),
        };

        let mut state: LocalState =
            serde_json::from_slice(&data).map_err(UpdaterError::CorruptState)?;

        // Backward-compatibility migration: old state files stored the
        // install side (client/server) in "mode".
        if state.side.is_empty() {
            if InstallSide::parse(&state.mode).is_some() {
                state.side = std::mem::take(&mut state.mode).to_ascii_lowercase();
                debug!(side = %state.side, "migrated legacy mode field to side");
            }
        }

        Ok(state)
    }

    /// Writes the state to the instance directory atomically
    /// (temp file + rename), pretty-printed with two-space indent.
    pub async fn save(&self, instance_dir: &Path) -> UpdaterResult<()> {
        let path = instance_dir.join(STATE_FILE);
        let tmp = instance_dir.join(format!("{STATE_FILE}.tmp"));

        let mut data = serde_json::to_vec_pretty(self)?;
        data.push(b'\n');

        tokio::fs::write(&tmp, &data)
            .await
            .map_err(|e| UpdaterError::io(&tmp, e))?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(UpdaterError::io(path, e));
        }
        Ok(())
    }

    /// The typed install side; errors on an unrecognized value so bad state
    /// surfaces before any filesystem mutation.
    pub fn install_side(&self) -> UpdaterResult<InstallSide> {
        InstallSide::parse(&self.side).ok_or_else(|| {
            UpdaterError::Other(format!(
                "state file has invalid side {:?}; expected client or server",
                self.side
            ))
        })
    }
}

/// Resolves the directory containing `mods/` and `config/`. Launcher-managed
/// client instances keep the game tree under `.minecraft/`; servers and flat
/// layouts use the instance directory itself.
pub fn game_dir(instance_dir: &Path) -> PathBuf {
    let nested = instance_dir.join(".minecraft");
    if nested.is_dir() {
        return nested;
    }
    instance_dir.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_state() -> LocalState {
        LocalState {
            side: "client".to_string(),
            mode: "daily".to_string(),
            manifest_date: "2026-07-01T00:00:00Z".to_string(),
            config_version: "2.8.0".to_string(),
            config_hashes: BTreeMap::from([("config/a.cfg".to_string(), "ab12".to_string())]),
            mods: BTreeMap::from([(
                "alpha".to_string(),
                InstalledMod {
                    version: "1.0.0".to_string(),
                    filename: "alpha-1.0.0.jar".to_string(),
                    side: "BOTH".to_string(),
                },
            )]),
            exclude_mods: vec!["beta".to_string()],
            extra_mods: BTreeMap::from([(
                "gadget".to_string(),
                ExtraModSpec {
                    version: "2.0.0".to_string(),
                    ..Default::default()
                },
            )]),
        }
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let state = sample_state();
        state.save(dir.path()).await.unwrap();

        let loaded = LocalState::load(dir.path()).await.unwrap();
        assert_eq!(loaded.side, "client");
        assert_eq!(loaded.mods, state.mods);
        assert_eq!(loaded.extra_mods, state.extra_mods);
        assert_eq!(loaded.config_hashes, state.config_hashes);

        // No temp file left behind.
        assert!(!dir.path().join(format!("{STATE_FILE}.tmp")).exists());
    }

    #[tokio::test]
    async fn load_missing_is_not_initialized() {
        let dir = tempfile::tempdir().unwrap();
        let err = LocalState::load(dir.path()).await.unwrap_err();
        assert!(matches!(err, UpdaterError::NotInitialized(_)));
    }

    #[tokio::test]
    async fn load_invalid_json_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join(STATE_FILE), b"{not json")
            .await
            .unwrap();
        let err = LocalState::load(dir.path()).await.unwrap_err();
        assert!(matches!(err, UpdaterError::CorruptState(_)));
    }

    #[tokio::test]
    async fn legacy_mode_field_promotes_to_side() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(
            dir.path().join(STATE_FILE),
            br#"{"mode":"Client","manifest_date":"","config_version":"1.0"}"#,
        )
        .await
        .unwrap();

        let state = LocalState::load(dir.path()).await.unwrap();
        assert_eq!(state.side, "client");
        assert!(state.mode.is_empty());
        // Empty maps are materialized.
        assert!(state.mods.is_empty());
        assert!(state.config_hashes.is_empty());
    }

    #[tokio::test]
    async fn real_mode_value_is_not_migrated() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(
            dir.path().join(STATE_FILE),
            br#"{"side":"server","mode":"experimental"}"#,
        )
        .await
        .unwrap();

        let state = LocalState::load(dir.path()).await.unwrap();
        assert_eq!(state.side, "server");
        assert_eq!(state.mode, "experimental");
        assert_eq!(state.install_side().unwrap(), InstallSide::Server);
    }
}
