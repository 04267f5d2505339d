// ─── Profiles ───
// Named bundles of CLI options saved under the user config directory. All
// fields are optional so "not set" stays distinguishable from a zero value.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::error::{UpdaterError, UpdaterResult};
use crate::core::side::InstallSide;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Profile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub side: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_cache: Option<bool>,
}

/// The profiles directory: `$XDG_CONFIG_HOME/packsync/profiles` with the
/// usual `~/.config` fallback.
pub fn profiles_dir() -> PathBuf {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .filter(|p| !p.as_os_str().is_empty())
        .or_else(dirs::config_dir)
        .unwrap_or_else(|| PathBuf::from("."));
    base.join("packsync").join("profiles")
}

fn profile_path(name: &str) -> PathBuf {
    profiles_dir().join(format!("{name}.toml"))
}

/// Reads a named profile.
pub fn load(name: &str) -> UpdaterResult<Profile> {
    let path = profile_path(name);
    let raw = std::fs::read_to_string(&path).map_err(|e| UpdaterError::io(&path, e))?;
    let mut profile: Profile = toml::from_str(&raw)
        .map_err(|e| UpdaterError::Other(format!("loading profile {name:?}: {e}")))?;
    apply_legacy_migration(&mut profile);
    Ok(profile)
}

/// Same legacy migration as the state store: an old "mode" field holding
/// client/server is really the side.
fn apply_legacy_migration(profile: &mut Profile) {
    if profile.side.is_none() {
        if let Some(mode) = &profile.mode {
            if InstallSide::parse(mode).is_some() {
                profile.side = profile.mode.take();
            }
        }
    }
}

/// Writes a profile, creating the directory when needed.
pub fn save(name: &str, profile: &Profile) -> UpdaterResult<()> {
    let dir = profiles_dir();
    std::fs::create_dir_all(&dir).map_err(|e| UpdaterError::io(&dir, e))?;

    let rendered = toml::to_string(profile)
        .map_err(|e| UpdaterError::Other(format!("encoding profile {name:?}: {e}")))?;
    let path = profile_path(name);
    std::fs::write(&path, rendered).map_err(|e| UpdaterError::io(&path, e))
}

/// Names of all saved profiles.
pub fn list() -> UpdaterResult<Vec<String>> {
    let dir = profiles_dir();
    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(UpdaterError::io(&dir, e)),
    };

    let mut names: Vec<String> = entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            name.strip_suffix(".toml").map(str::to_string)
        })
        .collect();
    names.sort();
    Ok(names)
}

/// Removes a named profile.
pub fn delete(name: &str) -> UpdaterResult<()> {
    let path = profile_path(name);
    std::fs::remove_file(&path).map_err(|e| UpdaterError::io(&path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_round_trip_skips_unset_fields() {
        let profile = Profile {
            instance_dir: Some("/srv/pack".to_string()),
            latest: Some(true),
            ..Default::default()
        };
        let rendered = toml::to_string(&profile).unwrap();
        assert!(rendered.contains("instance-dir"));
        assert!(!rendered.contains("cache-dir"));

        let back: Profile = toml::from_str(&rendered).unwrap();
        assert_eq!(back, profile);
    }

    #[test]
    fn legacy_mode_migrates() {
        let mut profile: Profile = toml::from_str("mode = \"client\"\n").unwrap();
        apply_legacy_migration(&mut profile);
        assert_eq!(profile.side.as_deref(), Some("client"));
        assert!(profile.mode.is_none());

        // A real mode value stays put.
        let mut profile: Profile = toml::from_str("mode = \"experimental\"\n").unwrap();
        apply_legacy_migration(&mut profile);
        assert!(profile.side.is_none());
        assert_eq!(profile.mode.as_deref(), Some("experimental"));
    }
}
