// ─── Manifest Client ───
// Fetches the published target snapshot: the pinned version and side of
// every mod at a given release date.

use std::collections::BTreeMap;

use serde::Deserialize;
use tracing::info;

use crate::core::error::{UpdaterError, UpdaterResult};

pub const DAILY_MANIFEST_URL: &str =
    "https://raw.githubusercontent.com/StarforgeLabs/PackForge/master/releases/manifests/daily.json";
pub const EXPERIMENTAL_MANIFEST_URL: &str =
    "https://raw.githubusercontent.com/StarforgeLabs/PackForge/master/releases/manifests/experimental.json";

/// Which release channel the instance follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Daily,
    Experimental,
}

impl Mode {
    /// Validates and normalizes a mode string. Empty defaults to daily.
    pub fn parse(mode: &str) -> UpdaterResult<Mode> {
        match mode.trim().to_ascii_lowercase().as_str() {
            "" | "daily" => Ok(Mode::Daily),
            "experimental" => Ok(Mode::Experimental),
            other => Err(UpdaterError::Other(format!(
                "mode must be \"daily\" or \"experimental\", got {other:?}"
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Daily => "daily",
            Mode::Experimental => "experimental",
        }
    }

    pub fn manifest_url(self) -> &'static str {
        match self {
            Mode::Daily => DAILY_MANIFEST_URL,
            Mode::Experimental => EXPERIMENTAL_MANIFEST_URL,
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pinned mod entry in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ModPin {
    pub version: String,
    #[serde(default)]
    pub side: String,
}

/// The published target snapshot for one mode.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ManifestSnapshot {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub last_version: String,
    #[serde(default)]
    pub last_updated: String,
    #[serde(default)]
    pub config_version: String,
    #[serde(default)]
    pub first_party_mods: BTreeMap<String, ModPin>,
    #[serde(default)]
    pub external_mods: BTreeMap<String, ModPin>,
}

impl ManifestSnapshot {
    /// Fetches and decodes the manifest for the given mode.
    pub async fn fetch(client: &reqwest::Client, mode: Mode) -> UpdaterResult<ManifestSnapshot> {
        let url = mode.manifest_url();
        info!("Fetching latest {mode} manifest...");

        let resp = client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(UpdaterError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let manifest: ManifestSnapshot = resp.json().await?;
        info!(
            mods = manifest.first_party_mods.len() + manifest.external_mods.len(),
            config = %manifest.config_version,
            updated = %manifest.last_updated,
            "loaded manifest"
        );
        Ok(manifest)
    }

    /// The authoritative pinned set: first-party and external mods merged,
    /// with external entries winning on a name collision.
    pub fn all_mods(&self) -> BTreeMap<String, ModPin> {
        let mut all = self.first_party_mods.clone();
        all.extend(self.external_mods.clone());
        all
    }
}
