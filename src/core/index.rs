// ─── Package Index ───
// The published catalog of every known mod: all versions, per-version
// download URLs, and enough metadata to identify archives on disk by
// filename alone.

use std::collections::HashMap;

use serde::Deserialize;
use tracing::{debug, info};

use crate::core::error::{UpdaterError, UpdaterResult};
use crate::core::maven;
use crate::core::version;

pub const PACKAGE_INDEX_URL: &str =
    "https://raw.githubusercontent.com/StarforgeLabs/PackForge/master/starforge-assets.json";

const API_URL_PREFIX: &str = "https://api.github.com/";

/// One published artifact of a mod.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VersionArtifact {
    pub tag: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub download_url: String,
    #[serde(default)]
    pub browser_download_url: String,
    #[serde(default)]
    pub prerelease: bool,
}

/// A mod known to the index. `source` empty means first-party (hosted on the
/// project's own infrastructure); otherwise it names the upstream origin.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IndexEntry {
    pub name: String,
    #[serde(default)]
    pub latest_version: String,
    #[serde(default)]
    pub versions: Vec<VersionArtifact>,
    #[serde(default)]
    pub side: String,
    #[serde(default)]
    pub source: String,
}

/// A mod identified by its archive filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilenameMatch {
    pub name: String,
    pub version: String,
    pub side: String,
}

/// A resolved download target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDownload {
    pub url: String,
    pub filename: String,
    /// The URL is an authenticated-API URL that wants octet-stream headers.
    pub is_auth_api: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct PackageIndex {
    /// The pack (configuration) archive releases, keyed like a mod entry.
    #[serde(default)]
    pub config: IndexEntry,
    #[serde(default)]
    pub mods: Vec<IndexEntry>,

    // Built after parsing.
    #[serde(skip)]
    by_name: HashMap<String, usize>,
}

impl PackageIndex {
    /// Fetches and parses the index, then builds the name lookup and sorts
    /// each entry's versions descending.
    pub async fn fetch(client: &reqwest::Client) -> UpdaterResult<PackageIndex> {
        info!("Fetching package index...");
        let resp = client.get(PACKAGE_INDEX_URL).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(UpdaterError::HttpStatus {
                url: PACKAGE_INDEX_URL.to_string(),
                status: status.as_u16(),
            });
        }

        let mut index: PackageIndex = resp.json().await?;
        index.build_index();
        info!(
            mods = index.mods.len(),
            config_versions = index.config.versions.len(),
            "package index loaded"
        );
        Ok(index)
    }

    pub fn build_index(&mut self) {
        for entry in &mut self.mods {
            entry
                .versions
                .sort_by(|a, b| version::compare(&b.tag, &a.tag));
        }
        self.by_name = self
            .mods
            .iter()
            .enumerate()
            .map(|(i, entry)| (entry.name.clone(), i))
            .collect();
    }

    pub fn lookup(&self, name: &str) -> Option<&IndexEntry> {
        self.by_name.get(name).map(|&i| &self.mods[i])
    }

    /// First-party mods are hosted on the project's own infrastructure and
    /// have a Maven mirror.
    pub fn is_first_party(&self, name: &str) -> bool {
        self.lookup(name).is_some_and(|e| e.source.is_empty())
    }

    /// The "owner/repo" upstream repository for a mod, when discoverable.
    /// First-party mods live under the project organization; for external
    /// mods the repo is parsed out of their download URLs.
    pub fn repo_for(&self, name: &str) -> Option<String> {
        let entry = self.lookup(name)?;
        if entry.source.is_empty() {
            return Some(format!("StarforgeLabs/{name}"));
        }
        entry.versions.iter().find_map(|v| {
            parse_repo_from_url(&v.download_url).or_else(|| parse_repo_from_url(&v.browser_download_url))
        })
    }

    /// Reverse index from archive filename to candidate mods. Duplicate
    /// filenames across distinct mods all appear; for first-party entries the
    /// canonical Maven-style filename is indexed as well.
    pub fn build_filename_index(&self) -> HashMap<String, Vec<FilenameMatch>> {
        let mut idx: HashMap<String, Vec<FilenameMatch>> = HashMap::new();
        for entry in &self.mods {
            let first_party = entry.source.is_empty();
            for v in &entry.versions {
                let m = FilenameMatch {
                    name: entry.name.clone(),
                    version: v.tag.clone(),
                    side: entry.side.clone(),
                };
                if !v.filename.is_empty() {
                    idx.entry(v.filename.clone()).or_default().push(m.clone());
                }
                if first_party {
                    let maven_fn = maven::artifact_filename(&entry.name, &v.tag);
                    if maven_fn != v.filename {
                        idx.entry(maven_fn).or_default().push(m);
                    }
                }
            }
        }
        idx
    }

    /// Latest version tag for a mod: the published `latest_version` field,
    /// else the first version without a prerelease flag.
    pub fn latest_version(&self, name: &str) -> UpdaterResult<String> {
        let entry = self
            .lookup(name)
            .ok_or_else(|| UpdaterError::ModNotFound(name.to_string()))?;

        if !entry.latest_version.is_empty() {
            return Ok(entry.latest_version.clone());
        }
        entry
            .versions
            .iter()
            .find(|v| !v.prerelease)
            .map(|v| v.tag.clone())
            .ok_or_else(|| UpdaterError::NoStableVersion(name.to_string()))
    }

    /// Latest version that is neither flagged prerelease nor `-pre` tagged.
    pub fn latest_nonpre_version(&self, name: &str) -> UpdaterResult<String> {
        let entry = self
            .lookup(name)
            .ok_or_else(|| UpdaterError::ModNotFound(name.to_string()))?;

        entry
            .versions
            .iter()
            .find(|v| !v.prerelease && !version::is_prerelease_tag(&v.tag))
            .map(|v| v.tag.clone())
            .ok_or_else(|| UpdaterError::NoStableVersion(name.to_string()))
    }

    /// Resolves the public download for a mod at a version. When the stored
    /// URL is an authenticated-API URL, the browser URL is returned as the
    /// primary and `is_auth_api` signals that an API fallback exists.
    pub fn resolve_download(&self, name: &str, version_tag: &str) -> UpdaterResult<ResolvedDownload> {
        let entry = self
            .lookup(name)
            .ok_or_else(|| UpdaterError::ModNotFound(name.to_string()))?;
        resolve_in_versions(&entry.versions, name, version_tag)
    }

    /// Resolves the authenticated-API download URL for a mod at a version.
    pub fn resolve_download_with_auth(
        &self,
        name: &str,
        version_tag: &str,
    ) -> UpdaterResult<ResolvedDownload> {
        let entry = self
            .lookup(name)
            .ok_or_else(|| UpdaterError::ModNotFound(name.to_string()))?;
        resolve_auth_in_versions(&entry.versions, name, version_tag)
    }

    /// Resolves the public download of a pack (configuration) archive.
    pub fn resolve_config_download(&self, version_tag: &str) -> UpdaterResult<ResolvedDownload> {
        resolve_in_versions(&self.config.versions, "config", version_tag)
    }

    /// Resolves the authenticated-API download of a pack archive.
    pub fn resolve_config_download_with_auth(
        &self,
        version_tag: &str,
    ) -> UpdaterResult<ResolvedDownload> {
        resolve_auth_in_versions(&self.config.versions, "config", version_tag)
    }
}

fn resolve_in_versions(
    versions: &[VersionArtifact],
    name: &str,
    version_tag: &str,
) -> UpdaterResult<ResolvedDownload> {
    let v = find_version(versions, name, version_tag)?;
    if v.download_url.starts_with(API_URL_PREFIX) {
        debug!(name, version = version_tag, "download URL is API-form, preferring browser URL");
        return Ok(ResolvedDownload {
            url: v.browser_download_url.clone(),
            filename: v.filename.clone(),
            is_auth_api: true,
        });
    }
    Ok(ResolvedDownload {
        url: v.download_url.clone(),
        filename: v.filename.clone(),
        is_auth_api: false,
    })
}

fn resolve_auth_in_versions(
    versions: &[VersionArtifact],
    name: &str,
    version_tag: &str,
) -> UpdaterResult<ResolvedDownload> {
    let v = find_version(versions, name, version_tag)?;
    Ok(ResolvedDownload {
        url: v.download_url.clone(),
        filename: v.filename.clone(),
        is_auth_api: true,
    })
}

fn find_version<'a>(
    versions: &'a [VersionArtifact],
    name: &str,
    version_tag: &str,
) -> UpdaterResult<&'a VersionArtifact> {
    versions
        .iter()
        .find(|v| v.tag == version_tag)
        .ok_or_else(|| UpdaterError::VersionNotFound {
            name: name.to_string(),
            version: version_tag.to_string(),
        })
}

/// Extracts "owner/repo" from an API or browser release URL.
fn parse_repo_from_url(url: &str) -> Option<String> {
    let rest = url
        .strip_prefix("https://api.github.com/repos/")
        .or_else(|| url.strip_prefix("https://github.com/"))?;
    let mut parts = rest.splitn(3, '/');
    let owner = parts.next().filter(|s| !s.is_empty())?;
    let repo = parts.next().filter(|s| !s.is_empty())?;
    Some(format!("{owner}/{repo}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_from_json(json: &str) -> PackageIndex {
        let mut index: PackageIndex = serde_json::from_str(json).unwrap();
        index.build_index();
        index
    }

    fn sample_index() -> PackageIndex {
        index_from_json(
            r#"{
            "config": {
                "name": "config",
                "versions": [
                    {"tag": "2.8.0", "filename": "pack-2.8.0.zip",
                     "download_url": "https://downloads.starforgelabs.net/pack-2.8.0.zip",
                     "browser_download_url": "https://downloads.starforgelabs.net/pack-2.8.0.zip"}
                ]
            },
            "mods": [
                {
                    "name": "alpha",
                    "latest_version": "",
                    "side": "BOTH",
                    "source": "",
                    "versions": [
                        {"tag": "1.0.0", "filename": "alpha-1.0.0.jar",
                         "download_url": "https://api.github.com/repos/StarforgeLabs/alpha/releases/assets/11",
                         "browser_download_url": "https://github.com/StarforgeLabs/alpha/releases/download/1.0.0/alpha-1.0.0.jar"},
                        {"tag": "1.1.0-pre", "filename": "alpha-1.1.0-pre.jar",
                         "download_url": "https://api.github.com/repos/StarforgeLabs/alpha/releases/assets/12",
                         "browser_download_url": "https://github.com/StarforgeLabs/alpha/releases/download/1.1.0-pre/alpha-1.1.0-pre.jar"}
                    ]
                },
                {
                    "name": "vendor-thing",
                    "side": "CLIENT",
                    "source": "https://example.com/vendor",
                    "versions": [
                        {"tag": "0.4", "filename": "VendorThing-0.4.jar",
                         "download_url": "https://github.com/vendor/thing/releases/download/0.4/VendorThing-0.4.jar",
                         "browser_download_url": "https://github.com/vendor/thing/releases/download/0.4/VendorThing-0.4.jar",
                         "prerelease": false}
                    ]
                }
            ]
        }"#,
        )
    }

    #[test]
    fn versions_sorted_descending() {
        let index = index_from_json(
            r#"{"mods": [{"name": "m", "versions": [
                {"tag": "1.0.0"}, {"tag": "1.10.0"}, {"tag": "1.2.0"}
            ]}]}"#,
        );
        let tags: Vec<&str> = index.lookup("m").unwrap().versions.iter().map(|v| v.tag.as_str()).collect();
        assert_eq!(tags, ["1.10.0", "1.2.0", "1.0.0"]);
    }

    #[test]
    fn latest_nonpre_skips_flag_and_suffix() {
        let index = index_from_json(
            r#"{"mods": [{"name": "m", "versions": [
                {"tag": "2.0.0-pre"},
                {"tag": "1.9.0", "prerelease": true},
                {"tag": "1.8.0"}
            ]}]}"#,
        );
        assert_eq!(index.latest_nonpre_version("m").unwrap(), "1.8.0");
        assert!(matches!(
            index.latest_nonpre_version("absent"),
            Err(UpdaterError::ModNotFound(_))
        ));
    }

    #[test]
    fn resolve_download_prefers_browser_for_api_urls() {
        let index = sample_index();
        let dl = index.resolve_download("alpha", "1.0.0").unwrap();
        assert!(dl.is_auth_api);
        assert!(dl.url.starts_with("https://github.com/"));
        assert_eq!(dl.filename, "alpha-1.0.0.jar");

        let auth = index.resolve_download_with_auth("alpha", "1.0.0").unwrap();
        assert!(auth.url.starts_with("https://api.github.com/"));
    }

    #[test]
    fn resolve_download_unknown_version() {
        let index = sample_index();
        assert!(matches!(
            index.resolve_download("alpha", "9.9.9"),
            Err(UpdaterError::VersionNotFound { .. })
        ));
    }

    #[test]
    fn filename_index_includes_maven_style_for_first_party() {
        let index = sample_index();
        let idx = index.build_filename_index();
        // Direct filename and the canonical sanitized form both resolve.
        assert!(idx.contains_key("alpha-1.0.0.jar"));
        let matches = &idx["alpha-1.0.0.jar"];
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].name, "alpha");
        // External mods index only their published filename.
        assert!(idx.contains_key("VendorThing-0.4.jar"));
        assert!(!idx.contains_key("vendor-thing-0.4.jar"));
    }

    #[test]
    fn duplicate_filenames_keep_all_candidates() {
        let index = index_from_json(
            r#"{"mods": [
                {"name": "a", "source": "x", "versions": [{"tag": "1", "filename": "shared.jar"}]},
                {"name": "b", "source": "x", "versions": [{"tag": "2", "filename": "shared.jar"}]}
            ]}"#,
        );
        let idx = index.build_filename_index();
        assert_eq!(idx["shared.jar"].len(), 2);
    }

    #[test]
    fn repo_discovery() {
        let index = sample_index();
        assert_eq!(index.repo_for("alpha").unwrap(), "StarforgeLabs/alpha");
        assert_eq!(index.repo_for("vendor-thing").unwrap(), "vendor/thing");
        assert!(index.repo_for("absent").is_none());
    }

    #[test]
    fn config_download_resolves() {
        let index = sample_index();
        let dl = index.resolve_config_download("2.8.0").unwrap();
        assert!(!dl.is_auth_api);
        assert_eq!(dl.filename, "pack-2.8.0.zip");
    }
}
