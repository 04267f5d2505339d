// ─── Upstream Release Client ───
// Queries the GitHub release API for the newest stable release carrying a
// primary archive asset. Used by the --latest resolver and by extra mods
// sourced directly from a repository.

use serde::Deserialize;
use tracing::debug;

use crate::core::error::{UpdaterError, UpdaterResult};
use crate::core::index::ResolvedDownload;
use crate::core::version;

pub const API_BASE: &str = "https://api.github.com";

const RELEASES_PER_PAGE: u32 = 25;

/// The subset of the release API response we need.
#[derive(Debug, Clone, Deserialize)]
pub struct Release {
    pub tag_name: String,
    #[serde(default)]
    pub prerelease: bool,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

/// A downloadable file attached to a release. The API URL form requires an
/// octet-stream Accept header (and a token for private repositories).
#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    #[serde(default)]
    pub browser_download_url: String,
    #[serde(default, rename = "url")]
    pub api_url: String,
}

/// Result of a latest-release lookup.
#[derive(Debug, Clone)]
pub struct LatestRelease {
    pub version: String,
    pub download: ResolvedDownload,
}

/// Selects the primary mod archive from a release's assets.
///
/// Looks for a `.jar` whose name ends with `-{version}.jar`, which excludes
/// secondary artifacts like `-dev`, `-api`, `-sources` jars that append a
/// classifier after the version. Tags with a `v` prefix match filenames
/// without it. Falls back to the sole `.jar` when the release has exactly
/// one; multiple candidates with no suffix match are ambiguous and yield
/// `None` so no wrong file is installed.
pub fn pick_primary_asset<'a>(assets: &'a [ReleaseAsset], version_tag: &str) -> Option<&'a ReleaseAsset> {
    let version_tag = version_tag.trim();
    let mut suffixes = vec![format!("-{}.jar", version_tag.to_ascii_lowercase())];
    if let Some(stripped) = version_tag.strip_prefix('v').or_else(|| version_tag.strip_prefix('V')) {
        suffixes.push(format!("-{}.jar", stripped.to_ascii_lowercase()));
    }

    let mut jars: Vec<&ReleaseAsset> = Vec::new();
    for asset in assets {
        let name = asset.name.trim().to_ascii_lowercase();
        if !name.ends_with(".jar") {
            continue;
        }
        if suffixes.iter().any(|s| name.ends_with(s.as_str())) {
            return Some(asset);
        }
        jars.push(asset);
    }

    match jars.as_slice() {
        [only] => Some(*only),
        _ => None,
    }
}

/// Fetches recent releases of a repository and returns the highest-ordered
/// non-prerelease that has a primary archive asset.
pub async fn fetch_latest_release(
    client: &reqwest::Client,
    repo: &str,
    auth_token: Option<&str>,
) -> UpdaterResult<LatestRelease> {
    let url = format!("{API_BASE}/repos/{repo}/releases?per_page={RELEASES_PER_PAGE}");
    let releases = fetch_release_list(client, &url, auth_token).await?;

    select_latest_release(&releases, auth_token).ok_or_else(|| UpdaterError::Other(format!(
        "repo {repo}: no non-prerelease with a primary archive asset found"
    )))
}

/// Fetches one release: the repository's latest, or a specific tag.
pub async fn fetch_release(
    client: &reqwest::Client,
    repo: &str,
    tag: Option<&str>,
    auth_token: Option<&str>,
) -> UpdaterResult<Release> {
    let url = match tag {
        Some(tag) => format!("{API_BASE}/repos/{repo}/releases/tags/{tag}"),
        None => format!("{API_BASE}/repos/{repo}/releases/latest"),
    };

    let mut req = client.get(&url);
    if let Some(token) = auth_token {
        req = req.header("Authorization", format!("token {token}"));
    }
    let resp = req.send().await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(UpdaterError::HttpStatus {
            url,
            status: status.as_u16(),
        });
    }
    Ok(resp.json().await?)
}

async fn fetch_release_list(
    client: &reqwest::Client,
    url: &str,
    auth_token: Option<&str>,
) -> UpdaterResult<Vec<Release>> {
    let mut req = client.get(url);
    if let Some(token) = auth_token {
        req = req.header("Authorization", format!("token {token}"));
    }
    let resp = req.send().await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(UpdaterError::HttpStatus {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }
    Ok(resp.json().await?)
}

/// Picks the highest-ordered stable release that has a primary asset. With a
/// token, assets exposing an API URL resolve to authenticated downloads.
pub fn select_latest_release(releases: &[Release], auth_token: Option<&str>) -> Option<LatestRelease> {
    let mut best: Option<LatestRelease> = None;
    for rel in releases {
        let tag = rel.tag_name.trim();
        if tag.is_empty() || rel.prerelease || version::is_prerelease_tag(tag) {
            continue;
        }
        if let Some(b) = &best {
            if version::compare(tag, &b.version) != std::cmp::Ordering::Greater {
                continue;
            }
        }
        let Some(asset) = pick_primary_asset(&rel.assets, tag) else {
            debug!(tag, "release skipped: no unambiguous primary asset");
            continue;
        };

        let (url, is_auth_api) = match auth_token {
            Some(_) if !asset.api_url.trim().is_empty() => (asset.api_url.trim(), true),
            _ => (asset.browser_download_url.trim(), false),
        };
        if url.is_empty() {
            continue;
        }

        best = Some(LatestRelease {
            version: tag.to_string(),
            download: ResolvedDownload {
                url: url.to_string(),
                filename: asset.name.trim().to_string(),
                is_auth_api,
            },
        });
    }
    best
}
