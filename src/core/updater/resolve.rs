// Download-source resolution: extra mod specs, the three-tier URL fallback
// (pre-resolved → package index → Maven), and the opt-in latest-version
// override passes.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::core::diff::{Change, ChangeKind, ResolvedExtraMod};
use crate::core::downloader::DownloadJob;
use crate::core::error::{UpdaterError, UpdaterResult};
use crate::core::index::{PackageIndex, ResolvedDownload};
use crate::core::maven;
use crate::core::releases;
use crate::core::state::{ExtraModSpec, LocalState};
use crate::core::tasks;
use crate::core::version;

const UPSTREAM_SOURCE_PREFIX: &str = "upstream:";

/// Resolves the download URL and filename for a mod, trying pre-resolved
/// extras, --latest release downloads, the package index (authenticated then
/// public), and Maven for first-party mods, in that order.
pub(crate) fn resolve_mod_download(
    index: &PackageIndex,
    name: &str,
    version_tag: &str,
    auth_token: Option<&str>,
    extra_downloads: &BTreeMap<String, ResolvedDownload>,
    latest_downloads: &BTreeMap<String, ResolvedDownload>,
) -> Option<DownloadJob> {
    if let Some(dl) = extra_downloads.get(name).or_else(|| latest_downloads.get(name)) {
        return Some(job_from(name, dl.clone()));
    }

    if auth_token.is_some() {
        if let Ok(dl) = index.resolve_download_with_auth(name, version_tag) {
            return Some(job_from(name, dl));
        }
    }

    if let Ok(dl) = index.resolve_download(name, version_tag) {
        return Some(job_from(name, dl));
    }

    if index.is_first_party(name) {
        let (url, filename) = maven::download_url(name, version_tag);
        return Some(DownloadJob {
            url,
            filename,
            mod_name: name.to_string(),
            is_auth_api: false,
        });
    }

    None
}

fn job_from(name: &str, dl: ResolvedDownload) -> DownloadJob {
    DownloadJob {
        url: dl.url,
        filename: dl.filename,
        mod_name: name.to_string(),
        is_auth_api: dl.is_auth_api,
    }
}

/// Resolves every configured extra mod, collecting all failures so the user
/// sees every problem at once.
pub(crate) async fn resolve_configured_extras(
    client: &reqwest::Client,
    state: &LocalState,
    index: &PackageIndex,
    auth_token: Option<&str>,
    latest: bool,
) -> UpdaterResult<(
    BTreeMap<String, ResolvedExtraMod>,
    BTreeMap<String, ResolvedDownload>,
)> {
    let mut resolved_extras = BTreeMap::new();
    let mut extra_downloads = BTreeMap::new();
    if state.extra_mods.is_empty() {
        return Ok((resolved_extras, extra_downloads));
    }

    info!("Resolving {} extra mod(s)...", state.extra_mods.len());
    let mut unresolved = Vec::new();
    for (name, spec) in &state.extra_mods {
        match resolve_extra_mod(client, name, spec, index, auth_token, latest).await {
            Ok((resolved, download)) => {
                debug!(
                    name,
                    version = %resolved.version,
                    filename = %download.filename,
                    auth_api = download.is_auth_api,
                    "resolved extra mod"
                );
                resolved_extras.insert(name.clone(), resolved);
                extra_downloads.insert(name.clone(), download);
            }
            Err(e) => {
                debug!(name, error = %e, "failed resolving extra mod");
                unresolved.push(format!("{name} ({e})"));
            }
        }
    }
    if !unresolved.is_empty() {
        return Err(UpdaterError::ResolveFailed(unresolved.join("; ")));
    }

    Ok((resolved_extras, extra_downloads))
}

/// Resolves one extra mod spec into version/side info and download details.
async fn resolve_extra_mod(
    client: &reqwest::Client,
    name: &str,
    spec: &ExtraModSpec,
    index: &PackageIndex,
    auth_token: Option<&str>,
    latest: bool,
) -> UpdaterResult<(ResolvedExtraMod, ResolvedDownload)> {
    let side = if spec.side.is_empty() {
        "BOTH".to_string()
    } else {
        spec.side.clone()
    };

    if spec.source.is_empty() {
        // Package-index source.
        let version_tag = if spec.version.is_empty() || latest {
            if latest {
                index.latest_nonpre_version(name)?
            } else {
                index.latest_version(name)?
            }
        } else {
            spec.version.clone()
        };

        // First-party artifacts come straight off Maven.
        if index.is_first_party(name) {
            let (url, filename) = maven::download_url(name, &version_tag);
            return Ok((
                ResolvedExtraMod {
                    version: version_tag,
                    side,
                },
                ResolvedDownload {
                    url,
                    filename,
                    is_auth_api: false,
                },
            ));
        }

        let mut download = index.resolve_download(name, &version_tag)?;
        if download.is_auth_api && auth_token.is_some() {
            if let Ok(auth) = index.resolve_download_with_auth(name, &version_tag) {
                download = auth;
            }
        }
        return Ok((
            ResolvedExtraMod {
                version: version_tag,
                side,
            },
            download,
        ));
    }

    if let Some(repo) = spec.source.strip_prefix(UPSTREAM_SOURCE_PREFIX) {
        // Release-API source.
        let tag = (!spec.version.is_empty()).then_some(spec.version.as_str());
        let release = releases::fetch_release(client, repo, tag, auth_token).await?;
        let version_tag = release.tag_name.clone();

        let asset = releases::pick_primary_asset(&release.assets, &version_tag).ok_or_else(|| {
            UpdaterError::AssetAmbiguity {
                repo: repo.to_string(),
                version: version_tag.clone(),
            }
        })?;

        let (url, is_auth_api) = match auth_token {
            Some(_) if !asset.api_url.trim().is_empty() => (asset.api_url.trim(), true),
            _ => (asset.browser_download_url.trim(), false),
        };
        if url.is_empty() {
            return Err(UpdaterError::Other(format!(
                "release asset {} has no download URL",
                asset.name
            )));
        }

        return Ok((
            ResolvedExtraMod {
                version: version_tag,
                side,
            },
            ResolvedDownload {
                url: url.to_string(),
                filename: asset.name.trim().to_string(),
                is_auth_api,
            },
        ));
    }

    // Direct URL source.
    let url = spec.source.clone();
    let filename = url
        .rsplit('/')
        .next()
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("{name}.jar"));
    let version_tag = if spec.version.is_empty() {
        // No version to speak of; the URL identifies the artifact.
        url.clone()
    } else {
        spec.version.clone()
    };

    Ok((
        ResolvedExtraMod {
            version: version_tag,
            side,
        },
        ResolvedDownload {
            url,
            filename,
            is_auth_api: false,
        },
    ))
}

/// Opt-in override of manifest-pinned versions with newer discoveries.
/// Three passes: package index, Maven (first-party, parallel), release API
/// (first-party, parallel, token-gated). Never touches Removed changes; may
/// promote Unchanged to Updated, never the reverse.
pub(crate) async fn resolve_latest_versions(
    client: &reqwest::Client,
    index: &PackageIndex,
    changes: &mut [Change],
    extra_downloads: &BTreeMap<String, ResolvedDownload>,
    latest_downloads: &mut BTreeMap<String, ResolvedDownload>,
    concurrency: usize,
    auth_token: Option<&str>,
) {
    // Pass 1: the package index's own latest versions.
    for change in changes.iter_mut() {
        if change.kind == ChangeKind::Removed || extra_downloads.contains_key(&change.name) {
            continue;
        }
        let Ok(latest) = index.latest_nonpre_version(&change.name) else {
            continue;
        };
        if latest != change.new_version {
            debug!(name = %change.name, from = %change.new_version, to = %latest, "index latest override");
            change.new_version = latest;
            if change.kind == ChangeKind::Unchanged {
                change.kind = ChangeKind::Updated;
            }
        }
    }

    // Pass 2: Maven metadata for first-party mods, which can be ahead of the
    // package index.
    info!("Checking Maven for latest versions...");
    let candidates: Vec<(usize, String, String)> = changes
        .iter()
        .enumerate()
        .filter(|(_, c)| {
            c.kind != ChangeKind::Removed
                && !extra_downloads.contains_key(&c.name)
                && index.is_first_party(&c.name)
        })
        .map(|(i, c)| (i, c.name.clone(), c.new_version.clone()))
        .collect();

    let maven_results = tasks::run_bounded(candidates, concurrency, |(i, name, current)| async move {
        let latest = maven::latest_nonpre_version(client, &name).await.ok()?;
        (version::compare(&latest, &current) == std::cmp::Ordering::Greater).then_some((i, latest))
    })
    .await;

    for (i, latest) in maven_results.into_iter().flatten() {
        debug!(name = %changes[i].name, from = %changes[i].new_version, to = %latest, "maven latest override");
        changes[i].new_version = latest;
        if changes[i].kind == ChangeKind::Unchanged {
            changes[i].kind = ChangeKind::Updated;
        }
    }

    // Pass 3: upstream releases, which can be ahead of Maven. Needs a token.
    if auth_token.is_some() {
        info!("Checking upstream releases for latest versions...");
        let candidates: Vec<(usize, String, String, String)> = changes
            .iter()
            .enumerate()
            .filter(|(_, c)| {
                c.kind != ChangeKind::Removed
                    && !extra_downloads.contains_key(&c.name)
                    && index.is_first_party(&c.name)
            })
            .filter_map(|(i, c)| {
                index
                    .repo_for(&c.name)
                    .map(|repo| (i, c.name.clone(), repo, c.new_version.clone()))
            })
            .collect();

        let release_results =
            tasks::run_bounded(candidates, concurrency, |(i, _name, repo, current)| async move {
                let latest = releases::fetch_latest_release(client, &repo, auth_token)
                    .await
                    .ok()?;
                (version::compare(&latest.version, &current) == std::cmp::Ordering::Greater)
                    .then_some((i, latest))
            })
            .await;

        for (i, latest) in release_results.into_iter().flatten() {
            debug!(
                name = %changes[i].name,
                from = %changes[i].new_version,
                to = %latest.version,
                asset = %latest.download.filename,
                "release latest override"
            );
            changes[i].new_version = latest.version;
            if changes[i].kind == ChangeKind::Unchanged {
                changes[i].kind = ChangeKind::Updated;
            }
            latest_downloads.insert(changes[i].name.clone(), latest.download);
        }
    }

    // Overrides can collapse an update back onto the installed version;
    // normalize those to Unchanged so no "x -> x" no-op is applied.
    for change in changes.iter_mut() {
        if change.kind == ChangeKind::Updated && change.old_version == change.new_version {
            change.kind = ChangeKind::Unchanged;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_index(json: &str) -> PackageIndex {
        let mut index: PackageIndex = serde_json::from_str(json).unwrap();
        index.build_index();
        index
    }

    fn external_index() -> PackageIndex {
        test_index(
            r#"{"mods": [{
                "name": "Mod",
                "side": "BOTH",
                "source": "https://example.com/mod",
                "versions": [
                    {"tag": "1.1.0", "filename": "Mod-1.1.0.jar",
                     "download_url": "https://example.com/Mod-1.1.0.jar",
                     "browser_download_url": "https://example.com/Mod-1.1.0.jar"},
                    {"tag": "1.0.0", "filename": "Mod-1.0.0.jar",
                     "download_url": "https://example.com/Mod-1.0.0.jar",
                     "browser_download_url": "https://example.com/Mod-1.0.0.jar"}
                ]
            }]}"#,
        )
    }

    #[test]
    fn tier_order_prefers_preresolved_sources() {
        let index = external_index();
        let extra = BTreeMap::from([(
            "Mod".to_string(),
            ResolvedDownload {
                url: "https://extra.example/Mod.jar".to_string(),
                filename: "Mod.jar".to_string(),
                is_auth_api: false,
            },
        )]);

        let job =
            resolve_mod_download(&index, "Mod", "1.0.0", None, &extra, &BTreeMap::new()).unwrap();
        assert_eq!(job.url, "https://extra.example/Mod.jar");

        let job = resolve_mod_download(
            &index,
            "Mod",
            "1.0.0",
            None,
            &BTreeMap::new(),
            &BTreeMap::new(),
        )
        .unwrap();
        assert_eq!(job.url, "https://example.com/Mod-1.0.0.jar");
    }

    #[test]
    fn first_party_falls_back_to_maven() {
        let index = test_index(r#"{"mods": [{"name": "Own", "source": "", "versions": []}]}"#);
        let job = resolve_mod_download(
            &index,
            "Own",
            "2.0.0",
            None,
            &BTreeMap::new(),
            &BTreeMap::new(),
        )
        .unwrap();
        assert_eq!(job.filename, "Own-2.0.0.jar");
        assert!(job.url.contains("maven.starforgelabs.net"));

        // External mods with no index entry for the version resolve to nothing.
        let index = external_index();
        assert!(resolve_mod_download(
            &index,
            "Mod",
            "9.9.9",
            None,
            &BTreeMap::new(),
            &BTreeMap::new(),
        )
        .is_none());
    }

    #[tokio::test]
    async fn latest_override_collapses_back_to_unchanged() {
        // Installed 1.1.0, manifest pins 1.0.0, index knows 1.1.0 is latest:
        // the override rewrites the update to 1.1.0 which equals the
        // installed version, so the change normalizes to Unchanged.
        let index = external_index();
        let mut changes = vec![Change {
            name: "Mod".to_string(),
            kind: ChangeKind::Updated,
            old_version: "1.1.0".to_string(),
            new_version: "1.0.0".to_string(),
            side: "BOTH".to_string(),
        }];

        let client = reqwest::Client::new();
        let mut latest_downloads = BTreeMap::new();
        resolve_latest_versions(
            &client,
            &index,
            &mut changes,
            &BTreeMap::new(),
            &mut latest_downloads,
            2,
            None,
        )
        .await;

        assert_eq!(changes[0].kind, ChangeKind::Unchanged);
        assert_eq!(changes[0].new_version, "1.1.0");
        assert!(latest_downloads.is_empty());
    }

    #[tokio::test]
    async fn latest_override_never_touches_removed() {
        let index = external_index();
        let mut changes = vec![Change {
            name: "Mod".to_string(),
            kind: ChangeKind::Removed,
            old_version: "1.0.0".to_string(),
            new_version: String::new(),
            side: "BOTH".to_string(),
        }];

        let client = reqwest::Client::new();
        resolve_latest_versions(
            &client,
            &index,
            &mut changes,
            &BTreeMap::new(),
            &mut BTreeMap::new(),
            2,
            None,
        )
        .await;

        assert_eq!(changes[0].kind, ChangeKind::Removed);
        assert!(changes[0].new_version.is_empty());
    }

    #[tokio::test]
    async fn extra_mod_with_direct_url_source() {
        let index = test_index(r#"{"mods": []}"#);
        let client = reqwest::Client::new();
        let spec = ExtraModSpec {
            source: "https://example.com/files/Widget-3.1.jar".to_string(),
            ..Default::default()
        };

        let (resolved, download) = resolve_extra_mod(&client, "widget", &spec, &index, None, false)
            .await
            .unwrap();
        assert_eq!(download.filename, "Widget-3.1.jar");
        assert_eq!(download.url, "https://example.com/files/Widget-3.1.jar");
        assert_eq!(resolved.side, "BOTH");
        // URL doubles as the version identifier when none is given.
        assert_eq!(resolved.version, download.url);
    }

    #[tokio::test]
    async fn extra_mod_from_index_uses_maven_for_first_party() {
        let index = test_index(
            r#"{"mods": [{
                "name": "Own",
                "latest_version": "2.0.0",
                "source": "",
                "versions": [{"tag": "2.0.0", "filename": "Own-2.0.0.jar",
                              "download_url": "x", "browser_download_url": "x"}]
            }]}"#,
        );
        let client = reqwest::Client::new();
        let spec = ExtraModSpec::default();

        let (resolved, download) = resolve_extra_mod(&client, "Own", &spec, &index, None, false)
            .await
            .unwrap();
        assert_eq!(resolved.version, "2.0.0");
        assert!(download.url.contains("maven.starforgelabs.net"));

        // Unknown extras surface the index error.
        let err = resolve_extra_mod(&client, "ghost", &spec, &index, None, false)
            .await
            .unwrap_err();
        assert!(matches!(err, UpdaterError::ModNotFound(_)));
    }

    #[tokio::test]
    async fn unresolved_extras_are_collected() {
        let index = test_index(r#"{"mods": []}"#);
        let client = reqwest::Client::new();
        let state = LocalState {
            extra_mods: BTreeMap::from([
                ("ghost-one".to_string(), ExtraModSpec::default()),
                ("ghost-two".to_string(), ExtraModSpec::default()),
            ]),
            ..Default::default()
        };

        let err = resolve_configured_extras(&client, &state, &index, None, false)
            .await
            .unwrap_err();
        let UpdaterError::ResolveFailed(msg) = err else {
            panic!("expected ResolveFailed");
        };
        assert!(msg.contains("ghost-one"));
        assert!(msg.contains("ghost-two"));
    }
}
