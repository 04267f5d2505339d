// ─── Maven Metadata Client ───
// First-party artifacts are mirrored on the project Maven repository; this
// is both the freshest version source and the download fallback when the
// package index has no usable URL.

use reqwest::Url;
use serde::Deserialize;
use tracing::debug;

use crate::core::error::{UpdaterError, UpdaterResult};
use crate::core::version;

pub const REPOSITORY_BASE: &str =
    "https://maven.starforgelabs.net/releases/com/github/StarforgeLabs/";

/// Minimal `maven-metadata.xml` model – only the versioning block matters.
#[derive(Debug, Default, Deserialize)]
struct MavenMetadata {
    #[serde(default)]
    versioning: Versioning,
}

#[derive(Debug, Default, Deserialize)]
struct Versioning {
    #[serde(default)]
    release: Option<String>,
    #[serde(default)]
    versions: VersionList,
}

#[derive(Debug, Default, Deserialize)]
struct VersionList {
    #[serde(default, rename = "version")]
    items: Vec<String>,
}

fn repository_base() -> Url {
    Url::parse(REPOSITORY_BASE).expect("static repository URL is valid")
}

/// URL of the artifact's metadata document. The artifact name is
/// percent-encoded as a path segment.
pub fn metadata_url(artifact: &str) -> String {
    let mut url = repository_base();
    url.path_segments_mut()
        .expect("repository URL has a path")
        .pop_if_empty()
        .push(artifact)
        .push("maven-metadata.xml");
    url.to_string()
}

/// Download URL and filename for an artifact at a specific version.
pub fn download_url(artifact: &str, version_tag: &str) -> (String, String) {
    let filename = artifact_filename(artifact, version_tag);
    let mut url = repository_base();
    url.path_segments_mut()
        .expect("repository URL has a path")
        .pop_if_empty()
        .push(artifact)
        .push(version_tag)
        .push(&filename);
    (url.to_string(), filename)
}

/// Fetches Maven metadata for an artifact and returns the latest stable
/// (non "-pre") version under the crate's version ordering.
pub async fn latest_nonpre_version(
    client: &reqwest::Client,
    artifact: &str,
) -> UpdaterResult<String> {
    let url = metadata_url(artifact);
    let resp = client.get(&url).send().await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(UpdaterError::HttpStatus {
            url,
            status: status.as_u16(),
        });
    }

    let body = resp.text().await?;
    let md: MavenMetadata = quick_xml::de::from_str(&body)?;

    let latest = latest_stable_version(
        &md.versioning.versions.items,
        md.versioning.release.as_deref(),
    );
    match latest {
        Some(v) => {
            debug!(artifact, version = %v, "resolved latest Maven version");
            Ok(v)
        }
        None => Err(UpdaterError::NoStableVersion(artifact.to_string())),
    }
}

fn latest_stable_version(versions: &[String], release: Option<&str>) -> Option<String> {
    let mut best: Option<&str> = None;
    let candidates = versions
        .iter()
        .map(String::as_str)
        .chain(release)
        .map(str::trim)
        .filter(|v| !v.is_empty() && !version::is_prerelease_tag(v));

    for v in candidates {
        if best.is_none_or(|b| version::compare(v, b) == std::cmp::Ordering::Greater) {
            best = Some(v);
        }
    }
    best.map(str::to_string)
}

/// Removes or replaces characters invalid in Maven artifact paths or
/// filenames: letters, digits, `-._` kept, spaces become `-`, anything else
/// is dropped.
pub fn sanitize_component(s: &str) -> String {
    s.chars()
        .filter_map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '.' | '_' => Some(c),
            ' ' => Some('-'),
            _ => None,
        })
        .collect()
}

/// Canonical `<name>-<version>.jar` filename for a first-party artifact.
pub fn artifact_filename(artifact: &str, version_tag: &str) -> String {
    format!(
        "{}-{}.jar",
        sanitize_component(artifact),
        sanitize_component(version_tag)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_url_percent_encodes() {
        assert_eq!(
            metadata_url("Applied Power"),
            format!("{REPOSITORY_BASE}Applied%20Power/maven-metadata.xml")
        );
    }

    #[test]
    fn download_url_uses_sanitized_filename() {
        let (url, filename) = download_url("Applied Power", "1.2.0");
        assert_eq!(filename, "Applied-Power-1.2.0.jar");
        assert!(url.ends_with("/Applied%20Power/1.2.0/Applied-Power-1.2.0.jar"));
    }

    #[test]
    fn latest_stable_skips_pre_tags() {
        let versions = vec![
            "1.0.0".to_string(),
            "1.2.0-pre".to_string(),
            "1.1.0".to_string(),
        ];
        assert_eq!(
            latest_stable_version(&versions, None),
            Some("1.1.0".to_string())
        );
    }

    #[test]
    fn release_element_considered() {
        let versions = vec!["1.0.0".to_string()];
        assert_eq!(
            latest_stable_version(&versions, Some("1.3.0")),
            Some("1.3.0".to_string())
        );
        // A pre-release <release> element is ignored.
        assert_eq!(
            latest_stable_version(&versions, Some("1.4.0-PRE")),
            Some("1.0.0".to_string())
        );
    }

    #[test]
    fn sanitize_rules() {
        assert_eq!(sanitize_component("My Mod+Core_2"), "My-ModCore_2");
        assert_eq!(sanitize_component("a.b-c"), "a.b-c");
    }

    #[test]
    fn metadata_xml_parses() {
        let xml = r#"<metadata>
            <groupId>com.github.StarforgeLabs</groupId>
            <artifactId>alpha</artifactId>
            <versioning>
                <release>1.2.0</release>
                <versions>
                    <version>1.0.0</version>
                    <version>1.1.0</version>
                    <version>1.2.0</version>
                </versions>
            </versioning>
        </metadata>"#;
        let md: MavenMetadata = quick_xml::de::from_str(xml).unwrap();
        assert_eq!(md.versioning.release.as_deref(), Some("1.2.0"));
        assert_eq!(md.versioning.versions.items.len(), 3);
    }
}
