// ─── Launcher Library ───
// The modernlaunch mod carries launcher-level patches alongside its regular
// archive: clients get a MultiMC-layout zip (libraries, patches, pack
// manifest), servers get the forgePatches jar at the instance root. Both are
// applied whenever the mod itself is added or updated.

use std::io::Read;
use std::path::Path;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::downloader::Downloader;
use crate::core::error::{UpdaterError, UpdaterResult};

const LAUNCH_LIB_MOD: &str = "modernlaunch";

/// Zip entries outside these prefixes are never extracted.
const ALLOWED_PREFIXES: [&str; 3] = ["libraries/", "patches/", "mmc-pack.json"];

fn multimc_zip_url(version: &str) -> String {
    format!(
        "https://github.com/StarforgeLabs/modernlaunch/releases/download/{version}/modernlaunch-{version}-multimc.zip"
    )
}

fn forge_patches_jar_url(version: &str) -> String {
    format!(
        "https://github.com/StarforgeLabs/modernlaunch/releases/download/{version}/modernlaunch-{version}-forgePatches.jar"
    )
}

/// True when this mod name carries the launcher-library payload.
pub fn needs_update(name: &str) -> bool {
    name.eq_ignore_ascii_case(LAUNCH_LIB_MOD)
}

/// Applies the client-side launcher library: downloads the MultiMC zip and
/// extracts its libraries, patches, and pack manifest into the instance,
/// replacing any older forgePatches jar first. The regular mod archive in
/// mods/ is handled by the normal update flow.
pub async fn update_client(
    downloader: &Downloader,
    instance_dir: &Path,
    version: &str,
    cancel: &CancellationToken,
) -> UpdaterResult<()> {
    let tmp = tempfile::tempdir().map_err(|e| UpdaterError::io("launchlib tempdir", e))?;
    let zip_path = tmp.path().join(format!("modernlaunch-{version}-multimc.zip"));

    downloader
        .fetch_to_file(&multimc_zip_url(version), &zip_path, false, cancel)
        .await?;

    remove_old_forge_patches(&instance_dir.join("libraries"))?;
    extract_multimc_zip(&zip_path, instance_dir)
}

/// Applies the server-side launcher library: the forgePatches jar lives at
/// the instance root under a fixed name.
pub async fn update_server(
    downloader: &Downloader,
    instance_dir: &Path,
    version: &str,
    cancel: &CancellationToken,
) -> UpdaterResult<()> {
    let dest = instance_dir.join("modernlaunch-forgePatches.jar");
    match std::fs::remove_file(&dest) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(UpdaterError::io(&dest, e)),
    }

    downloader
        .fetch_to_file(&forge_patches_jar_url(version), &dest, false, cancel)
        .await
}

/// Deletes any versioned forgePatches jar from the libraries directory.
fn remove_old_forge_patches(dir: &Path) -> UpdaterResult<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(UpdaterError::io(dir, e)),
    };

    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with("modernlaunch-") && name.ends_with("-forgePatches.jar") {
            debug!(file = %name, "removing old forgePatches jar");
            std::fs::remove_file(entry.path()).map_err(|e| UpdaterError::io(entry.path(), e))?;
        }
    }
    Ok(())
}

/// Extracts only the allowed launcher paths, with traversal guards.
fn extract_multimc_zip(zip_path: &Path, instance_dir: &Path) -> UpdaterResult<()> {
    let file = std::fs::File::open(zip_path).map_err(|e| UpdaterError::io(zip_path, e))?;
    let mut archive = zip::ZipArchive::new(file)?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let name = entry.name().to_string();
        if !ALLOWED_PREFIXES
            .iter()
            .any(|p| name == *p || name.starts_with(p))
        {
            continue;
        }
        let Some(rel) = entry.enclosed_name() else {
            continue;
        };
        let out_path = instance_dir.join(rel);

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

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn build_zip(entries: &[(&str, &[u8])]) -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut writer = zip::ZipWriter::new(file.reopen().unwrap());
        for (name, content) in entries {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(content).unwrap();
        }
        writer.finish().unwrap();
        file
    }

    #[test]
    fn name_check_is_case_insensitive() {
        assert!(needs_update("modernlaunch"));
        assert!(needs_update("ModernLaunch"));
        assert!(!needs_update("othermod"));
    }

    #[test]
    fn extraction_is_restricted_to_launcher_paths() {
        let zip = build_zip(&[
            ("libraries/modernlaunch-1.2.0-forgePatches.jar", b"patches".as_slice()),
            ("patches/net.minecraft.json", b"{}".as_slice()),
            ("mmc-pack.json", b"{}".as_slice()),
            ("mods/evil.jar", b"nope".as_slice()),
            ("../escape.txt", b"nope".as_slice()),
        ]);

        let instance = tempfile::tempdir().unwrap();
        extract_multimc_zip(zip.path(), instance.path()).unwrap();

        assert!(instance
            .path()
            .join("libraries/modernlaunch-1.2.0-forgePatches.jar")
            .exists());
        assert!(instance.path().join("patches/net.minecraft.json").exists());
        assert!(instance.path().join("mmc-pack.json").exists());
        assert!(!instance.path().join("mods").exists());
        assert!(!instance.path().parent().unwrap().join("escape.txt").exists());
    }

    #[test]
    fn old_forge_patches_jars_are_removed() {
        let instance = tempfile::tempdir().unwrap();
        let libs = instance.path().join("libraries");
        std::fs::create_dir_all(&libs).unwrap();
        std::fs::write(libs.join("modernlaunch-1.0.0-forgePatches.jar"), b"old").unwrap();
        std::fs::write(libs.join("unrelated.jar"), b"keep").unwrap();

        remove_old_forge_patches(&libs).unwrap();
        assert!(!libs.join("modernlaunch-1.0.0-forgePatches.jar").exists());
        assert!(libs.join("unrelated.jar").exists());

        // Missing directory is fine.
        remove_old_forge_patches(&instance.path().join("absent")).unwrap();
    }
}
