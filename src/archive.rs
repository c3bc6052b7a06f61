//! Source archive extraction and source root location.

use crate::error::{BuildError, Result};
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Supported archive formats, chosen by file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    TarGz,
}

impl ArchiveKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_ascii_lowercase();
        if name.ends_with(".zip") {
            Some(Self::Zip)
        } else if name.ends_with(".tgz") || name.ends_with(".tar.gz") {
            Some(Self::TarGz)
        } else {
            None
        }
    }
}

/// Extract `archive` so that its contents end up in `dest`.
///
/// Extraction happens in a staging directory next to `dest` which is renamed
/// into place only once everything is written. `dest` must not exist.
pub fn unpack(archive: &Path, dest: &Path) -> Result<()> {
    let kind = ArchiveKind::from_path(archive).ok_or_else(|| {
        BuildError::archive(format!(
            "Unsupported archive format: {} (expected .zip, .tgz or .tar.gz)",
            archive.display()
        ))
    })?;
    if dest.exists() {
        return Err(BuildError::archive(format!(
            "Destination already exists: {}",
            dest.display()
        )));
    }

    let staging = staging_path(dest);
    if staging.exists() {
        debug!("Removing stale staging dir {}", staging.display());
        fs::remove_dir_all(&staging)?;
    }
    fs::create_dir_all(&staging)?;

    info!("Extracting {} to {}", archive.display(), dest.display());
    if let Err(e) = extract(kind, archive, &staging) {
        let _ = fs::remove_dir_all(&staging);
        return Err(e);
    }

    fs::rename(&staging, dest)?;
    Ok(())
}

fn staging_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".partial");
    dest.with_file_name(name)
}

fn extract(kind: ArchiveKind, archive: &Path, into: &Path) -> Result<()> {
    let file = File::open(archive).map_err(|e| {
        BuildError::archive(format!("Cannot open {}: {}", archive.display(), e))
    })?;

    match kind {
        ArchiveKind::Zip => {
            let mut zip = zip::ZipArchive::new(file).map_err(|e| {
                BuildError::archive(format!("Failed to read zip {}: {}", archive.display(), e))
            })?;
            zip.extract(into).map_err(|e| {
                BuildError::archive(format!("Failed to extract {}: {}", archive.display(), e))
            })?;
        }
        ArchiveKind::TarGz => {
            let mut tar = tar::Archive::new(GzDecoder::new(file));
            tar.unpack(into).map_err(|e| {
                BuildError::archive(format!("Failed to extract {}: {}", archive.display(), e))
            })?;
        }
    }
    Ok(())
}

/// First directory (in sorted order) matching `pattern` under `base`.
pub fn into_subdir(base: &Path, pattern: &str) -> Result<Option<PathBuf>> {
    let full = format!(
        "{}/{}",
        glob::Pattern::escape(&base.to_string_lossy()),
        pattern
    );
    let entries = glob::glob(&full).map_err(|e| {
        BuildError::archive(format!("Invalid sub-directory pattern {:?}: {}", pattern, e))
    })?;

    // glob yields paths in alphabetical order
    for entry in entries {
        match entry {
            Ok(path) if path.is_dir() => return Ok(Some(path)),
            Ok(_) => {}
            Err(e) => debug!("Skipping unreadable path while globbing: {}", e),
        }
    }
    Ok(None)
}
