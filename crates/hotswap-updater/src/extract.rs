//! Zip archive extraction with a preserve list.
//!
//! Entries are extracted in the archive's own order. Entries whose name
//! contains any preserved name are skipped so a user's existing
//! configuration is never overwritten. Failures stop extraction where they
//! happen; whatever was written before stays on disk.

use std::fs::{self, File};
use std::io;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::error::ArchiveError;

/// An entry as recorded in the archive's central directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Path of the entry relative to the archive root.
    pub relative_path: String,
    /// Whether the entry is a directory (trailing separator).
    pub is_directory: bool,
    /// Uncompressed size in bytes.
    pub size_bytes: u64,
}

/// Entry progress of a single extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractionProgress {
    /// Entries processed so far, skipped entries included.
    pub entries_done: u64,
    /// Entries in the archive.
    pub entries_total: u64,
}

impl ExtractionProgress {
    /// Whether every entry has been processed.
    pub fn is_complete(&self) -> bool {
        self.entries_done >= self.entries_total
    }
}

/// Extracts release archives into a staging directory.
#[derive(Debug, Clone, Default)]
pub struct ArchiveExtractor {
    preserve: Vec<String>,
}

impl ArchiveExtractor {
    /// Create an extractor that never writes entries matching `preserve`.
    pub fn new(preserve: Vec<String>) -> Self {
        Self { preserve }
    }

    /// Names that are never extracted.
    pub fn preserve_list(&self) -> &[String] {
        &self.preserve
    }

    /// Whether an entry name matches the preserve list.
    pub fn is_preserved(&self, entry_name: &str) -> bool {
        self.preserve
            .iter()
            .any(|name| !name.is_empty() && entry_name.contains(name.as_str()))
    }

    /// List the entries of an archive without extracting anything.
    pub fn entries(archive_path: &Path) -> Result<Vec<ArchiveEntry>, ArchiveError> {
        let mut archive = open_archive(archive_path)?;
        let mut entries = Vec::with_capacity(archive.len());

        for i in 0..archive.len() {
            let file = archive.by_index(i).map_err(|e| ArchiveError::EntryFailed {
                entry: format!("#{}", i),
                reason: e.to_string(),
            })?;
            entries.push(ArchiveEntry {
                relative_path: file.name().to_string(),
                is_directory: file.is_dir(),
                size_bytes: file.size(),
            });
        }

        Ok(entries)
    }

    /// Extract `archive_path` into `dest_dir`.
    ///
    /// `dest_dir` is created if missing but never cleared. `on_progress` is
    /// called once per entry after it is processed, including skipped ones.
    pub fn extract<F>(
        &self,
        archive_path: &Path,
        dest_dir: &Path,
        mut on_progress: F,
    ) -> Result<(), ArchiveError>
    where
        F: FnMut(ExtractionProgress),
    {
        debug!(?archive_path, ?dest_dir, "extracting archive");

        // First pass: count entries for progress reporting.
        let entries_total = Self::entries(archive_path)?.len() as u64;

        let mut archive = open_archive(archive_path)?;
        fs::create_dir_all(dest_dir).map_err(|e| ArchiveError::EntryFailed {
            entry: dest_dir.display().to_string(),
            reason: format!("failed to create destination: {}", e),
        })?;

        let mut entries_done = 0u64;
        let mut extracted = 0u64;
        for i in 0..archive.len() {
            let mut file = archive.by_index(i).map_err(|e| ArchiveError::EntryFailed {
                entry: format!("#{}", i),
                reason: e.to_string(),
            })?;
            let name = file.name().to_string();

            if self.is_preserved(&name) {
                info!(entry = %name, "skipping preserved file");
            } else {
                let relative = file.enclosed_name().map(Path::to_path_buf).ok_or_else(|| {
                    ArchiveError::EntryFailed {
                        entry: name.clone(),
                        reason: "path escapes the destination directory".to_string(),
                    }
                })?;
                let out_path = dest_dir.join(relative);

                if file.is_dir() {
                    fs::create_dir_all(&out_path)
                        .map_err(|e| entry_failed(&name, "create directory", &e))?;
                } else {
                    write_entry(&mut file, &out_path)
                        .map_err(|e| entry_failed(&name, "write file", &e))?;
                    apply_mode(&out_path, file.unix_mode())
                        .map_err(|e| entry_failed(&name, "set permissions", &e))?;
                    extracted += 1;
                }
            }

            entries_done += 1;
            on_progress(ExtractionProgress {
                entries_done,
                entries_total,
            });
        }

        info!(
            ?archive_path,
            entries = entries_total,
            files = extracted,
            "archive extraction complete"
        );
        Ok(())
    }
}

fn open_archive(archive_path: &Path) -> Result<zip::ZipArchive<File>, ArchiveError> {
    let file = File::open(archive_path).map_err(|e| ArchiveError::OpenFailed {
        path: archive_path.to_path_buf(),
        reason: e.to_string(),
    })?;

    zip::ZipArchive::new(file).map_err(|e| {
        warn!(?archive_path, "not a readable zip archive: {}", e);
        ArchiveError::OpenFailed {
            path: archive_path.to_path_buf(),
            reason: e.to_string(),
        }
    })
}

/// Write one file entry, creating parent directories as needed.
fn write_entry<R: io::Read>(reader: &mut R, out_path: &Path) -> io::Result<()> {
    if let Some(parent) = out_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut outfile = File::create(out_path)?;
    io::copy(reader, &mut outfile)?;
    Ok(())
}

/// Re-apply permission bits recorded in the archive, keeping the owner able
/// to overwrite the file on the next update. setuid, setgid and sticky bits
/// are dropped.
#[cfg(unix)]
fn apply_mode(path: &Path, mode: Option<u32>) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    match mode {
        Some(mode) => fs::set_permissions(path, fs::Permissions::from_mode((mode & 0o777) | 0o600)),
        None => Ok(()),
    }
}

#[cfg(not(unix))]
fn apply_mode(_path: &Path, _mode: Option<u32>) -> io::Result<()> {
    Ok(())
}

fn entry_failed(entry: &str, action: &str, err: &io::Error) -> ArchiveError {
    ArchiveError::EntryFailed {
        entry: entry.to_string(),
        reason: format!("failed to {}: {}", action, err),
    }
}
