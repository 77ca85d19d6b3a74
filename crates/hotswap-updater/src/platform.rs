//! Target platform and artifact classification.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Operating system the generated script targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetPlatform {
    Windows,
    #[serde(rename = "macos")]
    MacOs,
    Linux,
}

impl TargetPlatform {
    /// Platform of the running process.
    ///
    /// Anything that is neither Windows nor macOS is treated as Linux, since
    /// the POSIX shell path is the only other script flavour we generate.
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            TargetPlatform::Windows
        } else if cfg!(target_os = "macos") {
            TargetPlatform::MacOs
        } else {
            TargetPlatform::Linux
        }
    }

    /// Whether scripts for this platform are POSIX shell scripts.
    pub fn is_unix(self) -> bool {
        !matches!(self, TargetPlatform::Windows)
    }

    /// Name of the executable relaunched after an archive update.
    pub fn default_executable(self) -> &'static str {
        match self {
            TargetPlatform::Windows => "Dolphin.exe",
            TargetPlatform::MacOs => "Dolphin.app",
            TargetPlatform::Linux => "dolphin-emu",
        }
    }
}

impl fmt::Display for TargetPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TargetPlatform::Windows => "windows",
            TargetPlatform::MacOs => "macos",
            TargetPlatform::Linux => "linux",
        };
        f.write_str(name)
    }
}

/// What kind of release artifact was downloaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    /// Self-contained installer executable (`.exe`)
    Installer,
    /// Mountable disk image (`.dmg`)
    DiskImage,
    /// Zip archive laid over the install directory (`.zip`)
    Archive,
}

impl ArtifactKind {
    /// Classify an artifact by its file name's extension.
    ///
    /// Returns `None` for anything that is not a recognised release format.
    pub fn from_filename(filename: &str) -> Option<Self> {
        let ext = Path::new(filename).extension()?.to_str()?;
        if ext.eq_ignore_ascii_case("exe") {
            Some(ArtifactKind::Installer)
        } else if ext.eq_ignore_ascii_case("dmg") {
            Some(ArtifactKind::DiskImage)
        } else if ext.eq_ignore_ascii_case("zip") {
            Some(ArtifactKind::Archive)
        } else {
            None
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ArtifactKind::Installer => "installer",
            ArtifactKind::DiskImage => "disk image",
            ArtifactKind::Archive => "archive",
        };
        f.write_str(name)
    }
}
