//! # hotswap-updater
//!
//! In-place self-update for desktop applications.
//!
//! This crate handles:
//! - Artifact download with a trusted-host check on the final redirect target
//! - Zip extraction that leaves user configuration files alone
//! - Platform update scripts (batch on Windows, bash on macOS and Linux)
//! - Launching the script detached or elevated
//! - A single 0-100 progress value across all stages
//!
//! ## Trust boundary
//!
//! The only check on a downloaded artifact is that the final URL's host ends
//! with the configured suffix. There is no signature or checksum
//! verification; anyone able to publish under that host can ship an update.

pub mod config;
pub mod download;
pub mod error;
pub mod extract;
pub mod launch;
pub mod orchestrator;
pub mod platform;
#[cfg(test)]
mod proptests;
pub mod script;

// Re-export main types for convenience
pub use config::{ElevationPolicy, InstallConfig, LoggingConfig, NetworkConfig, UpdaterConfig};
pub use download::{host_is_trusted, DownloadEvent, DownloadHandle, DownloadProgress, Downloader};
pub use error::{ArchiveError, DownloadError, LaunchError, ScriptError, UpdateError};
pub use extract::{ArchiveEntry, ArchiveExtractor, ExtractionProgress};
pub use launch::{needs_elevation, ProcessLauncher, SystemLauncher};
pub use orchestrator::{UpdateObserver, UpdateOrchestrator, UpdateRequest, UpdateStage};
pub use platform::{ArtifactKind, TargetPlatform};
pub use script::{
    write_script, Dialect, GeneratedScript, MacDiskImageScript, ScriptCommand, ScriptGenerator,
    ScriptParams, ScriptRegistry, UnixArchiveScript, WindowsArchiveScript, WindowsInstallerScript,
};
