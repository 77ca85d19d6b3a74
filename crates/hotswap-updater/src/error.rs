//! Error types for the update pipeline.
//!
//! Every component reports its own error enum; [`UpdateError`] is what the
//! orchestrator surfaces to the embedding caller. Conversions are lossless so
//! a component failure reaches the error callback unchanged.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by the [`Downloader`](crate::download::Downloader).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DownloadError {
    /// Transport failure, non-success status, or an absent response body
    #[error("failed to download update file: {0}")]
    Network(String),

    /// The final redirect target is not on the trusted host
    #[error("did not reach the expected download host (final URL: {final_url})")]
    Security { final_url: String },

    /// The destination file could not be opened or written
    #[error("failed to write {path:?}: {reason}")]
    Filesystem { path: PathBuf, reason: String },
}

/// Errors produced by the [`ArchiveExtractor`](crate::extract::ArchiveExtractor).
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The archive could not be opened or is not a valid zip file
    #[error("unable to open archive {path:?}: {reason}")]
    OpenFailed { path: PathBuf, reason: String },

    /// An entry could not be read or written; extraction stopped here
    #[error("unable to extract entry {entry:?}: {reason}")]
    EntryFailed { entry: String, reason: String },
}

/// Errors writing the generated script to disk.
#[derive(Debug, Error)]
pub enum ScriptError {
    /// The script file could not be created or written
    #[error("failed to write update script {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The script could not be marked executable
    #[error("failed to mark update script {path:?} executable: {source}")]
    Permissions {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors produced by a [`ProcessLauncher`](crate::launch::ProcessLauncher).
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Elevated execution was refused or could not be started
    #[error("failed to launch {path:?} as administrator: {reason}")]
    PrivilegeDenied { path: PathBuf, reason: String },

    /// The detached script process could not be spawned
    #[error("failed to launch {path:?}: {source}")]
    SpawnFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors surfaced by the update orchestrator.
#[derive(Debug, Error)]
pub enum UpdateError {
    /// Network failure while fetching the artifact
    #[error("{0}")]
    Network(String),

    /// Final redirect host was not allow-listed
    #[error("{0}")]
    Security(String),

    /// A file or directory could not be created, opened, or written
    #[error("{0}")]
    Filesystem(String),

    /// Archive could not be opened or an entry failed to extract
    #[error("unzip failed: {0}")]
    Archive(#[from] ArchiveError),

    /// The artifact's extension is not handled on this platform
    #[error("unsupported update file format: {0}")]
    UnsupportedFormat(String),

    /// The update script could not be written
    #[error(transparent)]
    Script(#[from] ScriptError),

    /// Elevated execution refused or failed to start
    #[error(transparent)]
    Privilege(LaunchError),

    /// The script could not be started without elevation
    #[error(transparent)]
    Launch(LaunchError),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<DownloadError> for UpdateError {
    fn from(err: DownloadError) -> Self {
        let message = err.to_string();
        match err {
            DownloadError::Network(_) => UpdateError::Network(message),
            DownloadError::Security { .. } => UpdateError::Security(message),
            DownloadError::Filesystem { .. } => UpdateError::Filesystem(message),
        }
    }
}

impl From<LaunchError> for UpdateError {
    fn from(err: LaunchError) -> Self {
        match err {
            LaunchError::PrivilegeDenied { .. } => UpdateError::Privilege(err),
            LaunchError::SpawnFailed { .. } => UpdateError::Launch(err),
        }
    }
}
