//! Command-line front end for hotswap-updater.
//!
//! Parses an update request from flags, runs it, and renders progress to
//! the terminal.

pub mod cli;
pub mod output;

pub use cli::Cli;
pub use output::TerminalObserver;

use hotswap_updater::UpdateError;

/// Process exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitCode {
    /// Script launched (exit code 0)
    Success = 0,
    /// Unclassified failure (exit code 1)
    GeneralError = 1,
    /// Download failed (exit code 2)
    NetworkError = 2,
    /// Download host not trusted (exit code 3)
    SecurityRejected = 3,
    /// Bad flags, config or artifact type (exit code 4)
    InvalidInput = 4,
    /// Elevated launch refused (exit code 5)
    PermissionDenied = 5,
}

impl ExitCode {
    /// Convert to process exit code
    pub fn to_exit_code(self) -> std::process::ExitCode {
        std::process::ExitCode::from(self as u8)
    }

    /// Exit code for a failed update.
    pub fn for_error(err: &UpdateError) -> Self {
        match err {
            UpdateError::Network(_) => ExitCode::NetworkError,
            UpdateError::Security(_) => ExitCode::SecurityRejected,
            UpdateError::UnsupportedFormat(_) | UpdateError::Config(_) => ExitCode::InvalidInput,
            UpdateError::Privilege(_) => ExitCode::PermissionDenied,
            UpdateError::Filesystem(_)
            | UpdateError::Archive(_)
            | UpdateError::Script(_)
            | UpdateError::Launch(_) => ExitCode::GeneralError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hotswap_updater::LaunchError;
    use std::path::PathBuf;

    #[test]
    fn test_exit_code_for_error() {
        assert_eq!(
            ExitCode::for_error(&UpdateError::Security("x".into())),
            ExitCode::SecurityRejected
        );
        assert_eq!(
            ExitCode::for_error(&UpdateError::UnsupportedFormat("a.rar".into())),
            ExitCode::InvalidInput
        );
        assert_eq!(
            ExitCode::for_error(&UpdateError::Privilege(LaunchError::PrivilegeDenied {
                path: PathBuf::from("/tmp/update.sh"),
                reason: "cancelled".into(),
            })),
            ExitCode::PermissionDenied
        );
        assert_eq!(ExitCode::NetworkError as u8, 2);
    }

    #[test]
    fn test_detached_spawn_failure_is_general_error() {
        let err: UpdateError = LaunchError::SpawnFailed {
            path: PathBuf::from("/tmp/update.sh"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "sh not found"),
        }
        .into();
        assert_eq!(ExitCode::for_error(&err), ExitCode::GeneralError);
    }
}
