//! Running the generated update script.
//!
//! Two modes exist. A detached launch starts the script and returns at once,
//! leaving it running after this process exits. An elevated launch asks the
//! OS for administrator rights and blocks until the script completes.

use std::path::Path;
use std::process::{Command, Stdio};

use tracing::{debug, info, warn};

use crate::config::ElevationPolicy;
use crate::error::LaunchError;
use crate::platform::TargetPlatform;
use crate::script::shell_quote;

/// Runs a script file, optionally with elevated privileges.
pub trait ProcessLauncher: Send + Sync {
    /// Run `script`. Elevated runs block until the script exits.
    fn run(&self, script: &Path, elevate: bool) -> Result<(), LaunchError>;
}

/// A program and its arguments, built before anything is spawned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

impl Invocation {
    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command
    }
}

/// Invocation that runs `script` without elevation.
pub fn detached_invocation(platform: TargetPlatform, script: &Path) -> Invocation {
    let script = script.display().to_string();
    match platform {
        TargetPlatform::Windows => Invocation {
            program: "cmd".to_string(),
            args: vec!["/C".to_string(), script],
        },
        TargetPlatform::MacOs | TargetPlatform::Linux => Invocation {
            program: "/bin/bash".to_string(),
            args: vec![script],
        },
    }
}

/// Invocation that runs `script` through the platform's elevation prompt.
pub fn elevated_invocation(platform: TargetPlatform, script: &Path) -> Invocation {
    let script = script.display().to_string();
    match platform {
        TargetPlatform::Windows => Invocation {
            program: "powershell".to_string(),
            args: vec![
                "-NoProfile".to_string(),
                "-NonInteractive".to_string(),
                "-Command".to_string(),
                format!(
                    "Start-Process -FilePath '{}' -Verb RunAs -Wait",
                    script.replace('\'', "''")
                ),
            ],
        },
        TargetPlatform::MacOs => {
            let shell = format!("/bin/bash {}", shell_quote(&script));
            Invocation {
                program: "osascript".to_string(),
                args: vec![
                    "-e".to_string(),
                    format!(
                        "do shell script \"{}\" with administrator privileges",
                        applescript_escape(&shell)
                    ),
                ],
            }
        }
        TargetPlatform::Linux => Invocation {
            program: "pkexec".to_string(),
            args: vec!["/bin/bash".to_string(), script],
        },
    }
}

fn applescript_escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Whether an elevated run's exit code means elevation was not granted.
///
/// pkexec reports a dismissed or failed authentication as 126 or 127 and
/// otherwise forwards the script's own status. osascript and PowerShell exit
/// non-zero only when the prompt is cancelled or cannot be shown.
pub fn elevation_refused(platform: TargetPlatform, code: Option<i32>) -> bool {
    match (platform, code) {
        (_, Some(0)) => false,
        (TargetPlatform::Linux, Some(code)) => code == 126 || code == 127,
        // Killed by a signal
        (TargetPlatform::Linux, None) => false,
        _ => true,
    }
}

/// Decide whether the script must run elevated.
///
/// `Auto` always elevates on Windows, where installers write under Program
/// Files. Elsewhere it elevates only when `install_dir` is not writable.
pub fn needs_elevation(policy: ElevationPolicy, platform: TargetPlatform, install_dir: &Path) -> bool {
    match policy {
        ElevationPolicy::Always => true,
        ElevationPolicy::Never => false,
        ElevationPolicy::Auto => platform == TargetPlatform::Windows || !dir_is_writable(install_dir),
    }
}

/// Check writability by creating and removing a scratch file.
///
/// The scratch name is unique per attempt, so a leftover file from an
/// interrupted run never makes a writable directory look read-only.
fn dir_is_writable(dir: &Path) -> bool {
    let pid = std::process::id();
    for attempt in 0..8u32 {
        let scratch = dir.join(format!(".hotswap-write-check-{}-{}", pid, attempt));
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&scratch)
        {
            Ok(file) => {
                drop(file);
                if let Err(e) = std::fs::remove_file(&scratch) {
                    warn!(path = ?scratch, error = %e, "failed to remove write check file");
                }
                return true;
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => {
                debug!(?dir, error = %e, "install directory is not writable");
                return false;
            }
        }
    }
    debug!(?dir, "no free name for a write check file");
    false
}

/// Launcher backed by the operating system.
#[derive(Debug, Clone, Copy)]
pub struct SystemLauncher {
    platform: TargetPlatform,
}

impl SystemLauncher {
    /// Launcher for the given platform.
    pub fn new(platform: TargetPlatform) -> Self {
        Self { platform }
    }

    fn spawn_detached(&self, script: &Path) -> Result<(), LaunchError> {
        let invocation = detached_invocation(self.platform, script);
        let mut command = invocation.command();
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        detach(&mut command);

        let child = command.spawn().map_err(|source| LaunchError::SpawnFailed {
            path: script.to_path_buf(),
            source,
        })?;
        info!(pid = child.id(), ?script, "update script started");
        Ok(())
    }

    fn run_elevated(&self, script: &Path) -> Result<(), LaunchError> {
        let invocation = elevated_invocation(self.platform, script);
        info!(program = %invocation.program, ?script, "requesting elevation for update script");

        let status = invocation
            .command()
            .status()
            .map_err(|e| LaunchError::PrivilegeDenied {
                path: script.to_path_buf(),
                reason: format!("failed to execute {}: {}", invocation.program, e),
            })?;

        if elevation_refused(self.platform, status.code()) {
            return Err(LaunchError::PrivilegeDenied {
                path: script.to_path_buf(),
                reason: format!("elevation was not granted ({})", status),
            });
        }
        if !status.success() {
            warn!(%status, "elevated update script exited with an error");
        }
        Ok(())
    }
}

impl Default for SystemLauncher {
    fn default() -> Self {
        Self::new(TargetPlatform::current())
    }
}

impl ProcessLauncher for SystemLauncher {
    fn run(&self, script: &Path, elevate: bool) -> Result<(), LaunchError> {
        if elevate {
            self.run_elevated(script)
        } else {
            self.spawn_detached(script)
        }
    }
}

/// Put the child in its own process group so it outlives us.
#[cfg(unix)]
fn detach(command: &mut Command) {
    use std::os::unix::process::CommandExt;
    command.process_group(0);
}

#[cfg(windows)]
fn detach(command: &mut Command) {
    use std::os::windows::process::CommandExt;
    const DETACHED_PROCESS: u32 = 0x0000_0008;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    command.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
}

#[cfg(not(any(unix, windows)))]
fn detach(_command: &mut Command) {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_detached_invocation() {
        let inv = detached_invocation(TargetPlatform::Linux, Path::new("/tmp/upd/update.sh"));
        assert_eq!(inv.program, "/bin/bash");
        assert_eq!(inv.args, vec!["/tmp/upd/update.sh".to_string()]);

        let inv = detached_invocation(TargetPlatform::Windows, Path::new(r"C:\Temp\update.bat"));
        assert_eq!(inv.program, "cmd");
        assert_eq!(inv.args, vec!["/C".to_string(), r"C:\Temp\update.bat".to_string()]);
    }

    #[test]
    fn test_elevated_invocation_windows() {
        let inv = elevated_invocation(TargetPlatform::Windows, Path::new(r"C:\Users\O'Neil\update.bat"));
        assert_eq!(inv.program, "powershell");
        assert_eq!(
            inv.args.last().unwrap(),
            r"Start-Process -FilePath 'C:\Users\O''Neil\update.bat' -Verb RunAs -Wait"
        );
    }

    #[test]
    fn test_elevated_invocation_macos() {
        let inv = elevated_invocation(TargetPlatform::MacOs, Path::new("/tmp/my upd/update.sh"));
        assert_eq!(inv.program, "osascript");
        assert_eq!(
            inv.args,
            vec![
                "-e".to_string(),
                r#"do shell script "/bin/bash \"/tmp/my upd/update.sh\"" with administrator privileges"#
                    .to_string(),
            ]
        );
    }

    #[test]
    fn test_elevated_invocation_linux() {
        let inv = elevated_invocation(TargetPlatform::Linux, Path::new("/tmp/upd/update.sh"));
        assert_eq!(inv.program, "pkexec");
        assert_eq!(inv.args, vec!["/bin/bash".to_string(), "/tmp/upd/update.sh".to_string()]);
    }

    #[test]
    fn test_elevation_refused() {
        assert!(!elevation_refused(TargetPlatform::Linux, Some(0)));
        assert!(elevation_refused(TargetPlatform::Linux, Some(126)));
        assert!(elevation_refused(TargetPlatform::Linux, Some(127)));
        assert!(!elevation_refused(TargetPlatform::Linux, Some(1)));
        assert!(elevation_refused(TargetPlatform::MacOs, Some(1)));
        assert!(elevation_refused(TargetPlatform::Windows, Some(1)));
        assert!(!elevation_refused(TargetPlatform::Windows, Some(0)));
    }

    #[test]
    fn test_needs_elevation() {
        let dir = TempDir::new().unwrap();
        assert!(needs_elevation(ElevationPolicy::Always, TargetPlatform::Linux, dir.path()));
        assert!(!needs_elevation(ElevationPolicy::Never, TargetPlatform::Windows, dir.path()));
        assert!(needs_elevation(ElevationPolicy::Auto, TargetPlatform::Windows, dir.path()));
        assert!(!needs_elevation(ElevationPolicy::Auto, TargetPlatform::Linux, dir.path()));
        assert!(needs_elevation(
            ElevationPolicy::Auto,
            TargetPlatform::Linux,
            &dir.path().join("missing")
        ));
        // The scratch file is cleaned up
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_needs_elevation_ignores_leftover_check_file() {
        let dir = TempDir::new().unwrap();
        let leftover = dir
            .path()
            .join(format!(".hotswap-write-check-{}-0", std::process::id()));
        std::fs::write(&leftover, b"").unwrap();

        assert!(!needs_elevation(ElevationPolicy::Auto, TargetPlatform::Linux, dir.path()));
        assert!(!needs_elevation(ElevationPolicy::Auto, TargetPlatform::MacOs, dir.path()));
        // Leftovers are not touched; only the new scratch file is removed
        assert!(leftover.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_detached_launch_runs_script() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("ran");
        let script = dir.path().join("update.sh");
        std::fs::write(
            &script,
            format!("#!/bin/bash\ntouch {}\n", shell_quote(&marker.display().to_string())),
        )
        .unwrap();

        SystemLauncher::new(TargetPlatform::Linux)
            .run(&script, false)
            .unwrap();

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
        while !marker.exists() && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
        assert!(marker.exists());
    }
}
