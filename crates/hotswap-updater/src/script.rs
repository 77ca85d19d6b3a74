//! Update script generation.
//!
//! Once the artifact is staged, the running process can no longer replace
//! its own files. A platform-native script does it instead: it kills the
//! running process by id, puts the new files in place, relaunches, and
//! removes the temporary directory.
//!
//! Scripts are produced by a [`ScriptGenerator`] strategy chosen at runtime
//! from a [`ScriptRegistry`] by target platform and artifact kind.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::ScriptError;
use crate::platform::{ArtifactKind, TargetPlatform};

/// File name of generated shell scripts.
pub const SHELL_SCRIPT_NAME: &str = "update.sh";

/// File name of generated batch scripts.
pub const BATCH_SCRIPT_NAME: &str = "update.bat";

/// Flags passed to the installer for an unattended in-place upgrade.
const INSTALLER_FLAGS: &str = r#"/CLOSEAPPLICATIONS /NOCANCEL /MERGETASKS="!desktopicon" /SILENT"#;

/// Script language a platform's update script is written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// POSIX shell, run with bash
    Shell,
    /// cmd.exe batch file
    Batch,
}

impl Dialect {
    /// Dialect used on `platform`.
    pub fn of(platform: TargetPlatform) -> Self {
        if platform.is_unix() {
            Dialect::Shell
        } else {
            Dialect::Batch
        }
    }

    /// First line of every script.
    pub fn header(self) -> &'static str {
        match self {
            Dialect::Shell => "#!/bin/bash",
            Dialect::Batch => "@echo off",
        }
    }

    /// Line terminator.
    pub fn newline(self) -> &'static str {
        match self {
            Dialect::Shell => "\n",
            Dialect::Batch => "\r\n",
        }
    }

    /// Fixed file name inside the temporary directory.
    pub fn file_name(self) -> &'static str {
        match self {
            Dialect::Shell => SHELL_SCRIPT_NAME,
            Dialect::Batch => BATCH_SCRIPT_NAME,
        }
    }

    /// `echo` line announcing the next command.
    fn banner_line(self, text: &str) -> String {
        match self {
            Dialect::Shell => format!("echo {}", shell_quote(text)),
            Dialect::Batch => format!("echo {}", batch_escape(text)),
        }
    }
}

/// One step of an update script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptCommand {
    /// Forcefully terminate a process by id
    TerminateProcess { pid: u32 },
    /// Copy the contents of `from` into `to`, creating `to` if needed
    CopyRecursive { from: String, to: String },
    /// Remove a file or directory tree
    RemoveRecursive { path: String },
    /// Attach a disk image at a mount point
    MountImage { image: String, mount_point: String },
    /// Detach a mounted disk image
    UnmountImage { mount_point: String },
    /// Run an installer silently into `install_dir`
    RunInstaller { installer: String, install_dir: String },
    /// Start an executable without waiting for it
    LaunchExecutable { path: String },
    /// Delete a single file
    DeleteFile { path: String },
}

impl ScriptCommand {
    /// Human-readable description echoed before the command runs.
    fn banner(&self) -> String {
        match self {
            ScriptCommand::TerminateProcess { pid } => {
                format!("== Terminating application with PID {}", pid)
            }
            ScriptCommand::CopyRecursive { from, to } => {
                format!("== Copying '{}' to '{}'", from, to)
            }
            ScriptCommand::RemoveRecursive { path } => format!("== Removing '{}'", path),
            ScriptCommand::MountImage { image, .. } => format!("== Mounting '{}'", image),
            ScriptCommand::UnmountImage { mount_point } => {
                format!("== Unmounting '{}'", mount_point)
            }
            ScriptCommand::RunInstaller { installer, .. } => {
                format!("== Starting installer '{}'", installer)
            }
            ScriptCommand::LaunchExecutable { path } => format!("== Launching '{}'", path),
            ScriptCommand::DeleteFile { path } => format!("== Deleting '{}'", path),
        }
    }

    /// Render the command as a single line for `platform`.
    pub fn render(&self, platform: TargetPlatform) -> String {
        match Dialect::of(platform) {
            Dialect::Batch => self.render_batch(),
            Dialect::Shell => self.render_shell(platform),
        }
    }

    fn render_batch(&self) -> String {
        match self {
            ScriptCommand::TerminateProcess { pid } => format!("taskkill /F /PID {}", pid),
            ScriptCommand::CopyRecursive { from, to } => format!(
                "xcopy /S /E /Y /I {} {}",
                batch_quote(&format!("{}\\*", from.trim_end_matches(['\\', '/']))),
                batch_quote(to)
            ),
            ScriptCommand::RemoveRecursive { path } => format!("rmdir /S /Q {}", batch_quote(path)),
            // Disk images only carry macOS bundles.
            ScriptCommand::MountImage { .. } | ScriptCommand::UnmountImage { .. } => {
                UNSUPPORTED_BATCH_LINE.to_string()
            }
            ScriptCommand::RunInstaller {
                installer,
                install_dir,
            } => format!(
                "{} {} /DIR={}",
                batch_quote(installer),
                INSTALLER_FLAGS,
                batch_quote(install_dir)
            ),
            ScriptCommand::LaunchExecutable { path } => format!("start \"\" {}", batch_quote(path)),
            ScriptCommand::DeleteFile { path } => format!("del /F /Q {}", batch_quote(path)),
        }
    }

    fn render_shell(&self, platform: TargetPlatform) -> String {
        match self {
            ScriptCommand::TerminateProcess { pid } => format!("kill -9 {}", pid),
            ScriptCommand::CopyRecursive { from, to } => format!(
                "cp -R {} {}",
                shell_quote(&format!("{}/.", from.trim_end_matches('/'))),
                shell_quote(to)
            ),
            ScriptCommand::RemoveRecursive { path } => format!("rm -rf {}", shell_quote(path)),
            ScriptCommand::MountImage { image, mount_point } => format!(
                "hdiutil attach {} -mountpoint {}",
                shell_quote(image),
                shell_quote(mount_point)
            ),
            ScriptCommand::UnmountImage { mount_point } => {
                format!("hdiutil detach {}", shell_quote(mount_point))
            }
            ScriptCommand::RunInstaller {
                installer,
                install_dir,
            } => format!("{} {}", shell_quote(installer), shell_quote(install_dir)),
            ScriptCommand::LaunchExecutable { path } => match platform {
                TargetPlatform::MacOs => format!("open {}", shell_quote(path)),
                _ => format!("nohup {} >/dev/null 2>&1 &", shell_quote(path)),
            },
            ScriptCommand::DeleteFile { path } => format!("rm -f {}", shell_quote(path)),
        }
    }
}

/// Batch rendering of commands with no Windows equivalent.
const UNSUPPORTED_BATCH_LINE: &str = "echo Disk images are not supported on Windows 1>&2 & exit /B 1";

/// Double-quote a string for POSIX shells.
pub fn shell_quote(s: &str) -> String {
    let mut quoted = String::with_capacity(s.len() + 2);
    quoted.push('"');
    for c in s.chars() {
        if matches!(c, '"' | '\\' | '$' | '`') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// Double-quote a path for a batch file. Windows paths cannot contain
/// quotes. `%` is doubled since batch files expand it even inside quotes.
pub fn batch_quote(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "").replace('%', "%%"))
}

/// Escape cmd.exe metacharacters in `echo` text.
fn batch_escape(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '^' | '&' | '|' | '<' | '>' | '%') {
            escaped.push(if c == '%' { '%' } else { '^' });
        }
        escaped.push(c);
    }
    escaped
}

/// Join a file name onto a directory using the platform's separator.
pub fn join_native(platform: TargetPlatform, dir: &str, name: &str) -> String {
    match platform {
        TargetPlatform::Windows => format!("{}\\{}", dir.trim_end_matches(['\\', '/']), name),
        _ => format!("{}/{}", dir.trim_end_matches('/'), name),
    }
}

/// Inputs every script strategy draws from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptParams {
    /// Process to terminate before files are replaced
    pub pid: u32,
    /// Directory the application is installed in
    pub install_dir: PathBuf,
    /// Temporary directory removed at the end of the script
    pub temp_dir: PathBuf,
    /// Downloaded artifact
    pub artifact: PathBuf,
    /// Extracted tree for archives, otherwise the artifact itself
    pub payload: PathBuf,
    /// Kind of artifact being installed
    pub kind: ArtifactKind,
    /// Executable or app bundle name inside the install directory
    pub executable: String,
    /// Mount point used for disk images
    pub mount_point: String,
}

/// A script ready to be written and run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedScript {
    /// Platform the script is written for
    pub target_platform: TargetPlatform,
    /// Script lines in execution order, header excluded
    pub ordered_commands: Vec<String>,
    /// Whether the file must be marked executable after writing
    pub executable_on_create: bool,
}

impl GeneratedScript {
    fn new(target_platform: TargetPlatform, ordered_commands: Vec<String>) -> Self {
        Self {
            target_platform,
            ordered_commands,
            executable_on_create: target_platform.is_unix(),
        }
    }

    /// File name the script is written under.
    pub fn file_name(&self) -> &'static str {
        Dialect::of(self.target_platform).file_name()
    }

    /// Full file contents including the interpreter header.
    pub fn contents(&self) -> String {
        let dialect = Dialect::of(self.target_platform);
        let newline = dialect.newline();

        let mut out = String::from(dialect.header());
        out.push_str(newline);
        for line in &self.ordered_commands {
            out.push_str(line);
            out.push_str(newline);
        }
        out
    }
}

/// Builds the script for one (platform, artifact kind) pair.
pub trait ScriptGenerator: Send + Sync {
    /// Platform this strategy writes scripts for.
    fn platform(&self) -> TargetPlatform;

    /// Artifact kind this strategy installs.
    fn kind(&self) -> ArtifactKind;

    /// Build the script. Identical params give identical output.
    fn build(&self, params: &ScriptParams) -> GeneratedScript;
}

/// Echo + command lines for a shell script.
fn shell_lines(platform: TargetPlatform, commands: &[ScriptCommand]) -> Vec<String> {
    let mut lines = Vec::with_capacity(commands.len() * 2);
    for command in commands {
        lines.push(Dialect::Shell.banner_line(&command.banner()));
        lines.push(command.render(platform));
    }
    lines
}

/// Batch layout: main steps grouped, a diagnostic on failure, then cleanup.
fn batch_lines(steps: &[ScriptCommand], failure_message: &str, cleanup: &[ScriptCommand]) -> Vec<String> {
    let platform = TargetPlatform::Windows;
    let mut lines = vec!["(".to_string()];
    for command in steps {
        lines.push(format!("   {}", Dialect::Batch.banner_line(&command.banner())));
        lines.push(format!("   {}", command.render(platform)));
    }
    lines.push(")".to_string());
    lines.push("IF ERRORLEVEL 1 (".to_string());
    lines.push(format!(
        "   start \"\" cmd /c \"echo {} && pause\"",
        failure_message
    ));
    lines.push(")".to_string());
    for command in cleanup {
        lines.push(command.render(platform));
    }
    lines.push("exit".to_string());
    lines
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

/// Windows: run the downloaded installer over the install directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowsInstallerScript;

impl ScriptGenerator for WindowsInstallerScript {
    fn platform(&self) -> TargetPlatform {
        TargetPlatform::Windows
    }

    fn kind(&self) -> ArtifactKind {
        ArtifactKind::Installer
    }

    fn build(&self, params: &ScriptParams) -> GeneratedScript {
        let steps = [
            ScriptCommand::TerminateProcess { pid: params.pid },
            ScriptCommand::RunInstaller {
                installer: display(&params.payload),
                install_dir: display(&params.install_dir),
            },
        ];
        let cleanup = [ScriptCommand::RemoveRecursive {
            path: display(&params.temp_dir),
        }];

        GeneratedScript::new(
            TargetPlatform::Windows,
            batch_lines(
                &steps,
                "Update failed, check the log for more information",
                &cleanup,
            ),
        )
    }
}

/// Windows: copy an extracted archive over the install directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowsArchiveScript;

impl ScriptGenerator for WindowsArchiveScript {
    fn platform(&self) -> TargetPlatform {
        TargetPlatform::Windows
    }

    fn kind(&self) -> ArtifactKind {
        ArtifactKind::Archive
    }

    fn build(&self, params: &ScriptParams) -> GeneratedScript {
        let install_dir = display(&params.install_dir);
        let steps = [
            ScriptCommand::DeleteFile {
                path: display(&params.artifact),
            },
            ScriptCommand::TerminateProcess { pid: params.pid },
            ScriptCommand::CopyRecursive {
                from: display(&params.payload),
                to: install_dir.clone(),
            },
            ScriptCommand::LaunchExecutable {
                path: join_native(TargetPlatform::Windows, &install_dir, &params.executable),
            },
        ];
        let cleanup = [ScriptCommand::RemoveRecursive {
            path: display(&params.temp_dir),
        }];

        GeneratedScript::new(
            TargetPlatform::Windows,
            batch_lines(&steps, "Update failed", &cleanup),
        )
    }
}

/// macOS: mount a disk image and swap the app bundle.
#[derive(Debug, Clone, Copy, Default)]
pub struct MacDiskImageScript;

impl ScriptGenerator for MacDiskImageScript {
    fn platform(&self) -> TargetPlatform {
        TargetPlatform::MacOs
    }

    fn kind(&self) -> ArtifactKind {
        ArtifactKind::DiskImage
    }

    fn build(&self, params: &ScriptParams) -> GeneratedScript {
        let platform = TargetPlatform::MacOs;
        let install_dir = display(&params.install_dir);
        let bundle = join_native(platform, &install_dir, &params.executable);
        let commands = [
            ScriptCommand::TerminateProcess { pid: params.pid },
            ScriptCommand::MountImage {
                image: display(&params.payload),
                mount_point: params.mount_point.clone(),
            },
            ScriptCommand::RemoveRecursive {
                path: bundle.clone(),
            },
            ScriptCommand::CopyRecursive {
                from: join_native(platform, &params.mount_point, &params.executable),
                to: bundle.clone(),
            },
            ScriptCommand::UnmountImage {
                mount_point: params.mount_point.clone(),
            },
            ScriptCommand::LaunchExecutable { path: bundle },
            ScriptCommand::RemoveRecursive {
                path: display(&params.temp_dir),
            },
        ];

        let mut lines = vec!["set -e".to_string()];
        lines.extend(shell_lines(platform, &commands));
        lines.push("exit 0".to_string());
        GeneratedScript::new(platform, lines)
    }
}

/// macOS and Linux: copy an extracted archive over the install directory.
#[derive(Debug, Clone, Copy)]
pub struct UnixArchiveScript {
    platform: TargetPlatform,
}

impl UnixArchiveScript {
    /// Strategy for a Unix-like platform.
    pub fn new(platform: TargetPlatform) -> Self {
        Self { platform }
    }
}

impl ScriptGenerator for UnixArchiveScript {
    fn platform(&self) -> TargetPlatform {
        self.platform
    }

    fn kind(&self) -> ArtifactKind {
        ArtifactKind::Archive
    }

    fn build(&self, params: &ScriptParams) -> GeneratedScript {
        let install_dir = display(&params.install_dir);
        let commands = [
            ScriptCommand::TerminateProcess { pid: params.pid },
            ScriptCommand::DeleteFile {
                path: display(&params.artifact),
            },
            ScriptCommand::CopyRecursive {
                from: display(&params.payload),
                to: install_dir.clone(),
            },
            ScriptCommand::LaunchExecutable {
                path: join_native(self.platform, &install_dir, &params.executable),
            },
            ScriptCommand::RemoveRecursive {
                path: display(&params.temp_dir),
            },
        ];

        let mut lines = shell_lines(self.platform, &commands);
        lines.push("exit 0".to_string());
        GeneratedScript::new(self.platform, lines)
    }
}

/// Script strategies keyed by platform and artifact kind.
pub struct ScriptRegistry {
    generators: Vec<Box<dyn ScriptGenerator>>,
}

impl ScriptRegistry {
    /// An empty registry.
    pub fn empty() -> Self {
        Self {
            generators: Vec::new(),
        }
    }

    /// Add a strategy. A later registration for the same pair wins.
    pub fn register(&mut self, generator: Box<dyn ScriptGenerator>) {
        debug!(
            platform = %generator.platform(),
            kind = ?generator.kind(),
            "registering script strategy"
        );
        self.generators.insert(0, generator);
    }

    /// Strategy for a platform and artifact kind, if one exists.
    pub fn find(&self, platform: TargetPlatform, kind: ArtifactKind) -> Option<&dyn ScriptGenerator> {
        self.generators
            .iter()
            .find(|g| g.platform() == platform && g.kind() == kind)
            .map(|g| g.as_ref())
    }

    /// Whether a strategy exists for the pair.
    pub fn supports(&self, platform: TargetPlatform, kind: ArtifactKind) -> bool {
        self.find(platform, kind).is_some()
    }
}

impl Default for ScriptRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(WindowsInstallerScript));
        registry.register(Box::new(WindowsArchiveScript));
        registry.register(Box::new(MacDiskImageScript));
        registry.register(Box::new(UnixArchiveScript::new(TargetPlatform::MacOs)));
        registry.register(Box::new(UnixArchiveScript::new(TargetPlatform::Linux)));
        registry
    }
}

impl std::fmt::Debug for ScriptRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.generators.iter().map(|g| (g.platform(), g.kind())))
            .finish()
    }
}

/// Write `script` into `temp_dir` under its fixed name.
///
/// Shell scripts are made owner read/write/execute only.
pub fn write_script(script: &GeneratedScript, temp_dir: &Path) -> Result<PathBuf, ScriptError> {
    let path = temp_dir.join(script.file_name());
    fs::write(&path, script.contents()).map_err(|source| ScriptError::Write {
        path: path.clone(),
        source,
    })?;

    if script.executable_on_create {
        mark_executable(&path).map_err(|source| ScriptError::Permissions {
            path: path.clone(),
            source,
        })?;
    }

    info!(?path, lines = script.ordered_commands.len(), "update script written");
    Ok(path)
}

#[cfg(unix)]
fn mark_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o700))
}

#[cfg(not(unix))]
fn mark_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
