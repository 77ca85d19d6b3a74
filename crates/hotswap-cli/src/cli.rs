//! CLI argument parsing and execution

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing::{debug, warn};

use hotswap_updater::{
    ElevationPolicy, TargetPlatform, UpdateOrchestrator, UpdateRequest, UpdaterConfig,
};

use crate::{ExitCode, TerminalObserver};

/// Download, stage and hand off an application update
#[derive(Parser, Debug)]
#[command(name = "hotswap")]
#[command(version, about = "Download, stage and hand off an application update")]
pub struct Cli {
    /// URL of the update artifact; omit to install a file already in --temp-dir
    #[arg(long, env = "HOTSWAP_URL")]
    pub url: Option<String>,

    /// File name of the artifact inside --temp-dir (.zip, .exe or .dmg)
    #[arg(long)]
    pub archive: String,

    /// Directory the application is installed in
    #[arg(long)]
    pub install_dir: PathBuf,

    /// Scratch directory; defaults to <system temp>/hotswap-update
    #[arg(long)]
    pub temp_dir: Option<PathBuf>,

    /// Process to terminate before files are replaced (default: this process)
    #[arg(long)]
    pub pid: Option<u32>,

    /// Override the elevation policy from the config file
    #[arg(long)]
    pub elevation: Option<ElevationArg>,

    /// Config file path
    #[arg(long, env = "HOTSWAP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Only print errors
    #[arg(short, long)]
    pub quiet: bool,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Debug logging
    #[arg(long)]
    pub debug: bool,
}

/// `--elevation` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ElevationArg {
    Always,
    Never,
    Auto,
}

impl From<ElevationArg> for ElevationPolicy {
    fn from(arg: ElevationArg) -> Self {
        match arg {
            ElevationArg::Always => ElevationPolicy::Always,
            ElevationArg::Never => ElevationPolicy::Never,
            ElevationArg::Auto => ElevationPolicy::Auto,
        }
    }
}

impl Cli {
    /// Load the config file, falling back to defaults when none is given.
    pub fn load_config(&self) -> anyhow::Result<UpdaterConfig> {
        let mut config = match &self.config {
            Some(path) => UpdaterConfig::load_from_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => UpdaterConfig::default(),
        };
        if let Some(elevation) = self.elevation {
            config.install.elevation = elevation.into();
        }
        Ok(config)
    }

    /// Build the update request from flags.
    pub fn request(&self) -> UpdateRequest {
        UpdateRequest {
            download_url: self.url.clone(),
            archive_filename: self.archive.clone(),
            install_dir: self.install_dir.clone(),
            temp_dir: self
                .temp_dir
                .clone()
                .unwrap_or_else(|| std::env::temp_dir().join("hotswap-update")),
        }
    }

    /// Execute the update with a pre-loaded configuration
    pub async fn execute_with_config(self, config: UpdaterConfig) -> anyhow::Result<ExitCode> {
        let request = self.request();
        std::fs::create_dir_all(&request.temp_dir)
            .with_context(|| format!("creating {}", request.temp_dir.display()))?;

        let mut orchestrator = UpdateOrchestrator::new(config)?;
        if let Some(pid) = self.pid {
            orchestrator = orchestrator.with_pid(pid);
        }
        debug!(platform = %TargetPlatform::current(), ?request, "running update");

        let observer = TerminalObserver::stderr(self.quiet);
        match orchestrator.run(&request, &observer).await {
            Ok(()) => Ok(ExitCode::Success),
            Err(e) => {
                warn!(error = %e, "update did not complete");
                Ok(ExitCode::for_error(&e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_minimal() {
        let cli = Cli::try_parse_from([
            "hotswap",
            "--archive",
            "release.zip",
            "--install-dir",
            "/opt/app",
        ])
        .unwrap();

        let request = cli.request();
        assert_eq!(request.download_url, None);
        assert_eq!(request.archive_filename, "release.zip");
        assert_eq!(request.install_dir, PathBuf::from("/opt/app"));
        assert!(request.temp_dir.ends_with("hotswap-update"));
    }

    #[test]
    fn test_parse_full() {
        let cli = Cli::try_parse_from([
            "hotswap",
            "--url",
            "https://objects.githubusercontent.com/r/release.zip",
            "--archive",
            "release.zip",
            "--install-dir",
            "/opt/app",
            "--temp-dir",
            "/tmp/upd",
            "--pid",
            "4242",
            "--elevation",
            "never",
            "-v",
        ])
        .unwrap();

        assert_eq!(cli.pid, Some(4242));
        assert!(cli.verbose);
        assert_eq!(cli.request().temp_dir, PathBuf::from("/tmp/upd"));
        assert_eq!(
            cli.load_config().unwrap().install.elevation,
            ElevationPolicy::Never
        );
    }

    #[test]
    fn test_requires_archive_and_install_dir() {
        assert!(Cli::try_parse_from(["hotswap", "--archive", "release.zip"]).is_err());
        assert!(Cli::try_parse_from(["hotswap", "--install-dir", "/opt/app"]).is_err());
    }

    #[test]
    fn test_load_config_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hotswap.toml");
        std::fs::write(&path, "[network]\ntrusted_host_suffix = \"cdn.example.org\"\n").unwrap();

        let cli = Cli::try_parse_from([
            "hotswap",
            "--archive",
            "release.zip",
            "--install-dir",
            "/opt/app",
            "--config",
            path.to_str().unwrap(),
        ])
        .unwrap();

        let config = cli.load_config().unwrap();
        assert_eq!(config.network.trusted_host_suffix, "cdn.example.org");
    }

    #[tokio::test]
    async fn test_unsupported_archive_exit_code() {
        let dir = TempDir::new().unwrap();
        let temp = dir.path().join("upd");
        std::fs::create_dir_all(&temp).unwrap();
        std::fs::write(temp.join("release.rar"), b"rar").unwrap();

        let cli = Cli::try_parse_from([
            "hotswap",
            "--archive",
            "release.rar",
            "--install-dir",
            dir.path().to_str().unwrap(),
            "--temp-dir",
            temp.to_str().unwrap(),
            "--quiet",
        ])
        .unwrap();

        let code = cli
            .execute_with_config(UpdaterConfig::default())
            .await
            .unwrap();
        assert_eq!(code, ExitCode::InvalidInput);
    }
}
