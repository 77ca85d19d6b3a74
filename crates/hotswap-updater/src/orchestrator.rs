//! Update orchestrator - drives one update attempt end to end.
//!
//! The orchestrator sequences the components:
//! - [`Downloader`] fetches the artifact on a background task
//! - [`ArchiveExtractor`] unpacks zip releases into the temp directory
//! - a [`ScriptGenerator`] picked from the [`ScriptRegistry`] writes the
//!   platform script that swaps the files
//! - a [`ProcessLauncher`] runs that script
//!
//! Component progress is folded into one 0-100 value: download maps to
//! 0-50, extraction to 50-95, and scripting plus launch finish at 100.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, error, info};

use crate::config::UpdaterConfig;
use crate::download::{artifact_path, DownloadProgress, Downloader};
use crate::error::{LaunchError, UpdateError};
use crate::extract::{ArchiveExtractor, ExtractionProgress};
use crate::launch::{needs_elevation, ProcessLauncher, SystemLauncher};
use crate::platform::{ArtifactKind, TargetPlatform};
use crate::script::{write_script, ScriptGenerator, ScriptParams, ScriptRegistry};

/// Upper bound of the download range.
pub const DOWNLOAD_END: u8 = 50;
/// Upper bound of the extraction range.
pub const EXTRACT_END: u8 = 95;
/// Reported once scripting starts.
pub const INSTALL_START: u8 = EXTRACT_END;
/// Reported once the script has been handed off.
pub const COMPLETE: u8 = 100;

/// One update attempt, owned by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRequest {
    /// Artifact URL; `None` or empty installs a pre-staged file
    pub download_url: Option<String>,
    /// File name of the artifact inside `temp_dir`
    pub archive_filename: String,
    /// Directory the application is installed in
    pub install_dir: PathBuf,
    /// Scratch directory for the artifact, extraction and script
    pub temp_dir: PathBuf,
}

impl UpdateRequest {
    /// URL to download from, if any.
    pub fn download_url(&self) -> Option<&str> {
        self.download_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    /// Where the artifact lives during the run.
    pub fn artifact_path(&self) -> PathBuf {
        artifact_path(&self.temp_dir, &self.archive_filename)
    }
}

/// Visible state of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateStage {
    /// Nothing started
    #[default]
    Idle,
    /// Fetching the artifact
    Downloading,
    /// Unpacking a zip release
    Extracting,
    /// Generating and launching the update script
    Installing,
    /// Script handed off
    Completed,
    /// Stopped on an error
    Failed,
}

impl UpdateStage {
    /// Whether the run has ended.
    pub fn is_terminal(self) -> bool {
        matches!(self, UpdateStage::Completed | UpdateStage::Failed)
    }
}

/// Receives the outward-facing notifications of a run.
pub trait UpdateObserver: Send + Sync {
    /// Unified progress in percent, non-decreasing within a run.
    fn on_progress(&self, percent: u8);

    /// The script was launched; the caller may now exit.
    fn on_finished(&self);

    /// The run failed. Called at most once.
    fn on_error(&self, message: &str);
}

/// Map download progress onto 0-50. Unknown totals report 0.
pub fn download_percent(progress: DownloadProgress) -> u8 {
    if progress.bytes_total <= 0 {
        return 0;
    }
    let now = progress.bytes_now.clamp(0, progress.bytes_total) as i128;
    (now * DOWNLOAD_END as i128 / progress.bytes_total as i128) as u8
}

/// Map extraction progress onto 50-95. An empty archive is complete.
pub fn extraction_percent(progress: ExtractionProgress) -> u8 {
    let span = (EXTRACT_END - DOWNLOAD_END) as u64;
    if progress.entries_total == 0 {
        return EXTRACT_END;
    }
    let done = progress.entries_done.min(progress.entries_total);
    DOWNLOAD_END + (done * span / progress.entries_total) as u8
}

/// Forwards only increases, so repeated or stale values are dropped.
struct ProgressReporter<'a> {
    observer: &'a dyn UpdateObserver,
    last: Option<u8>,
}

impl<'a> ProgressReporter<'a> {
    fn new(observer: &'a dyn UpdateObserver) -> Self {
        Self {
            observer,
            last: None,
        }
    }

    fn report(&mut self, percent: u8) {
        let percent = percent.min(COMPLETE);
        if self.last.map_or(true, |last| percent > last) {
            self.last = Some(percent);
            self.observer.on_progress(percent);
        }
    }
}

/// Drives a single update attempt.
///
/// # Example
///
/// ```ignore
/// use hotswap_updater::{UpdateOrchestrator, UpdateRequest, UpdaterConfig};
///
/// let orchestrator = UpdateOrchestrator::new(UpdaterConfig::default())?;
/// orchestrator.run(&request, &observer).await?;
/// // The script now owns the rest of the update; exit promptly.
/// ```
pub struct UpdateOrchestrator {
    config: UpdaterConfig,
    platform: TargetPlatform,
    pid: Option<u32>,
    downloader: Downloader,
    extractor: ArchiveExtractor,
    scripts: ScriptRegistry,
    launcher: Arc<dyn ProcessLauncher>,
    stage: Arc<RwLock<UpdateStage>>,
}

impl UpdateOrchestrator {
    /// Create an orchestrator for the running platform.
    pub fn new(config: UpdaterConfig) -> Result<Self, UpdateError> {
        config.validate()?;
        let downloader = Downloader::new(&config.network)?;
        let extractor = ArchiveExtractor::new(config.install.preserve.clone());
        let platform = TargetPlatform::current();

        Ok(Self {
            config,
            platform,
            pid: None,
            downloader,
            extractor,
            scripts: ScriptRegistry::default(),
            launcher: Arc::new(SystemLauncher::new(platform)),
            stage: Arc::new(RwLock::new(UpdateStage::Idle)),
        })
    }

    /// Generate scripts for `platform` instead of the running one.
    ///
    /// The launcher is left as is; pair this with [`with_launcher`](Self::with_launcher)
    /// when the script is not meant to run here.
    pub fn with_platform(mut self, platform: TargetPlatform) -> Self {
        self.platform = platform;
        self
    }

    /// Terminate `pid` instead of the current process.
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    /// Use a custom launcher.
    pub fn with_launcher(mut self, launcher: Arc<dyn ProcessLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    /// Use a custom downloader.
    pub fn with_downloader(mut self, downloader: Downloader) -> Self {
        self.downloader = downloader;
        self
    }

    /// Register an additional script strategy.
    pub fn with_script_generator(mut self, generator: Box<dyn ScriptGenerator>) -> Self {
        self.scripts.register(generator);
        self
    }

    /// Platform scripts are generated for.
    pub fn platform(&self) -> TargetPlatform {
        self.platform
    }

    /// Current stage.
    pub async fn stage(&self) -> UpdateStage {
        *self.stage.read().await
    }

    async fn set_stage(&self, stage: UpdateStage) {
        let mut current = self.stage.write().await;
        debug!(from = ?*current, to = ?stage, "stage transition");
        *current = stage;
    }

    /// Run one update attempt.
    ///
    /// Returns once the script has been launched. A detached script keeps
    /// running after this returns; an elevated one has already finished.
    /// On failure `observer.on_error` receives the error's message and the
    /// same error is returned.
    pub async fn run(
        &self,
        request: &UpdateRequest,
        observer: &dyn UpdateObserver,
    ) -> Result<(), UpdateError> {
        let mut progress = ProgressReporter::new(observer);

        match self.drive(request, &mut progress).await {
            Ok(()) => {
                progress.report(COMPLETE);
                self.set_stage(UpdateStage::Completed).await;
                info!(install_dir = ?request.install_dir, "update handed off to script");
                observer.on_finished();
                Ok(())
            }
            Err(e) => {
                self.set_stage(UpdateStage::Failed).await;
                error!(error = %e, "update failed");
                observer.on_error(&e.to_string());
                Err(e)
            }
        }
    }

    async fn drive(
        &self,
        request: &UpdateRequest,
        progress: &mut ProgressReporter<'_>,
    ) -> Result<(), UpdateError> {
        let pid = self.pid.unwrap_or_else(std::process::id);
        let artifact = request.artifact_path();
        info!(pid, platform = %self.platform, artifact = ?artifact, "starting update");

        let (kind, generator) = match request.download_url() {
            Some(url) => {
                self.set_stage(UpdateStage::Downloading).await;
                self.downloader
                    .spawn(url, &artifact)
                    .wait(|p| progress.report(download_percent(p)))
                    .await?;
                progress.report(DOWNLOAD_END);
                self.set_stage(UpdateStage::Installing).await;
                self.select_generator(&request.archive_filename)?
            }
            None => {
                // An unrecognised name fails before the file is looked for.
                self.set_stage(UpdateStage::Installing).await;
                let selected = self.select_generator(&request.archive_filename)?;
                if !artifact.is_file() {
                    return Err(UpdateError::Filesystem(format!(
                        "pre-staged update file {:?} does not exist",
                        artifact
                    )));
                }
                debug!(?artifact, "using pre-staged update file");
                progress.report(DOWNLOAD_END);
                selected
            }
        };

        let payload = match kind {
            ArtifactKind::Archive => {
                let extract_dir = request.temp_dir.join(&self.config.install.extract_dir_name);
                reset_dir(&extract_dir).await?;

                self.set_stage(UpdateStage::Extracting).await;
                self.extractor
                    .extract(&artifact, &extract_dir, |p| {
                        progress.report(extraction_percent(p))
                    })?;

                self.set_stage(UpdateStage::Installing).await;
                extract_dir
            }
            ArtifactKind::Installer | ArtifactKind::DiskImage => artifact.clone(),
        };
        progress.report(INSTALL_START);

        let params = ScriptParams {
            pid,
            install_dir: request.install_dir.clone(),
            temp_dir: request.temp_dir.clone(),
            artifact,
            payload,
            kind,
            executable: self.config.install.executable_for(self.platform),
            mount_point: self.config.install.mount_point.clone(),
        };
        let script = generator.build(&params);
        let script_path = write_script(&script, &request.temp_dir)?;

        let elevate = needs_elevation(
            self.config.install.elevation,
            self.platform,
            &request.install_dir,
        );
        self.launch(script_path, elevate).await
    }

    /// Classify `filename` and find the script strategy for this platform.
    fn select_generator(
        &self,
        filename: &str,
    ) -> Result<(ArtifactKind, &dyn ScriptGenerator), UpdateError> {
        let kind = ArtifactKind::from_filename(filename)
            .ok_or_else(|| UpdateError::UnsupportedFormat(filename.to_string()))?;
        let generator = self.scripts.find(self.platform, kind).ok_or_else(|| {
            UpdateError::UnsupportedFormat(format!(
                "{} ({} is not installable on {})",
                filename, kind, self.platform
            ))
        })?;
        Ok((kind, generator))
    }

    async fn launch(&self, script: PathBuf, elevate: bool) -> Result<(), UpdateError> {
        info!(?script, elevate, "launching update script");
        if !elevate {
            return Ok(self.launcher.run(&script, false)?);
        }

        // Elevated runs block until the script exits.
        let launcher = Arc::clone(&self.launcher);
        let path = script.clone();
        tokio::task::spawn_blocking(move || launcher.run(&path, true))
            .await
            .map_err(|e| LaunchError::PrivilegeDenied {
                path: script,
                reason: format!("elevated launch task failed: {}", e),
            })??;
        Ok(())
    }
}

/// Remove `dir` if present and create it empty.
async fn reset_dir(dir: &Path) -> Result<(), UpdateError> {
    if tokio::fs::try_exists(dir).await.unwrap_or(false) {
        tokio::fs::remove_dir_all(dir).await.map_err(|e| {
            UpdateError::Filesystem(format!("failed to clear {:?}: {}", dir, e))
        })?;
    }
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| UpdateError::Filesystem(format!("failed to create {:?}: {}", dir, e)))
}
