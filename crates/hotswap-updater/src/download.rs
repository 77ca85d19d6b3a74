//! Release artifact downloader.
//!
//! Streams the artifact over HTTP(S), follows redirects, and only keeps the
//! body when the final resolved host sits under the trusted domain suffix.
//! [`Downloader::spawn`] runs the transfer on its own task and delivers
//! progress and the outcome as ordered [`DownloadEvent`] messages.

use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::NetworkConfig;
use crate::error::DownloadError;

/// Byte progress of a single download.
///
/// `bytes_total` is `-1` when the server did not announce a length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadProgress {
    /// Bytes received so far.
    pub bytes_now: i64,
    /// Total bytes expected, or `-1` if unknown.
    pub bytes_total: i64,
}

impl DownloadProgress {
    /// Create a new progress instance.
    pub fn new(bytes_now: i64, bytes_total: i64) -> Self {
        Self {
            bytes_now,
            bytes_total,
        }
    }

    /// Whether the total size is known.
    pub fn is_total_known(&self) -> bool {
        self.bytes_total > 0
    }

    /// Download progress as a percentage (0.0 to 100.0), 0 when unknown.
    pub fn percentage(&self) -> f64 {
        if self.is_total_known() {
            (self.bytes_now as f64 / self.bytes_total as f64) * 100.0
        } else {
            0.0
        }
    }
}

impl std::fmt::Display for DownloadProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_total_known() {
            write!(
                f,
                "{}/{} bytes ({:.1}%)",
                self.bytes_now,
                self.bytes_total,
                self.percentage()
            )
        } else {
            write!(f, "{} bytes", self.bytes_now)
        }
    }
}

/// Message sent from the download worker to the driving context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadEvent {
    /// More bytes arrived
    Progress(DownloadProgress),
    /// The artifact is fully written to its destination
    Finished,
    /// The download failed; nothing was kept at the destination
    Failed(DownloadError),
}

impl DownloadEvent {
    /// Whether this is the last event of a download.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DownloadEvent::Progress(_))
    }
}

/// Check a host against the trusted suffix on a label boundary.
///
/// `objects.githubusercontent.com` matches `githubusercontent.com`;
/// `evilgithubusercontent.com` does not.
pub fn host_is_trusted(host: &str, trusted_suffix: &str) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    let suffix = trusted_suffix.trim_matches('.').to_ascii_lowercase();
    if host.is_empty() || suffix.is_empty() {
        return false;
    }
    host == suffix
        || (host.len() > suffix.len()
            && host.ends_with(&suffix)
            && host.as_bytes()[host.len() - suffix.len() - 1] == b'.')
}

/// Artifact downloader bound to one trusted host suffix.
///
/// Cloning is cheap; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct Downloader {
    /// HTTP client with the identifying User-Agent.
    client: reqwest::Client,
    /// Domain suffix the final URL must resolve under.
    trusted_host_suffix: String,
}

impl Downloader {
    /// Create a downloader from network configuration.
    ///
    /// Redirects are followed with reqwest's default policy. No timeouts are
    /// set beyond the transport defaults.
    pub fn new(config: &NetworkConfig) -> Result<Self, DownloadError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent())
            .build()
            .map_err(|e| DownloadError::Network(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self::with_client(client, &config.trusted_host_suffix))
    }

    /// Create a downloader around a preconfigured client.
    pub fn with_client(client: reqwest::Client, trusted_host_suffix: &str) -> Self {
        Self {
            client,
            trusted_host_suffix: trusted_host_suffix.to_string(),
        }
    }

    /// The trusted domain suffix.
    pub fn trusted_host_suffix(&self) -> &str {
        &self.trusted_host_suffix
    }

    /// Download `url` into `dest`, truncating any existing file.
    ///
    /// `on_progress` is called with non-decreasing `bytes_now`. When the
    /// final URL's host is not trusted, the body is never written and any
    /// file already at `dest` is removed. A partially written file is removed
    /// on failure.
    pub async fn fetch<F>(&self, url: &str, dest: &Path, mut on_progress: F) -> Result<(), DownloadError>
    where
        F: FnMut(DownloadProgress),
    {
        info!("Starting download: {} -> {:?}", url, dest);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| DownloadError::Network(e.to_string()))?;

        let final_url = response.url().clone();
        let host = final_url.host_str().unwrap_or_default();
        if !host_is_trusted(host, &self.trusted_host_suffix) {
            warn!(
                %final_url,
                trusted = %self.trusted_host_suffix,
                "download resolved to an untrusted host"
            );
            remove_stale(dest).await;
            return Err(DownloadError::Security {
                final_url: final_url.to_string(),
            });
        }
        debug!(%final_url, "download host verified");

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Network(format!(
                "server returned status {}",
                status.as_u16()
            )));
        }

        let total = response
            .content_length()
            .and_then(|len| i64::try_from(len).ok())
            .unwrap_or(-1);

        let mut file = File::create(dest)
            .await
            .map_err(|e| filesystem_error(dest, &e))?;

        let result = stream_body(response, &mut file, dest, total, &mut on_progress).await;
        if let Err(e) = result {
            drop(file);
            if let Err(remove_err) = tokio::fs::remove_file(dest).await {
                warn!(?dest, "failed to remove partial download: {}", remove_err);
            }
            return Err(e);
        }

        info!(?dest, "Download complete");
        Ok(())
    }

    /// Run [`fetch`](Self::fetch) on a background task.
    ///
    /// Events arrive through the returned handle in the order they were
    /// produced. Exactly one terminal event is delivered, and it is last.
    pub fn spawn(&self, url: &str, dest: &Path) -> DownloadHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let downloader = self.clone();
        let url = url.to_string();
        let dest = dest.to_path_buf();

        let task = tokio::spawn(async move {
            let progress_tx = tx.clone();
            let result = downloader
                .fetch(&url, &dest, |progress| {
                    // The receiver only goes away if the caller stopped listening.
                    let _ = progress_tx.send(DownloadEvent::Progress(progress));
                })
                .await;

            let terminal = match result {
                Ok(()) => DownloadEvent::Finished,
                Err(e) => DownloadEvent::Failed(e),
            };
            let _ = tx.send(terminal);
        });

        DownloadHandle {
            events: rx,
            task: Some(task),
            done: false,
        }
    }
}

/// Copy the response body into `file`, reporting progress per chunk.
async fn stream_body<F>(
    response: reqwest::Response,
    file: &mut File,
    dest: &Path,
    total: i64,
    on_progress: &mut F,
) -> Result<(), DownloadError>
where
    F: FnMut(DownloadProgress),
{
    let mut total = total;
    let mut downloaded: i64 = 0;
    on_progress(DownloadProgress::new(downloaded, total));

    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| DownloadError::Network(e.to_string()))?;
        file.write_all(&chunk)
            .await
            .map_err(|e| filesystem_error(dest, &e))?;

        downloaded = downloaded.saturating_add(chunk.len() as i64);
        if total > 0 && downloaded > total {
            // Announced length was wrong; stop claiming to know it.
            total = -1;
        }
        on_progress(DownloadProgress::new(downloaded, total));
    }

    file.flush().await.map_err(|e| filesystem_error(dest, &e))?;
    file.sync_all().await.map_err(|e| filesystem_error(dest, &e))?;
    Ok(())
}

/// Remove a leftover artifact so nothing is kept after a rejected download.
async fn remove_stale(dest: &Path) {
    match tokio::fs::remove_file(dest).await {
        Ok(()) => debug!(?dest, "removed stale artifact"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(?dest, "failed to remove stale artifact: {}", e),
    }
}

fn filesystem_error(path: &Path, err: &std::io::Error) -> DownloadError {
    DownloadError::Filesystem {
        path: path.to_path_buf(),
        reason: err.to_string(),
    }
}

/// Receiving end of a background download.
#[derive(Debug)]
pub struct DownloadHandle {
    events: mpsc::UnboundedReceiver<DownloadEvent>,
    task: Option<JoinHandle<()>>,
    done: bool,
}

impl DownloadHandle {
    /// Wait for the next event.
    ///
    /// Returns `None` once the terminal event has been delivered. If the
    /// worker stops without reporting an outcome, a network failure is
    /// synthesized so the terminal event is never missing.
    pub async fn next(&mut self) -> Option<DownloadEvent> {
        if self.done {
            return None;
        }

        match self.events.recv().await {
            Some(event) => {
                if event.is_terminal() {
                    self.done = true;
                }
                Some(event)
            }
            None => {
                self.done = true;
                let reason = match self.task.take() {
                    Some(task) => match task.await {
                        Err(e) => format!("download worker failed: {}", e),
                        Ok(()) => "download worker exited without a result".to_string(),
                    },
                    None => "download worker exited without a result".to_string(),
                };
                Some(DownloadEvent::Failed(DownloadError::Network(reason)))
            }
        }
    }

    /// Drain events until the terminal one, forwarding progress.
    pub async fn wait<F>(mut self, mut on_progress: F) -> Result<(), DownloadError>
    where
        F: FnMut(DownloadProgress),
    {
        while let Some(event) = self.next().await {
            match event {
                DownloadEvent::Progress(progress) => on_progress(progress),
                DownloadEvent::Finished => return Ok(()),
                DownloadEvent::Failed(e) => return Err(e),
            }
        }
        Err(DownloadError::Network(
            "download handle already drained".to_string(),
        ))
    }
}

/// Path a download for `filename` lands at inside `temp_dir`.
pub fn artifact_path(temp_dir: &Path, filename: &str) -> PathBuf {
    temp_dir.join(filename)
}
