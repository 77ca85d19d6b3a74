//! Configuration structures for the updater.
//!
//! Defines the trusted download host, what the extractor must leave alone,
//! and how the generated script relaunches the application.
//!
//! # Example TOML
//!
//! ```toml
//! [network]
//! product_name = "Dolphin-PPL"
//! trusted_host_suffix = "githubusercontent.com"
//!
//! [install]
//! extract_dir_name = "Project-Plus-Dolphin"
//! preserve = ["Dolphin.ini"]
//! mount_point = "/Volumes/Dolphin-Update"
//! elevation = "auto"  # "always" | "never" | "auto"
//!
//! [logging]
//! level = "warn"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::UpdateError;
use crate::platform::TargetPlatform;

/// Main updater configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdaterConfig {
    /// Network configuration
    #[serde(default)]
    pub network: NetworkConfig,

    /// Extraction and install configuration
    #[serde(default)]
    pub install: InstallConfig,

    /// Logging configuration (read by the CLI)
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl UpdaterConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self, UpdateError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| UpdateError::Config(format!("failed to read {:?}: {}", path, e)))?;
        let config: Self =
            toml::from_str(&content).map_err(|e| UpdateError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> Result<(), UpdateError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| UpdateError::Config(format!("failed to create {:?}: {}", parent, e)))?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| UpdateError::Config(e.to_string()))?;
        std::fs::write(path, content)
            .map_err(|e| UpdateError::Config(format!("failed to write {:?}: {}", path, e)))?;
        Ok(())
    }

    /// Reject values that would make the pipeline unsafe or meaningless.
    pub fn validate(&self) -> Result<(), UpdateError> {
        let suffix = self.network.trusted_host_suffix.trim_matches('.');
        if suffix.is_empty() {
            return Err(UpdateError::Config(
                "trusted_host_suffix must not be empty".to_string(),
            ));
        }
        if self.install.extract_dir_name.is_empty()
            || self.install.extract_dir_name.contains(['/', '\\'])
            || self.install.extract_dir_name == ".."
        {
            return Err(UpdateError::Config(format!(
                "extract_dir_name must be a single path component, got {:?}",
                self.install.extract_dir_name
            )));
        }
        Ok(())
    }
}

/// Network configuration for the artifact download.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Product name sent as `User-Agent: <product_name>/1.0`
    #[serde(default = "default_product_name")]
    pub product_name: String,

    /// Domain suffix the final redirect target must end with
    #[serde(default = "default_trusted_host_suffix")]
    pub trusted_host_suffix: String,
}

impl NetworkConfig {
    /// Identifying User-Agent header value.
    pub fn user_agent(&self) -> String {
        format!("{}/1.0", self.product_name)
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            product_name: default_product_name(),
            trusted_host_suffix: default_trusted_host_suffix(),
        }
    }
}

/// When the generated script is run with elevated privileges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElevationPolicy {
    /// Always request elevation
    Always,
    /// Never request elevation
    Never,
    /// Elevate on Windows, elsewhere only if the install directory is read-only
    #[default]
    Auto,
}

/// Extraction and install configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallConfig {
    /// Name of the extraction directory created inside the temp directory
    #[serde(default = "default_extract_dir_name")]
    pub extract_dir_name: String,

    /// Archive entry names that must never overwrite files on disk
    #[serde(default = "default_preserve")]
    pub preserve: Vec<String>,

    /// Executable (or app bundle) relaunched from the install directory
    #[serde(default)]
    pub executable: Option<String>,

    /// Where disk images are mounted
    #[serde(default = "default_mount_point")]
    pub mount_point: String,

    /// Elevation policy for running the script
    #[serde(default)]
    pub elevation: ElevationPolicy,
}

impl InstallConfig {
    /// Executable to relaunch, falling back to the platform default.
    pub fn executable_for(&self, platform: TargetPlatform) -> String {
        self.executable
            .clone()
            .unwrap_or_else(|| platform.default_executable().to_string())
    }
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            extract_dir_name: default_extract_dir_name(),
            preserve: default_preserve(),
            executable: None,
            mount_point: default_mount_point(),
            elevation: ElevationPolicy::default(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive, e.g. "warn" or "hotswap_updater=debug"
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default value functions for serde
fn default_product_name() -> String {
    "Dolphin-PPL".to_string()
}

fn default_trusted_host_suffix() -> String {
    "githubusercontent.com".to_string()
}

fn default_extract_dir_name() -> String {
    "Project-Plus-Dolphin".to_string()
}

fn default_preserve() -> Vec<String> {
    vec!["Dolphin.ini".to_string()]
}

fn default_mount_point() -> String {
    "/Volumes/Dolphin-Update".to_string()
}

fn default_log_level() -> String {
    "warn".to_string()
}
