//! Supervisor options.
//!
//! Everything that used to be a process-wide knob is an explicit options
//! object passed at construction. Options can also be loaded from a JSON
//! file in a caller-supplied config directory, falling back to defaults
//! when the file is missing.

use crate::error::config::ConfigError;

use common::ErrorLocation;

use std::panic::Location;
use std::path::Path;
use std::time::Duration;

use log::info;
use serde::{Deserialize, Serialize};

const OPTIONS_FILE_NAME: &str = "previewer.json";

/// Restart the previewer once its resident memory crosses this (200 MiB).
const DEFAULT_MAX_PROCESS_MEMORY_BYTES: u64 = 200 * 1024 * 1024;

const DEFAULT_RUNTIME_LAUNCHER: &str = "dotnet";

const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewerOptions {
    /// Memory-guard threshold checked before every update.
    #[serde(default = "default_max_process_memory_bytes")]
    pub max_process_memory_bytes: u64,

    /// Front-end used to run managed (`.dll`) host applications.
    #[serde(default = "default_runtime_launcher")]
    pub runtime_launcher: String,

    /// How long `start` waits for the previewer to connect back.
    /// Zero means wait forever.
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
}

impl Default for PreviewerOptions {
    fn default() -> Self {
        Self {
            max_process_memory_bytes: default_max_process_memory_bytes(),
            runtime_launcher: default_runtime_launcher(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
        }
    }
}

fn default_max_process_memory_bytes() -> u64 {
    DEFAULT_MAX_PROCESS_MEMORY_BYTES
}
fn default_runtime_launcher() -> String {
    DEFAULT_RUNTIME_LAUNCHER.to_string()
}
fn default_handshake_timeout_secs() -> u64 {
    DEFAULT_HANDSHAKE_TIMEOUT_SECS
}

impl PreviewerOptions {
    /// Load options from `{config_dir}/previewer.json`.
    ///
    /// Returns defaults if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file exists but cannot be read,
    /// parsed or validated.
    pub fn load(config_dir: &Path) -> Result<Self, ConfigError> {
        let options_path = config_dir.join(OPTIONS_FILE_NAME);

        if !options_path.exists() {
            info!(
                "Options file not found at {}, using defaults",
                options_path.display()
            );
            return Ok(Self::default());
        }

        let contents =
            std::fs::read_to_string(&options_path).map_err(|e| ConfigError::ReadError {
                location: ErrorLocation::from(Location::caller()),
                path: options_path.clone(),
                source: e,
            })?;

        let options: PreviewerOptions =
            serde_json::from_str(&contents).map_err(|e| ConfigError::ParseError {
                location: ErrorLocation::from(Location::caller()),
                path: options_path.clone(),
                reason: e.to_string(),
            })?;

        options.validate()?;

        info!("Options loaded from {}", options_path.display());
        Ok(options)
    }

    /// Save options to `{config_dir}/previewer.json` using atomic write.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if validation, serialization or any write
    /// step fails.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        self.validate()?;

        std::fs::create_dir_all(config_dir).map_err(|e| ConfigError::WriteError {
            location: ErrorLocation::from(Location::caller()),
            path: config_dir.to_path_buf(),
            source: e,
        })?;

        let options_path = config_dir.join(OPTIONS_FILE_NAME);
        let temp_path = config_dir.join(format!("{OPTIONS_FILE_NAME}.tmp"));

        let json = serde_json::to_string_pretty(self).map_err(|e| ConfigError::SerializeError {
            location: ErrorLocation::from(Location::caller()),
            reason: e.to_string(),
        })?;

        std::fs::write(&temp_path, json).map_err(|e| ConfigError::WriteError {
            location: ErrorLocation::from(Location::caller()),
            path: temp_path.clone(),
            source: e,
        })?;

        // Rename is atomic on POSIX, so a crash never leaves a torn file.
        std::fs::rename(&temp_path, &options_path).map_err(|e| ConfigError::WriteError {
            location: ErrorLocation::from(Location::caller()),
            path: options_path.clone(),
            source: e,
        })?;

        info!("Options saved to {}", options_path.display());
        Ok(())
    }

    /// Validate option values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] if any value is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_process_memory_bytes == 0 {
            return Err(ConfigError::ValidationError {
                location: ErrorLocation::from(Location::caller()),
                reason: "max_process_memory_bytes must be non-zero".to_string(),
            });
        }

        if self.runtime_launcher.trim().is_empty() {
            return Err(ConfigError::ValidationError {
                location: ErrorLocation::from(Location::caller()),
                reason: "runtime_launcher cannot be empty".to_string(),
            });
        }

        Ok(())
    }

    /// The handshake timeout, or `None` to wait forever.
    pub fn handshake_timeout(&self) -> Option<Duration> {
        (self.handshake_timeout_secs > 0).then(|| Duration::from_secs(self.handshake_timeout_secs))
    }
}
