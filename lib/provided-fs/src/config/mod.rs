//! Mount-time configuration of a provided file system.

mod pretty_duration;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use self::pretty_duration::{DurationUnit, PrettyDuration};

/// Deadline applied to every request unless the mount says otherwise.
pub const DEFAULT_REQUEST_TIMEOUT: PrettyDuration = PrettyDuration::from_secs(10);

/// Describes one mounted instance. Fixed once the file system is mounted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvidedFileSystemInfo {
    pub provider_id: String,
    pub file_system_id: String,
    pub display_name: String,
    #[serde(default)]
    pub writable: bool,
    #[serde(default)]
    pub configurable: bool,
    /// Whether directory listings may be resumed with a cursor.
    #[serde(default)]
    pub supports_continuation: bool,
}

impl ProvidedFileSystemInfo {
    pub fn new(
        provider_id: impl Into<String>,
        file_system_id: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            file_system_id: file_system_id.into(),
            display_name: display_name.into(),
            writable: false,
            configurable: false,
            supports_continuation: false,
        }
    }

    pub fn writable(mut self, writable: bool) -> Self {
        self.writable = writable;
        self
    }

    pub fn supports_continuation(mut self, supports_continuation: bool) -> Self {
        self.supports_continuation = supports_continuation;
        self
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid mount configuration: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Everything needed to mount a provided file system.
///
/// ```toml
/// provider_id = "com.example.zip"
/// file_system_id = "archive-1"
/// display_name = "archive.zip"
/// writable = true
/// request_timeout = "30s"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountConfig {
    #[serde(flatten)]
    pub info: ProvidedFileSystemInfo,
    /// `0s` disables deadlines altogether.
    #[serde(default = "default_request_timeout")]
    pub request_timeout: PrettyDuration,
}

fn default_request_timeout() -> PrettyDuration {
    DEFAULT_REQUEST_TIMEOUT
}

impl MountConfig {
    pub fn new(info: ProvidedFileSystemInfo) -> Self {
        Self {
            info,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, request_timeout: PrettyDuration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    /// The deadline each request gets, if any.
    pub fn request_timeout(&self) -> Option<Duration> {
        if self.request_timeout.is_zero() {
            None
        } else {
            Some(self.request_timeout.as_duration())
        }
    }
}
