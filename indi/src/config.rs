//! Client configuration
//!
//! Loaded from TOML or built in code. Every field has a default so a partial
//! file is accepted.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{IndiError, IndiResult};
use crate::protocol::INDI_PROTOCOL_VERSION;
use crate::INDI_DEFAULT_PORT;

/// Timeout configuration for INDI operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndiTimeoutConfig {
    /// Connection timeout for initial TCP connection (default: 10 seconds)
    pub connection_timeout_secs: u64,
    /// How long a synchronous send waits for the property to leave Busy (default: 60 seconds)
    pub property_timeout_secs: u64,
}

impl Default for IndiTimeoutConfig {
    fn default() -> Self {
        Self {
            connection_timeout_secs: 10,
            property_timeout_secs: 60,
        }
    }
}

impl IndiTimeoutConfig {
    /// Get the connection timeout as a Duration
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    /// Get the property timeout as a Duration
    pub fn property_timeout(&self) -> Duration {
        Duration::from_secs(self.property_timeout_secs)
    }
}

/// Session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndiClientConfig {
    pub host: String,
    pub port: u16,
    pub protocol_version: String,
    /// Where received BLOBs are written. Falls back to the temp-directory variable.
    pub blob_dir: Option<PathBuf>,
    /// Send `enableBLOB Also` the first time a device defines a property
    pub auto_enable_blobs: bool,
    pub timeouts: IndiTimeoutConfig,
}

impl Default for IndiClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: INDI_DEFAULT_PORT,
            protocol_version: INDI_PROTOCOL_VERSION.to_string(),
            blob_dir: None,
            auto_enable_blobs: true,
            timeouts: IndiTimeoutConfig::default(),
        }
    }
}

impl IndiClientConfig {
    pub fn new(host: &str, port: Option<u16>) -> Self {
        Self {
            host: host.to_string(),
            port: port.unwrap_or(INDI_DEFAULT_PORT),
            ..Default::default()
        }
    }

    pub fn from_toml_str(s: &str) -> IndiResult<Self> {
        toml::from_str(s).map_err(|e| IndiError::Config(e.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> IndiResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| IndiError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    /// Directory for received BLOBs: `blob_dir`, else `TMPDIR` (`TMP` on Windows)
    pub fn resolve_blob_dir(&self) -> IndiResult<PathBuf> {
        resolve_blob_dir(self.blob_dir.as_deref())
    }
}

/// Reads an environment variable
pub(crate) type EnvLookup = fn(&str) -> Option<OsString>;

pub(crate) fn process_env(var: &str) -> Option<OsString> {
    std::env::var_os(var)
}

pub(crate) fn resolve_blob_dir(explicit: Option<&Path>) -> IndiResult<PathBuf> {
    resolve_blob_dir_with(explicit, process_env)
}

pub(crate) fn resolve_blob_dir_with(explicit: Option<&Path>, env: EnvLookup) -> IndiResult<PathBuf> {
    if let Some(dir) = explicit {
        return Ok(dir.to_path_buf());
    }
    let var = if cfg!(windows) { "TMP" } else { "TMPDIR" };
    match env(var) {
        Some(dir) if !dir.is_empty() => Ok(PathBuf::from(dir)),
        _ => Err(IndiError::BlobStorage(format!(
            "{} is not set, cannot store BLOB",
            var
        ))),
    }
}
