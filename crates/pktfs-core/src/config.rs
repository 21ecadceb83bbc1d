// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Filesystem handle configuration

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use pktfs_proto::DosEnvironment;
use serde::{Deserialize, Serialize};

use crate::autoflush::FlushPolicy;
use crate::charset::CharsetKind;
use crate::error::SetupError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlushConfig {
    pub active_timeout_ms: u64,
    pub inactive_timeout_ms: u64,
    pub tick_interval_ms: u64,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            active_timeout_ms: 5000,
            inactive_timeout_ms: 1000,
            tick_interval_ms: 250,
        }
    }
}

impl FlushConfig {
    pub fn policy(&self) -> FlushPolicy {
        FlushPolicy {
            active: Duration::from_millis(self.active_timeout_ms),
            inactive: Duration::from_millis(self.inactive_timeout_ms),
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

/// Device startup table reported to `pktfs-startup`
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StartupConfig {
    pub unit: u32,
    pub flags: u32,
    pub environment: DosEnvironment,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FsConfig {
    /// Device name without the trailing colon
    pub device_name: String,
    /// Used when `init` does not name the volume
    pub volume_name: Option<String>,
    /// Overrides the case sensitivity declared by `init`
    pub case_sensitive: Option<bool>,
    /// Mount read-only regardless of what `statfs` reports
    pub read_only: bool,
    pub max_path_len: usize,
    pub charset: CharsetKind,
    pub flush: FlushConfig,
    /// Environment variable holding the debug category mask
    pub debug_env: String,
    pub startup: StartupConfig,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            device_name: "PKT0".to_string(),
            volume_name: None,
            case_sensitive: None,
            read_only: false,
            max_path_len: 1024,
            charset: CharsetKind::default(),
            flush: FlushConfig::default(),
            debug_env: "PKTFS_DEBUG".to_string(),
            startup: StartupConfig::default(),
        }
    }
}

impl FsConfig {
    /// Load a JSON configuration file, or the defaults when no path is given
    pub fn load(path: Option<&Path>) -> Result<Self, SetupError> {
        let config = match path {
            Some(path) => {
                let content = fs::read_to_string(path)
                    .map_err(|e| SetupError::Config(format!("{}: {}", path.display(), e)))?;
                serde_json::from_str(&content)
                    .map_err(|e| SetupError::Config(format!("{}: {}", path.display(), e)))?
            }
            None => FsConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SetupError> {
        if self.device_name.is_empty() || self.device_name.contains(&[':', '/'][..]) {
            return Err(SetupError::Config(format!(
                "invalid device name {:?}",
                self.device_name
            )));
        }
        if self.max_path_len < 2 {
            return Err(SetupError::Config("max_path_len must be at least 2".to_string()));
        }
        Ok(())
    }
}

/// Control socket of the host serving `mount`. The trailing colon of a
/// device name is optional.
pub fn socket_path(dir: Option<&Path>, mount: &str) -> PathBuf {
    let base = match dir {
        Some(dir) => dir.to_path_buf(),
        None => dirs::runtime_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("pktfs"),
    };
    base.join(format!("{}.sock", mount.trim_end_matches(':')))
}
