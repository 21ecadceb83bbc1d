// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Logging initialization shared by the pktfs binaries
//!
//! Every binary flattens [`CliLoggingArgs`] into its clap arguments and calls
//! [`CliLoggingArgs::init`] first thing in `main`. `RUST_LOG` overrides the
//! level chosen on the command line.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use tracing::Level;

/// Output format for log messages
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable plaintext format
    #[default]
    Plaintext,
    /// Structured JSON format
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Plaintext => write!(f, "plaintext"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CliLogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl From<CliLogLevel> for Level {
    fn from(level: CliLogLevel) -> Self {
        match level {
            CliLogLevel::Error => Level::ERROR,
            CliLogLevel::Warn => Level::WARN,
            CliLogLevel::Info => Level::INFO,
            CliLogLevel::Debug => Level::DEBUG,
            CliLogLevel::Trace => Level::TRACE,
        }
    }
}

/// Logging flags for `#[command(flatten)]`. Output goes to stderr unless a
/// log file or directory is given.
#[derive(Clone, Debug, Default, clap::Args, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CliLoggingArgs {
    #[arg(long, value_enum, help = "Log verbosity level (default: info)")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<CliLogLevel>,

    #[arg(long, value_enum, help = "Log output format (default: plaintext)")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_format: Option<LogFormat>,

    #[arg(long, help = "Directory for log files")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<String>,

    #[arg(long, help = "Log filename, relative to --log-dir when one is given")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<String>,

    #[arg(long, help = "Log to the standard per-component file when no file or dir is given")]
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub log_to_file: bool,
}

impl CliLoggingArgs {
    pub fn init(self, component: &str) -> anyhow::Result<()> {
        self.init_with_default_level(component, CliLogLevel::Info)
    }

    pub fn init_with_default_level(
        self,
        component: &str,
        default_level: CliLogLevel,
    ) -> anyhow::Result<()> {
        let level = self.log_level.unwrap_or(default_level).into();
        let format = self.log_format.unwrap_or_default();
        match self.resolve_log_path(component) {
            Some(path) => init_to_file(component, level, format, &path),
            None => init(component, level, format),
        }
    }

    /// Log file selected by the flags, if any:
    /// 1. an absolute `log_file` is used as is
    /// 2. a relative `log_file` is placed under `log_dir` when one is given
    /// 3. `log_dir` alone gets `<component>.log`
    /// 4. `log_to_file` alone uses the standard per-component location
    fn resolve_log_path(&self, component: &str) -> Option<PathBuf> {
        match (&self.log_file, &self.log_dir) {
            (Some(file), _) if Path::new(file).is_absolute() => Some(PathBuf::from(file)),
            (Some(file), Some(dir)) => Some(Path::new(dir).join(file)),
            (Some(file), None) => Some(PathBuf::from(file)),
            (None, Some(dir)) => Some(Path::new(dir).join(format!("{}.log", component))),
            (None, None) if self.log_to_file => {
                Some(get_standard_log_path_for_component(component))
            }
            (None, None) => None,
        }
    }
}

/// `<data dir>/pktfs/<component>.log`
pub fn get_standard_log_path_for_component(component: &str) -> PathBuf {
    let mut path = dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("/tmp"));
    path.push("pktfs");
    path.push(format!("{}.log", component));
    path
}

pub fn init(component: &str, default_level: Level, format: LogFormat) -> anyhow::Result<()> {
    init_with_writer(component, default_level, format, io::stderr)
}

pub fn init_to_file(
    component: &str,
    default_level: Level,
    format: LogFormat,
    log_path: &Path,
) -> anyhow::Result<()> {
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let log_file = fs::OpenOptions::new().create(true).append(true).open(log_path)?;
    init_with_writer(component, default_level, format, log_file)
}

/// Install the global subscriber. The default filter enables `default_level`
/// for everything, including the `pktfs::*` targets of the core library.
pub fn init_with_writer<W>(
    component: &str,
    default_level: Level,
    format: LogFormat,
    writer: W,
) -> anyhow::Result<()>
where
    W: for<'writer> tracing_subscriber::fmt::MakeWriter<'writer> + Send + Sync + 'static,
{
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{},pktfs={},{}={}",
            default_level,
            default_level,
            component.replace('-', "_"),
            default_level
        ))
    });

    match format {
        LogFormat::Json => {
            let layer = tracing_subscriber::fmt::layer().with_writer(writer).json();
            #[cfg(debug_assertions)]
            let layer = layer.with_file(true).with_line_number(true);
            tracing_subscriber::registry().with(filter).with(layer).try_init()?;
        }
        LogFormat::Plaintext => {
            let layer = tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false);
            #[cfg(debug_assertions)]
            let layer = layer.with_file(true).with_line_number(true);
            tracing_subscriber::registry().with(filter).with(layer).try_init()?;
        }
    }
    Ok(())
}
