// Envoy Exporter - Configuration
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Configuration types for the exporter
//!
//! Settings come from command-line flags, `ENVOY_*` environment variables
//! and an optional YAML file, in that order of precedence, on top of
//! built-in defaults.

use clap::Parser;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/envoy/envoy.yaml";

/// Default metrics listen address
pub const DEFAULT_LISTEN: &str = "0.0.0.0:8899";

/// Default refresh interval in seconds
pub const DEFAULT_REFRESH_SECS: u64 = 20;

/// Envoy Prometheus Exporter
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// YAML configuration file
    #[arg(long, env = "ENVOY_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Gateway address [default: https://envoy.local]
    #[arg(long, env = "ENVOY_ADDRESS")]
    pub address: Option<String>,

    /// Metrics listen address [default: 0.0.0.0:8899]
    #[arg(long, env = "ENVOY_LISTEN")]
    pub listen: Option<String>,

    /// Enlighten account e-mail
    #[arg(long, env = "ENVOY_USERNAME")]
    pub username: Option<String>,

    /// Enlighten account password
    #[arg(long, env = "ENVOY_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Pre-issued gateway token
    #[arg(long, env = "ENVOY_JWT", hide_env_values = true)]
    pub jwt: Option<String>,

    /// Gateway serial number (discovered when empty)
    #[arg(long, env = "ENVOY_SERIAL")]
    pub serial: Option<String>,

    /// Enable debug logging
    #[arg(long, env = "ENVOY_DEBUG", num_args = 0..=1, default_missing_value = "true")]
    pub debug: Option<bool>,

    /// Seconds between two polls [default: 20]
    #[arg(long, env = "ENVOY_REFRESH")]
    pub refresh: Option<u64>,
}

/// Contents of the YAML configuration file. Every key is optional.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub address: Option<String>,
    pub listen: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub jwt: Option<String>,
    pub serial: Option<String>,
    pub debug: Option<bool>,
    pub refresh: Option<u64>,
}

impl FileConfig {
    /// Read a configuration file. A missing file yields `Ok(None)`.
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        if contents.trim().is_empty() {
            return Ok(Some(Self::default()));
        }

        serde_yaml::from_str(&contents)
            .map(Some)
            .map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })
    }
}

/// Fully resolved settings.
#[derive(Clone, PartialEq)]
pub struct Settings {
    pub address: String,
    pub listen: String,
    pub username: String,
    pub password: String,
    pub jwt: String,
    pub serial: String,
    pub debug: bool,
    pub refresh: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            address: envoy::DEFAULT_GATEWAY_ADDRESS.to_string(),
            listen: DEFAULT_LISTEN.to_string(),
            username: String::new(),
            password: String::new(),
            jwt: String::new(),
            serial: String::new(),
            debug: false,
            refresh: Duration::from_secs(DEFAULT_REFRESH_SECS),
        }
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |s: &str| if s.is_empty() { "" } else { "<redacted>" };
        f.debug_struct("Settings")
            .field("address", &self.address)
            .field("listen", &self.listen)
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .field("jwt", &redact(&self.jwt))
            .field("serial", &self.serial)
            .field("debug", &self.debug)
            .field("refresh", &self.refresh)
            .finish()
    }
}

impl Settings {
    /// Load the file named by `args` and merge everything.
    ///
    /// Returns the settings and, when it existed, the file that was read.
    pub fn load(args: Args) -> Result<(Self, Option<PathBuf>), ConfigError> {
        let file = FileConfig::load(&args.config)?;
        let used = file.as_ref().map(|_| args.config.clone());
        let settings = Self::resolve(args, file.unwrap_or_default())?;
        Ok((settings, used))
    }

    /// Merge flags/environment over the file over the defaults.
    pub fn resolve(args: Args, file: FileConfig) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let refresh_secs = args
            .refresh
            .or(file.refresh)
            .unwrap_or(DEFAULT_REFRESH_SECS);
        if refresh_secs == 0 {
            return Err(ConfigError::InvalidRefresh);
        }

        Ok(Self {
            address: args.address.or(file.address).unwrap_or(defaults.address),
            listen: args.listen.or(file.listen).unwrap_or(defaults.listen),
            username: args.username.or(file.username).unwrap_or_default(),
            password: args.password.or(file.password).unwrap_or_default(),
            jwt: args.jwt.or(file.jwt).unwrap_or_default(),
            serial: args.serial.or(file.serial).unwrap_or_default(),
            debug: args.debug.or(file.debug).unwrap_or(defaults.debug),
            refresh: Duration::from_secs(refresh_secs),
        })
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read config file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Refresh interval must be at least one second")]
    InvalidRefresh,
}
