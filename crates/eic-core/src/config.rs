// ABOUTME: Configuration loading for the authorized-keys pipeline.
// ABOUTME: Optional TOML file with built-in defaults for every field, plus an env override for the workspace root.

use eic_imds::ImdsConfig;
use serde::Deserialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Config file consulted when no explicit path is given.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/ec2-instance-connect/eic.toml";

/// Environment variable that relocates the workspace root.
pub const WORKSPACE_ROOT_ENV: &str = "EIC_WORKSPACE_ROOT";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config from {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub imds: ImdsConfig,
    pub markers: MarkerPaths,
    pub workspace: WorkspaceConfig,
    pub verifier: VerifierConfig,
}

/// Hypervisor marker files probed during identity verification.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MarkerPaths {
    /// Present on Xen instances; content starts with `ec2`.
    pub xen_uuid: PathBuf,
    /// Present on Nitro instances; content is the instance id.
    pub nitro_board_asset_tag: PathBuf,
}

impl Default for MarkerPaths {
    fn default() -> Self {
        Self {
            xen_uuid: PathBuf::from("/sys/hypervisor/uuid"),
            nitro_board_asset_tag: PathBuf::from("/sys/devices/virtual/dmi/id/board_asset_tag"),
        }
    }
}

/// Where ephemeral workspaces are created. Must be tmpfs-backed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    pub root: PathBuf,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/dev/shm"),
        }
    }
}

/// External verifier invocation settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    /// Verifier executable.
    pub program: PathBuf,
    /// openssl binary the verifier shells out to.
    pub openssl: PathBuf,
    /// Trusted CA bundle directory.
    pub ca_path: PathBuf,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("/usr/share/ec2-instance-connect/eic_parse_authorized_keys"),
            openssl: PathBuf::from("/usr/bin/openssl"),
            ca_path: PathBuf::from("/etc/ssl/certs"),
        }
    }
}

impl Config {
    /// Load configuration.
    ///
    /// An explicit path must exist. Without one, [`DEFAULT_CONFIG_PATH`] is
    /// read if present and the built-in defaults are used otherwise. The
    /// workspace root can then be overridden through [`WORKSPACE_ROOT_ENV`].
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default = Path::new(DEFAULT_CONFIG_PATH);
                if default.is_file() {
                    Self::from_file(default)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_workspace_override(std::env::var_os(WORKSPACE_ROOT_ENV));
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Replace the workspace root when a non-empty override is supplied.
    pub fn apply_workspace_override(&mut self, root: Option<OsString>) {
        if let Some(root) = root.filter(|r| !r.is_empty()) {
            self.workspace.root = PathBuf::from(root);
        }
    }
}
