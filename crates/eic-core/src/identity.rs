// ABOUTME: Instance identity verification against local hypervisor markers.
// ABOUTME: Checks the IMDS instance id shape, then corroborates it with the Xen uuid or Nitro board asset tag.

use crate::config::MarkerPaths;
use eic_imds::ImdsError;
use regex::Regex;
use std::fmt;
use std::path::PathBuf;
use std::sync::LazyLock;
use thiserror::Error;
use tracing::debug;

static INSTANCE_ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^i-[0-9a-f]{8,32}$").expect("valid instance id regex"));

/// Prefix every genuine Xen EC2 hypervisor uuid carries.
const XEN_UUID_PREFIX: &str = "ec2";

/// Reasons an instance is not accepted. All of them are benign rejections.
#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Failed to fetch instance ID: {0}")]
    Unavailable(#[source] ImdsError),

    #[error("Invalid instance ID {0:?}")]
    Malformed(String),

    #[error("EC2 Instance Connect was invoked on a non-instance.")]
    NotAnInstance,

    #[error("EC2 Instance Connect was invoked on a non-instance (Xen uuid {0:?}).")]
    NotEc2Xen(String),

    #[error("Board asset tag does not match instance ID.")]
    BoardAssetTagMismatch,

    #[error("EC2 Instance Connect failed to verify instance: cannot read {path}: {source}")]
    MarkerUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// An instance id that matches `^i-[0-9a-f]{8,32}$`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceId(String);

impl InstanceId {
    pub fn parse(raw: &str) -> Result<Self, IdentityError> {
        if INSTANCE_ID_PATTERN.is_match(raw) {
            Ok(Self(raw.to_string()))
        } else {
            Err(IdentityError::Malformed(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hypervisor family, decided by which marker file exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hypervisor {
    Xen,
    Nitro,
}

/// Probe the marker paths in fixed order: Xen first, then Nitro.
pub fn detect_hypervisor(paths: &MarkerPaths) -> Option<Hypervisor> {
    if paths.xen_uuid.is_file() {
        Some(Hypervisor::Xen)
    } else if paths.nitro_board_asset_tag.is_file() {
        Some(Hypervisor::Nitro)
    } else {
        None
    }
}

/// Marker content read from the host, trimmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformMarker {
    Xen { uuid: String },
    Nitro { board_asset_tag: String },
    None,
}

impl PlatformMarker {
    /// Read the marker for whichever hypervisor is detected.
    pub fn read(paths: &MarkerPaths) -> Result<Self, IdentityError> {
        let marker = match detect_hypervisor(paths) {
            Some(Hypervisor::Xen) => PlatformMarker::Xen {
                uuid: read_marker(&paths.xen_uuid)?,
            },
            Some(Hypervisor::Nitro) => PlatformMarker::Nitro {
                board_asset_tag: read_marker(&paths.nitro_board_asset_tag)?,
            },
            None => PlatformMarker::None,
        };
        debug!(?marker, "platform marker");
        Ok(marker)
    }

    /// Decide whether this marker corroborates `instance_id`. Pure.
    pub fn attest(&self, instance_id: &InstanceId) -> Result<(), IdentityError> {
        match self {
            PlatformMarker::Xen { uuid } if uuid.starts_with(XEN_UUID_PREFIX) => Ok(()),
            PlatformMarker::Xen { uuid } => Err(IdentityError::NotEc2Xen(uuid.clone())),
            PlatformMarker::Nitro { board_asset_tag } if board_asset_tag == instance_id.as_str() => {
                Ok(())
            }
            PlatformMarker::Nitro { .. } => Err(IdentityError::BoardAssetTagMismatch),
            PlatformMarker::None => Err(IdentityError::NotAnInstance),
        }
    }
}

fn read_marker(path: &std::path::Path) -> Result<String, IdentityError> {
    std::fs::read_to_string(path)
        .map(|content| content.trim().to_string())
        .map_err(|e| IdentityError::MarkerUnreadable {
            path: path.to_path_buf(),
            source: e,
        })
}

/// An instance id accepted by [`IdentityVerifier`], with the marker that backed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    pub instance_id: InstanceId,
    pub marker: PlatformMarker,
}

/// Confirms the IMDS-reported instance id against an out-of-band local marker.
///
/// The id alone can be forged from inside a compromised guest; the marker
/// file is written by the hypervisor.
#[derive(Debug, Clone, Copy)]
pub struct IdentityVerifier<'a> {
    markers: &'a MarkerPaths,
}

impl<'a> IdentityVerifier<'a> {
    pub fn new(markers: &'a MarkerPaths) -> Self {
        Self { markers }
    }

    pub fn verify(&self, raw_instance_id: &str) -> Result<VerifiedIdentity, IdentityError> {
        let instance_id = InstanceId::parse(raw_instance_id.trim())?;
        let marker = PlatformMarker::read(self.markers)?;
        marker.attest(&instance_id)?;
        Ok(VerifiedIdentity {
            instance_id,
            marker,
        })
    }
}
