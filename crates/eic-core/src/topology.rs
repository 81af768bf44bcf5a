// ABOUTME: Availability zone and service domain validation.
// ABOUTME: Derives the region and the signer identity the verifier must later confirm.

use eic_imds::{paths, ImdsError, MetadataSource, Token};
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use thiserror::Error;
use tracing::debug;

static ZONE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([a-z]+-){2,3}[0-9][a-z]$").expect("valid zone regex"));

static REGION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(([a-z]+-)+[0-9]+)").expect("valid region regex"));

/// Malformed topology means the metadata service itself is suspect.
#[derive(Error, Debug)]
pub enum TopologyError {
    #[error("Failed to fetch availability zone: {0}")]
    ZoneUnavailable(#[source] ImdsError),

    #[error("Invalid availability zone format: {0:?}")]
    InvalidZone(String),

    #[error("Failed to fetch domain from IMDS: {0}")]
    DomainUnavailable(#[source] ImdsError),

    #[error("EC2 Instance Connect found an invalid domain: {0:?}")]
    DisallowedDomain(String),
}

/// Region prefix of an availability zone: `us-east-1a` → `us-east-1`.
pub fn derive_region(zone: &str) -> Option<&str> {
    REGION_PATTERN
        .captures(zone)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// A zone matching `^([a-z]+-){2,3}[0-9][a-z]$`, with its derived region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilityZone {
    zone: String,
    region: String,
}

impl AvailabilityZone {
    pub fn parse(raw: &str) -> Result<Self, TopologyError> {
        if !ZONE_PATTERN.is_match(raw) {
            return Err(TopologyError::InvalidZone(raw.to_string()));
        }
        let region = derive_region(raw).ok_or_else(|| TopologyError::InvalidZone(raw.to_string()))?;
        Ok(Self {
            zone: raw.to_string(),
            region: region.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.zone
    }

    pub fn region(&self) -> &str {
        &self.region
    }
}

/// Partition domains a managed SSH signer can live under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    /// `amazonaws.com`
    Commercial,
    /// `amazonaws.com.cn`
    China,
    /// `c2s.ic.gov`
    UsIsoEast,
    /// `sc2s.sgov.gov`
    UsIsobEast,
}

impl Domain {
    pub const ALL: [Domain; 4] = [
        Domain::Commercial,
        Domain::China,
        Domain::UsIsoEast,
        Domain::UsIsobEast,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Domain::Commercial => "amazonaws.com",
            Domain::China => "amazonaws.com.cn",
            Domain::UsIsoEast => "c2s.ic.gov",
            Domain::UsIsobEast => "sc2s.sgov.gov",
        }
    }
}

impl FromStr for Domain {
    type Err = TopologyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Domain::ALL
            .into_iter()
            .find(|d| d.as_str() == s)
            .ok_or_else(|| TopologyError::DisallowedDomain(s.to_string()))
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated placement of this instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub zone: AvailabilityZone,
    pub domain: Domain,
}

impl Topology {
    pub fn new(zone: AvailabilityZone, domain: Domain) -> Self {
        Self { zone, domain }
    }

    pub fn region(&self) -> &str {
        self.zone.region()
    }

    /// `managed-ssh-signer.<region>.<domain>`
    pub fn expected_signer(&self) -> String {
        format!("managed-ssh-signer.{}.{}", self.region(), self.domain)
    }
}

/// Reads zone and domain from the metadata service and validates them.
#[derive(Clone, Copy)]
pub struct TopologyResolver<'a> {
    metadata: &'a dyn MetadataSource,
    token: &'a Token,
}

impl<'a> TopologyResolver<'a> {
    pub fn new(metadata: &'a dyn MetadataSource, token: &'a Token) -> Self {
        Self { metadata, token }
    }

    pub fn resolve_zone(&self) -> Result<AvailabilityZone, TopologyError> {
        let raw = self
            .metadata
            .fetch_field(paths::AVAILABILITY_ZONE, self.token)
            .map_err(TopologyError::ZoneUnavailable)?;
        let zone = AvailabilityZone::parse(raw.trim())?;
        debug!(zone = zone.as_str(), region = zone.region(), "availability zone");
        Ok(zone)
    }

    pub fn resolve_domain(&self) -> Result<Domain, TopologyError> {
        let raw = self
            .metadata
            .fetch_field(paths::DOMAIN, self.token)
            .map_err(TopologyError::DomainUnavailable)?;
        let domain = raw.trim().parse::<Domain>()?;
        debug!(%domain, "service domain");
        Ok(domain)
    }
}
