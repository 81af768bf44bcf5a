// ABOUTME: Library root for eic-core.
// ABOUTME: Exports the pipeline stages, their error types, and configuration.

//! # eic-core
//!
//! The credential-acquisition pipeline behind the EC2 Instance Connect
//! `AuthorizedKeysCommand`:
//!
//! ```text
//! user check → IMDS token → instance identity → active-keys probe
//!   → topology (zone, region, domain) → staged artifacts → verifier
//! ```
//!
//! Each stage either hands its result to the next or ends the run with a
//! [`Disposition`] that maps onto the process exit code sshd sees.

pub mod config;
pub mod error;
pub mod handoff;
pub mod identity;
pub mod pipeline;
pub mod stage;
pub mod topology;
pub mod users;

pub use config::{Config, ConfigError, MarkerPaths, VerifierConfig, WorkspaceConfig};
pub use error::{Disposition, PipelineError};
pub use handoff::{ExternalVerifier, HandoffError, StagedArtifacts, Verifier, VerifierOutcome};
pub use identity::{
    detect_hypervisor, Hypervisor, IdentityError, IdentityVerifier, InstanceId, PlatformMarker,
    VerifiedIdentity,
};
pub use pipeline::{Outcome, Pipeline, Request};
pub use stage::{ArtifactStager, StageError, StagedWorkspace, Workspace};
pub use topology::{AvailabilityZone, Domain, Topology, TopologyError, TopologyResolver};
pub use users::{SystemUsers, UserDirectory};
