// ABOUTME: Pipeline error taxonomy using thiserror.
// ABOUTME: Every failure maps to one of three dispositions, each with a fixed process exit code.

use crate::config::ConfigError;
use crate::handoff::HandoffError;
use crate::identity::IdentityError;
use crate::stage::StageError;
use crate::topology::TopologyError;
use eic_imds::ImdsError;
use thiserror::Error;

/// How a terminated run is reported to sshd.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Expected, non-actionable state: sshd sees "no keys".
    NoKeys,
    /// Fetching or writing artifacts failed after identity was accepted.
    StagingFailure,
    /// The metadata service is unreachable, untrusted, or oddly shaped.
    TrustFailure,
}

impl Disposition {
    pub fn exit_code(self) -> i32 {
        match self {
            Disposition::NoKeys => 0,
            Disposition::StagingFailure => 1,
            Disposition::TrustFailure => 255,
        }
    }
}

/// Every way a pipeline run can end before the verifier reports.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("EC2 Instance Connect was invoked without a user.")]
    MissingUser,

    #[error("EC2 Instance Connect was invoked for unknown user {0}.")]
    UnknownUser(String),

    #[error("EC2 Instance Connect failed to load its configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("EC2 Instance Connect failed to get a IMDS token.")]
    EmptyToken,

    #[error("EC2 Instance Connect failed to establish trust with IMDS: {0}")]
    Token(#[source] ImdsError),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error("No active keys for user {0}.")]
    NoActiveKeys(String),

    #[error("Failed to check for active keys: {0}")]
    ActiveKeysProbe(#[source] ImdsError),

    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error(transparent)]
    Stage(#[from] StageError),

    #[error(transparent)]
    Handoff(#[from] HandoffError),
}

impl PipelineError {
    /// Wrap a token fetch failure, keeping the empty-body case distinct.
    pub fn from_token_error(err: ImdsError) -> Self {
        match err {
            ImdsError::EmptyToken => PipelineError::EmptyToken,
            other => PipelineError::Token(other),
        }
    }

    pub fn disposition(&self) -> Disposition {
        match self {
            PipelineError::MissingUser
            | PipelineError::UnknownUser(_)
            | PipelineError::Identity(_)
            | PipelineError::NoActiveKeys(_) => Disposition::NoKeys,

            PipelineError::ActiveKeysProbe(_)
            | PipelineError::Stage(_)
            | PipelineError::Handoff(_) => Disposition::StagingFailure,

            PipelineError::Config(_)
            | PipelineError::EmptyToken
            | PipelineError::Token(_)
            | PipelineError::Topology(_) => Disposition::TrustFailure,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.disposition().exit_code()
    }
}
