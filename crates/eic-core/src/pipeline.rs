// ABOUTME: The linear credential-acquisition pipeline run once per sshd lookup.
// ABOUTME: Sequences user check, IMDS trust, identity, topology, staging, and verifier handoff.

use crate::config::Config;
use crate::error::{Disposition, PipelineError};
use crate::handoff::{StagedArtifacts, Verifier, VerifierOutcome};
use crate::identity::{IdentityError, IdentityVerifier};
use crate::stage::ArtifactStager;
use crate::topology::{Topology, TopologyResolver};
use crate::users::UserDirectory;
use eic_imds::{paths, MetadataSource};
use eic_log::AuditLog;
use tracing::{debug, info};

/// Arguments sshd hands to the AuthorizedKeysCommand.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    pub username: Option<String>,
    pub fingerprint: Option<String>,
}

impl Request {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            fingerprint: None,
        }
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }
}

/// Terminal result of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The verifier ran; its exit code and stdout are final.
    Verified(VerifierOutcome),
    /// The run ended early. The reason has already been audited.
    Rejected {
        disposition: Disposition,
        reason: String,
    },
}

impl Outcome {
    /// The outcome reported for `err`. Auditing it is the caller's job.
    pub fn rejected(err: &PipelineError) -> Self {
        Outcome::Rejected {
            disposition: err.disposition(),
            reason: err.to_string(),
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Outcome::Verified(outcome) => outcome.exit_code,
            Outcome::Rejected { disposition, .. } => disposition.exit_code(),
        }
    }

    /// Bytes destined for sshd's stdout.
    pub fn stdout(&self) -> &[u8] {
        match self {
            Outcome::Verified(outcome) => &outcome.stdout,
            Outcome::Rejected { .. } => &[],
        }
    }
}

/// One pipeline run. Every collaborator is injected.
pub struct Pipeline<'a> {
    config: &'a Config,
    metadata: &'a dyn MetadataSource,
    verifier: &'a dyn Verifier,
    users: &'a dyn UserDirectory,
    audit: &'a dyn AuditLog,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: &'a Config,
        metadata: &'a dyn MetadataSource,
        verifier: &'a dyn Verifier,
        users: &'a dyn UserDirectory,
        audit: &'a dyn AuditLog,
    ) -> Self {
        Self {
            config,
            metadata,
            verifier,
            users,
            audit,
        }
    }

    /// Run to completion. Never fails: every error becomes an audited [`Outcome::Rejected`].
    ///
    /// The workspace is gone by the time this returns.
    pub fn run(&self, request: &Request) -> Outcome {
        match self.execute(request) {
            Ok(outcome) => {
                info!(exit_code = outcome.exit_code, "key verifier finished");
                Outcome::Verified(outcome)
            }
            Err(e) => self.reject(e),
        }
    }

    /// Audit `err` and turn it into the matching outcome.
    fn reject(&self, err: PipelineError) -> Outcome {
        self.audit.info(&err.to_string());
        info!(disposition = ?err.disposition(), error = %err, "pipeline ended early");
        Outcome::rejected(&err)
    }

    fn execute(&self, request: &Request) -> Result<VerifierOutcome, PipelineError> {
        self.audit.info("Checking for username argument");
        let username = request
            .username
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or(PipelineError::MissingUser)?;
        debug!(username, "username");

        self.audit.info("Verifying username");
        if !self.users.exists(username) {
            return Err(PipelineError::UnknownUser(username.to_string()));
        }

        // Forwarded untouched. An empty %f means no filter.
        let fingerprint = request.fingerprint.as_deref().filter(|f| !f.is_empty());

        self.audit.info("Fetching token from IMDS");
        let token = self
            .metadata
            .fetch_token()
            .map_err(PipelineError::from_token_error)?;

        self.audit.info("Fetching instance ID");
        let raw_instance_id = self
            .metadata
            .fetch_field(paths::INSTANCE_ID, &token)
            .map_err(IdentityError::Unavailable)?;

        self.audit.info("Verifying instance ID");
        let identity = IdentityVerifier::new(&self.config.markers).verify(&raw_instance_id)?;
        debug!(instance_id = %identity.instance_id, marker = ?identity.marker, "instance verified");

        self.audit.info("Checking active keys");
        match self.metadata.probe_field(&paths::active_keys(username), &token) {
            Ok(true) => self
                .audit
                .info(&format!("Active keys found for user {username}")),
            Ok(false) => return Err(PipelineError::NoActiveKeys(username.to_string())),
            Err(e) => return Err(PipelineError::ActiveKeysProbe(e)),
        }

        let resolver = TopologyResolver::new(self.metadata, &token);
        self.audit.info("Validating the AZ");
        let zone = resolver.resolve_zone()?;
        self.audit.info("Validating region and domain");
        let domain = resolver.resolve_domain()?;
        let topology = Topology::new(zone, domain);
        let expected_signer = topology.expected_signer();
        debug!(expected_signer = %expected_signer, "expected signer");

        let staged = ArtifactStager::new(
            self.metadata,
            &token,
            self.audit,
            &self.config.workspace.root,
        )
        .stage(username)?;

        self.audit.info("Calling the key verifier");
        let artifacts = StagedArtifacts {
            workspace: staged.workspace.path(),
            certificate: &staged.certificate,
            instance_id: &identity.instance_id,
            expected_signer: &expected_signer,
            ca_path: &self.config.verifier.ca_path,
            ocsp_dir: &staged.ocsp_dir,
            keys_file: &staged.keys_file,
            fingerprint,
        };
        let outcome = self.verifier.verify(&artifacts)?;
        Ok(outcome)
    }
}
