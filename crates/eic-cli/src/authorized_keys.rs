// ABOUTME: One authorized-keys lookup with the production collaborators.
// ABOUTME: Loads config, builds the IMDS client and external verifier, and runs the pipeline.

use eic_core::{Config, ExternalVerifier, Outcome, Pipeline, PipelineError, Request, SystemUsers};
use eic_imds::ImdsClient;
use eic_log::AuditLog;
use std::path::Path;
use tracing::{debug, info};

/// Run the pipeline once. Every failure is audited and folded into the outcome.
pub fn run(config_path: Option<&Path>, request: &Request, audit: &dyn AuditLog) -> Outcome {
    let config = match Config::load(config_path) {
        Ok(config) => config,
        Err(e) => return bootstrap_failure(PipelineError::Config(e), audit),
    };
    debug!(?config, "configuration loaded");

    let client = match ImdsClient::new(&config.imds) {
        Ok(client) => client,
        Err(e) => return bootstrap_failure(PipelineError::Token(e), audit),
    };
    let verifier = ExternalVerifier::from_config(&config.verifier);

    Pipeline::new(&config, &client, &verifier, &SystemUsers, audit).run(request)
}

fn bootstrap_failure(err: PipelineError, audit: &dyn AuditLog) -> Outcome {
    audit.info(&err.to_string());
    info!(error = %err, "could not start pipeline");
    Outcome::rejected(&err)
}
