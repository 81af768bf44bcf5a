// ABOUTME: Handoff of staged artifacts to the external key verifier.
// ABOUTME: Marshals the fixed argument contract, captures stdout verbatim, and reports the exit code.

use crate::config::VerifierConfig;
use crate::identity::InstanceId;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum HandoffError {
    #[error("Failed to run key verifier {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Key verifier {program} was terminated by a signal")]
    Signalled { program: PathBuf },
}

/// Everything the verifier is told about one run.
#[derive(Debug, Clone, Copy)]
pub struct StagedArtifacts<'a> {
    pub workspace: &'a Path,
    pub certificate: &'a str,
    pub instance_id: &'a InstanceId,
    pub expected_signer: &'a str,
    pub ca_path: &'a Path,
    pub ocsp_dir: &'a Path,
    pub keys_file: &'a Path,
    pub fingerprint: Option<&'a str>,
}

/// What the verifier reported. `stdout` is passed on to sshd untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifierOutcome {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
}

/// Strategy that decides which staged keys are authorized.
///
/// Every signature and certificate trust decision lives behind this trait.
pub trait Verifier {
    fn verify(&self, artifacts: &StagedArtifacts<'_>) -> Result<VerifierOutcome, HandoffError>;
}

/// Runs the verifier as a separate process and waits for it.
#[derive(Debug, Clone)]
pub struct ExternalVerifier {
    program: PathBuf,
    openssl: PathBuf,
}

impl ExternalVerifier {
    pub fn new(program: impl Into<PathBuf>, openssl: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            openssl: openssl.into(),
        }
    }

    pub fn from_config(config: &VerifierConfig) -> Self {
        Self::new(&config.program, &config.openssl)
    }

    /// Argument vector for one invocation, in the verifier's fixed order.
    pub fn command_args(&self, artifacts: &StagedArtifacts<'_>) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-x".into(),
            "false".into(),
            "-p".into(),
            artifacts.keys_file.into(),
            "-o".into(),
            self.openssl.as_os_str().into(),
            "-d".into(),
            artifacts.workspace.into(),
            "-s".into(),
            artifacts.certificate.into(),
            "-i".into(),
            artifacts.instance_id.as_str().into(),
            "-c".into(),
            artifacts.expected_signer.into(),
            "-a".into(),
            artifacts.ca_path.into(),
            "-v".into(),
            artifacts.ocsp_dir.into(),
        ];
        if let Some(fingerprint) = artifacts.fingerprint {
            args.push("-f".into());
            args.push(fingerprint.into());
        }
        args
    }
}

impl Verifier for ExternalVerifier {
    fn verify(&self, artifacts: &StagedArtifacts<'_>) -> Result<VerifierOutcome, HandoffError> {
        debug!(program = %self.program.display(), "invoking key verifier");
        let output = Command::new(&self.program)
            .args(self.command_args(artifacts))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .output()
            .map_err(|e| HandoffError::Spawn {
                program: self.program.clone(),
                source: e,
            })?;

        let exit_code = output.status.code().ok_or_else(|| {
            warn!(status = %output.status, "key verifier killed");
            HandoffError::Signalled {
                program: self.program.clone(),
            }
        })?;

        Ok(VerifierOutcome {
            exit_code,
            stdout: output.stdout,
        })
    }
}
