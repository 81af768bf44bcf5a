// ABOUTME: Ephemeral, owner-only workspace and the artifacts staged into it.
// ABOUTME: Fetches signer certificate, OCSP staples, and active keys in that fixed order.

use base64::Engine;
use eic_imds::{paths, ImdsError, MetadataSource, Token};
use eic_log::AuditLog;
use std::fs::{DirBuilder, OpenOptions, Permissions};
use std::io::Write;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use thiserror::Error;
use tracing::debug;

/// File holding the raw active-keys blob.
pub const KEYS_FILE: &str = "eic-keys";
/// File holding the signer certificate text.
pub const CERT_FILE: &str = "signer-cert.pem";
/// Subdirectory holding one decoded file per OCSP staple.
pub const OCSP_DIR: &str = "ocsp";

const DIR_MODE: u32 = 0o700;
const ARTIFACT_MODE: u32 = 0o400;

/// Staging failures. All of them happen after identity was accepted.
#[derive(Error, Debug)]
pub enum StageError {
    #[error("Failed to create workspace under {path}: {source}")]
    CreateWorkspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to fetch the signer certificate: {0}")]
    CertificateUnavailable(#[source] ImdsError),

    #[error("Failed to fetch the certificate: empty response")]
    EmptyCertificate,

    #[error("Failed to fetch OCSP staple paths: {0}")]
    StapleIndexUnavailable(#[source] ImdsError),

    #[error("Refusing OCSP staple with unsafe name {0:?}")]
    InvalidStapleName(String),

    #[error("Failed to fetch OCSP staple {name}: {source}")]
    StapleUnavailable {
        name: String,
        #[source]
        source: ImdsError,
    },

    #[error("Failed to decode OCSP staple {name}: {source}")]
    StapleDecode {
        name: String,
        #[source]
        source: base64::DecodeError,
    },

    #[error("Failed to fetch SSH keys: {0}")]
    KeysUnavailable(#[source] ImdsError),

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to set permissions on {path}: {source}")]
    SetPermissions {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Owner-only temporary directory for one pipeline run.
///
/// Removed when dropped, on success and failure alike.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    /// Create `eic-XXXXXX` under `root` with mode 0700.
    pub fn create(root: &Path) -> Result<Self, StageError> {
        let dir = tempfile::Builder::new()
            .prefix("eic-")
            .tempdir_in(root)
            .map_err(|e| StageError::CreateWorkspace {
                path: root.to_path_buf(),
                source: e,
            })?;
        set_mode(dir.path(), DIR_MODE)?;
        debug!(path = %dir.path().display(), "workspace created");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// Workspace populated with everything the verifier needs.
#[derive(Debug)]
pub struct StagedWorkspace {
    pub workspace: Workspace,
    pub certificate: String,
    pub certificate_file: PathBuf,
    pub ocsp_dir: PathBuf,
    pub keys_file: PathBuf,
}

/// Pulls signer certificate, OCSP staples, and active keys into a fresh workspace.
pub struct ArtifactStager<'a> {
    metadata: &'a dyn MetadataSource,
    token: &'a Token,
    audit: &'a dyn AuditLog,
    root: &'a Path,
}

impl<'a> ArtifactStager<'a> {
    pub fn new(
        metadata: &'a dyn MetadataSource,
        token: &'a Token,
        audit: &'a dyn AuditLog,
        root: &'a Path,
    ) -> Self {
        Self {
            metadata,
            token,
            audit,
            root,
        }
    }

    /// Stage all artifacts for `username`.
    ///
    /// On any error the partially filled workspace is dropped, and with it
    /// removed, before the error is returned.
    pub fn stage(&self, username: &str) -> Result<StagedWorkspace, StageError> {
        let workspace = Workspace::create(self.root)?;

        self.audit.info("Fetching signer certificate");
        let certificate = self.fetch_certificate()?;
        let certificate_file = workspace.path().join(CERT_FILE);
        write_artifact(&certificate_file, certificate.as_bytes())?;
        debug!(bytes = certificate.len(), "signer certificate fetched");

        self.audit.info("Fetching OCSP staples");
        let ocsp_dir = self.fetch_ocsp_staples(&workspace)?;

        self.audit.info("Fetching SSH keys");
        let keys_file = self.fetch_keys(&workspace, username)?;

        Ok(StagedWorkspace {
            workspace,
            certificate,
            certificate_file,
            ocsp_dir,
            keys_file,
        })
    }

    fn fetch_certificate(&self) -> Result<String, StageError> {
        let body = self
            .metadata
            .fetch_field(paths::SIGNER_CERT, self.token)
            .map_err(StageError::CertificateUnavailable)?;
        let certificate = body.trim();
        if certificate.is_empty() {
            return Err(StageError::EmptyCertificate);
        }
        Ok(certificate.to_string())
    }

    fn fetch_ocsp_staples(&self, workspace: &Workspace) -> Result<PathBuf, StageError> {
        let index = self
            .metadata
            .fetch_field(paths::SIGNER_OCSP, self.token)
            .map_err(StageError::StapleIndexUnavailable)?;

        let ocsp_dir = workspace.path().join(OCSP_DIR);
        DirBuilder::new()
            .mode(DIR_MODE)
            .create(&ocsp_dir)
            .map_err(|e| StageError::Write {
                path: ocsp_dir.clone(),
                source: e,
            })?;

        for name in index.split_whitespace() {
            validate_staple_name(name)?;
            let body = self
                .metadata
                .fetch_field(&paths::signer_ocsp_staple(name), self.token)
                .map_err(|e| StageError::StapleUnavailable {
                    name: name.to_string(),
                    source: e,
                })?;
            let staple = decode_staple(name, &body)?;
            write_artifact(&ocsp_dir.join(name), &staple)?;
            debug!(name, bytes = staple.len(), "OCSP staple staged");
        }

        Ok(ocsp_dir)
    }

    fn fetch_keys(&self, workspace: &Workspace, username: &str) -> Result<PathBuf, StageError> {
        let blob = self
            .metadata
            .fetch_field(&paths::active_keys(username), self.token)
            .map_err(StageError::KeysUnavailable)?;
        let keys_file = workspace.path().join(KEYS_FILE);
        write_artifact(&keys_file, blob.as_bytes())?;
        Ok(keys_file)
    }
}

/// Staple names become file names; anything that could leave the directory is refused.
fn validate_staple_name(name: &str) -> Result<(), StageError> {
    if name == "." || name == ".." || name.contains('/') || name.contains('\0') {
        return Err(StageError::InvalidStapleName(name.to_string()));
    }
    Ok(())
}

/// Base64-decode a staple body, ignoring embedded line breaks.
fn decode_staple(name: &str, body: &str) -> Result<Vec<u8>, StageError> {
    let compact: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    base64::engine::general_purpose::STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| StageError::StapleDecode {
            name: name.to_string(),
            source: e,
        })
}

/// Write a new owner-read-only file. Fails if the file already exists.
fn write_artifact(path: &Path, contents: &[u8]) -> Result<(), StageError> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(ARTIFACT_MODE)
        .open(path)
        .map_err(|e| StageError::Write {
            path: path.to_path_buf(),
            source: e,
        })?;
    file.write_all(contents).map_err(|e| StageError::Write {
        path: path.to_path_buf(),
        source: e,
    })?;
    set_mode(path, ARTIFACT_MODE)
}

fn set_mode(path: &Path, mode: u32) -> Result<(), StageError> {
    std::fs::set_permissions(path, Permissions::from_mode(mode)).map_err(|e| {
        StageError::SetPermissions {
            path: path.to_path_buf(),
            source: e,
        }
    })
}
