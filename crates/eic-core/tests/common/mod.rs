// ABOUTME: In-memory collaborators for pipeline integration tests.
// ABOUTME: Canned metadata responses, a recording verifier, a fixed user list, and a marker/workspace fixture.

#![allow(dead_code)]

use eic_core::stage::CERT_FILE;
use eic_core::{
    Config, HandoffError, MarkerPaths, StagedArtifacts, UserDirectory, Verifier, VerifierOutcome,
};
use eic_imds::{paths, ImdsError, MetadataSource, Token};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const INSTANCE_ID: &str = "i-1234567890abcdef0";
pub const TOKEN: &str = "AQAEAFakeSessionToken==";
pub const CERT: &str = "-----BEGIN CERTIFICATE-----\nMIIBfake\n-----END CERTIFICATE-----";
pub const KEYS: &str = "#Timestamp=1700000000\n#Instance=i-1234567890abcdef0\nssh-ed25519 AAAA alice\n#sig\n";

/// Canned answer for one metadata path.
#[derive(Debug, Clone)]
pub enum Reply {
    Body(String),
    NotFound,
    Status(u16),
}

/// Scripted metadata service that records every call it receives.
pub struct FakeImds {
    token: Option<String>,
    routes: HashMap<String, Reply>,
    calls: RefCell<Vec<String>>,
}

impl FakeImds {
    pub fn new() -> Self {
        Self {
            token: Some(TOKEN.to_string()),
            routes: HashMap::new(),
            calls: RefCell::new(Vec::new()),
        }
    }

    /// A metadata service describing a healthy us-east-1 instance with two staples.
    pub fn healthy(instance_id: &str) -> Self {
        Self::new()
            .route(paths::INSTANCE_ID, Reply::Body(format!("{instance_id}\n")))
            .route(&paths::active_keys("alice"), Reply::Body(KEYS.to_string()))
            .route(paths::AVAILABILITY_ZONE, Reply::Body("us-east-1a".to_string()))
            .route(paths::DOMAIN, Reply::Body("amazonaws.com".to_string()))
            .route(paths::SIGNER_CERT, Reply::Body(format!("{CERT}\n")))
            .route(paths::SIGNER_OCSP, Reply::Body("a\nb\n".to_string()))
            .route(&paths::signer_ocsp_staple("a"), Reply::Body("aGVsbG8=".to_string()))
            .route(&paths::signer_ocsp_staple("b"), Reply::Body("d29y\nbGQ=\n".to_string()))
    }

    pub fn route(mut self, path: &str, reply: Reply) -> Self {
        self.routes.insert(path.to_string(), reply);
        self
    }

    /// Token endpoint answers with an empty body.
    pub fn without_token(mut self) -> Self {
        self.token = None;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub fn called(&self, call: &str) -> bool {
        self.calls.borrow().iter().any(|c| c == call)
    }

    fn record(&self, call: String) {
        self.calls.borrow_mut().push(call);
    }

    fn reply(&self, path: &str, token: &Token) -> Result<String, ImdsError> {
        assert_eq!(token.as_str(), TOKEN, "every read must carry the session token");
        match self.routes.get(path) {
            Some(Reply::Body(body)) => Ok(body.clone()),
            Some(Reply::Status(status)) => Err(ImdsError::Status {
                path: path.to_string(),
                status: *status,
            }),
            Some(Reply::NotFound) | None => Err(ImdsError::NotFound {
                path: path.to_string(),
            }),
        }
    }
}

impl MetadataSource for FakeImds {
    fn fetch_token(&self) -> eic_imds::Result<Token> {
        self.record(format!("PUT {}", paths::TOKEN));
        match &self.token {
            Some(token) => Ok(Token::new(token.as_str())),
            None => Err(ImdsError::EmptyToken),
        }
    }

    fn fetch_field(&self, path: &str, token: &Token) -> eic_imds::Result<String> {
        self.record(format!("GET {path}"));
        self.reply(path, token)
    }

    fn probe_field(&self, path: &str, token: &Token) -> eic_imds::Result<bool> {
        self.record(format!("HEAD {path}"));
        match self.reply(path, token) {
            Ok(_) => Ok(true),
            Err(ImdsError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// One staged file as the verifier saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub name: String,
    pub contents: Vec<u8>,
    pub mode: u32,
}

/// Everything the verifier observed while the workspace was still alive.
#[derive(Debug, Clone)]
pub struct Observed {
    pub workspace: PathBuf,
    pub workspace_mode: u32,
    pub certificate: String,
    pub instance_id: String,
    pub expected_signer: String,
    pub ca_path: PathBuf,
    pub fingerprint: Option<String>,
    pub certificate_file: StagedFile,
    pub staples: Vec<StagedFile>,
    pub keys: StagedFile,
}

/// Verifier stand-in that snapshots the staged workspace and returns a fixed result.
pub struct FakeVerifier {
    exit_code: i32,
    stdout: Vec<u8>,
    observed: RefCell<Option<Observed>>,
}

impl FakeVerifier {
    pub fn new(exit_code: i32, stdout: &[u8]) -> Self {
        Self {
            exit_code,
            stdout: stdout.to_vec(),
            observed: RefCell::new(None),
        }
    }

    pub fn observed(&self) -> Option<Observed> {
        self.observed.borrow().clone()
    }

    pub fn was_called(&self) -> bool {
        self.observed.borrow().is_some()
    }
}

fn mode_of(path: &Path) -> u32 {
    std::fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o777)
        .unwrap_or(0)
}

fn snapshot(path: &Path) -> StagedFile {
    StagedFile {
        name: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        contents: std::fs::read(path).unwrap_or_default(),
        mode: mode_of(path),
    }
}

impl Verifier for FakeVerifier {
    fn verify(&self, artifacts: &StagedArtifacts<'_>) -> Result<VerifierOutcome, HandoffError> {
        let mut staples: Vec<StagedFile> = std::fs::read_dir(artifacts.ocsp_dir)
            .map(|entries| entries.flatten().map(|e| snapshot(&e.path())).collect())
            .unwrap_or_default();
        staples.sort_by(|a, b| a.name.cmp(&b.name));

        *self.observed.borrow_mut() = Some(Observed {
            workspace: artifacts.workspace.to_path_buf(),
            workspace_mode: mode_of(artifacts.workspace),
            certificate: artifacts.certificate.to_string(),
            instance_id: artifacts.instance_id.to_string(),
            expected_signer: artifacts.expected_signer.to_string(),
            ca_path: artifacts.ca_path.to_path_buf(),
            fingerprint: artifacts.fingerprint.map(str::to_string),
            certificate_file: snapshot(&artifacts.workspace.join(CERT_FILE)),
            staples,
            keys: snapshot(artifacts.keys_file),
        });

        Ok(VerifierOutcome {
            exit_code: self.exit_code,
            stdout: self.stdout.clone(),
        })
    }
}

/// Fixed set of local accounts.
pub struct FakeUsers(HashSet<String>);

impl FakeUsers {
    pub fn with(names: &[&str]) -> Self {
        Self(names.iter().map(|n| n.to_string()).collect())
    }
}

impl UserDirectory for FakeUsers {
    fn exists(&self, username: &str) -> bool {
        self.0.contains(username)
    }
}

/// Temporary host: marker files plus a workspace root, wired into a [`Config`].
pub struct Fixture {
    pub dir: TempDir,
    pub config: Config,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("create fixture dir");
        let root = dir.path().join("shm");
        std::fs::create_dir(&root).expect("create workspace root");

        let mut config = Config::default();
        config.markers = MarkerPaths {
            xen_uuid: dir.path().join("uuid"),
            nitro_board_asset_tag: dir.path().join("board_asset_tag"),
        };
        config.workspace.root = root;
        Self { dir, config }
    }

    pub fn nitro(instance_id: &str) -> Self {
        let fixture = Self::new();
        std::fs::write(
            &fixture.config.markers.nitro_board_asset_tag,
            format!("{instance_id}\n"),
        )
        .expect("write board asset tag");
        fixture
    }

    pub fn xen(uuid: &str) -> Self {
        let fixture = Self::new();
        std::fs::write(&fixture.config.markers.xen_uuid, format!("{uuid}\n"))
            .expect("write xen uuid");
        fixture
    }

    /// Entries left under the workspace root.
    pub fn leftovers(&self) -> Vec<PathBuf> {
        std::fs::read_dir(&self.config.workspace.root)
            .map(|entries| entries.flatten().map(|e| e.path()).collect())
            .unwrap_or_default()
    }
}
