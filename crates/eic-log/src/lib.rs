// ABOUTME: Shared logging setup for the authorized-keys binaries
// ABOUTME: init() sends tracing diagnostics to stderr; audit carries the sshd-facing audit trail

pub mod audit;

pub use audit::{AuditLog, MemoryAudit, SyslogAudit};

use tracing_subscriber::EnvFilter;

/// Diagnostics to stderr. Default: WARN level, RUST_LOG override.
///
/// stdout belongs to sshd (it reads authorized key lines from it), so the
/// subscriber never writes there.
pub fn init() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()))
        .with_ansi(false)
        .init();
}
