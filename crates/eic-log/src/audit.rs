// ABOUTME: Audit trail for the authorized-keys pipeline.
// ABOUTME: One info() call lands on stdout and in the authpriv syslog facility.

use std::ffi::CString;
use std::io::Write;
use std::sync::Mutex;

/// Sink for audit messages emitted at every pipeline stage.
pub trait AuditLog {
    /// Record an informational audit message.
    fn info(&self, message: &str);
}

/// Writes `LOG: <message>` to stdout and the same text to syslog
/// (`LOG_AUTHPRIV | LOG_INFO`).
#[derive(Debug)]
pub struct SyslogAudit {
    _private: (),
}

impl SyslogAudit {
    /// Open the syslog connection under the `ec2-instance-connect` ident.
    pub fn open() -> Self {
        // SAFETY: the ident is a 'static C string literal, which openlog is
        // allowed to retain for the lifetime of the process.
        unsafe {
            libc::openlog(
                c"ec2-instance-connect".as_ptr(),
                libc::LOG_PID,
                libc::LOG_AUTHPRIV,
            );
        }
        Self { _private: () }
    }
}

impl AuditLog for SyslogAudit {
    fn info(&self, message: &str) {
        // sshd may already have closed the pipe; syslog still gets the line.
        if let Err(e) = write_line(&mut std::io::stdout().lock(), message) {
            tracing::debug!(error = %e, message, "audit line not written to stdout");
        }

        let text = syslog_text(message);
        // SAFETY: both pointers are valid NUL-terminated strings for the
        // duration of the call, and "%s" consumes exactly one argument.
        unsafe {
            libc::syslog(
                libc::LOG_AUTHPRIV | libc::LOG_INFO,
                c"%s".as_ptr(),
                text.as_ptr(),
            );
        }
    }
}

fn write_line(out: &mut impl Write, message: &str) -> std::io::Result<()> {
    writeln!(out, "LOG: {message}")?;
    out.flush()
}

/// Interior NUL bytes cannot cross the C boundary; they are replaced.
fn syslog_text(message: &str) -> CString {
    CString::new(message.replace('\0', "\u{FFFD}")).unwrap_or_default()
}

/// Collects audit messages in memory. Used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryAudit {
    messages: Mutex<Vec<String>>,
}

impl MemoryAudit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every message recorded so far, oldest first.
    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    /// True if any recorded message contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.messages().iter().any(|m| m.contains(needle))
    }
}

impl AuditLog for MemoryAudit {
    fn info(&self, message: &str) {
        tracing::debug!(message, "audit");
        if let Ok(mut messages) = self.messages.lock() {
            messages.push(message.to_string());
        }
    }
}

impl<T: AuditLog + ?Sized> AuditLog for &T {
    fn info(&self, message: &str) {
        (**self).info(message)
    }
}
