// ABOUTME: sshd AuthorizedKeysCommand entry point.
// ABOUTME: Runs one authorized-keys lookup and exits with the pipeline's code.

use anyhow::{Context, Result};
use clap::Parser;
use eic_cli::authorized_keys;
use eic_core::Request;
use eic_log::SyslogAudit;
use nix::sys::stat::{umask, Mode};
use std::io::Write;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "eic-authorized-keys")]
#[command(about = "Print the EC2 Instance Connect keys authorized for a user")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(long, env = "EIC_CONFIG")]
    config: Option<PathBuf>,

    /// Login name sshd is authenticating (%u)
    username: Option<String>,

    /// Fingerprint of the offered key (%f)
    fingerprint: Option<String>,
}

fn main() {
    umask(Mode::from_bits_truncate(0o077));
    eic_log::init();

    let cli = Cli::parse();
    let audit = SyslogAudit::open();
    let request = Request {
        username: cli.username,
        fingerprint: cli.fingerprint,
    };

    let outcome = authorized_keys::run(cli.config.as_deref(), &request, &audit);
    if let Err(e) = emit(outcome.stdout()) {
        tracing::error!("{e:#}");
    }
    std::process::exit(outcome.exit_code());
}

fn emit(bytes: &[u8]) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    stdout
        .write_all(bytes)
        .and_then(|()| stdout.flush())
        .context("failed to write authorized keys to stdout")
}
