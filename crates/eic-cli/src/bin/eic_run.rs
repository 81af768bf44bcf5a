// ABOUTME: Timeout wrapper sshd invokes in place of eic-authorized-keys.
// ABOUTME: Re-executes the sibling pipeline binary with the same arguments under a wall-clock bound.

use clap::Parser;
use eic_cli::wrapper::{
    self, TerminationSignals, DEFAULT_ROOT_PARENT, EXIT_FAILURE, EXIT_MISSING_PROGRAM, PIPELINE_BIN,
};
use eic_core::config::WORKSPACE_ROOT_ENV;
use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "eic-run")]
#[command(about = "Run eic-authorized-keys with a wall-clock timeout")]
#[command(version)]
struct Cli {
    /// Seconds before the lookup is abandoned and no keys are reported
    #[arg(long, env = "EIC_RUN_TIMEOUT_SECS", default_value_t = wrapper::DEFAULT_TIMEOUT.as_secs())]
    timeout_secs: u64,

    /// Arguments passed through to eic-authorized-keys
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<OsString>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    eic_log::init();
    let cli = Cli::parse();

    let program = match wrapper::sibling_binary(PIPELINE_BIN) {
        Ok(program) => program,
        Err(e) => {
            tracing::warn!(error = %e, "cannot locate pipeline binary");
            std::process::exit(EXIT_MISSING_PROGRAM);
        }
    };

    let mut signals = match TerminationSignals::install() {
        Ok(signals) => signals,
        Err(e) => {
            tracing::warn!(error = %e, "cannot listen for termination signals");
            std::process::exit(EXIT_FAILURE);
        }
    };

    let root_parent = std::env::var_os(WORKSPACE_ROOT_ENV)
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ROOT_PARENT));

    let code = wrapper::supervise(
        &program,
        &cli.args,
        Duration::from_secs(cli.timeout_secs),
        &root_parent,
        signals.recv(),
    )
    .await;
    std::process::exit(code);
}
