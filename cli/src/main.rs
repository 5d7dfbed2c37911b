// cli/src/main.rs
use clap::{ArgAction, Args, Parser, Subcommand};
use std::num::NonZeroUsize;
use std::process;

use pwledger_core::{memory_status, set_lock_policy, LockPolicy, MAX_CAPTURE_LEN};

mod commands;
mod error;
mod types;
mod utils;

#[cfg(test)]
mod tests;

use crate::error::CliError;
use crate::types::CommandOutput;
use crate::utils::{init_logging, output_result};

/// pwledger - guarded secret handling from the command line
#[derive(Parser, Debug)]
#[command(name = "pwledger")]
#[command(version)]
#[command(about = "Capture and inspect secrets held in guarded memory")]
#[command(long_about = "Secrets are kept in page-locked, guard-paged, canary-tagged memory \
that is inaccessible except while in use, and is wiped before release")]
#[command(propagate_version = true)]
pub(crate) struct Cli {
    /// Enable verbose output (repeat for more)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub(crate) verbose: u8,

    /// Enable JSON output for programmatic usage
    #[arg(long, global = true)]
    pub(crate) json: bool,

    /// Refuse to run if secret pages cannot be locked in RAM
    #[arg(long, global = true, env = "PWLEDGER_REQUIRE_MLOCK")]
    pub(crate) require_mlock: bool,

    #[command(subcommand)]
    pub(crate) command: Commands,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Commands {
    /// Report what the hardened allocator can do on this host
    Doctor,

    /// Read a secret from the keyboard into guarded memory
    Capture(CaptureArgs),

    /// Exercise the full secret lifecycle and report the result
    SelfTest,
}

#[derive(Args, Debug, Clone)]
pub(crate) struct CaptureArgs {
    /// Maximum number of bytes accepted (1 to 65536)
    #[arg(long, default_value = "1024", value_parser = parse_max_len)]
    pub(crate) max_len: NonZeroUsize,

    /// Ask twice and require both entries to match
    #[arg(long)]
    pub(crate) confirm: bool,
}

pub(crate) fn parse_max_len(value: &str) -> Result<NonZeroUsize, String> {
    let len: NonZeroUsize = value
        .parse()
        .map_err(|e| format!("expected a positive byte count: {}", e))?;

    if len.get() > MAX_CAPTURE_LEN {
        return Err(format!("must be at most {} bytes", MAX_CAPTURE_LEN));
    }

    Ok(len)
}

fn run(cli: &Cli) -> anyhow::Result<CommandOutput> {
    if cli.require_mlock {
        if !memory_status().lock_available {
            return Err(CliError::LockUnavailable.into());
        }
        set_lock_policy(LockPolicy::Required);
    }

    match &cli.command {
        Commands::Doctor => Ok(commands::doctor(cli.require_mlock)),
        Commands::Capture(args) => commands::capture(args.max_len, args.confirm),
        Commands::SelfTest => commands::self_test(),
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(&cli) {
        Ok(output) => output_result(output, cli.json),
        Err(e) => {
            let message = format!("{:#}", e);
            tracing::debug!(error = %message, "command failed");

            if cli.json {
                output_result(CommandOutput::failure(message), true);
            } else {
                eprintln!("Error: {}", message);
            }

            process::exit(1);
        }
    }
}
