use std::io::{self, Cursor};
use std::num::NonZeroUsize;

use anyhow::{Context, Result};
use zeroize::Zeroize;

use pwledger_core::{
    guard_checks_enabled, lock_policy, memory_status, prompt_secret, read_secret, Protection,
    Secret,
};

use crate::error::CliError;
use crate::types::{CommandOutput, MemoryReport};

const PATTERN: &[u8; 32] = b"pwledger-self-test-pattern-32byt";

/// Report allocator capabilities
pub fn doctor(require_mlock: bool) -> CommandOutput {
    let status = memory_status();
    let memory = MemoryReport::new(status, guard_checks_enabled(), lock_policy());

    let mut warnings = Vec::new();
    if !status.lock_available && !require_mlock {
        warnings.push("pages cannot be locked; secrets may reach swap".to_string());
    }
    if !status.protect_available {
        warnings.push("protection transitions are unavailable".to_string());
    }

    let message = if status.is_hardened() {
        "Hardened memory fully available"
    } else {
        "Hardened memory partially available"
    };

    tracing::info!(?status, "memory status probed");

    CommandOutput {
        memory: Some(memory),
        warnings,
        ..CommandOutput::success(message)
    }
}

/// Capture a secret from the keyboard and report only its length
pub fn capture(max_len: NonZeroUsize, confirm: bool) -> Result<CommandOutput> {
    let secret = prompt_secret("Enter secret: ", max_len).context("Failed to read secret")?;

    if confirm {
        let again = prompt_secret("Confirm secret: ", max_len)
            .context("Failed to read secret confirmation")?;

        if !secret.ct_eq(&again) {
            return Err(CliError::ConfirmationMismatch.into());
        }
    }

    tracing::info!(len = secret.len(), locked = secret.is_locked(), "secret captured");

    Ok(CommandOutput {
        secret_len: Some(secret.len()),
        ..CommandOutput::success(format!("Captured {}-byte secret", secret.len()))
    })
}

fn check(name: &'static str, passed: bool, checks: &mut Vec<&'static str>) -> Result<(), CliError> {
    if !passed {
        return Err(CliError::SelfTest(name));
    }
    tracing::debug!(check = name, "self-test check passed");
    checks.push(name);
    Ok(())
}

/// Run the store, relocate, wipe scenario against real guarded memory
pub fn self_test() -> Result<CommandOutput> {
    let mut checks = Vec::new();
    let len = NonZeroUsize::new(PATTERN.len()).ok_or(CliError::SelfTest("construct"))?;

    let mut first = Secret::new(len);
    check(
        "construct",
        first.len() == PATTERN.len() && first.protection() == Protection::NoAccess,
        &mut checks,
    )?;
    check("starts zeroed", first.with_read_access(|view| view.iter().all(|&b| b == 0)), &mut checks)?;

    first.with_write_access(|view| view.copy_from_slice(PATTERN));
    check("write then read", first.with_read_access(|view| view == PATTERN), &mut checks)?;
    check("locked after access", first.protection() == Protection::NoAccess, &mut checks)?;

    let mut second = first.relocate();
    check("relocate empties source", first.len() == 0, &mut checks)?;
    check(
        "relocate keeps contents",
        second.len() == PATTERN.len() && second.with_read_access(|view| view == PATTERN),
        &mut checks,
    )?;
    drop(first);

    let mut copy = *PATTERN;
    let twin = Secret::take_from(&mut copy).ok_or(CliError::SelfTest("take from slice"))?;
    check("take from slice", copy.iter().all(|&b| b == 0), &mut checks)?;
    check("constant-time equality", second.ct_eq(&twin), &mut checks)?;

    second.zeroize();
    check("zeroize", second.with_read_access(|view| view.iter().all(|&b| b == 0)), &mut checks)?;
    check("differs after zeroize", !second.ct_eq(&twin), &mut checks)?;
    drop(second);
    drop(twin);

    let typed = Cursor::new(b"pw\x7fass\n".to_vec());
    let captured = read_secret(typed, io::sink(), len).context("Self-test capture failed")?;
    check("capture", captured.with_read_access(|view| view == b"pass"), &mut checks)?;

    Ok(CommandOutput {
        checks,
        ..CommandOutput::success("All self-test checks passed")
    })
}
