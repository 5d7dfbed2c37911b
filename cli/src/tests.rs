use clap::{CommandFactory, Parser};

use crate::error::CliError;
use crate::types::{CommandOutput, MemoryReport};
use crate::utils::default_log_level;
use crate::{commands, parse_max_len, Cli, Commands};
use pwledger_core::{LockPolicy, MemoryStatus, MAX_CAPTURE_LEN};

#[test]
fn test_cli_definition_is_consistent() {
    Cli::command().debug_assert();
}

#[test]
fn test_parse_capture_arguments() {
    let cli = Cli::try_parse_from(["pwledger", "--json", "capture", "--max-len", "64", "--confirm"]).unwrap();

    assert!(cli.json);
    match cli.command {
        Commands::Capture(args) => {
            assert_eq!(args.max_len.get(), 64);
            assert!(args.confirm);
        }
        other => panic!("unexpected command {:?}", other),
    }
}

#[test]
fn test_capture_defaults() {
    let cli = Cli::try_parse_from(["pwledger", "capture"]).unwrap();

    match cli.command {
        Commands::Capture(args) => {
            assert_eq!(args.max_len.get(), pwledger_core::DEFAULT_MAX_LEN);
            assert!(!args.confirm);
        }
        other => panic!("unexpected command {:?}", other),
    }
}

#[test]
fn test_zero_max_len_is_rejected() {
    assert!(Cli::try_parse_from(["pwledger", "capture", "--max-len", "0"]).is_err());
}

#[test]
fn test_max_len_is_bounded() {
    let at_cap = MAX_CAPTURE_LEN.to_string();
    let over_cap = (MAX_CAPTURE_LEN + 1).to_string();

    assert!(Cli::try_parse_from(["pwledger", "capture", "--max-len", at_cap.as_str()]).is_ok());
    assert!(Cli::try_parse_from(["pwledger", "capture", "--max-len", over_cap.as_str()]).is_err());
    assert!(Cli::try_parse_from(["pwledger", "capture", "--max-len", "100000000000000"]).is_err());
}

#[test]
fn test_parse_max_len_messages() {
    assert_eq!(parse_max_len("64").unwrap().get(), 64);
    assert!(parse_max_len("65537").unwrap_err().contains("at most 65536"));
    assert!(parse_max_len("abc").is_err());
}

#[test]
fn test_verbosity_maps_to_log_level() {
    assert_eq!(default_log_level(0), "warn");
    assert_eq!(default_log_level(1), "info");
    assert_eq!(default_log_level(2), "debug");
    assert_eq!(default_log_level(7), "trace");
}

#[test]
fn test_failure_output_serialization() {
    let output = CommandOutput::failure("secrets do not match".to_string());
    let json = serde_json::to_value(&output).unwrap();

    assert_eq!(json["success"], false);
    assert_eq!(json["error"], "secrets do not match");
    assert!(json.get("memory").is_none());
    assert!(json.get("checks").is_none());
}

#[test]
fn test_memory_report_serialization() {
    let status = MemoryStatus {
        page_size: 4096,
        lock_available: false,
        protect_available: true,
    };
    let report = MemoryReport::new(status, true, LockPolicy::BestEffort);
    let json = serde_json::to_value(report).unwrap();

    assert_eq!(json["page_size"], 4096);
    assert_eq!(json["hardened"], false);
    assert_eq!(json["lock_policy"], "best-effort");
}

#[test]
fn test_doctor_reports_status() {
    let output = commands::doctor(false);

    assert!(output.success);
    let memory = output.memory.unwrap();
    assert!(memory.page_size.is_power_of_two());
    assert_eq!(output.warnings.is_empty(), memory.hardened);
}

#[test]
fn test_self_test_passes() {
    let output = commands::self_test().unwrap();

    assert!(output.success);
    assert!(output.checks.contains(&"relocate empties source"));
    assert!(output.checks.contains(&"capture"));
}

#[test]
fn test_error_messages() {
    assert_eq!(CliError::ConfirmationMismatch.to_string(), "secrets do not match");
    assert_eq!(CliError::SelfTest("zeroize").to_string(), "self-test check 'zeroize' failed");
}
