use tracing_subscriber::EnvFilter;

use crate::types::CommandOutput;

/// Log level used when `RUST_LOG` is not set
pub fn default_log_level(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Install the stderr subscriber. `RUST_LOG` wins over `-v`.
pub fn init_logging(verbose: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_log_level(verbose)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Output result in JSON or text format
pub fn output_result(result: CommandOutput, json_format: bool) {
    if json_format {
        if let Ok(json) = serde_json::to_string_pretty(&result) {
            println!("{}", json);
        } else {
            eprintln!("Error serializing JSON output");
        }
        return;
    }

    if !result.success {
        eprintln!("✗ Error: {}", result.message);
        return;
    }

    println!("✓ {}", result.message);

    if let Some(memory) = result.memory {
        println!("  Page size: {} bytes", memory.page_size);
        println!("  Page locking: {}", yes_no(memory.lock_available));
        println!("  Protection transitions: {}", yes_no(memory.protect_available));
        println!("  Guard checks: {}", if memory.guard_checks { "on" } else { "off" });
        println!("  Lock policy: {}", memory.lock_policy);
    }

    if let Some(len) = result.secret_len {
        println!("  Length: {} bytes", len);
    }

    for check in &result.checks {
        println!("  passed: {}", check);
    }

    for warning in &result.warnings {
        println!("  warning: {}", warning);
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "available"
    } else {
        "unavailable"
    }
}
