use serde::Serialize;

use pwledger_core::{LockPolicy, MemoryStatus};

/// Allocator capabilities as reported by `doctor`
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryReport {
    pub page_size: usize,
    pub lock_available: bool,
    pub protect_available: bool,
    pub hardened: bool,
    pub guard_checks: bool,
    pub lock_policy: &'static str,
}

impl MemoryReport {
    pub fn new(status: MemoryStatus, guard_checks: bool, policy: LockPolicy) -> Self {
        Self {
            page_size: status.page_size,
            lock_available: status.lock_available,
            protect_available: status.protect_available,
            hardened: status.is_hardened(),
            guard_checks,
            lock_policy: match policy {
                LockPolicy::BestEffort => "best-effort",
                LockPolicy::Required => "required",
            },
        }
    }
}

/// Structured output for JSON mode
#[derive(Serialize, Debug, Default)]
pub struct CommandOutput {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_len: Option<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub checks: Vec<&'static str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandOutput {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn failure(message: String) -> Self {
        Self {
            success: false,
            error: Some(message.clone()),
            message,
            ..Self::default()
        }
    }
}
