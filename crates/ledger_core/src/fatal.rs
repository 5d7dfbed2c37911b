//! Fail-fast reporting.
//!
//! A secret whose protection state is in doubt is never handed back to the
//! caller. Every condition below ends the process with `abort`, which skips
//! unwinding and destructors that could touch the pages again.

use std::panic::Location;

use thiserror::Error;

use crate::types::MemoryError;

/// A condition that makes continuing unsafe.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    /// An allocator primitive failed.
    #[error("hardened memory failure: {0}")]
    Memory(#[from] MemoryError),

    /// A second access guard was opened while another was live.
    #[error("overlapping access guards on the same secret ({live} already live)")]
    OverlappingGuard {
        /// Guards that were live when the new one was requested.
        live: usize,
    },

    /// A secret was relocated while a guard was still live against it.
    #[error("secret relocated while {live} access guard(s) were live")]
    RelocatedWhileGuarded {
        /// Guards that were live at the time.
        live: usize,
    },
}

/// Whether the overlapping-guard and relocation checks are compiled in.
///
/// On in debug builds, and in release builds with the `guard-checks` feature.
pub const fn guard_checks_enabled() -> bool {
    cfg!(any(debug_assertions, feature = "guard-checks"))
}

/// Report `violation` and terminate the process.
#[cold]
#[inline(never)]
pub(crate) fn abort(violation: Violation, location: Option<&'static Location<'static>>) -> ! {
    match location {
        Some(at) => {
            tracing::error!(%violation, %at, "secure memory contract violated, aborting");
            eprintln!("pwledger: fatal: {violation} (at {at})");
        }
        None => {
            tracing::error!(%violation, "secure memory contract violated, aborting");
            eprintln!("pwledger: fatal: {violation}");
        }
    }

    std::process::abort()
}
